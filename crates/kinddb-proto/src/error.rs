//! Protocol error types.

use thiserror::Error;

/// Errors raised while building or decoding protocol values.
#[derive(Debug, Error)]
pub enum Error {
    /// Serialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Deserialization failed.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// A key could not be decoded or constructed.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// A key belongs to a different kind than the caller expected.
    #[error("kind mismatch: {actual} != {expected}")]
    KindMismatch { expected: String, actual: String },
}
