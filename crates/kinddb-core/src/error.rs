//! Core error types.

use thiserror::Error;

/// Core engine errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Storage layer error.
    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    /// Protocol error (key decoding, kind mismatch).
    #[error("protocol error: {0}")]
    Protocol(#[from] kinddb_proto::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Deserialization error.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// Unknown operator or otherwise unparsable filter expression.
    #[error("malformed filter: {0}")]
    MalformedFilter(String),

    /// A second `IN` or `!=` filter was added to a query.
    #[error("only one IN or != filter may be used per query")]
    MultipleFanOut,

    /// An `IN` filter was given a scalar value.
    #[error("IN filter on '{field}' requires a list value")]
    InvalidInValue { field: String },

    /// Cursor operation not valid for this query shape.
    #[error("cursor misuse: {0}")]
    CursorMisuse(String),

    /// Fetch limit outside the allowed range.
    #[error("limit {limit} out of range: must be greater than 0 and below {max}")]
    LimitOutOfRange { limit: usize, max: usize },

    /// Operation needs an attached field model.
    #[error("query has no field model attached")]
    ModelRequired,

    /// A field handler found the requested constraint impossible to satisfy.
    #[error("unsatisfiable constraint: {0}")]
    Unsatisfiable(String),

    /// Tampered or foreign cursor.
    #[error("invalid cursor")]
    InvalidCursor,

    /// Write of a name-typed key whose name is all digits.
    #[error("cannot store an entity with digit-only string key name '{0}'")]
    DigitOnlyName(String),

    /// Write of a key, or an ancestor, with an integer id below 1.
    #[error("integer key ids must be positive, got {0}")]
    NonPositiveId(i64),

    /// Operation needs a complete key.
    #[error("incomplete key for kind '{0}'")]
    IncompleteKey(String),

    /// Request the store cannot execute as a single primitive query.
    #[error("unsupported query: {0}")]
    UnsupportedQuery(String),

    /// Optimistic concurrency conflict at commit time.
    #[error("transaction conflict")]
    Conflict,

    /// Operation requires an active transaction.
    #[error("not inside a transaction")]
    NotInTransaction,

    /// Transaction bookkeeping error.
    #[error("transaction error: {0}")]
    Transaction(String),

    /// Full-text search was requested inside a transaction.
    #[error("fulltext search cannot run inside a transaction")]
    FulltextInTransaction,

    /// Full-text search backend error.
    #[error("search error: {0}")]
    Search(String),
}
