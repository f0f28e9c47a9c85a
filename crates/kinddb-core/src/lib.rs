//! KindDB Core - Query translation, fan-out merge and transaction helpers.
//!
//! This crate layers a richer query surface over a schemaless entity store
//! whose native queries only support conjunctions of simple comparisons.
//!
//! # Modules
//!
//! - [`session`] - Per-request session: store handle, access log, transaction state
//! - [`query`] - Logical queries, fan-out decomposition, merge and iteration
//! - [`transaction`] - Transaction runner, get-or-insert and success markers
//! - [`model`] - Field-model contract for external filters and full-text search
//! - [`storage`] - The primitive store contract and its in-process backends
//! - [`access_log`] - Keys and kinds touched while serving a request

pub mod access_log;
pub mod config;
pub mod error;
pub mod model;
pub mod query;
pub mod session;
pub mod storage;
pub mod transaction;

pub use access_log::{AccessEntry, AccessLog, AccessSet};
pub use config::EngineConfig;
pub use error::Error;
pub use model::{
    FetchResult, FieldHandler, FieldModel, ModelInstance, ModelSchema, PropertyField,
    PropertyKind, RawFilters, SearchAdapter,
};
pub use query::{
    FilterEvaluator, FilterHook, FilterRequest, HookOutcome, LimitFn, MergeFn, OrderHook, Query,
    QueryIter,
};
pub use session::Session;
pub use storage::{
    CursorCodec, Datastore, MemoryDatastore, QueryPage, QueryRequest, SledDatastore,
    StorageConfig, StoredRecord, TransactionId,
};

/// Re-export protocol types.
pub use kinddb_proto as proto;
