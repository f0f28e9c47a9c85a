//! Primitive store client.
//!
//! The [`Datastore`] trait is the narrow contract the query engine consumes:
//! batched get/put/delete, id allocation, batched primitive queries and
//! optimistic transactions. Two in-process backends implement it:
//! [`MemoryDatastore`] and the sled-backed [`SledDatastore`].

mod config;
mod cursor;
mod engine;
mod local;
mod memory;
mod record;
mod transaction;

use std::fmt;

use kinddb_proto::{Entity, Key, PropertyFilter, QueryDefinition, SortOrder};

use crate::error::Error;

pub use config::StorageConfig;
pub use cursor::CursorCodec;
pub use engine::SledDatastore;
pub use memory::MemoryDatastore;
pub use record::StoredRecord;

/// Identity of an open store transaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransactionId(pub Vec<u8>);

impl TransactionId {
    /// Hex encoding of the id.
    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// One primitive query as sent to the store.
///
/// `orders` is the physical sort order, already reconciled with `distinct`.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    pub kind: String,
    pub filters: Vec<PropertyFilter>,
    pub orders: Vec<(String, SortOrder)>,
    pub distinct: Option<Vec<String>>,
    /// Maximum number of results; 0 means unlimited.
    pub limit: usize,
    pub start_cursor: Option<String>,
    pub end_cursor: Option<String>,
}

impl QueryRequest {
    /// Build a request from a definition with an explicit limit and physical order.
    pub fn from_definition(
        definition: &QueryDefinition,
        orders: Vec<(String, SortOrder)>,
        limit: usize,
    ) -> Self {
        Self {
            kind: definition.kind.clone(),
            filters: definition.filters.clone(),
            orders,
            distinct: definition.distinct.clone(),
            limit,
            start_cursor: definition.start_cursor.clone(),
            end_cursor: definition.end_cursor.clone(),
        }
    }
}

/// One page of results of a primitive query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryPage {
    pub entities: Vec<Entity>,
    /// Cursor after the last returned entity, `None` once exhausted.
    pub next_cursor: Option<String>,
}

/// Primitive store operations.
///
/// Every method taking a transaction id runs inside that transaction: key
/// reads see its buffered writes and are tracked for conflict detection,
/// writes are buffered until [`commit`](Datastore::commit). Queries observe
/// committed state only.
pub trait Datastore: Send + Sync {
    /// Fetch entities by key; the result is aligned with `keys`.
    fn get_multi(
        &self,
        txn: Option<&TransactionId>,
        keys: &[Key],
    ) -> Result<Vec<Option<Entity>>, Error>;

    /// Upsert entities, completing partial keys. Returns the final keys.
    fn put_multi(
        &self,
        txn: Option<&TransactionId>,
        entities: Vec<Entity>,
    ) -> Result<Vec<Key>, Error>;

    /// Delete entities by key. Missing keys are ignored.
    fn delete_multi(&self, txn: Option<&TransactionId>, keys: &[Key]) -> Result<(), Error>;

    /// Reserve `count` ids for the kind (and parent) of a partial key.
    fn allocate_ids(&self, partial: &Key, count: usize) -> Result<Vec<Key>, Error>;

    /// Execute primitive queries. All requests are submitted together, no
    /// request depends on another's result. The result is aligned with
    /// `requests`.
    fn run_queries(
        &self,
        txn: Option<&TransactionId>,
        requests: &[QueryRequest],
    ) -> Result<Vec<QueryPage>, Error>;

    /// Open a transaction.
    fn begin_transaction(&self) -> Result<TransactionId, Error>;

    /// Commit a transaction. Fails with [`Error::Conflict`] if an entity read
    /// in the transaction changed since it was read.
    fn commit(&self, txn: &TransactionId) -> Result<(), Error>;

    /// Discard a transaction.
    fn rollback(&self, txn: &TransactionId) -> Result<(), Error>;
}
