//! Optimistic transaction bookkeeping shared by the local backends.
//!
//! Writes are buffered per transaction and applied atomically on commit.
//! Every key read inside a transaction is tracked with the version it had
//! (0 when absent); commit fails if any of those versions changed.

use std::collections::HashMap;

use dashmap::DashMap;
use kinddb_proto::{Entity, Key};

use super::TransactionId;
use crate::error::Error;

/// Buffered state of one open transaction.
#[derive(Debug, Default)]
pub(crate) struct PendingTransaction {
    /// Versions observed by reads (0 = absent).
    read_versions: HashMap<Key, u64>,
    /// Buffered writes; `None` is a delete.
    writes: HashMap<Key, Option<Entity>>,
    /// Write order, for deterministic application.
    write_order: Vec<Key>,
}

impl PendingTransaction {
    /// Buffered write for a key, if this transaction wrote it.
    pub(crate) fn buffered(&self, key: &Key) -> Option<&Option<Entity>> {
        self.writes.get(key)
    }

    /// Track the version a read observed. The first observation wins.
    pub(crate) fn record_read(&mut self, key: &Key, version: u64) {
        self.read_versions.entry(key.clone()).or_insert(version);
    }

    /// Buffer an upsert.
    pub(crate) fn buffer_put(&mut self, entity: Entity) {
        let key = entity.key().clone();
        if self.writes.insert(key.clone(), Some(entity)).is_none() {
            self.write_order.push(key);
        }
    }

    /// Buffer a delete.
    pub(crate) fn buffer_delete(&mut self, key: &Key) {
        if self.writes.insert(key.clone(), None).is_none() {
            self.write_order.push(key.clone());
        }
    }

    /// Observed read versions.
    pub(crate) fn read_versions(&self) -> &HashMap<Key, u64> {
        &self.read_versions
    }

    /// Buffered writes in the order they were first issued.
    pub(crate) fn into_writes(mut self) -> Vec<(Key, Option<Entity>)> {
        self.write_order
            .into_iter()
            .filter_map(|key| self.writes.remove(&key).map(|write| (key, write)))
            .collect()
    }
}

/// Open transactions of one backend.
#[derive(Debug, Default)]
pub(crate) struct TransactionTable {
    open: DashMap<TransactionId, PendingTransaction>,
}

impl TransactionTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Register a new transaction under a backend-chosen sequence number.
    pub(crate) fn begin(&self, sequence: u64) -> TransactionId {
        let id = TransactionId(sequence.to_be_bytes().to_vec());
        self.open.insert(id.clone(), PendingTransaction::default());
        id
    }

    /// Run `f` against the pending state of an open transaction.
    pub(crate) fn with<R>(
        &self,
        txn: &TransactionId,
        f: impl FnOnce(&mut PendingTransaction) -> R,
    ) -> Result<R, Error> {
        let mut pending = self
            .open
            .get_mut(txn)
            .ok_or_else(|| Error::Transaction(format!("unknown transaction {}", txn)))?;
        Ok(f(&mut pending))
    }

    /// Remove a transaction for commit.
    pub(crate) fn take(&self, txn: &TransactionId) -> Result<PendingTransaction, Error> {
        self.open
            .remove(txn)
            .map(|(_, pending)| pending)
            .ok_or_else(|| Error::Transaction(format!("unknown transaction {}", txn)))
    }

    /// Number of open transactions.
    pub(crate) fn len(&self) -> usize {
        self.open.len()
    }
}
