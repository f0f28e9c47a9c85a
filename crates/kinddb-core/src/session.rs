//! Sessions: one logical unit of work against a store.
//!
//! A [`Session`] bundles the shared store handle, the engine configuration,
//! the unit of work's [`AccessLog`] and its current transaction. Cloning a
//! session yields another handle to the same unit of work.

use std::sync::Arc;

use kinddb_proto::{Entity, Key, KeyInput};
use parking_lot::Mutex;
use tracing::debug;

use crate::access_log::{AccessLog, AccessSet};
use crate::config::EngineConfig;
use crate::error::Error;
use crate::storage::{Datastore, QueryPage, QueryRequest, TransactionId};
use crate::transaction::TransactionState;

/// Handle to one unit of work.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    store: Arc<dyn Datastore>,
    config: EngineConfig,
    access_log: AccessLog,
    transaction: Mutex<Option<TransactionState>>,
}

impl Session {
    /// Create a session over a store.
    pub fn new(store: Arc<dyn Datastore>, config: EngineConfig) -> Self {
        let access_log = AccessLog::new(config.internal_kind_prefix.clone());
        Self {
            inner: Arc::new(SessionInner {
                store,
                config,
                access_log,
                transaction: Mutex::new(None),
            }),
        }
    }

    /// The engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<dyn Datastore> {
        &self.inner.store
    }

    /// The access log of this unit of work.
    pub fn access_log(&self) -> &AccessLog {
        &self.inner.access_log
    }

    /// Save and clear the access log. See [`AccessLog::push`].
    pub fn push_access_log(&self) -> AccessSet {
        self.inner.access_log.push()
    }

    /// Restore the access log. See [`AccessLog::pop`].
    pub fn pop_access_log(&self, outer: Option<AccessSet>) -> AccessSet {
        self.inner.access_log.pop(outer)
    }

    /// Whether a transaction is open on this session.
    pub fn is_in_transaction(&self) -> bool {
        self.inner.transaction.lock().is_some()
    }

    /// Id of the open transaction, if any.
    pub(crate) fn transaction_id(&self) -> Option<TransactionId> {
        self.inner.transaction.lock().as_ref().map(|state| state.id.clone())
    }

    pub(crate) fn transaction_state(&self) -> &Mutex<Option<TransactionState>> {
        &self.inner.transaction
    }

    /// Fetch one entity.
    pub fn get(&self, key: &Key) -> Result<Option<Entity>, Error> {
        Ok(self.get_multi(std::slice::from_ref(key))?.pop().flatten())
    }

    /// Fetch entities; the result is aligned with `keys`.
    pub fn get_multi(&self, keys: &[Key]) -> Result<Vec<Option<Entity>>, Error> {
        for key in keys {
            self.inner.access_log.record_key(key);
        }
        let txn = self.transaction_id();
        self.inner.store.get_multi(txn.as_ref(), keys)
    }

    /// Store one entity, returning its (completed) key.
    pub fn put(&self, entity: Entity) -> Result<Key, Error> {
        self.put_multi(vec![entity])?
            .pop()
            .ok_or_else(|| Error::Transaction("store returned no key".to_string()))
    }

    /// Store entities.
    ///
    /// Name-typed keys whose name is all digits are rejected, as are integer
    /// ids below 1 anywhere in the key path. Long string properties are
    /// excluded from indexing before the write.
    pub fn put_multi(&self, mut entities: Vec<Entity>) -> Result<Vec<Key>, Error> {
        for entity in &mut entities {
            if entity.key().has_digit_only_name() {
                return Err(Error::DigitOnlyName(
                    entity.key().name().unwrap_or_default().to_string(),
                ));
            }
            let mut path = Some(entity.key());
            while let Some(key) = path {
                if let Some(id) = key.id().filter(|id| *id <= 0) {
                    return Err(Error::NonPositiveId(id));
                }
                path = key.parent();
            }
            entity.fix_unindexable_properties(self.inner.config.unindexed_threshold);
            self.inner.access_log.record_key(entity.key());
        }
        let txn = self.transaction_id();
        debug!(count = entities.len(), in_transaction = txn.is_some(), "put");
        self.inner.store.put_multi(txn.as_ref(), entities)
    }

    /// Delete one entity.
    pub fn delete(&self, key: &Key) -> Result<(), Error> {
        self.delete_multi(std::slice::from_ref(key))
    }

    /// Delete entities. Missing keys are ignored.
    pub fn delete_multi(&self, keys: &[Key]) -> Result<(), Error> {
        for key in keys {
            self.inner.access_log.record_key(key);
        }
        let txn = self.transaction_id();
        debug!(count = keys.len(), in_transaction = txn.is_some(), "delete");
        self.inner.store.delete_multi(txn.as_ref(), keys)
    }

    /// Reserve ids for the kind (and parent) of `partial`.
    pub fn allocate_ids(&self, partial: &Key, count: usize) -> Result<Vec<Key>, Error> {
        self.inner.store.allocate_ids(partial, count)
    }

    /// Normalize key material into a key of `target_kind`.
    ///
    /// See [`kinddb_proto::key_helper`].
    pub fn key_helper<'a>(
        &self,
        input: impl Into<KeyInput<'a>>,
        target_kind: &str,
        allowed_kinds: &[&str],
    ) -> Result<Key, Error> {
        Ok(kinddb_proto::key_helper(input, target_kind, allowed_kinds)?)
    }

    /// Execute primitive queries inside the current transaction, if any.
    pub(crate) fn run_queries(&self, requests: &[QueryRequest]) -> Result<Vec<QueryPage>, Error> {
        let txn = self.transaction_id();
        self.inner.store.run_queries(txn.as_ref(), requests)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("config", &self.inner.config)
            .field("in_transaction", &self.is_in_transaction())
            .finish_non_exhaustive()
    }
}
