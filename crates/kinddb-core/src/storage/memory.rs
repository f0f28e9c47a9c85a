//! In-memory store backend.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, AtomicU64, AtomicUsize, Ordering};

use kinddb_proto::{Entity, Key};
use parking_lot::RwLock;
use tracing::{debug, instrument};

use super::cursor::CursorCodec;
use super::local::execute_request;
use super::transaction::TransactionTable;
use super::{Datastore, QueryPage, QueryRequest, TransactionId};
use crate::error::Error;

const DEFAULT_CURSOR_SECRET: &str = "kinddb-memory-cursor";

#[derive(Debug, Clone)]
struct Versioned {
    entity: Entity,
    version: u64,
}

type KindTable = BTreeMap<Key, Versioned>;

/// A [`Datastore`] keeping everything in process memory.
///
/// Entities are grouped by kind. Transactions are optimistic: commit takes
/// the write lock, verifies every version read inside the transaction and
/// applies the buffered writes.
#[derive(Debug)]
pub struct MemoryDatastore {
    kinds: RwLock<HashMap<String, KindTable>>,
    transactions: TransactionTable,
    codec: CursorCodec,
    next_id: AtomicI64,
    next_version: AtomicU64,
    next_transaction: AtomicU64,
    writes: AtomicUsize,
}

impl Default for MemoryDatastore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDatastore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::with_cursor_secret(DEFAULT_CURSOR_SECRET)
    }

    /// Create an empty store signing cursors with `secret`.
    pub fn with_cursor_secret(secret: &str) -> Self {
        Self {
            kinds: RwLock::new(HashMap::new()),
            transactions: TransactionTable::new(),
            codec: CursorCodec::new(secret),
            next_id: AtomicI64::new(1),
            next_version: AtomicU64::new(1),
            next_transaction: AtomicU64::new(1),
            writes: AtomicUsize::new(0),
        }
    }

    /// Number of entity writes (puts and deletes) applied so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Number of stored entities.
    pub fn len(&self) -> usize {
        self.kinds.read().values().map(BTreeMap::len).sum()
    }

    /// Whether the store holds no entities.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn complete_key(&self, key: &Key) -> Key {
        if key.is_partial() {
            key.completed(self.next_id.fetch_add(1, Ordering::SeqCst))
        } else {
            key.clone()
        }
    }

    fn read(&self, key: &Key) -> Option<Versioned> {
        self.kinds
            .read()
            .get(key.kind())
            .and_then(|table| table.get(key))
            .cloned()
    }

    fn apply(&self, kinds: &mut HashMap<String, KindTable>, key: Key, write: Option<Entity>) {
        match write {
            Some(entity) => {
                let version = self.next_version.fetch_add(1, Ordering::SeqCst);
                kinds
                    .entry(key.kind().to_string())
                    .or_default()
                    .insert(key, Versioned { entity, version });
            }
            None => {
                if let Some(table) = kinds.get_mut(key.kind()) {
                    table.remove(&key);
                }
            }
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
    }
}

fn require_complete(key: &Key) -> Result<(), Error> {
    if key.is_partial() {
        return Err(Error::IncompleteKey(key.kind().to_string()));
    }
    Ok(())
}

impl Datastore for MemoryDatastore {
    fn get_multi(
        &self,
        txn: Option<&TransactionId>,
        keys: &[Key],
    ) -> Result<Vec<Option<Entity>>, Error> {
        keys.iter().try_for_each(require_complete)?;

        let Some(txn) = txn else {
            return Ok(keys
                .iter()
                .map(|key| self.read(key).map(|stored| stored.entity))
                .collect());
        };

        self.transactions.with(txn, |pending| {
            keys.iter()
                .map(|key| {
                    if let Some(buffered) = pending.buffered(key) {
                        return buffered.clone();
                    }
                    let stored = self.read(key);
                    pending.record_read(key, stored.as_ref().map_or(0, |s| s.version));
                    stored.map(|s| s.entity)
                })
                .collect()
        })
    }

    fn put_multi(
        &self,
        txn: Option<&TransactionId>,
        entities: Vec<Entity>,
    ) -> Result<Vec<Key>, Error> {
        let entities: Vec<Entity> = entities
            .into_iter()
            .map(|mut entity| {
                let key = self.complete_key(entity.key());
                entity.set_key(key);
                entity
            })
            .collect();
        let keys: Vec<Key> = entities.iter().map(|e| e.key().clone()).collect();

        match txn {
            Some(txn) => self.transactions.with(txn, |pending| {
                entities.into_iter().for_each(|entity| pending.buffer_put(entity))
            })?,
            None => {
                let mut kinds = self.kinds.write();
                for entity in entities {
                    self.apply(&mut kinds, entity.key().clone(), Some(entity));
                }
            }
        }
        Ok(keys)
    }

    fn delete_multi(&self, txn: Option<&TransactionId>, keys: &[Key]) -> Result<(), Error> {
        keys.iter().try_for_each(require_complete)?;
        match txn {
            Some(txn) => self
                .transactions
                .with(txn, |pending| keys.iter().for_each(|key| pending.buffer_delete(key))),
            None => {
                let mut kinds = self.kinds.write();
                for key in keys {
                    self.apply(&mut kinds, key.clone(), None);
                }
                Ok(())
            }
        }
    }

    fn allocate_ids(&self, partial: &Key, count: usize) -> Result<Vec<Key>, Error> {
        Ok((0..count)
            .map(|_| partial.completed(self.next_id.fetch_add(1, Ordering::SeqCst)))
            .collect())
    }

    #[instrument(level = "debug", skip_all, fields(requests = requests.len()))]
    fn run_queries(
        &self,
        _txn: Option<&TransactionId>,
        requests: &[QueryRequest],
    ) -> Result<Vec<QueryPage>, Error> {
        let kinds = self.kinds.read();
        requests
            .iter()
            .map(|request| {
                let candidates = kinds
                    .get(&request.kind)
                    .into_iter()
                    .flat_map(|table| table.values().map(|stored| stored.entity.clone()));
                let page = execute_request(request, candidates, &self.codec)?;
                debug!(kind = %request.kind, results = page.entities.len(), "query executed");
                Ok(page)
            })
            .collect()
    }

    fn begin_transaction(&self) -> Result<TransactionId, Error> {
        let sequence = self.next_transaction.fetch_add(1, Ordering::SeqCst);
        Ok(self.transactions.begin(sequence))
    }

    #[instrument(level = "debug", skip(self), fields(txn = %txn))]
    fn commit(&self, txn: &TransactionId) -> Result<(), Error> {
        let pending = self.transactions.take(txn)?;

        let mut kinds = self.kinds.write();
        for (key, seen) in pending.read_versions() {
            let current = kinds
                .get(key.kind())
                .and_then(|table| table.get(key))
                .map_or(0, |stored| stored.version);
            if current != *seen {
                debug!(key = %key, "commit conflict");
                return Err(Error::Conflict);
            }
        }
        for (key, write) in pending.into_writes() {
            self.apply(&mut kinds, key, write);
        }
        Ok(())
    }

    fn rollback(&self, txn: &TransactionId) -> Result<(), Error> {
        self.transactions.take(txn).map(|_| ())
    }
}
