//! Sled-backed store backend.

use kinddb_proto::{Entity, Key};
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::{Batch, Db, Tree};
use tracing::{debug, instrument};

use super::cursor::CursorCodec;
use super::local::execute_request;
use super::transaction::TransactionTable;
use super::{Datastore, QueryPage, QueryRequest, StorageConfig, StoredRecord, TransactionId};
use crate::error::Error;

/// Tree name for entity data.
const DATA_TREE: &str = "data";

/// A [`Datastore`] persisting entities in sled.
///
/// Entities live in one tree keyed by `kind \0 encoded-key`, so a kind is a
/// contiguous key range. Ids, versions and transaction ids come from sled's
/// persistent id generator and stay unique across restarts.
pub struct SledDatastore {
    /// The underlying sled database.
    db: Db,

    /// Tree for entity data (kind-prefixed keys -> records).
    data_tree: Tree,

    transactions: TransactionTable,
    codec: CursorCodec,
}

impl SledDatastore {
    /// Open or create a store with the given configuration.
    pub fn open(config: StorageConfig) -> Result<Self, Error> {
        let db = config.to_sled_config().open()?;
        let data_tree = db.open_tree(DATA_TREE)?;

        Ok(Self {
            db,
            data_tree,
            transactions: TransactionTable::new(),
            codec: CursorCodec::new(&config.cursor_secret),
        })
    }

    /// Check if the database was recovered from a previous crash.
    pub fn was_recovered(&self) -> bool {
        self.db.was_recovered()
    }

    /// Flush all pending writes to disk.
    pub fn flush(&self) -> Result<(), Error> {
        self.db.flush()?;
        Ok(())
    }

    fn next_sequence(&self) -> Result<u64, Error> {
        Ok(self.db.generate_id()? + 1)
    }

    fn next_id(&self) -> Result<i64, Error> {
        i64::try_from(self.next_sequence()?)
            .map_err(|_| Error::Transaction("id space exhausted".to_string()))
    }

    fn complete_key(&self, key: &Key) -> Result<Key, Error> {
        if !key.is_partial() {
            return Ok(key.clone());
        }
        Ok(key.completed(self.next_id()?))
    }

    fn read(&self, key: &Key) -> Result<Option<StoredRecord>, Error> {
        match self.data_tree.get(storage_key(key))? {
            Some(bytes) => Ok(Some(StoredRecord::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    fn scan_kind(&self, kind: &str) -> Result<Vec<Entity>, Error> {
        self.data_tree
            .scan_prefix(kind_prefix(kind))
            .map(|item| {
                let (_, bytes) = item?;
                StoredRecord::from_bytes(&bytes)?.entity()
            })
            .collect()
    }
}

impl std::fmt::Debug for SledDatastore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SledDatastore")
            .field("entities", &self.data_tree.len())
            .finish_non_exhaustive()
    }
}

/// Get the prefix for scanning all entities of a kind.
fn kind_prefix(kind: &str) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(kind.len() + 1);
    prefix.extend_from_slice(kind.as_bytes());
    prefix.push(0); // Null separator
    prefix
}

/// Get the data tree key of an entity key.
fn storage_key(key: &Key) -> Vec<u8> {
    let mut bytes = kind_prefix(key.kind());
    bytes.extend_from_slice(key.encode().as_bytes());
    bytes
}

fn require_complete(key: &Key) -> Result<(), Error> {
    if key.is_partial() {
        return Err(Error::IncompleteKey(key.kind().to_string()));
    }
    Ok(())
}

impl Datastore for SledDatastore {
    fn get_multi(
        &self,
        txn: Option<&TransactionId>,
        keys: &[Key],
    ) -> Result<Vec<Option<Entity>>, Error> {
        keys.iter().try_for_each(require_complete)?;

        let Some(txn) = txn else {
            return keys
                .iter()
                .map(|key| self.read(key)?.map(|record| record.entity()).transpose())
                .collect();
        };

        self.transactions.with(txn, |pending| {
            keys.iter()
                .map(|key| {
                    if let Some(buffered) = pending.buffered(key) {
                        return Ok(buffered.clone());
                    }
                    let record = self.read(key)?;
                    pending.record_read(key, record.as_ref().map_or(0, |r| r.version));
                    record.map(|r| r.entity()).transpose()
                })
                .collect()
        })?
    }

    fn put_multi(
        &self,
        txn: Option<&TransactionId>,
        entities: Vec<Entity>,
    ) -> Result<Vec<Key>, Error> {
        let mut completed = Vec::with_capacity(entities.len());
        for mut entity in entities {
            let key = self.complete_key(entity.key())?;
            entity.set_key(key);
            completed.push(entity);
        }
        let keys: Vec<Key> = completed.iter().map(|e| e.key().clone()).collect();

        match txn {
            Some(txn) => self.transactions.with(txn, |pending| {
                completed.into_iter().for_each(|entity| pending.buffer_put(entity))
            })?,
            None => {
                let mut batch = Batch::default();
                for entity in &completed {
                    let record = StoredRecord::from_entity(entity, self.next_sequence()?)?;
                    batch.insert(storage_key(entity.key()), record.to_bytes()?);
                }
                self.data_tree.apply_batch(batch)?;
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
                let mut batch = Batch::default();
                for key in keys {
                    batch.remove(storage_key(key));
                }
                self.data_tree.apply_batch(batch)?;
                Ok(())
            }
        }
    }

    fn allocate_ids(&self, partial: &Key, count: usize) -> Result<Vec<Key>, Error> {
        (0..count)
            .map(|_| Ok(partial.completed(self.next_id()?)))
            .collect()
    }

    #[instrument(level = "debug", skip_all, fields(requests = requests.len()))]
    fn run_queries(
        &self,
        _txn: Option<&TransactionId>,
        requests: &[QueryRequest],
    ) -> Result<Vec<QueryPage>, Error> {
        requests
            .iter()
            .map(|request| {
                let candidates = self.scan_kind(&request.kind)?;
                let page = execute_request(request, candidates, &self.codec)?;
                debug!(kind = %request.kind, results = page.entities.len(), "query executed");
                Ok(page)
            })
            .collect()
    }

    fn begin_transaction(&self) -> Result<TransactionId, Error> {
        Ok(self.transactions.begin(self.next_sequence()?))
    }

    #[instrument(level = "debug", skip(self), fields(txn = %txn))]
    fn commit(&self, txn: &TransactionId) -> Result<(), Error> {
        let pending = self.transactions.take(txn)?;

        let reads: Vec<(Vec<u8>, u64)> = pending
            .read_versions()
            .iter()
            .map(|(key, version)| (storage_key(key), *version))
            .collect();
        let mut writes: Vec<(Vec<u8>, Option<Vec<u8>>)> = Vec::new();
        for (key, write) in pending.into_writes() {
            let value = match write {
                Some(entity) => {
                    let record = StoredRecord::from_entity(&entity, self.next_sequence()?)?;
                    Some(record.to_bytes()?)
                }
                None => None,
            };
            writes.push((storage_key(&key), value));
        }

        // Execute the version checks and all writes in one sled transaction
        let result: Result<(), TransactionError<Error>> = self.data_tree.transaction(|tx| {
            for (key, seen) in &reads {
                let current = match tx.get(key)? {
                    Some(bytes) => StoredRecord::from_bytes(&bytes)
                        .map_err(ConflictableTransactionError::Abort)?
                        .version,
                    None => 0,
                };
                if current != *seen {
                    return Err(ConflictableTransactionError::Abort(Error::Conflict));
                }
            }
            for (key, value) in &writes {
                match value {
                    Some(bytes) => {
                        tx.insert(key.as_slice(), bytes.as_slice())?;
                    }
                    None => {
                        tx.remove(key.as_slice())?;
                    }
                }
            }
            Ok(())
        });

        match result {
            Ok(()) => Ok(()),
            Err(TransactionError::Abort(e)) => {
                debug!(error = %e, "commit aborted");
                Err(e)
            }
            Err(TransactionError::Storage(e)) => Err(Error::Storage(e)),
        }
    }

    fn rollback(&self, txn: &TransactionId) -> Result<(), Error> {
        self.transactions.take(txn).map(|_| ())
    }
}
