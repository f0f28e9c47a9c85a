//! Transaction helpers on [`Session`].
//!
//! Transactions are optimistic: the store tracks what a transaction read and
//! refuses the commit with [`Error::Conflict`] if any of it changed.

use std::time::{SystemTime, UNIX_EPOCH};

use kinddb_proto::{Entity, Key, Value};
use tracing::{debug, warn};

use crate::error::Error;
use crate::session::Session;
use crate::storage::TransactionId;

/// The transaction bound to a session.
#[derive(Debug)]
pub(crate) struct TransactionState {
    pub(crate) id: TransactionId,
    pub(crate) marker_written: bool,
}

impl Session {
    /// Run `f` inside a transaction.
    ///
    /// Commits when `f` returns `Ok`, rolls back and propagates its error
    /// otherwise. A commit conflict is returned as [`Error::Conflict`]; there
    /// is no retry. Called inside an open transaction, `f` simply joins it.
    pub fn run_in_transaction<T, F>(&self, f: F) -> Result<T, Error>
    where
        F: FnOnce(&Session) -> Result<T, Error>,
    {
        if self.is_in_transaction() {
            return f(self);
        }

        let id = self.store().begin_transaction()?;
        *self.transaction_state().lock() = Some(TransactionState {
            id: id.clone(),
            marker_written: false,
        });

        let result = f(self);
        self.transaction_state().lock().take();

        match result {
            Ok(value) => {
                self.store().commit(&id)?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback) = self.store().rollback(&id) {
                    warn!(txn = %id, error = %rollback, "rollback failed");
                }
                Err(e)
            }
        }
    }

    /// Return the entity at `key`, creating it from `fields` if absent.
    ///
    /// An existing entity is never overwritten. Outside a transaction the
    /// lookup and insert run in one, retried on commit conflicts up to
    /// `EngineConfig::transaction_retries` times, so concurrent callers all
    /// observe the same entity.
    pub fn get_or_insert<I, K, V>(&self, key: &Key, fields: I) -> Result<Entity, Error>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        if key.is_partial() {
            return Err(Error::IncompleteKey(key.kind().to_string()));
        }
        let fields: Vec<(String, Value)> = fields
            .into_iter()
            .map(|(name, value)| (name.into(), value.into()))
            .collect();

        if self.is_in_transaction() {
            return self.get_or_insert_inner(key, &fields);
        }

        let mut attempt = 0;
        loop {
            match self.run_in_transaction(|session| session.get_or_insert_inner(key, &fields)) {
                Err(Error::Conflict) if attempt < self.config().transaction_retries => {
                    attempt += 1;
                    debug!(key = %key, attempt, "get_or_insert conflict, retrying");
                }
                other => return other,
            }
        }
    }

    fn get_or_insert_inner(&self, key: &Key, fields: &[(String, Value)]) -> Result<Entity, Error> {
        if let Some(existing) = self.get(key)? {
            return Ok(existing);
        }
        let mut entity = Entity::new(key.clone());
        for (name, value) in fields {
            entity.set(name.clone(), value.clone());
        }
        entity.fix_unindexable_properties(self.config().unindexed_threshold);
        self.put(entity.clone())?;
        Ok(entity)
    }

    /// Mark the current transaction as successful.
    ///
    /// Returns the hex transaction id. The first call in a transaction writes
    /// a marker record that becomes visible only if the transaction commits;
    /// later calls return the same token without writing.
    pub fn acquire_transaction_success_marker(&self) -> Result<String, Error> {
        let (id, write) = {
            let mut state = self.transaction_state().lock();
            let state = state.as_mut().ok_or(Error::NotInTransaction)?;
            let write = !state.marker_written;
            state.marker_written = true;
            (state.id.clone(), write)
        };
        let token = id.to_hex();

        if write {
            let marker = Entity::new(Key::from_name(self.config().marker_kind(), token.clone()))
                .with("creationdate", Value::Timestamp(now_micros()));
            // Written below the session's name check: hex tokens may be all digits.
            self.store().put_multi(Some(&id), vec![marker])?;
            debug!(txn = %id, "transaction marker written");
        }
        Ok(token)
    }

    /// Whether the transaction that acquired `token` committed.
    pub fn transaction_succeeded(&self, token: &str) -> Result<bool, Error> {
        let key = Key::from_name(self.config().marker_kind(), token);
        let found = self.store().get_multi(None, std::slice::from_ref(&key))?;
        Ok(found.into_iter().next().flatten().is_some())
    }
}

fn now_micros() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| i64::try_from(elapsed.as_micros()).unwrap_or(i64::MAX))
        .unwrap_or_default()
}
