//! Per-session access log.
//!
//! Records every kind and key touched by reads, writes and deletes so an
//! external cache layer can decide what to invalidate. One log belongs to one
//! [`Session`](crate::Session); logs are never shared between sessions.

use std::collections::HashSet;

use kinddb_proto::Key;
use parking_lot::Mutex;

/// One access-log entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AccessEntry {
    /// A concrete entity was read, written or deleted.
    Key(Key),
    /// A kind was queried, or an entity with a partial key was written.
    Kind(String),
}

/// A set of access-log entries.
pub type AccessSet = HashSet<AccessEntry>;

/// Mutable access log with nested save/restore.
#[derive(Debug)]
pub struct AccessLog {
    entries: Mutex<AccessSet>,
    internal_prefix: String,
}

impl AccessLog {
    /// Create an empty log. Kinds starting with `internal_prefix` are ignored.
    pub fn new(internal_prefix: impl Into<String>) -> Self {
        Self {
            entries: Mutex::new(HashSet::new()),
            internal_prefix: internal_prefix.into(),
        }
    }

    /// Record access to a key. Partial keys are recorded by kind only.
    pub fn record_key(&self, key: &Key) {
        if self.is_internal(key.kind()) {
            return;
        }
        let entry = if key.is_partial() {
            AccessEntry::Kind(key.kind().to_string())
        } else {
            AccessEntry::Key(key.clone())
        };
        self.entries.lock().insert(entry);
    }

    /// Record access to a kind as a whole.
    pub fn record_kind(&self, kind: &str) {
        if self.is_internal(kind) {
            return;
        }
        self.entries.lock().insert(AccessEntry::Kind(kind.to_string()));
    }

    /// Save and clear the current log, returning the previous contents.
    pub fn push(&self) -> AccessSet {
        std::mem::take(&mut *self.entries.lock())
    }

    /// Return everything logged since the matching [`push`](Self::push) and
    /// install `outer ∪ returned` as the current log.
    pub fn pop(&self, outer: Option<AccessSet>) -> AccessSet {
        let mut entries = self.entries.lock();
        let inner = std::mem::take(&mut *entries);
        let mut restored = outer.unwrap_or_default();
        restored.extend(inner.iter().cloned());
        *entries = restored;
        inner
    }

    /// Copy of the current contents.
    pub fn snapshot(&self) -> AccessSet {
        self.entries.lock().clone()
    }

    /// Whether the current log contains an entry.
    pub fn contains(&self, entry: &AccessEntry) -> bool {
        self.entries.lock().contains(entry)
    }

    /// Number of entries in the current log.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the current log is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    fn is_internal(&self, kind: &str) -> bool {
        !self.internal_prefix.is_empty() && kind.starts_with(&self.internal_prefix)
    }
}
