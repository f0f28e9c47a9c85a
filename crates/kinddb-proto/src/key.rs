//! Entity keys.
//!
//! A key names one entity: a kind, an integer id or a string name, and an
//! optional parent key. A key without id or name is *partial*; the store
//! assigns an id when the entity is first written.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// The identifying part of a complete key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum KeyId {
    /// Store-assigned or caller-chosen positive integer id.
    Id(i64),
    /// Caller-chosen string name.
    Name(String),
}

/// A (possibly hierarchical) entity key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Key {
    kind: String,
    id: Option<KeyId>,
    parent: Option<Box<Key>>,
}

impl Key {
    /// Create a key with an integer id.
    pub fn from_id(kind: impl Into<String>, id: i64) -> Self {
        Self {
            kind: kind.into(),
            id: Some(KeyId::Id(id)),
            parent: None,
        }
    }

    /// Create a key with a string name.
    pub fn from_name(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: Some(KeyId::Name(name.into())),
            parent: None,
        }
    }

    /// Create a partial key (kind only).
    pub fn partial(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: None,
            parent: None,
        }
    }

    /// Attach a parent key.
    pub fn with_parent(mut self, parent: Key) -> Self {
        self.parent = Some(Box::new(parent));
        self
    }

    /// Kind name of this key.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Integer id, if this key has one.
    pub fn id(&self) -> Option<i64> {
        match &self.id {
            Some(KeyId::Id(id)) => Some(*id),
            _ => None,
        }
    }

    /// String name, if this key has one.
    pub fn name(&self) -> Option<&str> {
        match &self.id {
            Some(KeyId::Name(name)) => Some(name),
            _ => None,
        }
    }

    /// Id or name, `None` for partial keys.
    pub fn id_or_name(&self) -> Option<&KeyId> {
        self.id.as_ref()
    }

    /// Parent key, if any.
    pub fn parent(&self) -> Option<&Key> {
        self.parent.as_deref()
    }

    /// Whether the store still has to assign an id.
    pub fn is_partial(&self) -> bool {
        self.id.is_none()
    }

    /// Return a copy of this key completed with the given id.
    pub fn completed(&self, id: i64) -> Key {
        Key {
            kind: self.kind.clone(),
            id: Some(KeyId::Id(id)),
            parent: self.parent.clone(),
        }
    }

    /// Whether this key uses a string name made only of ASCII digits.
    ///
    /// Such names are ambiguous with integer ids and are rejected on write.
    pub fn has_digit_only_name(&self) -> bool {
        self.name()
            .map(|name| !name.is_empty() && name.bytes().all(|b| b.is_ascii_digit()))
            .unwrap_or(false)
    }

    /// Path elements from the root ancestor down to this key.
    pub fn path(&self) -> Vec<(&str, Option<&KeyId>)> {
        let mut path = match &self.parent {
            Some(parent) => parent.path(),
            None => Vec::new(),
        };
        path.push((self.kind.as_str(), self.id.as_ref()));
        path
    }

    /// Encode this key into an opaque, URL-safe string.
    pub fn encode(&self) -> String {
        // Serializing a plain tree of strings and integers cannot fail.
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        hex::encode(bytes)
    }

    /// Decode a key produced by [`Key::encode`].
    pub fn decode(encoded: &str) -> Result<Self, Error> {
        let bytes = hex::decode(encoded).map_err(|e| Error::InvalidKey(e.to_string()))?;
        serde_json::from_slice(&bytes).map_err(|e| Error::InvalidKey(e.to_string()))
    }
}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Key {
    /// Keys order by path, ancestors first, like the store's `__key__` order.
    fn cmp(&self, other: &Self) -> Ordering {
        self.path().cmp(&other.path())
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(parent) = &self.parent {
            write!(f, "{}/", parent)?;
        }
        match &self.id {
            Some(KeyId::Id(id)) => write!(f, "{}({})", self.kind, id),
            Some(KeyId::Name(name)) => write!(f, "{}('{}')", self.kind, name),
            None => write!(f, "{}(?)", self.kind),
        }
    }
}

/// Loosely typed key input accepted by [`key_helper`].
#[derive(Debug, Clone)]
pub enum KeyInput<'a> {
    /// An encoded key, a digit string (integer id) or a plain name.
    Str(&'a str),
    /// An integer id.
    Id(i64),
    /// An existing key.
    Key(Key),
}

impl<'a> From<&'a str> for KeyInput<'a> {
    fn from(v: &'a str) -> Self {
        KeyInput::Str(v)
    }
}

impl From<i64> for KeyInput<'_> {
    fn from(v: i64) -> Self {
        KeyInput::Id(v)
    }
}

impl From<Key> for KeyInput<'_> {
    fn from(v: Key) -> Self {
        KeyInput::Key(v)
    }
}

impl From<&Key> for KeyInput<'_> {
    fn from(v: &Key) -> Self {
        KeyInput::Key(v.clone())
    }
}

/// Normalize user-supplied key material into a key of `target_kind`.
///
/// Encoded keys and key objects must belong to `target_kind` or one of
/// `allowed_kinds`. Digit-only strings become integer ids, any other string
/// becomes a name.
pub fn key_helper<'a>(
    input: impl Into<KeyInput<'a>>,
    target_kind: &str,
    allowed_kinds: &[&str],
) -> Result<Key, Error> {
    let check_kind = |key: Key| {
        if key.kind() != target_kind && !allowed_kinds.contains(&key.kind()) {
            return Err(Error::KindMismatch {
                expected: target_kind.to_string(),
                actual: key.kind().to_string(),
            });
        }
        Ok(key)
    };

    match input.into() {
        KeyInput::Str(s) => {
            if let Ok(decoded) = Key::decode(s) {
                return check_kind(decoded);
            }
            if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) {
                let id = s
                    .parse::<i64>()
                    .map_err(|e| Error::InvalidKey(e.to_string()))?;
                return Ok(Key::from_id(target_kind, id));
            }
            Ok(Key::from_name(target_kind, s))
        }
        KeyInput::Id(id) => Ok(Key::from_id(target_kind, id)),
        KeyInput::Key(key) => check_kind(key),
    }
}
