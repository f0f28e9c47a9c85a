//! Schemaless entities.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::key::Key;
use crate::value::Value;

/// One stored record: a key plus an ordered property map.
///
/// Properties listed in `exclude_from_indexes` are stored but invisible to
/// store-side filters and sort orders. Nested properties of embedded maps are
/// listed by dotted path (`address.street`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    key: Key,
    properties: BTreeMap<String, Value>,
    exclude_from_indexes: BTreeSet<String>,
}

impl Entity {
    /// Create an empty entity.
    pub fn new(key: Key) -> Self {
        Self {
            key,
            properties: BTreeMap::new(),
            exclude_from_indexes: BTreeSet::new(),
        }
    }

    /// Builder-style property setter.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(name, value);
        self
    }

    /// The entity key.
    pub fn key(&self) -> &Key {
        &self.key
    }

    /// Replace the key (used once the store completes a partial key).
    pub fn set_key(&mut self, key: Key) {
        self.key = key;
    }

    /// Get a top-level property.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }

    /// Resolve a property by name, descending into embedded maps for dotted
    /// names when no property carries the literal name.
    pub fn lookup(&self, path: &str) -> Option<&Value> {
        if let Some(value) = self.properties.get(path) {
            return Some(value);
        }
        let mut parts = path.split('.');
        let mut current = self.properties.get(parts.next()?)?;
        for part in parts {
            current = current.as_map()?.get(part)?;
        }
        Some(current)
    }

    /// Set a property.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.properties.insert(name.into(), value.into());
    }

    /// Remove a property.
    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.exclude_from_indexes.remove(name);
        self.properties.remove(name)
    }

    /// Check if a property is present.
    pub fn contains(&self, name: &str) -> bool {
        self.properties.contains_key(name)
    }

    /// Iterate over properties in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.properties.iter()
    }

    /// All properties.
    pub fn properties(&self) -> &BTreeMap<String, Value> {
        &self.properties
    }

    /// Number of properties.
    pub fn len(&self) -> usize {
        self.properties.len()
    }

    /// Whether the entity has no properties.
    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    /// Names excluded from indexing.
    pub fn exclude_from_indexes(&self) -> &BTreeSet<String> {
        &self.exclude_from_indexes
    }

    /// Mark a property (or dotted nested path) as unindexed.
    ///
    /// Session writes recompute the set, see
    /// [`Entity::fix_unindexable_properties`].
    pub fn set_unindexed(&mut self, name: impl Into<String>) {
        self.exclude_from_indexes.insert(name.into());
    }

    /// Whether the given property path is excluded from indexing, either
    /// directly or through one of its ancestors.
    pub fn is_unindexed(&self, path: &str) -> bool {
        if self.exclude_from_indexes.contains(path) {
            return true;
        }
        let mut prefix = String::new();
        for part in path.split('.') {
            if !prefix.is_empty() {
                prefix.push('.');
            }
            prefix.push_str(part);
            if self.exclude_from_indexes.contains(&prefix) {
                return true;
            }
        }
        false
    }

    /// Recompute the unindexed set from the current values: every property
    /// holding a string of `threshold` chars or more, and nothing else.
    /// Lists are unindexed as a whole; embedded maps are descended into and
    /// their offending members are listed by dotted path.
    pub fn fix_unindexable_properties(&mut self, threshold: usize) {
        let mut excluded = Vec::new();
        for (name, value) in &self.properties {
            collect_unindexable(name, value, threshold, &mut excluded);
        }
        self.exclude_from_indexes = excluded.into_iter().collect();
    }
}

fn collect_unindexable(path: &str, value: &Value, threshold: usize, out: &mut Vec<String>) {
    match value {
        Value::Map(map) => {
            for (name, inner) in map {
                collect_unindexable(&format!("{}.{}", path, name), inner, threshold, out);
            }
        }
        _ if exceeds_threshold(value, threshold) => out.push(path.to_string()),
        _ => {}
    }
}

fn exceeds_threshold(value: &Value, threshold: usize) -> bool {
    match value {
        Value::String(s) => s.chars().count() >= threshold,
        Value::List(items) => items.iter().any(|v| exceeds_threshold(v, threshold)),
        Value::Map(map) => map.values().any(|v| exceeds_threshold(v, threshold)),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_dotted() {
        let mut inner = BTreeMap::new();
        inner.insert("idx".to_string(), Value::from("alice"));
        let entity = Entity::new(Key::from_id("User", 1))
            .with("name", Value::Map(inner))
            .with("a.b", 5);

        assert_eq!(entity.lookup("name.idx"), Some(&Value::from("alice")));
        assert_eq!(entity.lookup("a.b"), Some(&Value::Int(5)));
        assert_eq!(entity.lookup("name.missing"), None);
    }

    #[test]
    fn test_fix_unindexable_properties() {
        let long = "x".repeat(500);
        let mut nested = BTreeMap::new();
        nested.insert("body".to_string(), Value::from(long.as_str()));
        nested.insert("title".to_string(), Value::from("short"));

        let mut entity = Entity::new(Key::from_id("Page", 1))
            .with("content", long.as_str())
            .with("tags", vec![Value::from("a"), Value::from(long.as_str())])
            .with("meta", Value::Map(nested))
            .with("name", "ok");
        entity.fix_unindexable_properties(500);

        assert!(entity.is_unindexed("content"));
        assert!(entity.is_unindexed("tags"));
        assert!(entity.is_unindexed("meta.body"));
        assert!(!entity.is_unindexed("meta.title"));
        assert!(!entity.is_unindexed("name"));
    }

    #[test]
    fn test_fix_unindexable_properties_recomputes() {
        let mut entity = Entity::new(Key::from_id("Page", 1)).with("body", "x".repeat(600));
        entity.fix_unindexable_properties(500);
        assert!(entity.is_unindexed("body"));

        entity.set("body", "short");
        entity.fix_unindexable_properties(500);
        assert!(!entity.is_unindexed("body"));
        assert!(entity.exclude_from_indexes().is_empty());
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let mut entity = Entity::new(Key::from_id("Page", 1)).with("s", "x".repeat(499));
        entity.fix_unindexable_properties(500);
        assert!(!entity.is_unindexed("s"));
    }
}
