//! Field-model contract.
//!
//! The engine does not validate or serialize entities itself. A
//! [`FieldModel`] describes a kind as an ordered list of named fields; each
//! field's [`FieldHandler`] knows how to turn untrusted request parameters
//! into filters and sort orders on a [`Query`], and how to read its value
//! back from an entity.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use kinddb_proto::{Entity, Key, SortOrder, Value};
use tracing::debug;

use crate::error::Error;
use crate::query::Query;

/// Untrusted request parameters, as received from a client.
pub type RawFilters = BTreeMap<String, String>;

/// Translates request parameters for one field.
pub trait FieldHandler: Send + Sync {
    /// Add the filters this field derives from `raw` to `query`.
    ///
    /// Returning [`Error::Unsatisfiable`] marks the query as matching
    /// nothing; any other error aborts the merge.
    fn build_filter(&self, name: &str, query: &mut Query, raw: &RawFilters) -> Result<(), Error>;

    /// Apply the sort order this field derives from `raw` to `query`.
    fn build_sort(&self, name: &str, query: &mut Query, raw: &RawFilters) -> Result<(), Error>;

    /// Read this field's value from an entity.
    fn read(&self, name: &str, entity: &Entity) -> Option<Value> {
        entity.lookup(name).cloned()
    }
}

/// Full-text search backend of a model.
pub trait SearchAdapter: Send + Sync {
    /// Run a full-text search for `text`, constrained by `query` as far as
    /// the backend is able to.
    fn search(&self, text: &str, query: &Query) -> Result<Vec<Entity>, Error>;

    /// Whether the adapter handles full-text searches at all.
    fn supports_fulltext(&self) -> bool {
        true
    }

    /// Whether every hit is guaranteed to satisfy the query's filters.
    fn guarantees_filter_conformance(&self) -> bool {
        false
    }
}

/// Schema of one kind.
pub trait FieldModel: Send + Sync {
    /// Kind described by this model.
    fn kind_name(&self) -> &str;

    /// Fields in declaration order.
    fn fields(&self) -> Vec<(String, Arc<dyn FieldHandler>)>;

    /// Full-text search adapter, if any.
    fn search_adapter(&self) -> Option<Arc<dyn SearchAdapter>> {
        None
    }
}

/// An entity viewed through its model.
#[derive(Clone)]
pub struct ModelInstance {
    model: Arc<dyn FieldModel>,
    entity: Entity,
}

impl ModelInstance {
    /// Wrap an entity.
    pub fn new(model: Arc<dyn FieldModel>, entity: Entity) -> Self {
        Self { model, entity }
    }

    pub fn key(&self) -> &Key {
        self.entity.key()
    }

    pub fn entity(&self) -> &Entity {
        &self.entity
    }

    pub fn into_entity(self) -> Entity {
        self.entity
    }

    /// Read one field through its handler. Unknown fields read as `None`.
    pub fn get(&self, field: &str) -> Option<Value> {
        self.model
            .fields()
            .into_iter()
            .find(|(name, _)| name == field)
            .and_then(|(name, handler)| handler.read(&name, &self.entity))
    }

    /// Read all fields, in model order. Absent fields are omitted.
    pub fn values(&self) -> Vec<(String, Value)> {
        self.model
            .fields()
            .into_iter()
            .filter_map(|(name, handler)| handler.read(&name, &self.entity).map(|v| (name, v)))
            .collect()
    }
}

impl fmt::Debug for ModelInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelInstance")
            .field("kind", &self.model.kind_name())
            .field("entity", &self.entity)
            .finish()
    }
}

/// Result of [`Query::fetch`]: model instances plus the resume cursor.
#[derive(Debug, Clone, Default)]
pub struct FetchResult {
    pub items: Vec<ModelInstance>,
    pub cursor: Option<String>,
}

impl FetchResult {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ModelInstance> {
        self.items.iter()
    }
}

impl IntoIterator for FetchResult {
    type Item = ModelInstance;
    type IntoIter = std::vec::IntoIter<ModelInstance>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

/// Value type of a [`PropertyField`], used to parse request parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyKind {
    String,
    Int,
    Float,
    Bool,
    /// Encoded entity key.
    Key,
}

impl PropertyKind {
    /// Parse a raw parameter. Returns `None` if it does not parse.
    pub fn parse(self, raw: &str) -> Option<Value> {
        let raw = raw.trim();
        match self {
            PropertyKind::String => Some(Value::String(raw.to_string())),
            PropertyKind::Int => raw.parse::<i64>().ok().map(Value::Int),
            PropertyKind::Float => raw.parse::<f64>().ok().filter(|f| f.is_finite()).map(Value::Float),
            PropertyKind::Bool => match raw.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => Some(Value::Bool(true)),
                "0" | "false" | "no" => Some(Value::Bool(false)),
                _ => None,
            },
            PropertyKind::Key => Key::decode(raw).ok().map(Value::Key),
        }
    }
}

/// Parameter suffixes understood by [`PropertyField`] and their operators.
const SUFFIX_OPERATORS: [(&str, &str); 5] = [
    ("$lt", "<"),
    ("$gt", ">"),
    ("$le", "<="),
    ("$ge", ">="),
    ("$ne", "!="),
];

/// Handler for a plain stored property.
///
/// Request encoding, for a field `name`:
///
/// - `name=v`: equality
/// - `name$lt`, `name$gt`, `name$le`, `name$ge`, `name$ne`: comparisons
/// - `name$lk=v`: prefix match (string fields)
/// - `orderby=name`, optionally `orderdir=1` for descending order
///
/// Values that do not parse as the field's kind are ignored.
#[derive(Debug, Clone)]
pub struct PropertyField {
    kind: PropertyKind,
}

impl PropertyField {
    pub fn new(kind: PropertyKind) -> Self {
        Self { kind }
    }

    pub fn string() -> Self {
        Self::new(PropertyKind::String)
    }

    pub fn int() -> Self {
        Self::new(PropertyKind::Int)
    }

    pub fn float() -> Self {
        Self::new(PropertyKind::Float)
    }

    pub fn boolean() -> Self {
        Self::new(PropertyKind::Bool)
    }

    pub fn key() -> Self {
        Self::new(PropertyKind::Key)
    }

    fn parse(&self, name: &str, param: &str, raw: &str) -> Option<Value> {
        let value = self.kind.parse(raw);
        if value.is_none() {
            debug!(field = name, param, "ignoring unparsable filter value");
        }
        value
    }
}

impl FieldHandler for PropertyField {
    fn build_filter(&self, name: &str, query: &mut Query, raw: &RawFilters) -> Result<(), Error> {
        if let Some(value) = raw.get(name).and_then(|v| self.parse(name, name, v)) {
            query.filter(name, value)?;
        }
        for (suffix, op) in SUFFIX_OPERATORS {
            let param = format!("{}{}", name, suffix);
            if let Some(value) = raw.get(&param).and_then(|v| self.parse(name, &param, v)) {
                query.filter(&format!("{} {}", name, op), value)?;
            }
        }
        if self.kind == PropertyKind::String {
            if let Some(prefix) = raw.get(&format!("{}$lk", name)) {
                let prefix = prefix.trim();
                query.filter(&format!("{} >=", name), prefix)?;
                query.filter(&format!("{} <", name), format!("{}\u{fffd}", prefix))?;
            }
        }
        Ok(())
    }

    fn build_sort(&self, name: &str, query: &mut Query, raw: &RawFilters) -> Result<(), Error> {
        if raw.get("orderby").map(String::as_str) != Some(name) {
            return Ok(());
        }
        let direction = match raw.get("orderdir").map(String::as_str) {
            Some("1") => SortOrder::Descending,
            _ => SortOrder::Ascending,
        };
        query.order([(name, direction)])?;
        Ok(())
    }
}

/// A [`FieldModel`] assembled at runtime.
///
/// ```ignore
/// let model = ModelSchema::new("Person")
///     .field("name", PropertyField::string())
///     .field("age", PropertyField::int());
/// ```
#[derive(Clone, Default)]
pub struct ModelSchema {
    kind: String,
    fields: Vec<(String, Arc<dyn FieldHandler>)>,
    search: Option<Arc<dyn SearchAdapter>>,
}

impl ModelSchema {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            ..Default::default()
        }
    }

    /// Append a field.
    pub fn field(mut self, name: impl Into<String>, handler: impl FieldHandler + 'static) -> Self {
        self.fields.push((name.into(), Arc::new(handler)));
        self
    }

    /// Attach a full-text search adapter.
    pub fn search_adapter(mut self, adapter: Arc<dyn SearchAdapter>) -> Self {
        self.search = Some(adapter);
        self
    }
}

impl FieldModel for ModelSchema {
    fn kind_name(&self) -> &str {
        &self.kind
    }

    fn fields(&self) -> Vec<(String, Arc<dyn FieldHandler>)> {
        self.fields.clone()
    }

    fn search_adapter(&self) -> Option<Arc<dyn SearchAdapter>> {
        self.search.clone()
    }
}

impl fmt::Debug for ModelSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.fields.iter().map(|(name, _)| name.as_str()).collect();
        f.debug_struct("ModelSchema")
            .field("kind", &self.kind)
            .field("fields", &names)
            .field("search", &self.search.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_property_kind_parse() {
        assert_eq!(PropertyKind::Int.parse(" 42 "), Some(Value::Int(42)));
        assert_eq!(PropertyKind::Int.parse("x"), None);
        assert_eq!(PropertyKind::Float.parse("1.5"), Some(Value::Float(1.5)));
        assert_eq!(PropertyKind::Float.parse("NaN"), None);
        assert_eq!(PropertyKind::Bool.parse("True"), Some(Value::Bool(true)));
        assert_eq!(PropertyKind::Bool.parse("maybe"), None);

        let key = Key::from_id("Person", 3);
        assert_eq!(PropertyKind::Key.parse(&key.encode()), Some(Value::Key(key)));
    }

    #[test]
    fn test_model_instance_reads_through_handlers() {
        let model: Arc<dyn FieldModel> = Arc::new(
            ModelSchema::new("Person")
                .field("name", PropertyField::string())
                .field("age", PropertyField::int()),
        );
        let entity = Entity::new(Key::from_id("Person", 1))
            .with("name", "Ada")
            .with("secret", "x");
        let instance = ModelInstance::new(model, entity);

        assert_eq!(instance.get("name"), Some(Value::from("Ada")));
        assert_eq!(instance.get("secret"), None);
        assert_eq!(instance.values(), vec![("name".to_string(), Value::from("Ada"))]);
    }
}
