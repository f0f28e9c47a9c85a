//! Filter evaluation for query execution.
//!
//! This module provides the `FilterEvaluator` that evaluates primitive
//! property filters against entities. It is used by the local store backends
//! and to re-check full-text hits against the pending query definitions.

use std::borrow::Cow;
use std::cmp::Ordering;

use kinddb_proto::{Entity, PropertyFilter, QueryDefinition, Value, KEY_SPECIAL_PROPERTY};

static NULL: Value = Value::Null;

/// Evaluates property filters against entities.
pub struct FilterEvaluator;

impl FilterEvaluator {
    /// Evaluate one filter.
    ///
    /// A list-valued property matches if any of its elements matches. An
    /// absent property is evaluated as `Null`.
    pub fn matches_filter(entity: &Entity, filter: &PropertyFilter) -> bool {
        let value = Self::property(entity, &filter.field);
        Self::value_matches(&value, filter)
    }

    /// Evaluate all filters of a definition (AND).
    pub fn matches_definition(entity: &Entity, definition: &QueryDefinition) -> bool {
        definition
            .filters
            .iter()
            .all(|filter| Self::matches_filter(entity, filter))
    }

    /// Evaluate a set of definitions (OR across definitions).
    pub fn matches_any(entity: &Entity, definitions: &[QueryDefinition]) -> bool {
        definitions
            .iter()
            .any(|definition| Self::matches_definition(entity, definition))
    }

    /// Whether a single (possibly list) value satisfies a filter.
    pub fn value_matches(value: &Value, filter: &PropertyFilter) -> bool {
        match value {
            Value::List(items) if !matches!(filter.value, Value::List(_)) => items
                .iter()
                .any(|item| Self::scalar_matches(item, filter)),
            _ => Self::scalar_matches(value, filter),
        }
    }

    fn scalar_matches(value: &Value, filter: &PropertyFilter) -> bool {
        Self::compare_values(value, &filter.value)
            .map(|ord| filter.op.accepts(ord))
            .unwrap_or(false)
    }

    /// Resolve a property for filtering. `__key__` resolves to the entity key.
    pub fn property<'a>(entity: &'a Entity, field: &str) -> Cow<'a, Value> {
        if field == KEY_SPECIAL_PROPERTY {
            return Cow::Owned(Value::Key(entity.key().clone()));
        }
        Cow::Borrowed(entity.lookup(field).unwrap_or(&NULL))
    }

    /// Compare two values, returning their ordering if comparable.
    ///
    /// Integers and floats compare numerically; other values only compare
    /// with values of the same type.
    pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
        match (a, b) {
            (Value::Int(a), Value::Float(b)) => (*a as f64).partial_cmp(b),
            (Value::Float(a), Value::Int(b)) => a.partial_cmp(&(*b as f64)),
            _ => a.cmp_same_type(b),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kinddb_proto::{FilterOp, Key};

    fn person(age: impl Into<Value>) -> Entity {
        Entity::new(Key::from_id("Person", 1)).with("age", age)
    }

    #[test]
    fn test_comparison_filters() {
        let entity = person(30);

        let ge = PropertyFilter::new("age", FilterOp::Ge, 18);
        assert!(FilterEvaluator::matches_filter(&entity, &ge));

        let lt = PropertyFilter::new("age", FilterOp::Lt, 30);
        assert!(!FilterEvaluator::matches_filter(&entity, &lt));

        let le = PropertyFilter::new("age", FilterOp::Le, 30);
        assert!(FilterEvaluator::matches_filter(&entity, &le));
    }

    #[test]
    fn test_numeric_coercion() {
        let entity = person(30);
        let eq = PropertyFilter::new("age", FilterOp::Eq, 30.0);
        assert!(FilterEvaluator::matches_filter(&entity, &eq));
    }

    #[test]
    fn test_type_mismatch_never_matches() {
        let entity = person("thirty");
        let gt = PropertyFilter::new("age", FilterOp::Gt, 18);
        assert!(!FilterEvaluator::matches_filter(&entity, &gt));
    }

    #[test]
    fn test_list_matches_any_element() {
        let entity = Entity::new(Key::from_id("Post", 1)).with("tags", vec!["rust", "db"]);
        let eq = PropertyFilter::new("tags", FilterOp::Eq, "db");
        assert!(FilterEvaluator::matches_filter(&entity, &eq));

        let eq = PropertyFilter::new("tags", FilterOp::Eq, "go");
        assert!(!FilterEvaluator::matches_filter(&entity, &eq));
    }

    #[test]
    fn test_absent_property_is_null() {
        let entity = Entity::new(Key::from_id("Person", 1));
        let eq = PropertyFilter::new("age", FilterOp::Eq, Value::Null);
        assert!(FilterEvaluator::matches_filter(&entity, &eq));

        let ge = PropertyFilter::new("age", FilterOp::Ge, 18);
        assert!(!FilterEvaluator::matches_filter(&entity, &ge));
    }

    #[test]
    fn test_key_filter() {
        let entity = person(1);
        let eq = PropertyFilter::new(KEY_SPECIAL_PROPERTY, FilterOp::Eq, Key::from_id("Person", 1));
        assert!(FilterEvaluator::matches_filter(&entity, &eq));
    }

    #[test]
    fn test_matches_any_definition() {
        let entity = person(5);
        let adults = QueryDefinition::new("Person").with_filter("age", FilterOp::Ge, 18);
        let young = QueryDefinition::new("Person").with_filter("age", FilterOp::Lt, 10);

        assert!(!FilterEvaluator::matches_definition(&entity, &adults));
        assert!(FilterEvaluator::matches_any(&entity, &[adults.clone(), young]));
        assert!(!FilterEvaluator::matches_any(&entity, &[adults]));
    }
}
