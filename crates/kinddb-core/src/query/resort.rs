//! Client-side ordering of merged results.
//!
//! The store and the merge path share one projection of entities onto sort
//! values, so a merged fan-out result is ordered exactly like a single store
//! query would order it.

use std::borrow::Cow;
use std::cmp::Ordering;

use kinddb_proto::{Entity, QueryDefinition, SortOrder, Value, KEY_SPECIAL_PROPERTY};

static NULL: Value = Value::Null;

/// Project an entity onto the value it sorts by for one order key.
///
/// `__key__` projects to the key, absent properties to `Null`. Lists project
/// to their smallest element when ascending and their largest when
/// descending; an empty list projects to `Null`.
pub fn sort_value<'a>(entity: &'a Entity, field: &str, direction: SortOrder) -> Cow<'a, Value> {
    if field == KEY_SPECIAL_PROPERTY {
        return Cow::Owned(Value::Key(entity.key().clone()));
    }
    match entity.lookup(field) {
        Some(Value::List(items)) => {
            let picked = match direction {
                SortOrder::Ascending => items.iter().min_by(|a, b| a.sort_cmp(b)),
                SortOrder::Descending => items.iter().max_by(|a, b| a.sort_cmp(b)),
            };
            Cow::Borrowed(picked.unwrap_or(&NULL))
        }
        Some(value) => Cow::Borrowed(value),
        None => Cow::Borrowed(&NULL),
    }
}

/// Compare two entities on a single order key.
pub fn compare_on(a: &Entity, b: &Entity, field: &str, direction: SortOrder) -> Ordering {
    let left = sort_value(a, field, direction);
    let right = sort_value(b, field, direction);
    direction.apply(left.sort_cmp(&right))
}

/// Compare two projected rows lexicographically.
pub fn compare_projected(a: &[Value], b: &[Value], orders: &[(String, SortOrder)]) -> Ordering {
    for ((left, right), (_, direction)) in a.iter().zip(b).zip(orders) {
        let ord = direction.apply(left.sort_cmp(right));
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

/// The order a definition's results are logically returned in.
///
/// An inequality filter implies ascending order on its field, so that field
/// is prepended unless the requested order already starts with it.
pub fn logical_orders(definition: &QueryDefinition) -> Vec<(String, SortOrder)> {
    lead_with_inequality(definition, definition.orders.clone())
}

/// Prepend the definition's inequality field to `orders` unless it already
/// leads them.
pub fn lead_with_inequality(
    definition: &QueryDefinition,
    mut orders: Vec<(String, SortOrder)>,
) -> Vec<(String, SortOrder)> {
    if let Some(field) = definition.inequality_field() {
        let leads = orders.first().map(|(f, _)| f == field).unwrap_or(false);
        if !leads {
            orders.insert(0, (field.to_string(), SortOrder::Ascending));
        }
    }
    orders
}

/// Re-sort merged results in place.
///
/// Applies one stable sort per order key, least significant first, which
/// yields the lexicographic order while keeping the merge order for ties.
pub fn resort(entities: &mut [Entity], orders: &[(String, SortOrder)]) {
    for (field, direction) in orders.iter().rev() {
        entities.sort_by(|a, b| compare_on(a, b, field, *direction));
    }
}
