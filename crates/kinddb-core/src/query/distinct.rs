//! Reconciling sort orders with distinct-on.
//!
//! The store can only return one row per distinct combination when the
//! distinct properties lead the sort order. Requested orders on other
//! properties are postponed behind them.

use kinddb_proto::{QueryDefinition, SortOrder};
use tracing::warn;

/// The sort order sent to the store for a definition.
///
/// Without distinct-on this is the requested order. With it, the distinct
/// properties come first (keeping the requested direction of those that are
/// also sorted on, ascending otherwise), followed by the remaining requested
/// orders. Each property appears once.
pub fn physical_orders(definition: &QueryDefinition) -> Vec<(String, SortOrder)> {
    let Some(distinct) = &definition.distinct else {
        return definition.orders.clone();
    };

    let mut orders: Vec<(String, SortOrder)> = Vec::with_capacity(distinct.len() + definition.orders.len());
    for field in distinct {
        if orders.iter().any(|(f, _)| f == field) {
            continue;
        }
        let direction = definition
            .orders
            .iter()
            .find(|(f, _)| f == field)
            .map(|(_, d)| *d)
            .unwrap_or(SortOrder::Ascending);
        orders.push((field.clone(), direction));
    }
    for (field, direction) in &definition.orders {
        if !orders.iter().any(|(f, _)| f == field) {
            orders.push((field.clone(), *direction));
        }
    }

    if !definition.orders.is_empty() && orders != definition.orders {
        warn!(
            kind = %definition.kind,
            requested = ?definition.orders,
            applied = ?orders,
            "sort order changed to satisfy distinct-on"
        );
    }
    orders
}
