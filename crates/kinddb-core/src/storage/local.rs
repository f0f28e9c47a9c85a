//! Primitive query execution shared by the local backends.
//!
//! Mirrors the restrictions of an index-backed document store: at most one
//! property with inequality filters, which must also lead the sort order;
//! unindexed properties are invisible; a sort order implies the property
//! exists.

use std::collections::HashSet;

use kinddb_proto::{Entity, Key, SortOrder, Value, KEY_SPECIAL_PROPERTY};
use serde::{Deserialize, Serialize};

use super::cursor::CursorCodec;
use super::{QueryPage, QueryRequest};
use crate::error::Error;
use crate::query::FilterEvaluator;
use crate::query::resort::{compare_projected, sort_value};

/// Position of a row in a result, carried inside cursors.
#[derive(Debug, Serialize, Deserialize)]
struct SortPosition {
    values: Vec<Value>,
    key: Key,
}

struct Row {
    values: Vec<Value>,
    entity: Entity,
}

/// Check that a request is executable as one primitive query.
pub(crate) fn validate(request: &QueryRequest) -> Result<(), Error> {
    let mut inequality: Option<&str> = None;
    for filter in request.filters.iter().filter(|f| f.op.is_inequality()) {
        match inequality {
            Some(field) if field != filter.field => {
                return Err(Error::UnsupportedQuery(format!(
                    "inequality filters on more than one property: {} and {}",
                    field, filter.field
                )));
            }
            _ => inequality = Some(&filter.field),
        }
    }
    if let (Some(field), Some((first, _))) = (inequality, request.orders.first()) {
        if field != first {
            return Err(Error::UnsupportedQuery(format!(
                "first sort property must be '{}' (inequality filter), not '{}'",
                field, first
            )));
        }
    }
    Ok(())
}

/// Run one request over the entities of its kind.
pub(crate) fn execute_request<I>(
    request: &QueryRequest,
    candidates: I,
    codec: &CursorCodec,
) -> Result<QueryPage, Error>
where
    I: IntoIterator<Item = Entity>,
{
    validate(request)?;

    let orders = physical_orders(request);
    let start = decode_position(request.start_cursor.as_deref(), &orders, codec)?;
    let end = decode_position(request.end_cursor.as_deref(), &orders, codec)?;

    let mut rows: Vec<Row> = candidates
        .into_iter()
        .filter(|entity| entity.key().kind() == request.kind)
        .filter(|entity| is_visible(entity, request, &orders))
        .map(|entity| Row {
            values: orders
                .iter()
                .map(|(field, direction)| sort_value(&entity, field, *direction).into_owned())
                .collect(),
            entity,
        })
        .collect();

    rows.sort_by(|a, b| {
        compare_projected(&a.values, &b.values, &orders)
            .then_with(|| a.entity.key().cmp(b.entity.key()))
    });

    if let Some(distinct) = &request.distinct {
        let mut seen = HashSet::new();
        rows.retain(|row| {
            let combination: Vec<Value> = distinct
                .iter()
                .map(|field| sort_value(&row.entity, field, SortOrder::Ascending).into_owned())
                .collect();
            // Value has no Hash impl; its JSON form is a faithful stand-in.
            seen.insert(serde_json::to_string(&combination).unwrap_or_default())
        });
    }

    if let Some(start) = &start {
        rows.retain(|row| position_cmp(row, start, &orders).is_gt());
    }
    if let Some(end) = &end {
        rows.retain(|row| position_cmp(row, end, &orders).is_le());
    }

    let mut next_cursor = None;
    if request.limit > 0 && rows.len() > request.limit {
        rows.truncate(request.limit);
        if let Some(last) = rows.last() {
            next_cursor = Some(codec.encode(&SortPosition {
                values: last.values.clone(),
                key: last.entity.key().clone(),
            })?);
        }
    }

    Ok(QueryPage {
        entities: rows.into_iter().map(|row| row.entity).collect(),
        next_cursor,
    })
}

/// Sort order applied by the store: the requested one, or the implied
/// ascending order on the inequality property.
fn physical_orders(request: &QueryRequest) -> Vec<(String, SortOrder)> {
    if !request.orders.is_empty() {
        return request.orders.clone();
    }
    request
        .filters
        .iter()
        .find(|f| f.op.is_inequality())
        .map(|f| vec![(f.field.clone(), SortOrder::Ascending)])
        .unwrap_or_default()
}

fn is_indexed(entity: &Entity, field: &str) -> bool {
    field == KEY_SPECIAL_PROPERTY || (entity.lookup(field).is_some() && !entity.is_unindexed(field))
}

fn is_visible(entity: &Entity, request: &QueryRequest, orders: &[(String, SortOrder)]) -> bool {
    orders.iter().all(|(field, _)| is_indexed(entity, field))
        && request.filters.iter().all(|filter| {
            is_indexed(entity, &filter.field) && FilterEvaluator::matches_filter(entity, filter)
        })
}

fn decode_position(
    token: Option<&str>,
    orders: &[(String, SortOrder)],
    codec: &CursorCodec,
) -> Result<Option<SortPosition>, Error> {
    let Some(token) = token else {
        return Ok(None);
    };
    let position: SortPosition = codec.decode(token)?;
    if position.values.len() != orders.len() {
        return Err(Error::InvalidCursor);
    }
    Ok(Some(position))
}

fn position_cmp(row: &Row, position: &SortPosition, orders: &[(String, SortOrder)]) -> std::cmp::Ordering {
    compare_projected(&row.values, &position.values, orders)
        .then_with(|| row.entity.key().cmp(&position.key))
}
