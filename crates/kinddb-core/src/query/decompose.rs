//! Rewriting logical filters into primitive query definitions.
//!
//! `=`, `<`, `<=`, `>` and `>=` apply to every pending definition. `!=` and
//! `IN` fan a single pending definition out into several, whose results are
//! unioned at execution time. Only one fan-out is allowed per query.

use kinddb_proto::{FilterOp, FilterOperator, QueryDefinition, SortOrder, Value};

use super::hooks::FilterRequest;
use crate::error::Error;

/// Apply a filter request to the pending definitions.
///
/// Returns `None` when the request can match nothing (an empty `IN` list).
pub fn decompose(
    definitions: &[QueryDefinition],
    request: &FilterRequest,
) -> Result<Option<Vec<QueryDefinition>>, Error> {
    let field = request.field.as_str();
    match request.op {
        FilterOperator::Ne => {
            single(definitions)?;
            let mut split = Vec::with_capacity(definitions.len() * 2);
            for definition in definitions {
                split.push(constrained(definition, field, FilterOp::Lt, &request.value));
                split.push(constrained(definition, field, FilterOp::Gt, &request.value));
            }
            Ok(Some(split))
        }
        FilterOperator::In => {
            let Value::List(values) = &request.value else {
                return Err(Error::InvalidInValue {
                    field: field.to_string(),
                });
            };
            single(definitions)?;
            if values.is_empty() {
                return Ok(None);
            }
            let mut split = Vec::with_capacity(values.len());
            for definition in definitions {
                for value in values {
                    split.push(constrained(definition, field, FilterOp::Eq, value));
                }
            }
            Ok(Some(split))
        }
        op => {
            let Some(op) = op.primitive() else {
                return Err(Error::MalformedFilter(format!("unsupported operator {}", op)));
            };
            Ok(Some(
                definitions
                    .iter()
                    .map(|definition| constrained(definition, field, op, &request.value))
                    .collect(),
            ))
        }
    }
}

fn single(definitions: &[QueryDefinition]) -> Result<(), Error> {
    if definitions.len() > 1 {
        return Err(Error::MultipleFanOut);
    }
    Ok(())
}

/// Copy of `definition` with one more primitive filter.
///
/// An inequality also makes its field lead the sort order, unless it
/// already does.
fn constrained(definition: &QueryDefinition, field: &str, op: FilterOp, value: &Value) -> QueryDefinition {
    let mut definition = definition.clone();
    definition.set_filter(field, op, value.clone());
    if op.is_inequality() {
        let leads = definition.orders.first().map(|(f, _)| f == field).unwrap_or(false);
        if !leads {
            definition.orders.insert(0, (field.to_string(), SortOrder::Ascending));
        }
    }
    definition
}
