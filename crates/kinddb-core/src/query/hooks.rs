//! Query customization points.
//!
//! Hooks see every filter and sort request before it is applied and answer
//! with a [`HookOutcome`]. Merge and limit callbacks replace the default
//! handling of fan-out results.

use std::sync::Arc;

use kinddb_proto::{Entity, FilterOperator, SortOrder, Value};

use super::Query;
use crate::error::Error;

/// Answer of a hook.
#[derive(Debug)]
pub enum HookOutcome<T> {
    /// Apply this (possibly rewritten) request.
    Applied(T),
    /// Drop the request and mark the query as matching nothing.
    Rejected,
    /// The hook handled the request itself; replace the query with this one.
    Handled(Box<Query>),
}

/// A parsed `"field op"` filter request.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterRequest {
    pub field: String,
    pub op: FilterOperator,
    pub value: Value,
}

impl FilterRequest {
    pub fn new(field: impl Into<String>, op: FilterOperator, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            op,
            value: value.into(),
        }
    }

    /// Parse `"field"` (equality) or `"field op"`.
    pub fn parse(expr: &str, value: Value) -> Result<Self, Error> {
        let mut parts = expr.split_whitespace();
        let field = parts
            .next()
            .ok_or_else(|| Error::MalformedFilter("empty filter expression".to_string()))?;
        let op = match parts.next() {
            Some(op) => FilterOperator::parse(op).ok_or_else(|| {
                Error::MalformedFilter(format!("unknown operator '{}' in '{}'", op, expr))
            })?,
            None => FilterOperator::Eq,
        };
        if parts.next().is_some() {
            return Err(Error::MalformedFilter(format!("trailing input in '{}'", expr)));
        }
        Ok(Self {
            field: field.to_string(),
            op,
            value,
        })
    }
}

/// Intercepts filter requests.
pub trait FilterHook: Send + Sync {
    fn on_filter(
        &self,
        query: &Query,
        request: FilterRequest,
    ) -> Result<HookOutcome<FilterRequest>, Error>;
}

impl<F> FilterHook for F
where
    F: Fn(&Query, FilterRequest) -> Result<HookOutcome<FilterRequest>, Error> + Send + Sync,
{
    fn on_filter(
        &self,
        query: &Query,
        request: FilterRequest,
    ) -> Result<HookOutcome<FilterRequest>, Error> {
        self(query, request)
    }
}

/// Intercepts sort requests.
pub trait OrderHook: Send + Sync {
    fn on_order(
        &self,
        query: &Query,
        orders: Vec<(String, SortOrder)>,
    ) -> Result<HookOutcome<Vec<(String, SortOrder)>>, Error>;
}

impl<F> OrderHook for F
where
    F: Fn(&Query, Vec<(String, SortOrder)>) -> Result<HookOutcome<Vec<(String, SortOrder)>>, Error>
        + Send
        + Sync,
{
    fn on_order(
        &self,
        query: &Query,
        orders: Vec<(String, SortOrder)>,
    ) -> Result<HookOutcome<Vec<(String, SortOrder)>>, Error> {
        self(query, orders)
    }
}

/// Custom merge of fan-out results: `(query, per-branch results, limit)`.
pub type MergeFn = Arc<dyn Fn(&Query, Vec<Vec<Entity>>, usize) -> Vec<Entity> + Send + Sync>;

/// Per-branch limit of a fan-out query: `(query, logical limit)`.
pub type LimitFn = Arc<dyn Fn(&Query, usize) -> usize + Send + Sync>;
