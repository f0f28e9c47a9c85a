//! Primitive query definitions.
//!
//! A [`QueryDefinition`] is exactly what the store can execute in one round
//! trip: equality filters plus inequality filters on at most one property,
//! one sort order, an optional distinct-on list, a limit and cursors.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// Pseudo-property naming the entity key in sort orders.
pub const KEY_SPECIAL_PROPERTY: &str = "__key__";

/// Default number of results of a query definition.
pub const DEFAULT_LIMIT: usize = 30;

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SortOrder {
    /// Smallest first.
    Ascending,
    /// Largest first.
    Descending,
}

impl SortOrder {
    /// Apply this direction to an ascending comparison result.
    pub fn apply(self, ord: Ordering) -> Ordering {
        match self {
            SortOrder::Ascending => ord,
            SortOrder::Descending => ord.reverse(),
        }
    }
}

/// Primitive filter operator understood by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FilterOp {
    Eq,
    Lt,
    Le,
    Gt,
    Ge,
}

impl FilterOp {
    /// Operator text as used in `"field op"` filter expressions.
    pub fn as_str(self) -> &'static str {
        match self {
            FilterOp::Eq => "=",
            FilterOp::Lt => "<",
            FilterOp::Le => "<=",
            FilterOp::Gt => ">",
            FilterOp::Ge => ">=",
        }
    }

    /// Whether this operator constrains a range.
    pub fn is_inequality(self) -> bool {
        !matches!(self, FilterOp::Eq)
    }

    /// Whether `entry op requested` holds, given `entry.cmp(requested)`.
    pub fn accepts(self, ord: Ordering) -> bool {
        match self {
            FilterOp::Eq => ord.is_eq(),
            FilterOp::Lt => ord.is_lt(),
            FilterOp::Le => ord.is_le(),
            FilterOp::Gt => ord.is_gt(),
            FilterOp::Ge => ord.is_ge(),
        }
    }
}

/// Logical filter operator, including the fan-out operators `!=` and `IN`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FilterOperator {
    Eq,
    Lt,
    Le,
    Gt,
    Ge,
    Ne,
    In,
}

impl FilterOperator {
    /// Parse operator text. `IN` is matched case-insensitively.
    pub fn parse(op: &str) -> Option<Self> {
        match op {
            "=" | "==" => Some(FilterOperator::Eq),
            "<" => Some(FilterOperator::Lt),
            "<=" => Some(FilterOperator::Le),
            ">" => Some(FilterOperator::Gt),
            ">=" => Some(FilterOperator::Ge),
            "!=" => Some(FilterOperator::Ne),
            _ if op.eq_ignore_ascii_case("in") => Some(FilterOperator::In),
            _ => None,
        }
    }

    /// The primitive operator, or `None` for fan-out operators.
    pub fn primitive(self) -> Option<FilterOp> {
        match self {
            FilterOperator::Eq => Some(FilterOp::Eq),
            FilterOperator::Lt => Some(FilterOp::Lt),
            FilterOperator::Le => Some(FilterOp::Le),
            FilterOperator::Gt => Some(FilterOp::Gt),
            FilterOperator::Ge => Some(FilterOp::Ge),
            FilterOperator::Ne | FilterOperator::In => None,
        }
    }

    /// Operator text.
    pub fn as_str(self) -> &'static str {
        match self {
            FilterOperator::Ne => "!=",
            FilterOperator::In => "IN",
            other => other.primitive().map(FilterOp::as_str).unwrap_or_default(),
        }
    }
}

impl fmt::Display for FilterOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One `(field, op, value)` constraint of a query definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyFilter {
    pub field: String,
    pub op: FilterOp,
    pub value: Value,
}

impl PropertyFilter {
    /// Create a filter.
    pub fn new(field: impl Into<String>, op: FilterOp, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            op,
            value: value.into(),
        }
    }
}

impl fmt::Display for PropertyFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {:?}", self.field, self.op.as_str(), self.value)
    }
}

/// One primitive query the store can execute directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryDefinition {
    /// Kind to query.
    pub kind: String,
    /// Constraints, at most one per `(field, op)`.
    pub filters: Vec<PropertyFilter>,
    /// Sort keys, most significant first.
    pub orders: Vec<(String, SortOrder)>,
    /// Return at most one entity per combination of these fields.
    pub distinct: Option<Vec<String>>,
    /// Maximum number of results; 0 means unlimited.
    pub limit: usize,
    /// Resume after this cursor.
    pub start_cursor: Option<String>,
    /// Stop at this cursor.
    pub end_cursor: Option<String>,
    /// Cursor returned by the last execution.
    pub current_cursor: Option<String>,
}

impl QueryDefinition {
    /// Create an unconstrained definition for a kind.
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            filters: Vec::new(),
            orders: Vec::new(),
            distinct: None,
            limit: DEFAULT_LIMIT,
            start_cursor: None,
            end_cursor: None,
            current_cursor: None,
        }
    }

    /// Set a filter, replacing an earlier value for the same `(field, op)`.
    pub fn set_filter(&mut self, field: impl Into<String>, op: FilterOp, value: impl Into<Value>) {
        let field = field.into();
        let value = value.into();
        match self
            .filters
            .iter_mut()
            .find(|f| f.field == field && f.op == op)
        {
            Some(existing) => existing.value = value,
            None => self.filters.push(PropertyFilter { field, op, value }),
        }
    }

    /// Builder-style filter setter.
    pub fn with_filter(mut self, field: impl Into<String>, op: FilterOp, value: impl Into<Value>) -> Self {
        self.set_filter(field, op, value);
        self
    }

    /// Builder-style sort setter.
    pub fn with_order(mut self, field: impl Into<String>, direction: SortOrder) -> Self {
        self.orders.push((field.into(), direction));
        self
    }

    /// Builder-style limit setter.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Look up the value of a filter.
    pub fn filter_value(&self, field: &str, op: FilterOp) -> Option<&Value> {
        self.filters
            .iter()
            .find(|f| f.field == field && f.op == op)
            .map(|f| &f.value)
    }

    /// The first property constrained by an inequality, if any.
    pub fn inequality_field(&self) -> Option<&str> {
        self.filters
            .iter()
            .find(|f| f.op.is_inequality())
            .map(|f| f.field.as_str())
    }
}
