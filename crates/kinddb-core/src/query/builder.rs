//! The logical query handle and its builder operations.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use kinddb_proto::{Entity, QueryDefinition, SortOrder, Value};
use tracing::{debug, warn};

use super::decompose::decompose;
use super::hooks::{FilterHook, FilterRequest, HookOutcome, LimitFn, MergeFn, OrderHook};
use crate::error::Error;
use crate::model::{FieldModel, RawFilters};
use crate::session::Session;

/// A logical query over one kind.
///
/// Holds one primitive [`QueryDefinition`] per fan-out branch, or none at all
/// once the query is known to match nothing. Every builder call on an
/// unsatisfiable query is a no-op.
#[derive(Clone)]
pub struct Query {
    pub(crate) session: Session,
    pub(crate) definitions: Option<Vec<QueryDefinition>>,
    pub(crate) original_kind: String,
    pub(crate) filter_hook: Option<Arc<dyn FilterHook>>,
    pub(crate) order_hook: Option<Arc<dyn OrderHook>>,
    pub(crate) merge_fn: Option<MergeFn>,
    pub(crate) limit_fn: Option<LimitFn>,
    pub(crate) custom_info: BTreeMap<String, Value>,
    pub(crate) model: Option<Arc<dyn FieldModel>>,
    pub(crate) fulltext: Option<String>,
    pub(crate) last_entry: Option<Entity>,
}

impl Query {
    /// Create a query over `kind`, recording the kind in the session's
    /// access log.
    pub fn new(kind: impl Into<String>, session: &Session) -> Self {
        let query = Self::unlogged(kind, session);
        session.access_log().record_kind(&query.original_kind);
        query
    }

    /// Create a query without touching the access log.
    pub fn unlogged(kind: impl Into<String>, session: &Session) -> Self {
        let kind = kind.into();
        let definition = QueryDefinition::new(kind.clone()).with_limit(session.config().default_limit);
        Self {
            session: session.clone(),
            definitions: Some(vec![definition]),
            original_kind: kind,
            filter_hook: None,
            order_hook: None,
            merge_fn: None,
            limit_fn: None,
            custom_info: BTreeMap::new(),
            model: None,
            fulltext: None,
            last_entry: None,
        }
    }

    /// Attach the field model of the queried kind.
    pub fn with_model(mut self, model: Arc<dyn FieldModel>) -> Self {
        self.model = Some(model);
        self
    }

    pub fn model(&self) -> Option<&Arc<dyn FieldModel>> {
        self.model.as_ref()
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Kind currently queried.
    pub fn kind(&self) -> &str {
        self.definitions
            .as_ref()
            .and_then(|defs| defs.first())
            .map(|def| def.kind.as_str())
            .unwrap_or(&self.original_kind)
    }

    /// Kind the query was created for.
    pub fn original_kind(&self) -> &str {
        &self.original_kind
    }

    /// Pending primitive definitions, `None` if unsatisfiable.
    pub fn queries(&self) -> Option<&[QueryDefinition]> {
        self.definitions.as_deref()
    }

    pub fn is_unsatisfiable(&self) -> bool {
        self.definitions.is_none()
    }

    /// Mark the query as matching nothing.
    pub fn make_unsatisfiable(&mut self) -> &mut Self {
        self.definitions = None;
        self
    }

    /// Add a filter.
    ///
    /// `expr` is `"field"` for equality or `"field op"` with op one of `=`,
    /// `<`, `<=`, `>`, `>=`, `!=` and `IN`. `!=` and `IN` fan the query out;
    /// at most one of them may be used.
    pub fn filter(&mut self, expr: &str, value: impl Into<Value>) -> Result<&mut Self, Error> {
        if self.definitions.is_none() {
            return Ok(self);
        }
        let mut request = FilterRequest::parse(expr, value.into())?;

        if let Some(hook) = self.filter_hook.clone() {
            match hook.on_filter(self, request)? {
                HookOutcome::Applied(rewritten) => request = rewritten,
                HookOutcome::Rejected => {
                    debug!(expr, "filter rejected by hook");
                    self.definitions = None;
                    return Ok(self);
                }
                HookOutcome::Handled(replacement) => {
                    *self = *replacement;
                    return Ok(self);
                }
            }
        }

        if let Some(definitions) = &self.definitions {
            self.definitions = decompose(definitions, &request)?;
        }
        Ok(self)
    }

    /// Replace the sort order of every pending definition.
    pub fn order<I, S>(&mut self, orders: I) -> Result<&mut Self, Error>
    where
        I: IntoIterator<Item = (S, SortOrder)>,
        S: Into<String>,
    {
        if self.definitions.is_none() {
            return Ok(self);
        }
        let mut orders: Vec<(String, SortOrder)> = orders
            .into_iter()
            .map(|(field, direction)| (field.into(), direction))
            .collect();

        if let Some(hook) = self.order_hook.clone() {
            match hook.on_order(self, orders)? {
                HookOutcome::Applied(rewritten) => orders = rewritten,
                HookOutcome::Rejected => {
                    debug!("order rejected by hook");
                    self.definitions = None;
                    return Ok(self);
                }
                HookOutcome::Handled(replacement) => {
                    *self = *replacement;
                    return Ok(self);
                }
            }
        }

        for definition in self.definitions.iter_mut().flatten() {
            definition.orders = orders.clone();
        }
        Ok(self)
    }

    /// Set the result limit of every pending definition. 0 disables it.
    pub fn limit(&mut self, limit: usize) -> &mut Self {
        for definition in self.definitions.iter_mut().flatten() {
            definition.limit = limit;
        }
        self
    }

    /// Return at most one entity per combination of `fields`.
    pub fn distinct_on<I, S>(&mut self, fields: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let fields: Vec<String> = fields.into_iter().map(Into::into).collect();
        for definition in self.definitions.iter_mut().flatten() {
            definition.distinct = Some(fields.clone());
        }
        self
    }

    /// Query a different kind, typically a child kind whose results are
    /// mapped back to their parents.
    pub fn set_kind(&mut self, kind: impl Into<String>) -> &mut Self {
        let kind = kind.into();
        for definition in self.definitions.iter_mut().flatten() {
            definition.kind = kind.clone();
        }
        self
    }

    /// Resume after `start` and stop at `end`.
    ///
    /// Only valid on a query that has not been fanned out.
    pub fn set_cursor(&mut self, start: Option<&str>, end: Option<&str>) -> Result<&mut Self, Error> {
        match self.definitions.as_deref_mut() {
            None => {}
            Some([definition]) => {
                definition.start_cursor = start.map(str::to_string);
                definition.end_cursor = end.map(str::to_string);
            }
            Some(_) => {
                return Err(Error::CursorMisuse(
                    "cannot set a cursor on a fan-out query".to_string(),
                ))
            }
        }
        Ok(self)
    }

    /// Cursor after the last result of the most recent run.
    ///
    /// For a fan-out query this is the first branch's cursor only, which
    /// does not resume the merged result.
    pub fn cursor(&self) -> Option<String> {
        self.definitions
            .as_ref()
            .and_then(|defs| defs.first())
            .and_then(|def| def.current_cursor.clone())
    }

    /// Search `text` through the model's full-text adapter on the next run.
    pub fn fulltext_search(&mut self, text: impl Into<String>) -> &mut Self {
        self.fulltext = Some(text.into());
        self
    }

    pub fn fulltext(&self) -> Option<&str> {
        self.fulltext.as_deref()
    }

    /// Merge untrusted request parameters into this query through the
    /// attached model.
    ///
    /// A `search` parameter becomes a full-text search if the model supports
    /// one (the query becomes unsatisfiable otherwise). Every field then
    /// contributes its filters, followed by every field's sort order. A
    /// field reporting [`Error::Unsatisfiable`] makes the whole query
    /// unsatisfiable. Finally `cursor` and `limit` (1 to 100) are applied.
    pub fn merge_external_filter(&mut self, raw: &RawFilters) -> Result<&mut Self, Error> {
        let model = self.model.clone().ok_or(Error::ModelRequired)?;
        if self.definitions.is_none() {
            return Ok(self);
        }

        if let Some(text) = raw.get("search") {
            match model.search_adapter() {
                Some(adapter) if adapter.supports_fulltext() => {
                    self.fulltext = Some(text.clone());
                }
                _ => {
                    warn!(
                        kind = model.kind_name(),
                        "full-text search requested on a model without a search adapter"
                    );
                    self.definitions = None;
                    return Ok(self);
                }
            }
        }

        match self.apply_model_fields(model.as_ref(), raw) {
            Ok(()) => {}
            Err(Error::Unsatisfiable(reason)) => {
                debug!(kind = model.kind_name(), %reason, "external filter is unsatisfiable");
                self.definitions = None;
                return Ok(self);
            }
            Err(e) => return Err(e),
        }
        if self.definitions.is_none() {
            return Ok(self);
        }

        if let Some(cursor) = raw.get("cursor") {
            if !cursor.is_empty() && !cursor.eq_ignore_ascii_case("none") {
                self.set_cursor(Some(cursor.as_str()), None)?;
            }
        }
        if let Some(limit) = raw.get("limit") {
            if !limit.is_empty() && limit.bytes().all(|b| b.is_ascii_digit()) {
                if let Ok(limit) = limit.parse::<usize>() {
                    if (1..=100).contains(&limit) {
                        self.limit(limit);
                    }
                }
            }
        }
        Ok(self)
    }

    fn apply_model_fields(&mut self, model: &dyn FieldModel, raw: &RawFilters) -> Result<(), Error> {
        let fields = model.fields();
        for (name, handler) in &fields {
            handler.build_filter(name, self, raw)?;
        }
        for (name, handler) in &fields {
            handler.build_sort(name, self, raw)?;
        }
        Ok(())
    }

    pub fn set_filter_hook(&mut self, hook: Option<Arc<dyn FilterHook>>) -> &mut Self {
        self.filter_hook = hook;
        self
    }

    pub fn set_order_hook(&mut self, hook: Option<Arc<dyn OrderHook>>) -> &mut Self {
        self.order_hook = hook;
        self
    }

    /// Replace the default merge of fan-out results.
    pub fn set_merge_fn(&mut self, merge: Option<MergeFn>) -> &mut Self {
        self.merge_fn = merge;
        self
    }

    /// Compute per-branch limits of fan-out queries.
    pub fn set_limit_fn(&mut self, limit: Option<LimitFn>) -> &mut Self {
        self.limit_fn = limit;
        self
    }

    /// Arbitrary metadata carried with the query (and its clones).
    pub fn custom_info(&self) -> &BTreeMap<String, Value> {
        &self.custom_info
    }

    pub fn custom_info_mut(&mut self) -> &mut BTreeMap<String, Value> {
        &mut self.custom_info
    }

    /// Last entity returned by the most recent run.
    pub fn last_entry(&self) -> Option<&Entity> {
        self.last_entry.as_ref()
    }
}

impl fmt::Debug for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("kind", &self.kind())
            .field("original_kind", &self.original_kind)
            .field("definitions", &self.definitions)
            .field("fulltext", &self.fulltext)
            .field("custom_info", &self.custom_info)
            .field("has_model", &self.model.is_some())
            .finish_non_exhaustive()
    }
}
