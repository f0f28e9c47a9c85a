//! Query execution.
//!
//! All primitive definitions of a query are handed to the store in one
//! batch. Their results are merged (key-deduplicated, first occurrence
//! wins), re-sorted by the order the store applied and truncated to the
//! logical limit.

use std::collections::{HashSet, VecDeque};

use kinddb_proto::{Entity, Key, SortOrder};
use tracing::debug;

use super::distinct::physical_orders;
use super::filter::FilterEvaluator;
use super::resort::{lead_with_inequality, resort};
use super::Query;
use crate::error::Error;
use crate::model::{FetchResult, ModelInstance};
use crate::storage::QueryRequest;

impl Query {
    /// Run the query.
    ///
    /// `limit` overrides the definitions' own limit for this run. Returns
    /// `None` for an unsatisfiable query without contacting the store.
    pub fn run(&mut self, limit: Option<usize>) -> Result<Option<Vec<Entity>>, Error> {
        let Some(first) = self.definitions.as_ref().and_then(|defs| defs.first()) else {
            return Ok(None);
        };
        let logical_limit = limit.unwrap_or(first.limit);

        if self.fulltext.is_some() {
            return self.run_fulltext(logical_limit).map(Some);
        }

        let definitions = self.definitions.as_deref().unwrap_or_default();
        let fan_out = definitions.len() > 1;
        let branch_limit = match &self.limit_fn {
            Some(calculate) if fan_out => Some(calculate(self, logical_limit)),
            _ => None,
        };
        let requests: Vec<QueryRequest> = definitions
            .iter()
            .map(|definition| {
                let limit = branch_limit.or(limit).unwrap_or(definition.limit);
                QueryRequest::from_definition(definition, physical_orders(definition), limit)
            })
            .collect();
        // Merged rows follow the order the store produced them in, which for
        // distinct-on is the reconciled physical order.
        let merge_orders = match (definitions.first(), requests.first()) {
            (Some(first), Some(request)) => lead_with_inequality(first, request.orders.clone()),
            _ => Vec::new(),
        };

        let pages = self.session.run_queries(&requests)?;
        for (definition, page) in self.definitions.iter_mut().flatten().zip(&pages) {
            definition.current_cursor = page.next_cursor.clone();
        }
        let branches: Vec<Vec<Entity>> = pages.into_iter().map(|page| page.entities).collect();

        let merged = match &self.merge_fn {
            Some(merge) if fan_out => merge(self, branches, logical_limit),
            _ => merge_branches(branches, &merge_orders, logical_limit),
        };
        let results = self.fix_kind(merged)?;

        if self.session.config().trace_queries {
            let filters: Vec<String> = self
                .definitions
                .iter()
                .flatten()
                .map(|def| {
                    def.filters
                        .iter()
                        .map(ToString::to_string)
                        .collect::<Vec<_>>()
                        .join(" AND ")
                })
                .collect();
            debug!(
                kind = %self.kind(),
                original_kind = %self.original_kind,
                filters = ?filters,
                results = results.len(),
                "query run"
            );
        }

        self.last_entry = results.last().cloned();
        Ok(Some(results))
    }

    fn run_fulltext(&mut self, limit: usize) -> Result<Vec<Entity>, Error> {
        if self.session.is_in_transaction() {
            return Err(Error::FulltextInTransaction);
        }
        let model = self.model.clone().ok_or(Error::ModelRequired)?;
        let adapter = model.search_adapter().ok_or_else(|| {
            Error::Search(format!("model '{}' has no search adapter", model.kind_name()))
        })?;
        let text = self.fulltext.take().unwrap_or_default();

        let mut hits = adapter.search(&text, self)?;
        if !adapter.guarantees_filter_conformance() {
            if let Some(definitions) = &self.definitions {
                hits.retain(|entity| FilterEvaluator::matches_any(entity, definitions));
            }
        }
        if limit > 0 {
            hits.truncate(limit);
        }
        debug!(kind = %self.kind(), hits = hits.len(), "full-text search");

        self.last_entry = hits.last().cloned();
        Ok(hits)
    }

    /// Replace results of a child kind by their parents of the original kind.
    fn fix_kind(&self, results: Vec<Entity>) -> Result<Vec<Entity>, Error> {
        let original = self.original_kind.as_str();
        let parent_of = |entity: &Entity| -> Option<Key> {
            if entity.key().kind() == original {
                return None;
            }
            entity.key().parent().filter(|p| p.kind() == original).cloned()
        };
        if !results.iter().any(|entity| parent_of(entity).is_some()) {
            return Ok(results);
        }

        let parent_keys: Vec<Option<Key>> = results.iter().map(parent_of).collect();
        let wanted: Vec<Key> = parent_keys.iter().flatten().cloned().collect();
        let mut parents = self.session.get_multi(&wanted)?.into_iter();

        let mut seen = HashSet::new();
        let mut fixed = Vec::with_capacity(results.len());
        for (entity, parent_key) in results.into_iter().zip(parent_keys) {
            let replacement = match parent_key {
                Some(_) => parents.next().flatten(),
                None => Some(entity),
            };
            if let Some(row) = replacement {
                if seen.insert(row.key().clone()) {
                    fixed.push(row);
                }
            }
        }
        Ok(fixed)
    }

    /// Run the query and wrap the results in the attached model.
    ///
    /// An explicit `limit` must be greater than 0 and below
    /// `EngineConfig::max_fetch_limit`.
    pub fn fetch(&mut self, limit: Option<usize>) -> Result<FetchResult, Error> {
        let model = self.model.clone().ok_or(Error::ModelRequired)?;
        let max = self.session.config().max_fetch_limit;
        if let Some(limit) = limit {
            if limit == 0 || limit >= max {
                return Err(Error::LimitOutOfRange { limit, max });
            }
        }

        let entities = self.run(limit)?.unwrap_or_default();
        Ok(FetchResult {
            items: entities
                .into_iter()
                .map(|entity| ModelInstance::new(model.clone(), entity))
                .collect(),
            cursor: self.cursor(),
        })
    }

    /// Iterate over all results in fixed-size batches, ignoring the limit.
    ///
    /// Not available on fan-out queries.
    pub fn iter(&self) -> Result<QueryIter, Error> {
        if matches!(self.definitions.as_deref(), Some(defs) if defs.len() > 1) {
            return Err(Error::CursorMisuse(
                "cannot iterate a fan-out query".to_string(),
            ));
        }
        Ok(QueryIter {
            done: self.definitions.is_none(),
            batch_size: self.session.config().iter_batch_size,
            query: self.clone(),
            buffer: VecDeque::new(),
        })
    }

    /// First result, or `None`.
    pub fn get_entry(&mut self) -> Result<Option<Entity>, Error> {
        Ok(self.run(Some(1))?.and_then(|results| results.into_iter().next()))
    }

    /// First result wrapped in the attached model, or `None`.
    pub fn get_skel(&mut self) -> Result<Option<ModelInstance>, Error> {
        let model = self.model.clone().ok_or(Error::ModelRequired)?;
        Ok(self
            .get_entry()?
            .map(|entity| ModelInstance::new(model, entity)))
    }
}

/// Default merge of branch results.
fn merge_branches(
    branches: Vec<Vec<Entity>>,
    orders: &[(String, SortOrder)],
    limit: usize,
) -> Vec<Entity> {
    let mut seen = HashSet::new();
    let mut merged: Vec<Entity> = branches
        .into_iter()
        .flatten()
        .filter(|entity| seen.insert(entity.key().clone()))
        .collect();
    resort(&mut merged, orders);
    if limit > 0 {
        merged.truncate(limit);
    }
    merged
}

/// Lazy iterator returned by [`Query::iter`].
pub struct QueryIter {
    query: Query,
    buffer: VecDeque<Entity>,
    batch_size: usize,
    done: bool,
}

impl QueryIter {
    fn next_batch(&mut self) -> Result<(), Error> {
        let Some(batch) = self.query.run(Some(self.batch_size))? else {
            self.done = true;
            return Ok(());
        };
        match self.query.cursor() {
            Some(cursor) => {
                for definition in self.query.definitions.iter_mut().flatten() {
                    definition.start_cursor = Some(cursor.clone());
                }
            }
            None => self.done = true,
        }
        self.buffer.extend(batch);
        Ok(())
    }
}

impl Iterator for QueryIter {
    type Item = Result<Entity, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(entity) = self.buffer.pop_front() {
                return Some(Ok(entity));
            }
            if self.done {
                return None;
            }
            if let Err(e) = self.next_batch() {
                self.done = true;
                return Some(Err(e));
            }
        }
    }
}

impl std::fmt::Debug for QueryIter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryIter")
            .field("kind", &self.query.kind())
            .field("buffered", &self.buffer.len())
            .field("done", &self.done)
            .finish()
    }
}
