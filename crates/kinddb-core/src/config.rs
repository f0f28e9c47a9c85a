//! Engine configuration.

/// Tunables of the query engine and session layer.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Limit used by query definitions that never had `limit()` called.
    pub default_limit: usize,

    /// Exclusive upper bound for `fetch()` limits.
    pub max_fetch_limit: usize,

    /// Batch size used by `iter()`, independent of the query limit.
    pub iter_batch_size: usize,

    /// String length from which a property is excluded from indexing.
    pub unindexed_threshold: usize,

    /// Kinds starting with this prefix are internal and never access-logged.
    pub internal_kind_prefix: String,

    /// Extra attempts of a top-level `get_or_insert` after a commit conflict.
    pub transaction_retries: usize,

    /// Log every query run at debug level.
    pub trace_queries: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_limit: kinddb_proto::DEFAULT_LIMIT,
            max_fetch_limit: 100,
            iter_batch_size: 20,
            unindexed_threshold: 500,
            internal_kind_prefix: "kinddb".to_string(),
            transaction_retries: 3,
            trace_queries: false,
        }
    }
}

impl EngineConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the default query limit.
    pub fn default_limit(mut self, limit: usize) -> Self {
        self.default_limit = limit;
        self
    }

    /// Set the iteration batch size.
    pub fn iter_batch_size(mut self, size: usize) -> Self {
        self.iter_batch_size = size.max(1);
        self
    }

    /// Set the unindexed-property threshold.
    pub fn unindexed_threshold(mut self, threshold: usize) -> Self {
        self.unindexed_threshold = threshold;
        self
    }

    /// Set the internal kind prefix.
    pub fn internal_kind_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.internal_kind_prefix = prefix.into();
        self
    }

    /// Set the number of conflict retries of `get_or_insert`.
    pub fn transaction_retries(mut self, retries: usize) -> Self {
        self.transaction_retries = retries;
        self
    }

    /// Enable or disable query tracing.
    pub fn trace_queries(mut self, enabled: bool) -> Self {
        self.trace_queries = enabled;
        self
    }

    /// Kind name of the transaction-success marker records.
    pub fn marker_kind(&self) -> String {
        format!("{}-transactionmarker", self.internal_kind_prefix)
    }
}
