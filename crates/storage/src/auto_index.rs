//! Tracks equality-predicate usage per column so the external query pipeline
//! can opportunistically trigger a new secondary index without the operator
//! asking for one explicitly (spec.md §4.7's automatic indexing note).

use config::AutoIndexConfig;
use parking_lot::Mutex;
use std::collections::HashMap;

/// Per-table use-count tracker. `record_use` is the single entry point the
/// external query pipeline is expected to call once per executed equality
/// predicate; `Table::record_predicate_use` wraps this with the decision of
/// whether to actually build the index.
pub struct AutoIndexTracker {
    config: AutoIndexConfig,
    counts: Mutex<HashMap<String, u64>>,
}

impl AutoIndexTracker {
    #[must_use]
    pub fn new(config: AutoIndexConfig) -> Self {
        Self {
            config,
            counts: Mutex::new(HashMap::new()),
        }
    }

    /// Records one equality-predicate use of `column` and returns `true`
    /// exactly once, the tick where the threshold is first crossed, so the
    /// caller builds the index at most once per column (a table that
    /// already has an index for the column, or already has
    /// `max_indexes_per_table`, should not call this at all).
    pub fn record_use(&self, column: &str) -> bool {
        let mut counts = self.counts.lock();
        let count = counts.entry(column.to_string()).or_insert(0);
        *count += 1;
        *count == self.config.auto_index_threshold
    }

    #[must_use]
    pub fn max_indexes_per_table(&self) -> usize {
        self.config.max_indexes_per_table
    }

    #[must_use]
    pub fn use_count(&self, column: &str) -> u64 {
        self.counts.lock().get(column).copied().unwrap_or(0)
    }
}
