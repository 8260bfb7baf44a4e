// Crawl statistics hook

use std::collections::BTreeMap;

use dashmap::DashMap;

/// Collector of named counters.
///
/// Implementations are fire-and-forget: recording a value never fails.
pub trait StatsCollector: Send + Sync {
    /// Add `count` to the counter `key`
    fn inc_value(&self, key: &str, count: i64);

    /// Current value of a counter
    fn get_value(&self, key: &str) -> Option<i64>;

    /// Snapshot of all counters
    fn get_stats(&self) -> BTreeMap<String, i64>;
}

/// Keeps counters in memory
#[derive(Debug, Default)]
pub struct MemoryStatsCollector {
    values: DashMap<String, i64>,
}

impl MemoryStatsCollector {
    /// Create an empty collector
    pub fn new() -> Self {
        Self::default()
    }
}

impl StatsCollector for MemoryStatsCollector {
    fn inc_value(&self, key: &str, count: i64) {
        *self.values.entry(key.to_string()).or_insert(0) += count;
    }

    fn get_value(&self, key: &str) -> Option<i64> {
        self.values.get(key).map(|value| *value)
    }

    fn get_stats(&self) -> BTreeMap<String, i64> {
        self.values
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect()
    }
}

/// Discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct DummyStatsCollector;

impl StatsCollector for DummyStatsCollector {
    fn inc_value(&self, _key: &str, _count: i64) {}

    fn get_value(&self, _key: &str) -> Option<i64> {
        None
    }

    fn get_stats(&self) -> BTreeMap<String, i64> {
        BTreeMap::new()
    }
}
