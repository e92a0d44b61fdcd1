//! Monitor Module
//!
//! Session-wide request counters and the health snapshot derived from them.

use std::sync::Mutex;

use serde::Serialize;
use tracing::debug;

use crate::cache::CacheStore;

// == Metrics ==
/// Request outcome counters.
///
/// Every recorded outcome bumps exactly one of hits/misses/errors together
/// with `total_requests`, so the three always sum to the total.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Metrics {
    pub hits: u64,
    pub misses: u64,
    pub errors: u64,
    pub total_requests: u64,
}

impl Metrics {
    /// hits / total_requests, 0.0 before any request.
    pub fn hit_rate(&self) -> f64 {
        ratio(self.hits, self.total_requests)
    }

    /// errors / total_requests, 0.0 before any request.
    pub fn error_rate(&self) -> f64 {
        ratio(self.errors, self.total_requests)
    }
}

fn ratio(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64
    }
}

// == Health ==
/// Health snapshot. Rates are 0..1 fractions; formatting happens at the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Health {
    pub hit_rate: f64,
    pub error_rate: f64,
    /// Bytes currently stored
    pub storage_usage: u64,
    pub item_count: usize,
    pub compression_ratio: f64,
}

#[derive(Debug, Clone, Copy)]
enum Outcome {
    Hit,
    Miss,
    Error,
}

// == Monitor ==
/// Counter set shared by every executor and scheduler in a session.
///
/// Constructed once by the owning context and passed around by `Arc`; tests
/// build their own instance.
#[derive(Debug, Default)]
pub struct Monitor {
    metrics: Mutex<Metrics>,
}

impl Monitor {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, outcome: Outcome) {
        let mut metrics = self.metrics.lock().unwrap_or_else(|e| e.into_inner());
        match outcome {
            Outcome::Hit => metrics.hits += 1,
            Outcome::Miss => metrics.misses += 1,
            Outcome::Error => metrics.errors += 1,
        }
        metrics.total_requests += 1;
        debug!(?outcome, total = metrics.total_requests, "Recorded request outcome");
    }

    pub fn record_hit(&self) {
        self.record(Outcome::Hit);
    }

    pub fn record_miss(&self) {
        self.record(Outcome::Miss);
    }

    pub fn record_error(&self) {
        self.record(Outcome::Error);
    }

    /// Snapshot of the counters.
    pub fn metrics(&self) -> Metrics {
        *self.metrics.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Zeroes all counters. The cache store is left untouched.
    pub fn reset(&self) {
        *self.metrics.lock().unwrap_or_else(|e| e.into_inner()) = Metrics::default();
    }

    /// Combines the counters with the store's current statistics.
    pub fn health(&self, store: &CacheStore) -> Health {
        let metrics = self.metrics();
        let stats = store.stats();
        Health {
            hit_rate: metrics.hit_rate(),
            error_rate: metrics.error_rate(),
            storage_usage: stats.total_compressed_size,
            item_count: stats.item_count,
            compression_ratio: stats.compression_ratio,
        }
    }
}
