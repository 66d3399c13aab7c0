//! Cache counters.
//!
//! Every counter is tracked twice: in process-lifetime atomics that back the
//! admin `metrics()` snapshot (and can be reset), and through the `metrics`
//! facade so a Prometheus recorder installed by the server picks them up.

use std::sync::atomic::{AtomicU64, Ordering};

use metrics::{counter, gauge};
use serde::Serialize;

/// Metric names as constants for consistency.
pub mod names {
    pub const CACHE_HITS_TOTAL: &str = "cache_hits_total";
    pub const CACHE_MISSES_TOTAL: &str = "cache_misses_total";
    pub const CACHE_ERRORS_TOTAL: &str = "cache_errors_total";
    pub const CACHE_SETS_TOTAL: &str = "cache_sets_total";
    pub const CACHE_DELETES_TOTAL: &str = "cache_deletes_total";
    pub const CACHE_LOCAL_ENTRIES: &str = "cache_local_entries";
    pub const CACHE_INVALIDATIONS_TOTAL: &str = "cache_invalidations_total";
    pub const PRESENCE_ONLINE: &str = "presence_online";
}

/// Hit/miss/error/set/delete counters for one cache client.
#[derive(Debug)]
pub struct CacheMetrics {
    tier: &'static str,
    hits: AtomicU64,
    misses: AtomicU64,
    errors: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
}

impl CacheMetrics {
    /// `tier` labels the exported counters ("remote", "fallback").
    pub fn new(tier: &'static str) -> Self {
        Self {
            tier,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            sets: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
        }
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        counter!(names::CACHE_HITS_TOTAL, "tier" => self.tier).increment(1);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        counter!(names::CACHE_MISSES_TOTAL, "tier" => self.tier).increment(1);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        counter!(names::CACHE_ERRORS_TOTAL, "tier" => self.tier).increment(1);
    }

    pub fn record_set(&self) {
        self.sets.fetch_add(1, Ordering::Relaxed);
        counter!(names::CACHE_SETS_TOTAL, "tier" => self.tier).increment(1);
    }

    pub fn record_deletes(&self, count: u64) {
        if count == 0 {
            return;
        }
        self.deletes.fetch_add(count, Ordering::Relaxed);
        counter!(names::CACHE_DELETES_TOTAL, "tier" => self.tier).increment(count);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        MetricsSnapshot {
            hits,
            misses,
            errors: self.errors.load(Ordering::Relaxed),
            sets: self.sets.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            hit_rate: format_hit_rate(hits, misses),
        }
    }

    /// Zero the in-process counters. Exported Prometheus counters stay monotonic.
    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.errors.store(0, Ordering::Relaxed);
        self.sets.store(0, Ordering::Relaxed);
        self.deletes.store(0, Ordering::Relaxed);
    }
}

/// Point-in-time view of [`CacheMetrics`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub errors: u64,
    pub sets: u64,
    pub deletes: u64,
    /// `hits / (hits + misses)` as a percentage, e.g. `"75.00%"`.
    pub hit_rate: String,
}

fn format_hit_rate(hits: u64, misses: u64) -> String {
    let total = hits + misses;
    let rate = if total == 0 {
        0.0
    } else {
        (hits as f64 / total as f64) * 100.0
    };
    format!("{rate:.2}%")
}

/// Set the number of live local fallback entries.
pub fn set_local_entries(count: usize) {
    gauge!(names::CACHE_LOCAL_ENTRIES).set(count as f64);
}

/// Record keys removed by an invalidation event.
pub fn record_invalidation(event: &str, removed: u64) {
    counter!(names::CACHE_INVALIDATIONS_TOTAL, "event" => event.to_string()).increment(removed);
}

/// Set the number of users currently listed online.
pub fn set_presence_online(count: usize) {
    gauge!(names::PRESENCE_ONLINE).set(count as f64);
}
