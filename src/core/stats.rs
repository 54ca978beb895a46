//! Lock-free counters describing what a cache did.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct CacheStats {
    served: AtomicU64,
    misses: AtomicU64,
    rejected: AtomicU64,
    replaced: AtomicU64,
    evicted: AtomicU64,
    evicted_bytes: AtomicU64,
    range_requests: AtomicU64,
    upstream_failures: AtomicU64,
    downstream_failures: AtomicU64,
    stale_requests: AtomicU64,
}

/// Plain copy of the counters, for logging and JSON output
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStatsSnapshot {
    pub served: u64,
    pub misses: u64,
    pub rejected: u64,
    pub replaced: u64,
    pub evicted: u64,
    pub evicted_bytes: u64,
    pub range_requests: u64,
    pub upstream_failures: u64,
    pub downstream_failures: u64,
    pub stale_requests: u64,
}

impl CacheStatsSnapshot {
    /// Served lookups over all lookups
    pub fn hit_rate(&self) -> f64 {
        let total = self.served + self.misses;
        if total == 0 { 0.0 } else { self.served as f64 / total as f64 }
    }
}

impl CacheStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_served(&self) {
        self.served.fetch_add(1, Ordering::Relaxed);
    }

    /// Drain burst ended without a servable entry
    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_replaced(&self) {
        self.replaced.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_evicted(&self, count: usize, bytes: usize) {
        self.evicted.fetch_add(count as u64, Ordering::Relaxed);
        self.evicted_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_range_request(&self) {
        self.range_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_upstream_failure(&self) {
        self.upstream_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_downstream_failure(&self) {
        self.downstream_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stale_request(&self) {
        self.stale_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            served: self.served.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            replaced: self.replaced.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
            evicted_bytes: self.evicted_bytes.load(Ordering::Relaxed),
            range_requests: self.range_requests.load(Ordering::Relaxed),
            upstream_failures: self.upstream_failures.load(Ordering::Relaxed),
            downstream_failures: self.downstream_failures.load(Ordering::Relaxed),
            stale_requests: self.stale_requests.load(Ordering::Relaxed),
        }
    }
}
