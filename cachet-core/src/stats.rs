//! Cache statistics.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Number of cache hits (stale hits included).
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Number of evictions due to capacity.
    pub evictions: u64,
    /// Hits that served a stale value and scheduled a refresh.
    pub stale_hits: u64,
    /// Entries removed because they expired (lazily or by sweep).
    pub expirations: u64,
    /// Entries removed by explicit invalidation.
    pub invalidations: u64,
    /// Cache-aside loads that produced a value.
    pub loads: u64,
    pub load_failures: u64,
    pub refreshes: u64,
    pub refresh_failures: u64,
    /// Backing-store writes acknowledged by the flush path.
    pub writes_flushed: u64,
    /// Individual failed backing-store write attempts.
    pub write_failures: u64,
    /// Writes abandoned after exhausting their retry budget.
    pub dead_letters: u64,
    /// Dirty write-back entries dropped by explicit invalidation.
    pub dirty_discarded: u64,
    /// Number of entries currently in cache.
    pub entry_count: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    /// Alias matching the `evictionCount` name callers may expect.
    pub fn eviction_count(&self) -> u64 {
        self.evictions
    }
}

/// Live counters behind [`CacheStats`].
#[derive(Debug, Default)]
pub struct CacheMetrics {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub evictions: AtomicU64,
    pub stale_hits: AtomicU64,
    pub expirations: AtomicU64,
    pub invalidations: AtomicU64,
    pub loads: AtomicU64,
    pub load_failures: AtomicU64,
    pub refreshes: AtomicU64,
    pub refresh_failures: AtomicU64,
    pub writes_flushed: AtomicU64,
    pub write_failures: AtomicU64,
    pub dead_letters: AtomicU64,
    pub dirty_discarded: AtomicU64,
}

impl CacheMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bump a counter by one.
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current snapshot of all metrics.
    pub fn snapshot(&self, entry_count: u64) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            stale_hits: self.stale_hits.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            loads: self.loads.load(Ordering::Relaxed),
            load_failures: self.load_failures.load(Ordering::Relaxed),
            refreshes: self.refreshes.load(Ordering::Relaxed),
            refresh_failures: self.refresh_failures.load(Ordering::Relaxed),
            writes_flushed: self.writes_flushed.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
            dead_letters: self.dead_letters.load(Ordering::Relaxed),
            dirty_discarded: self.dirty_discarded.load(Ordering::Relaxed),
            entry_count,
        }
    }
}
