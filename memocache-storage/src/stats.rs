//! Cache usage counters.

use std::sync::atomic::{AtomicU64, Ordering};

use memocache_core::Freshness;

/// Statistics about cache usage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Loads that found a fresh row.
    pub fresh_hits: u64,
    /// Loads that found a stale row inside the reuse window.
    pub stale_hits: u64,
    /// Loads that found no row or an expired one.
    pub misses: u64,
    /// Loads that failed with a storage or codec error.
    pub load_errors: u64,
    /// Stores that wrote a row.
    pub stores_written: u64,
    /// Stores dropped because errors are not cached.
    pub stores_skipped: u64,
    /// Stores that failed to encode or write.
    pub stores_failed: u64,
}

impl CacheStats {
    /// Fraction of loads answered from cache, fresh or stale (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let hits = self.fresh_hits + self.stale_hits;
        let total = hits + self.misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    pub fn loads(&self) -> u64 {
        self.fresh_hits + self.stale_hits + self.misses + self.load_errors
    }
}

/// Lock-free counters behind [`CacheStats`].
#[derive(Debug, Default)]
pub(crate) struct StatsRecorder {
    fresh_hits: AtomicU64,
    stale_hits: AtomicU64,
    misses: AtomicU64,
    load_errors: AtomicU64,
    stores_written: AtomicU64,
    stores_skipped: AtomicU64,
    stores_failed: AtomicU64,
}

impl StatsRecorder {
    pub(crate) fn record_lookup(&self, state: Freshness) {
        let counter = match state {
            Freshness::Fresh => &self.fresh_hits,
            Freshness::Stale => &self.stale_hits,
            Freshness::Expired => &self.misses,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_load_error(&self) {
        self.load_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_written(&self) {
        self.stores_written.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_skipped(&self) {
        self.stores_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failed(&self) {
        self.stores_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> CacheStats {
        CacheStats {
            fresh_hits: self.fresh_hits.load(Ordering::Relaxed),
            stale_hits: self.stale_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            load_errors: self.load_errors.load(Ordering::Relaxed),
            stores_written: self.stores_written.load(Ordering::Relaxed),
            stores_skipped: self.stores_skipped.load(Ordering::Relaxed),
            stores_failed: self.stores_failed.load(Ordering::Relaxed),
        }
    }
}
