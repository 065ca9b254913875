//! Cache counters and their snapshot form
//!
//! Counters are plain atomics updated on the hot path; `snapshot` produces
//! a point-in-time, serializable view for monitoring.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Internal counters, shared across the facade and its workers
#[derive(Debug, Default)]
pub(crate) struct CacheStats {
    /// Lookups that found a record in either tier
    hits: AtomicU64,

    /// Lookups that found nothing
    misses: AtomicU64,

    /// Records moved dormant -> active
    promotions: AtomicU64,

    /// Records moved active -> dormant, including write-throughs
    demotions: AtomicU64,

    /// Active entries dropped by TTL expiry
    expirations: AtomicU64,

    /// Expiries absorbed by a refresh hook
    refreshes: AtomicU64,

    /// Completed cleaner sweeps
    cleaner_cycles: AtomicU64,
}

impl CacheStats {
    pub(crate) fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_promotions(&self, n: u64) {
        self.promotions.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn record_demotion(&self) {
        self.demotions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_expiration(&self) {
        self.expirations.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_refresh(&self) {
        self.refreshes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_cleaner_cycle(&self) {
        self.cleaner_cycles.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> CacheStatsSnapshot {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total > 0 {
            hits as f64 / total as f64
        } else {
            0.0
        };

        CacheStatsSnapshot {
            hits,
            misses,
            hit_rate,
            promotions: self.promotions.load(Ordering::Relaxed),
            demotions: self.demotions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            refreshes: self.refreshes.load(Ordering::Relaxed),
            cleaner_cycles: self.cleaner_cycles.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of the cache counters
#[derive(Debug, Clone, Serialize)]
pub struct CacheStatsSnapshot {
    /// Lookups that found a record in either tier
    pub hits: u64,

    /// Lookups that found nothing
    pub misses: u64,

    /// Hit rate (0.0 to 1.0)
    pub hit_rate: f64,

    /// Records moved dormant -> active
    pub promotions: u64,

    /// Records moved active -> dormant, including write-throughs
    pub demotions: u64,

    /// Active entries dropped by TTL expiry
    pub expirations: u64,

    /// Expiries absorbed by a refresh hook
    pub refreshes: u64,

    /// Completed cleaner sweeps
    pub cleaner_cycles: u64,
}
