//! Embercache - Two-tier, frequency-aware in-process cache
//!
//! This library provides a bounded, TTL'd in-memory hot tier ("active")
//! backed by an unbounded, durable cold tier ("dormant") that doubles as a
//! restart-survivable store. An LFU policy moves entries across the tier
//! boundary so the most frequently accessed records stay hot:
//! - Bounded active tier with per-entry single-shot expiry timers
//! - Refresh-on-expire hooks that regenerate a value instead of dropping it
//! - File-backed dormant tier with a logical TTL, compacted by a background
//!   cleaner
//! - Pluggable dormant store implementations behind a capability trait

#![warn(missing_docs)]
#![warn(clippy::all)]

mod active;
mod cleaner;
mod lfu;

pub mod config;
pub mod controller;
pub mod dormant;
pub mod error;
pub mod metrics;
pub mod types;

// Re-export main types
pub use config::CacheConfig;
pub use controller::TierCache;
pub use dormant::{DormantStore, FileDormantStore, MemoryDormantStore};
pub use error::{CacheError, DormantError, Result};
pub use metrics::CacheStatsSnapshot;
pub use types::{CacheEvent, CacheKey, CacheValue, EntryRecord, RefreshFn};
