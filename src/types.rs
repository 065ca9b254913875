//! Core data types shared by both cache tiers
//!
//! This module defines the fundamental data structures used across the
//! system:
//!
//! # Key Types
//!
//! - **`EntryRecord`**: the unit of cached data (value, hit frequency,
//!   timestamps, optional refresh hook)
//! - **`RefreshFn`**: caller-supplied producer invoked when an active
//!   entry's TTL elapses, replacing the value instead of dropping the entry
//! - **`CacheKey` / `CacheValue`**: blanket alias traits collecting the
//!   bounds a key/value type needs to live in either tier
//! - **`CacheEvent`**: notifications emitted by the cache
//!
//! # Example
//!
//! ```rust
//! use embercache::types::EntryRecord;
//!
//! let record = EntryRecord::new(42u32);
//! assert_eq!(record.frequency, 1);
//! assert!(record.created_at <= record.modified_at);
//! ```

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

/// Milliseconds since the Unix epoch
pub type Timestamp = i64;

/// Current wall-clock time in milliseconds since the Unix epoch
pub fn now_millis() -> Timestamp {
    Utc::now().timestamp_millis()
}

/// Caller-supplied producer of a replacement value, invoked on TTL expiry
///
/// The callback's lifetime equals the record's: it is dropped with the
/// record and never persisted to the dormant tier.
pub type RefreshFn<V> = Arc<dyn Fn() -> V + Send + Sync>;

/// Bounds required of a cache key
///
/// `Display` supplies the string form used by the empty-key no-op rule;
/// serde bounds let the key round-trip through a dormant store. Implemented
/// automatically for every qualifying type.
pub trait CacheKey:
    Eq + Hash + Clone + fmt::Display + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

impl<T> CacheKey for T where
    T: Eq + Hash + Clone + fmt::Display + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

/// Bounds required of a cache value
///
/// Implemented automatically for every qualifying type.
pub trait CacheValue:
    Clone + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

impl<T> CacheValue for T where T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

/// Notifications emitted by the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheEvent {
    /// Both tiers are simultaneously empty. Raised once by the operation
    /// that emptied the cache and periodically by the cleaner while the
    /// condition holds.
    EmptyCache,
}

/// The unit of cached data
///
/// Wraps a value with the bookkeeping both tiers share: a monotonically
/// increasing hit counter, creation/modification timestamps, and an
/// optional refresh hook. Moving a record between tiers preserves the
/// counter and timestamps.
#[derive(Clone, Serialize, Deserialize)]
#[serde(bound(serialize = "V: Serialize", deserialize = "V: Deserialize<'de>"))]
pub struct EntryRecord<V> {
    /// The cached value
    pub value: V,

    /// Number of successful lookups, starting at 1; never decreases while
    /// the record exists in either tier
    pub frequency: u64,

    /// Creation timestamp (milliseconds since epoch)
    pub created_at: Timestamp,

    /// Last-modification timestamp; always >= `created_at`
    pub modified_at: Timestamp,

    /// Refresh hook invoked on TTL expiry. Process-local: skipped by
    /// serialization, so a record read back from a durable store carries
    /// `None`.
    #[serde(skip)]
    pub(crate) on_expire: Option<RefreshFn<V>>,
}

impl<V> EntryRecord<V> {
    /// Create a fresh record with frequency 1 and no refresh hook
    pub fn new(value: V) -> Self {
        let now = now_millis();
        Self {
            value,
            frequency: 1,
            created_at: now,
            modified_at: now,
            on_expire: None,
        }
    }

    /// Create a fresh record carrying a refresh hook
    pub fn with_refresh(value: V, on_expire: RefreshFn<V>) -> Self {
        let mut record = Self::new(value);
        record.on_expire = Some(on_expire);
        record
    }

    /// Record a successful lookup
    pub(crate) fn record_hit(&mut self) {
        self.frequency = self.frequency.saturating_add(1);
    }

    /// Replace the value and stamp the modification time. Frequency and the
    /// refresh hook are untouched.
    pub(crate) fn set_value(&mut self, value: V) {
        self.value = value;
        self.modified_at = now_millis();
    }

    /// The refresh hook, if one was registered
    pub fn refresh_hook(&self) -> Option<RefreshFn<V>> {
        self.on_expire.clone()
    }

    /// Age of the record relative to `now`, in milliseconds
    pub fn age_ms(&self, now: Timestamp) -> i64 {
        now.saturating_sub(self.created_at)
    }

    /// Whether the record's age has reached the given logical TTL
    pub fn is_expired(&self, ttl_ms: i64, now: Timestamp) -> bool {
        self.age_ms(now) >= ttl_ms
    }
}

impl<V: fmt::Debug> fmt::Debug for EntryRecord<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntryRecord")
            .field("value", &self.value)
            .field("frequency", &self.frequency)
            .field("created_at", &self.created_at)
            .field("modified_at", &self.modified_at)
            .field("on_expire", &self.on_expire.is_some())
            .finish()
    }
}
