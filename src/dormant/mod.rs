//! Dormant tier: the unbounded, durable side of the cache
//!
//! The dormant tier is exposed as a capability trait so alternative
//! backings can be wired in at construction time. Two implementations
//! ship with the crate:
//!
//! - [`FileDormantStore`]: the default, persisting one document to a
//!   stable path
//! - [`MemoryDormantStore`]: process-local backing for tests and embedders
//!   that want overflow without durability

use crate::error::DormantError;
use crate::types::{CacheKey, CacheValue, EntryRecord};
use async_trait::async_trait;
use std::collections::HashMap;

/// File-backed default implementation
pub mod file;
/// In-memory implementation
pub mod memory;

pub use file::FileDormantStore;
pub use memory::MemoryDormantStore;

/// Capability set of a dormant-tier backing store
///
/// One store instance is owned by one cache; implementations serialize
/// their own access so `read`/`write`/`clear` are totally ordered.
#[async_trait]
pub trait DormantStore<K, V>: Send + Sync + 'static
where
    K: CacheKey,
    V: CacheValue,
{
    /// Current valid contents. Records whose age has reached the store's
    /// logical TTL are filtered out and not returned.
    async fn read(&self) -> Result<HashMap<K, EntryRecord<V>>, DormantError>;

    /// Persist the full mapping, replacing prior state as atomically as
    /// the backing medium allows
    async fn write(&self, records: &HashMap<K, EntryRecord<V>>) -> Result<(), DormantError>;

    /// Drop all stored records
    async fn clear(&self) -> Result<(), DormantError>;

    /// Whether the backing medium currently holds a store
    async fn exists(&self) -> bool;

    /// Whether the store currently holds no valid records
    async fn is_empty(&self) -> bool;

    /// Whether the store can currently be read or created
    async fn is_accessible(&self) -> bool;

    /// Idempotent preparation of the backing medium
    async fn ensure_exists(&self) -> Result<(), DormantError>;

    /// Last-known cardinality. May lag the store's true contents; refreshed
    /// by `read` and `write`.
    fn count(&self) -> usize;
}

/// Read the store, treating any failure as an empty mapping
///
/// The swallow-and-continue policy of the tier-movement and probe paths:
/// the failure is logged, never surfaced.
pub(crate) async fn read_or_empty<K, V>(
    store: &dyn DormantStore<K, V>,
) -> HashMap<K, EntryRecord<V>>
where
    K: CacheKey,
    V: CacheValue,
{
    match store.read().await {
        Ok(records) => records,
        Err(e) => {
            tracing::warn!(error = %e, "dormant read failed, treating store as empty");
            HashMap::new()
        }
    }
}
