//! In-memory dormant store
//!
//! Process-local backing with the same contract as the file store,
//! including the logical TTL on the read path. Useful for tests and for
//! embedders that want overflow behavior without durability. Fault
//! switches simulate an unavailable store, wholly or on the write path
//! only, so the swallow-and-continue policies can be exercised.

use crate::error::DormantError;
use crate::types::{now_millis, CacheKey, CacheValue, EntryRecord};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Dormant store holding records in process memory
pub struct MemoryDormantStore<K, V> {
    records: Mutex<HashMap<K, EntryRecord<V>>>,
    ttl_ms: i64,
    last_count: AtomicUsize,
    faulted: AtomicBool,
    write_faulted: AtomicBool,
}

impl<K: CacheKey, V: CacheValue> MemoryDormantStore<K, V> {
    /// Create an empty store with the given logical TTL
    pub fn new(dormant_ttl_ms: u64) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            ttl_ms: dormant_ttl_ms as i64,
            last_count: AtomicUsize::new(0),
            faulted: AtomicBool::new(false),
            write_faulted: AtomicBool::new(false),
        }
    }

    /// Simulate (or clear) store unavailability
    pub fn set_faulted(&self, faulted: bool) {
        self.faulted.store(faulted, Ordering::Relaxed);
    }

    /// Simulate (or clear) a store that can be read but not written
    pub fn set_write_faulted(&self, faulted: bool) {
        self.write_faulted.store(faulted, Ordering::Relaxed);
    }

    fn check_available(&self) -> Result<(), DormantError> {
        if self.faulted.load(Ordering::Relaxed) {
            return Err(DormantError::Unavailable(
                "memory store faulted".to_string(),
            ));
        }
        Ok(())
    }

    fn check_writable(&self) -> Result<(), DormantError> {
        self.check_available()?;
        if self.write_faulted.load(Ordering::Relaxed) {
            return Err(DormantError::Unavailable(
                "memory store write faulted".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl<K: CacheKey, V: CacheValue> super::DormantStore<K, V> for MemoryDormantStore<K, V> {
    async fn read(&self) -> Result<HashMap<K, EntryRecord<V>>, DormantError> {
        self.check_available()?;
        let now = now_millis();
        let records: HashMap<K, EntryRecord<V>> = self
            .records
            .lock()
            .iter()
            .filter(|(_, record)| !record.is_expired(self.ttl_ms, now))
            .map(|(k, record)| (k.clone(), record.clone()))
            .collect();
        self.last_count.store(records.len(), Ordering::Relaxed);
        Ok(records)
    }

    async fn write(&self, records: &HashMap<K, EntryRecord<V>>) -> Result<(), DormantError> {
        self.check_writable()?;
        *self.records.lock() = records.clone();
        self.last_count.store(records.len(), Ordering::Relaxed);
        Ok(())
    }

    async fn clear(&self) -> Result<(), DormantError> {
        self.check_writable()?;
        self.records.lock().clear();
        self.last_count.store(0, Ordering::Relaxed);
        Ok(())
    }

    async fn exists(&self) -> bool {
        true
    }

    async fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    async fn is_accessible(&self) -> bool {
        !self.faulted.load(Ordering::Relaxed)
    }

    async fn ensure_exists(&self) -> Result<(), DormantError> {
        Ok(())
    }

    fn count(&self) -> usize {
        self.last_count.load(Ordering::Relaxed)
    }
}
