//! Active tier: bounded concurrent entry map plus per-entry expiry timers
//!
//! Entries and their timers live in two parallel `DashMap`s whose domains
//! match at every quiescent point. Each timer is a single-shot tokio task
//! that sleeps for the active TTL and posts an `ExpiryEvent` to the expiry
//! worker. Timers carry a generation token; a delivery whose token no
//! longer matches the recorded timer is stale and must be ignored, which is
//! how a restart neutralizes an expiry that was already dispatched but not
//! yet consumed.
//!
//! Lock ordering: anything that touches both maps takes `entries` before
//! `timers`. Removal clears the entry first so a timer re-armed under a
//! held entry guard can never be orphaned.

use crate::types::{CacheKey, CacheValue, EntryRecord, RefreshFn};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

/// Expiry notification posted by a timer task
#[derive(Debug)]
pub(crate) struct ExpiryEvent<K> {
    pub key: K,
    pub generation: u64,
}

/// Single-shot timer bound to one key
///
/// Owns the sleeping task; dropping the timer aborts it.
pub(crate) struct ExpiryTimer {
    generation: u64,
    task: JoinHandle<()>,
}

impl Drop for ExpiryTimer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub(crate) struct ActiveTier<K: CacheKey, V: CacheValue> {
    entries: DashMap<K, EntryRecord<V>>,
    timers: DashMap<K, ExpiryTimer>,
    capacity: usize,
    ttl: Duration,
    expiry_tx: mpsc::UnboundedSender<ExpiryEvent<K>>,
    next_generation: AtomicU64,
}

impl<K: CacheKey, V: CacheValue> ActiveTier<K, V> {
    /// Create a tier and the receiving end of its expiry channel
    pub fn new(
        capacity: usize,
        ttl: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<ExpiryEvent<K>>) {
        let (expiry_tx, expiry_rx) = mpsc::unbounded_channel();
        let tier = Self {
            entries: DashMap::new(),
            timers: DashMap::new(),
            capacity,
            ttl,
            expiry_tx,
            next_generation: AtomicU64::new(0),
        };
        (tier, expiry_rx)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Insert a record and arm a fresh timer
    ///
    /// Rejected (returns false) when the tier is full and the key is not
    /// already present; the caller decides eviction. Inserting over an
    /// existing key replaces its record and restarts its timer.
    pub fn insert(&self, key: K, record: EntryRecord<V>) -> bool {
        if self.entries.len() >= self.capacity && !self.entries.contains_key(&key) {
            return false;
        }
        self.entries.insert(key.clone(), record);
        self.arm_timer(&key);
        true
    }

    /// Record a hit: bump the frequency and return the value
    pub fn record_hit(&self, key: &K) -> Option<V> {
        self.entries.get_mut(key).map(|mut entry| {
            entry.record_hit();
            entry.value.clone()
        })
    }

    /// Clone of the record, without counting a hit
    pub fn peek(&self, key: &K) -> Option<EntryRecord<V>> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    /// The registered refresh hook, if the key is present and has one
    pub fn refresh_hook(&self, key: &K) -> Option<RefreshFn<V>> {
        self.entries.get(key).and_then(|entry| entry.refresh_hook())
    }

    /// Atomically replace the value, stamp `modified_at`, and restart the
    /// timer. Frequency is unchanged; the refresh hook is preserved unless
    /// a new one is supplied.
    pub fn update_value(&self, key: &K, value: V, hook: Option<RefreshFn<V>>) -> bool {
        match self.entries.get_mut(key) {
            Some(mut entry) => {
                entry.set_value(value);
                if let Some(hook) = hook {
                    entry.on_expire = Some(hook);
                }
                // Re-armed while the entry guard is held so a concurrent
                // removal cannot leave this timer orphaned.
                self.arm_timer(key);
                true
            }
            None => false,
        }
    }

    /// Replace the value from a refresh hook and re-arm the timer
    pub fn apply_refresh(&self, key: &K, value: V) -> bool {
        match self.entries.get_mut(key) {
            Some(mut entry) => {
                entry.set_value(value);
                self.arm_timer(key);
                true
            }
            None => false,
        }
    }

    /// Remove a key from both maps, cancelling its timer. Idempotent.
    pub fn remove(&self, key: &K) -> Option<EntryRecord<V>> {
        let record = self.entries.remove(key).map(|(_, record)| record);
        self.timers.remove(key);
        record
    }

    /// Drain every entry, cancelling all timers
    pub fn drain(&self) -> Vec<(K, EntryRecord<V>)> {
        let keys: Vec<K> = self.entries.iter().map(|e| e.key().clone()).collect();
        let mut drained = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some((k, record)) = self.entries.remove(&key) {
                drained.push((k, record));
            }
        }
        self.timers.clear();
        drained
    }

    /// The lowest-frequency entry, first encountered winning ties
    pub fn min_frequency(&self) -> Option<(K, u64)> {
        let mut coldest: Option<(K, u64)> = None;
        for entry in self.entries.iter() {
            match &coldest {
                Some((_, freq)) if entry.frequency >= *freq => {}
                _ => coldest = Some((entry.key().clone(), entry.frequency)),
            }
        }
        coldest
    }

    /// Arm (or replace) the single-shot timer for a key
    pub fn arm_timer(&self, key: &K) {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed) + 1;
        let tx = self.expiry_tx.clone();
        let k = key.clone();
        let ttl = self.ttl;
        let task = tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            if let Err(err) = tx.send(ExpiryEvent { key: k, generation }) {
                // The worker is gone while the timer still lives: a
                // scheduling fault. The worker-side fault handling cannot
                // run, so all that remains is to record it.
                warn!(key = %err.0.key, "expiry delivery failed, worker unavailable");
            }
        });
        self.timers.insert(key.clone(), ExpiryTimer { generation, task });
    }

    /// Claim an expiry delivery: succeeds only when the delivered token
    /// still matches the recorded timer, and removes that timer. Stale
    /// deliveries (the timer was restarted or the key removed) fail.
    pub fn claim_timer(&self, key: &K, generation: u64) -> bool {
        self.timers
            .remove_if(key, |_, timer| timer.generation == generation)
            .is_some()
    }

    /// Domain check used by tests: every entry has a timer and vice versa
    #[cfg(test)]
    pub fn domains_match(&self) -> bool {
        self.entries.len() == self.timers.len()
            && self
                .entries
                .iter()
                .all(|e| self.timers.contains_key(e.key()))
    }
}
