//! LFU decision engine for the tier boundary
//!
//! Given a candidate record bound for the active tier, the engine decides
//! between inserting it, promoting better-ranked dormant records in its
//! place, writing it through to the dormant tier, or evicting the coldest
//! active entry to make room. A newcomer must out-rank the coldest active
//! entry to enter a full tier; while slots are empty, dormant records that
//! out-rank the candidate are promoted first, which rebuilds hot state
//! after a restart or clear.
//!
//! All dormant mutations persist before the active tier is touched, so an
//! aborted decision (store failure) leaves the active tier unchanged.
//! Promotions insert directly into known-empty slots and never re-enter
//! the decision procedure.

use crate::active::ActiveTier;
use crate::dormant::DormantStore;
use crate::metrics::CacheStats;
use crate::types::{CacheKey, CacheValue, EntryRecord};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Outcome of a placement decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Placement {
    /// Candidate entered the active tier
    Inserted,
    /// Dormant records filled the empty slots; candidate written through
    Promoted {
        /// How many dormant records were promoted
        promoted: usize,
    },
    /// Active tier full and candidate out-ranked; written through
    WroteThrough,
    /// Coldest active entry demoted; candidate entered the active tier
    Evicted,
    /// Store failure aborted the decision; active tier unchanged
    Aborted,
}

pub(crate) struct LfuEngine<K: CacheKey, V: CacheValue> {
    active: Arc<ActiveTier<K, V>>,
    dormant: Arc<dyn DormantStore<K, V>>,
    stats: Arc<CacheStats>,
}

impl<K: CacheKey, V: CacheValue> LfuEngine<K, V> {
    pub fn new(
        active: Arc<ActiveTier<K, V>>,
        dormant: Arc<dyn DormantStore<K, V>>,
        stats: Arc<CacheStats>,
    ) -> Self {
        Self {
            active,
            dormant,
            stats,
        }
    }

    /// Place a candidate record per the LFU policy
    ///
    /// `snapshot` is the current dormant contents with `key` already
    /// removed; `dirty` marks that the snapshot differs from the persisted
    /// state and must be written back even on branches that would not
    /// otherwise touch the store.
    pub async fn place(
        &self,
        key: K,
        record: EntryRecord<V>,
        mut snapshot: HashMap<K, EntryRecord<V>>,
        dirty: bool,
    ) -> Placement {
        let empty_slots = self
            .active
            .capacity()
            .saturating_sub(self.active.len());

        if empty_slots > 0 {
            let mut promoted_keys: Vec<K> = Vec::new();
            for entry in snapshot.iter() {
                if entry.1.frequency > record.frequency {
                    promoted_keys.push(entry.0.clone());
                    if promoted_keys.len() == empty_slots {
                        break;
                    }
                }
            }

            if promoted_keys.is_empty() {
                if dirty && self.persist(&snapshot).await.is_err() {
                    return Placement::Aborted;
                }
                self.active.insert(key, record);
                Placement::Inserted
            } else {
                let promoted: Vec<(K, EntryRecord<V>)> = promoted_keys
                    .into_iter()
                    .filter_map(|k| snapshot.remove(&k).map(|r| (k, r)))
                    .collect();
                // The promotions take the slots; the candidate stays
                // retrievable by going dormant with them.
                snapshot.insert(key.clone(), record);
                if self.persist(&snapshot).await.is_err() {
                    return Placement::Aborted;
                }

                let count = promoted.len();
                for (k, r) in promoted {
                    debug!(key = %k, frequency = r.frequency, "promoting dormant record");
                    self.active.insert(k, r);
                }
                self.stats.record_promotions(count as u64);
                self.stats.record_demotion();
                debug!(key = %key, promoted = count, "candidate written through after promotions");
                Placement::Promoted { promoted: count }
            }
        } else {
            let victim = self.active.min_frequency();
            match victim {
                Some((victim_key, victim_freq)) if victim_freq < record.frequency => {
                    match self.active.peek(&victim_key) {
                        Some(victim_record) => {
                            snapshot.insert(victim_key.clone(), victim_record);
                            if self.persist(&snapshot).await.is_err() {
                                return Placement::Aborted;
                            }
                            self.active.remove(&victim_key);
                            self.active.insert(key.clone(), record);
                            self.stats.record_demotion();
                            debug!(
                                key = %key,
                                victim = %victim_key,
                                victim_frequency = victim_freq,
                                "evicted coldest active entry for candidate"
                            );
                            Placement::Evicted
                        }
                        None => {
                            // Victim vanished concurrently; its slot is free
                            if dirty && self.persist(&snapshot).await.is_err() {
                                return Placement::Aborted;
                            }
                            self.active.insert(key, record);
                            Placement::Inserted
                        }
                    }
                }
                _ => {
                    // Candidate does not out-rank the coldest active entry
                    snapshot.insert(key.clone(), record);
                    if self.persist(&snapshot).await.is_err() {
                        return Placement::Aborted;
                    }
                    self.stats.record_demotion();
                    debug!(key = %key, "candidate written through to dormant tier");
                    Placement::WroteThrough
                }
            }
        }
    }

    /// Move the highest-frequency dormant record (first encountered on
    /// ties) into a known-empty active slot. Used after an expiry removal.
    pub async fn promote_best(&self) -> Option<K> {
        if self.active.len() >= self.active.capacity() {
            return None;
        }
        let mut snapshot = crate::dormant::read_or_empty(self.dormant.as_ref()).await;

        let mut best: Option<(K, u64)> = None;
        for entry in snapshot.iter() {
            match &best {
                Some((_, freq)) if entry.1.frequency <= *freq => {}
                _ => best = Some((entry.0.clone(), entry.1.frequency)),
            }
        }
        let (key, _) = best?;

        let record = snapshot.remove(&key)?;
        if self.persist(&snapshot).await.is_err() {
            return None;
        }
        debug!(key = %key, frequency = record.frequency, "refilling freed slot from dormant tier");
        self.active.insert(key.clone(), record);
        self.stats.record_promotions(1);
        Some(key)
    }

    /// Startup load: move the top-capacity dormant records by frequency
    /// into the active tier, writing the remainder back. Returns how many
    /// records were loaded.
    pub async fn load_initial(&self) -> usize {
        let snapshot = match self.dormant.read().await {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "could not read dormant store at startup");
                return 0;
            }
        };
        if snapshot.is_empty() {
            return 0;
        }

        let mut entries: Vec<(K, EntryRecord<V>)> = snapshot.into_iter().collect();
        entries.sort_by(|a, b| b.1.frequency.cmp(&a.1.frequency));
        let keep = entries.len().min(self.active.capacity());
        let remainder: HashMap<K, EntryRecord<V>> = entries.split_off(keep).into_iter().collect();

        if self.persist(&remainder).await.is_err() {
            // Leave the store untouched rather than duplicating records
            // across tiers.
            return 0;
        }

        let loaded = entries.len();
        for (key, record) in entries {
            self.active.insert(key, record);
        }
        self.stats.record_promotions(loaded as u64);
        loaded
    }

    async fn persist(&self, snapshot: &HashMap<K, EntryRecord<V>>) -> Result<(), ()> {
        match self.dormant.write(snapshot).await {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(error = %e, "dormant write failed, aborting tier decision");
                Err(())
            }
        }
    }
}
