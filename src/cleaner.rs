//! Background cleaner for the dormant tier
//!
//! A single periodic task: each tick reads the dormant store (the read
//! path filters logically expired records), writes the filtered snapshot
//! back to compact it, and emits `EmptyCache` while both tiers are empty.
//! This is the only path that proactively drops expired dormant records;
//! dormant records carry no per-entry timers.
//!
//! The loop follows the service shape used elsewhere: a `select!` over the
//! shutdown broadcast, a restart notification, and the interval tick.
//! Errors are contained: a failed sweep is logged and the next tick runs
//! normally.

use crate::active::ActiveTier;
use crate::dormant::DormantStore;
use crate::metrics::CacheStats;
use crate::types::{CacheEvent, CacheKey, CacheValue};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Notify};
use tokio::time::interval;
use tracing::{debug, warn};

pub(crate) struct Cleaner<K: CacheKey, V: CacheValue> {
    period: Duration,
    active: Arc<ActiveTier<K, V>>,
    dormant: Arc<dyn DormantStore<K, V>>,
    events: broadcast::Sender<CacheEvent>,
    restart: Arc<Notify>,
    stats: Arc<CacheStats>,
}

impl<K: CacheKey, V: CacheValue> Cleaner<K, V> {
    pub fn new(
        period: Duration,
        active: Arc<ActiveTier<K, V>>,
        dormant: Arc<dyn DormantStore<K, V>>,
        events: broadcast::Sender<CacheEvent>,
        restart: Arc<Notify>,
        stats: Arc<CacheStats>,
    ) -> Self {
        Self {
            period,
            active,
            dormant,
            events,
            restart,
            stats,
        }
    }

    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        debug!(period_ms = self.period.as_millis() as u64, "cleaner started");
        let mut ticker = interval(self.period);
        // The first tick of a fresh interval completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                result = shutdown.recv() => {
                    match result {
                        Ok(()) | Err(broadcast::error::RecvError::Closed) => {
                            debug!("cleaner received shutdown signal");
                            break;
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            debug!(missed = n, "cleaner broadcast receiver lagged");
                        }
                    }
                }

                _ = self.restart.notified() => {
                    debug!("cleaner period restarted");
                    ticker = interval(self.period);
                    ticker.tick().await;
                }

                _ = ticker.tick() => {
                    self.sweep().await;
                }
            }
        }
        debug!("cleaner stopped");
    }

    /// One compaction pass over the dormant store
    async fn sweep(&self) {
        let snapshot = match self.dormant.read().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(error = %e, "cleaner could not read dormant store");
                return;
            }
        };

        // The read already dropped expired records; writing the snapshot
        // back compacts the store.
        if let Err(e) = self.dormant.write(&snapshot).await {
            warn!(error = %e, "cleaner could not compact dormant store");
            return;
        }
        self.stats.record_cleaner_cycle();

        if snapshot.is_empty() && self.active.is_empty() {
            let _ = self.events.send(CacheEvent::EmptyCache);
            debug!("both tiers empty, emitted EmptyCache");
        }
    }
}
