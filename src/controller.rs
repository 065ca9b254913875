//! Cache controller: the public facade over both tiers
//!
//! `TierCache` composes the active tier, the dormant store, the LFU engine,
//! the expiry worker, and the cleaner, and owns their lifetime. A
//! process-wide registry keyed by the `(K, V)` type pair backs the
//! singleton `initialize` path; `create` builds an unregistered instance
//! for embedders and tests.
//!
//! # Concurrency discipline
//!
//! Per-key reads and updates go straight to the active tier's concurrent
//! maps. Everything that moves records across the tier boundary (adds,
//! dormant hits, dormant-only updates, post-expiry refills, clear, the
//! dispose flush) runs under one async placement mutex, which also keeps
//! the active-tier bound exact. The dormant store orders its own
//! read/write/clear calls internally.
//!
//! # Example
//!
//! ```rust,no_run
//! use embercache::{CacheConfig, TierCache};
//!
//! # async fn demo() -> embercache::Result<()> {
//! let cache: TierCache<String, u64> = TierCache::initialize(CacheConfig::default()).await?;
//! cache.add("answer".to_string(), 42).await?;
//! assert_eq!(cache.get(&"answer".to_string()).await?, Some(42));
//! cache.dispose().await?;
//! # Ok(())
//! # }
//! ```

use crate::active::{ActiveTier, ExpiryEvent};
use crate::cleaner::Cleaner;
use crate::config::CacheConfig;
use crate::dormant::{file::default_path_for, read_or_empty, DormantStore, FileDormantStore};
use crate::error::{CacheError, Result};
use crate::lfu::{LfuEngine, Placement};
use crate::metrics::{CacheStats, CacheStatsSnapshot};
use crate::types::{CacheEvent, CacheKey, CacheValue, EntryRecord, RefreshFn};
use lazy_static::lazy_static;
use parking_lot::RwLock;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{broadcast, mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

lazy_static! {
    /// Process-wide singleton registry, one slot per `(K, V)` pair
    static ref REGISTRY: RwLock<HashMap<TypeId, Box<dyn Any + Send + Sync>>> =
        RwLock::new(HashMap::new());

    /// Serializes singleton construction
    static ref INIT_LOCK: tokio::sync::Mutex<()> = tokio::sync::Mutex::new(());
}

fn registry_get<K: CacheKey, V: CacheValue>() -> Option<TierCache<K, V>> {
    REGISTRY
        .read()
        .get(&TypeId::of::<(K, V)>())
        .and_then(|boxed| boxed.downcast_ref::<TierCache<K, V>>())
        .cloned()
}

/// Two-tier, frequency-aware cache
///
/// Cheap to clone; all clones share the same instance. Obtained from
/// [`TierCache::initialize`] (process-wide singleton per `(K, V)` pair) or
/// [`TierCache::create`] (unregistered instance).
pub struct TierCache<K: CacheKey, V: CacheValue> {
    inner: Arc<CacheInner<K, V>>,
}

impl<K: CacheKey, V: CacheValue> Clone for TierCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

struct CacheInner<K: CacheKey, V: CacheValue> {
    config: CacheConfig,
    active: Arc<ActiveTier<K, V>>,
    dormant: Arc<dyn DormantStore<K, V>>,
    lfu: LfuEngine<K, V>,
    events: broadcast::Sender<CacheEvent>,
    stats: Arc<CacheStats>,

    /// Serializes tier-boundary transactions
    placement: tokio::sync::Mutex<()>,

    disposed: AtomicBool,
    registered: bool,
    cleaner_restart: Arc<Notify>,
    shutdown_tx: broadcast::Sender<()>,
    tasks: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl<K: CacheKey, V: CacheValue> TierCache<K, V> {
    /// Create or fetch the process-wide singleton for this `(K, V)` pair,
    /// backed by the default file store
    ///
    /// The first call loads the top-`capacity` dormant records by frequency
    /// into the active tier and starts the cleaner; later calls are no-ops
    /// returning the existing handle.
    pub async fn initialize(config: CacheConfig) -> Result<Self> {
        config.validate()?;
        let _init = INIT_LOCK.lock().await;
        if let Some(existing) = registry_get::<K, V>() {
            return Ok(existing);
        }

        let path = config
            .dormant_path
            .clone()
            .unwrap_or_else(default_path_for::<K, V>);
        let store: Arc<dyn DormantStore<K, V>> =
            Arc::new(FileDormantStore::new(path, config.dormant_ttl_ms));
        let cache = Self::build(config, store, true).await;
        REGISTRY
            .write()
            .insert(TypeId::of::<(K, V)>(), Box::new(cache.clone()));
        Ok(cache)
    }

    /// Singleton variant taking an alternative dormant store
    pub async fn initialize_with_store(
        config: CacheConfig,
        store: Arc<dyn DormantStore<K, V>>,
    ) -> Result<Self> {
        config.validate()?;
        let _init = INIT_LOCK.lock().await;
        if let Some(existing) = registry_get::<K, V>() {
            return Ok(existing);
        }
        let cache = Self::build(config, store, true).await;
        REGISTRY
            .write()
            .insert(TypeId::of::<(K, V)>(), Box::new(cache.clone()));
        Ok(cache)
    }

    /// Build an instance that is not tracked by the registry
    pub async fn create(config: CacheConfig, store: Arc<dyn DormantStore<K, V>>) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config, store, false).await)
    }

    async fn build(
        config: CacheConfig,
        dormant: Arc<dyn DormantStore<K, V>>,
        registered: bool,
    ) -> Self {
        let (active, expiry_rx) = ActiveTier::new(config.capacity, config.active_ttl());
        let active = Arc::new(active);
        let stats = Arc::new(CacheStats::default());
        let (events, _) = broadcast::channel(16);
        let (shutdown_tx, _) = broadcast::channel(1);
        let cleaner_restart = Arc::new(Notify::new());
        let lfu = LfuEngine::new(active.clone(), dormant.clone(), stats.clone());

        let inner = Arc::new(CacheInner {
            config: config.clone(),
            active: active.clone(),
            dormant: dormant.clone(),
            lfu,
            events: events.clone(),
            stats: stats.clone(),
            placement: tokio::sync::Mutex::new(()),
            disposed: AtomicBool::new(false),
            registered,
            cleaner_restart: cleaner_restart.clone(),
            shutdown_tx: shutdown_tx.clone(),
            tasks: parking_lot::Mutex::new(Vec::new()),
        });

        // Restore hot state surviving from a previous run
        if dormant.exists().await && dormant.is_accessible().await {
            let loaded = inner.lfu.load_initial().await;
            if loaded > 0 {
                info!(loaded, "restored hot tier from dormant store");
            }
        } else if let Err(e) = dormant.ensure_exists().await {
            warn!(error = %e, "could not prepare dormant store");
        }

        let worker = tokio::spawn(expiry_worker(
            Arc::downgrade(&inner),
            expiry_rx,
            shutdown_tx.subscribe(),
        ));
        let cleaner = Arc::new(Cleaner::new(
            config.cleaner_period(),
            active,
            dormant,
            events,
            cleaner_restart,
            stats,
        ));
        let cleaner_task = tokio::spawn(cleaner.run(shutdown_tx.subscribe()));
        inner.tasks.lock().extend([worker, cleaner_task]);

        Self { inner }
    }

    /// The configuration this cache was built with
    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// Place a value into the cache
    ///
    /// Enters the active tier if the LFU decision admits it, otherwise
    /// goes dormant. A key with an empty string form is silently ignored.
    pub async fn add(&self, key: K, value: V) -> Result<()> {
        self.add_entry(key, value, None).await
    }

    /// As [`add`](Self::add), registering a refresh hook invoked when the
    /// entry's active TTL elapses
    pub async fn add_with_refresh(
        &self,
        key: K,
        value: V,
        on_expire: RefreshFn<V>,
    ) -> Result<()> {
        self.add_entry(key, value, Some(on_expire)).await
    }

    async fn add_entry(&self, key: K, value: V, hook: Option<RefreshFn<V>>) -> Result<()> {
        self.inner.ensure_live()?;
        if key.to_string().is_empty() {
            debug!("ignoring add with empty key");
            return Ok(());
        }
        let record = match hook {
            Some(hook) => EntryRecord::with_refresh(value, hook),
            None => EntryRecord::new(value),
        };

        let _guard = self.inner.placement.lock().await;
        if self.inner.active.contains(&key) {
            // Re-adding an active key replaces its record in place
            self.inner.active.insert(key, record);
            return Ok(());
        }
        let mut snapshot = read_or_empty(self.inner.dormant.as_ref()).await;
        let dirty = snapshot.remove(&key).is_some();
        self.inner.lfu.place(key, record, snapshot, dirty).await;
        Ok(())
    }

    /// Replace the value of an existing entry in either tier
    ///
    /// Stamps `modified_at` and restarts the active timer; a dormant-only
    /// key is first run through the LFU placement. Frequency and any
    /// registered refresh hook are unchanged. Returns whether the key was
    /// found.
    pub async fn update(&self, key: &K, value: V) -> Result<bool> {
        self.inner.ensure_live()?;
        if key.to_string().is_empty() {
            return Ok(false);
        }
        if self.inner.active.update_value(key, value.clone(), None) {
            return Ok(true);
        }

        let _guard = self.inner.placement.lock().await;
        if self.inner.active.update_value(key, value.clone(), None) {
            return Ok(true);
        }
        let mut snapshot = read_or_empty(self.inner.dormant.as_ref()).await;
        match snapshot.remove(key) {
            Some(mut record) => {
                record.set_value(value);
                let placement = self
                    .inner
                    .lfu
                    .place(key.clone(), record, snapshot, true)
                    .await;
                // An aborted placement left the old value in place; a
                // subsequent lookup must not contradict a reported success.
                Ok(placement != Placement::Aborted)
            }
            None => Ok(false),
        }
    }

    /// Whether the key is present in either tier, counting a hit
    pub async fn lookup(&self, key: &K) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }

    /// Whether the key is present in the active tier, counting a hit
    pub fn active_lookup(&self, key: &K) -> Result<bool> {
        Ok(self.get_active(key)?.is_some())
    }

    /// Fetch a value from either tier, counting a hit
    ///
    /// A dormant hit runs the LFU placement, which may promote the record
    /// into the active tier. A store failure reads as "not found".
    pub async fn get(&self, key: &K) -> Result<Option<V>> {
        self.inner.ensure_live()?;
        if let Some(value) = self.inner.active.record_hit(key) {
            self.inner.stats.record_hit();
            return Ok(Some(value));
        }

        let _guard = self.inner.placement.lock().await;
        // The key may have been promoted while waiting for the lock
        if let Some(value) = self.inner.active.record_hit(key) {
            self.inner.stats.record_hit();
            return Ok(Some(value));
        }
        let mut snapshot = read_or_empty(self.inner.dormant.as_ref()).await;
        match snapshot.remove(key) {
            Some(mut record) => {
                record.record_hit();
                let value = record.value.clone();
                self.inner.stats.record_hit();
                self.inner
                    .lfu
                    .place(key.clone(), record, snapshot, true)
                    .await;
                Ok(Some(value))
            }
            None => {
                self.inner.stats.record_miss();
                Ok(None)
            }
        }
    }

    /// Fetch a value from the active tier only, counting a hit
    pub fn get_active(&self, key: &K) -> Result<Option<V>> {
        self.inner.ensure_live()?;
        match self.inner.active.record_hit(key) {
            Some(value) => {
                self.inner.stats.record_hit();
                Ok(Some(value))
            }
            None => {
                self.inner.stats.record_miss();
                Ok(None)
            }
        }
    }

    /// Remove the key from whichever tier holds it
    ///
    /// Cancels the active timer and returns the prior record. Emits
    /// `EmptyCache` when both tiers become empty.
    pub async fn remove(&self, key: &K) -> Result<Option<EntryRecord<V>>> {
        self.inner.ensure_live()?;
        if let Some(record) = self.inner.active.remove(key) {
            self.inner.maybe_emit_empty().await;
            return Ok(Some(record));
        }

        let _guard = self.inner.placement.lock().await;
        let mut snapshot = read_or_empty(self.inner.dormant.as_ref()).await;
        match snapshot.remove(key) {
            Some(record) => {
                if let Err(e) = self.inner.dormant.write(&snapshot).await {
                    // The key is still in the store; the removal did not
                    // happen, so the caller sees a miss.
                    warn!(error = %e, "could not persist dormant removal, treating as not found");
                    return Ok(None);
                }
                if self.inner.active.is_empty() && snapshot.is_empty() {
                    let _ = self.inner.events.send(CacheEvent::EmptyCache);
                }
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// Active-only variant of [`remove`](Self::remove)
    pub async fn active_remove(&self, key: &K) -> Result<Option<EntryRecord<V>>> {
        self.inner.ensure_live()?;
        match self.inner.active.remove(key) {
            Some(record) => {
                self.inner.maybe_emit_empty().await;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// Drop both tiers, restart the cleaner period, and emit `EmptyCache`
    pub async fn clear(&self) -> Result<()> {
        self.inner.ensure_live()?;
        let _guard = self.inner.placement.lock().await;
        let drained = self.inner.active.drain();
        debug!(dropped = drained.len(), "active tier cleared");
        if let Err(e) = self.inner.dormant.clear().await {
            warn!(error = %e, "could not clear dormant store");
        }
        self.inner.cleaner_restart.notify_one();
        let _ = self.inner.events.send(CacheEvent::EmptyCache);
        Ok(())
    }

    /// Current active-tier size
    pub fn active_count(&self) -> Result<usize> {
        self.inner.ensure_live()?;
        Ok(self.inner.active.len())
    }

    /// Current dormant-tier size; forces a store read
    pub async fn dormant_count(&self) -> Result<usize> {
        self.inner.ensure_live()?;
        Ok(read_or_empty(self.inner.dormant.as_ref()).await.len())
    }

    /// Total size across both tiers; forces a store read
    pub async fn count(&self) -> Result<usize> {
        self.inner.ensure_live()?;
        let dormant = read_or_empty(self.inner.dormant.as_ref()).await.len();
        Ok(self.inner.active.len() + dormant)
    }

    /// Total size using the store's last-known (possibly lagging)
    /// cardinality instead of a fresh read
    pub fn previous_count(&self) -> Result<usize> {
        self.inner.ensure_live()?;
        Ok(self.inner.active.len() + self.inner.dormant.count())
    }

    /// Subscribe to cache events
    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.inner.events.subscribe()
    }

    /// Point-in-time counters
    pub fn stats(&self) -> CacheStatsSnapshot {
        self.inner.stats.snapshot()
    }

    /// Flush the active tier into the dormant store (active values win on
    /// key conflicts), cancel all timers, stop the workers, and release
    /// the singleton slot. Further operations fail with
    /// [`CacheError::Disposed`].
    pub async fn dispose(&self) -> Result<()> {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return Err(CacheError::Disposed);
        }

        {
            let _guard = self.inner.placement.lock().await;
            let drained = self.inner.active.drain();
            let mut snapshot = read_or_empty(self.inner.dormant.as_ref()).await;
            for (key, record) in drained {
                snapshot.insert(key, record);
            }
            if let Err(e) = self.inner.dormant.write(&snapshot).await {
                warn!(error = %e, "could not flush active tier during dispose");
            }
        }

        let _ = self.inner.shutdown_tx.send(());
        let tasks: Vec<JoinHandle<()>> = self.inner.tasks.lock().drain(..).collect();
        for task in tasks {
            let _ = task.await;
        }

        if self.inner.registered {
            REGISTRY.write().remove(&TypeId::of::<(K, V)>());
        }
        info!("cache disposed");
        Ok(())
    }
}

impl<K: CacheKey, V: CacheValue> Drop for CacheInner<K, V> {
    fn drop(&mut self) {
        // A cache abandoned without dispose must not leave its workers
        // running detached.
        let _ = self.shutdown_tx.send(());
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

impl<K: CacheKey, V: CacheValue> CacheInner<K, V> {
    fn ensure_live(&self) -> Result<()> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(CacheError::Disposed);
        }
        Ok(())
    }

    async fn maybe_emit_empty(&self) {
        if self.active.is_empty() && self.dormant.is_empty().await {
            let _ = self.events.send(CacheEvent::EmptyCache);
        }
    }

    /// React to a timer delivery
    async fn handle_expiry(&self, event: ExpiryEvent<K>) {
        if self.disposed.load(Ordering::Acquire) {
            return;
        }
        if !self.active.claim_timer(&event.key, event.generation) {
            // Stale delivery: the timer was restarted or the key removed
            return;
        }

        if let Some(hook) = self.active.refresh_hook(&event.key) {
            match std::panic::catch_unwind(AssertUnwindSafe(|| hook())) {
                Ok(value) => {
                    if self.active.apply_refresh(&event.key, value) {
                        self.stats.record_refresh();
                        debug!(key = %event.key, "expired entry refreshed in place");
                    }
                }
                Err(_) => {
                    error!(key = %event.key, "refresh hook panicked, demoting entry");
                    self.demote_on_fault(&event.key).await;
                }
            }
            return;
        }

        if self.active.remove(&event.key).is_none() {
            return;
        }
        self.stats.record_expiration();
        debug!(key = %event.key, "active entry expired");

        let _guard = self.placement.lock().await;
        if self.disposed.load(Ordering::Acquire) {
            return;
        }
        if self.active.is_empty() && self.dormant.is_empty().await {
            let _ = self.events.send(CacheEvent::EmptyCache);
        } else {
            self.lfu.promote_best().await;
        }
    }

    /// Timer-fault path: move the entry to the dormant tier so it is not
    /// lost
    async fn demote_on_fault(&self, key: &K) {
        let Some(record) = self.active.remove(key) else {
            return;
        };
        let _guard = self.placement.lock().await;
        let mut snapshot = read_or_empty(self.dormant.as_ref()).await;
        snapshot.insert(key.clone(), record);
        match self.dormant.write(&snapshot).await {
            Ok(()) => self.stats.record_demotion(),
            Err(e) => warn!(key = %key, error = %e, "could not demote entry after timer fault"),
        }
    }
}

/// Consumes timer deliveries until shutdown
///
/// Holds only a weak reference to the cache internals so an abandoned
/// cache can drop; errors in here are contained and never reach user
/// threads.
async fn expiry_worker<K: CacheKey, V: CacheValue>(
    inner: Weak<CacheInner<K, V>>,
    mut events: mpsc::UnboundedReceiver<ExpiryEvent<K>>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            result = shutdown.recv() => {
                match result {
                    Ok(()) | Err(broadcast::error::RecvError::Closed) => break,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        debug!(missed = n, "expiry worker broadcast receiver lagged");
                    }
                }
            }

            event = events.recv() => {
                match event {
                    Some(event) => {
                        let Some(inner) = inner.upgrade() else { break };
                        inner.handle_expiry(event).await;
                    }
                    None => break,
                }
            }
        }
    }
    debug!("expiry worker stopped");
}
