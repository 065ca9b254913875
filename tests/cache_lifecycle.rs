//! End-to-end cache behavior across both tiers
//!
//! Exercises the full facade: overflow demotion, LFU promotion, TTL expiry
//! with and without refresh hooks, restart loading, the empty-cache event,
//! and the idempotence/bound invariants.

use embercache::{
    CacheConfig, CacheEvent, DormantStore, EntryRecord, FileDormantStore, MemoryDormantStore,
    RefreshFn, TierCache,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const LONG_MS: u64 = 60_000;

fn quiet_config() -> CacheConfig {
    CacheConfig::testing()
        .with_capacity(2)
        .with_active_ttl_ms(LONG_MS)
        .with_cleaner_period_ms(LONG_MS)
        .with_dormant_ttl_ms(LONG_MS)
}

fn memory_store(ttl_ms: u64) -> Arc<MemoryDormantStore<String, u32>> {
    Arc::new(MemoryDormantStore::new(ttl_ms))
}

async fn memory_cache(config: CacheConfig) -> (TierCache<String, u32>, Arc<MemoryDormantStore<String, u32>>) {
    let store = memory_store(config.dormant_ttl_ms);
    let cache = TierCache::create(config, store.clone() as Arc<dyn DormantStore<String, u32>>)
        .await
        .unwrap();
    (cache, store)
}

fn record_with_frequency(value: u32, frequency: u64) -> EntryRecord<u32> {
    let mut record = EntryRecord::new(value);
    record.frequency = frequency;
    record
}

#[tokio::test]
async fn overflow_goes_dormant_and_stays_retrievable() {
    let (cache, _store) = memory_cache(quiet_config()).await;

    cache.add("a".to_string(), 1).await.unwrap();
    cache.add("b".to_string(), 2).await.unwrap();
    cache.add("c".to_string(), 3).await.unwrap();

    assert_eq!(cache.active_count().unwrap(), 2);
    assert_eq!(cache.dormant_count().await.unwrap(), 1);
    assert_eq!(cache.count().await.unwrap(), 3);

    assert_eq!(cache.get(&"a".to_string()).await.unwrap(), Some(1));
    assert_eq!(cache.get(&"b".to_string()).await.unwrap(), Some(2));
    assert_eq!(cache.get(&"c".to_string()).await.unwrap(), Some(3));

    // The hard bound held throughout
    assert!(cache.active_count().unwrap() <= 2);
    cache.dispose().await.unwrap();
}

#[tokio::test]
async fn lfu_promotes_dormant_record_over_newcomer() {
    let (cache, store) = memory_cache(quiet_config()).await;

    // Active: "a" with frequency 5, one slot free
    cache.add("a".to_string(), 1).await.unwrap();
    for _ in 0..4 {
        assert!(cache.lookup(&"a".to_string()).await.unwrap());
    }

    // Dormant: "c" with frequency 10
    let mut seeded = HashMap::new();
    seeded.insert("c".to_string(), record_with_frequency(3, 10));
    store.write(&seeded).await.unwrap();

    // The newcomer does not get the free slot; the hot dormant record does
    cache.add("d".to_string(), 4).await.unwrap();

    assert!(cache.active_lookup(&"c".to_string()).unwrap());
    assert!(cache.active_lookup(&"a".to_string()).unwrap());
    assert!(!cache.active_lookup(&"d".to_string()).unwrap());
    assert_eq!(cache.get(&"d".to_string()).await.unwrap(), Some(4));
    cache.dispose().await.unwrap();
}

#[tokio::test]
async fn newcomer_must_outrank_coldest_to_enter_full_tier() {
    let (cache, store) = memory_cache(quiet_config()).await;

    cache.add("a".to_string(), 1).await.unwrap();
    cache.add("b".to_string(), 2).await.unwrap();
    for _ in 0..4 {
        cache.lookup(&"a".to_string()).await.unwrap();
        cache.lookup(&"b".to_string()).await.unwrap();
    }

    // Tier full, both entries at frequency 5: the newcomer is outranked
    cache.add("c".to_string(), 3).await.unwrap();
    assert!(!cache.active_lookup(&"c".to_string()).unwrap());
    assert!(store.read().await.unwrap().contains_key("c"));
    cache.dispose().await.unwrap();
}

#[tokio::test]
async fn eviction_preserves_frequency_of_demoted_record() {
    let config = quiet_config().with_capacity(1);
    let (cache, _store) = memory_cache(config).await;

    cache.add("a".to_string(), 1).await.unwrap();
    for _ in 0..3 {
        cache.lookup(&"a".to_string()).await.unwrap();
    }
    // "a" now has frequency 4 and owns the only slot
    cache.add("b".to_string(), 2).await.unwrap();
    assert!(!cache.active_lookup(&"b".to_string()).unwrap());

    // Each dormant hit bumps "b"; once it outranks "a" it takes the slot
    for _ in 0..4 {
        assert!(cache.lookup(&"b".to_string()).await.unwrap());
    }
    assert!(cache.active_lookup(&"b".to_string()).unwrap());

    // "a" was demoted with its frequency intact
    let demoted = cache.remove(&"a".to_string()).await.unwrap().unwrap();
    assert_eq!(demoted.frequency, 4);
    cache.dispose().await.unwrap();
}

#[tokio::test]
async fn ttl_expiry_without_refresh_drops_the_entry() {
    let config = quiet_config().with_active_ttl_ms(150);
    let (cache, _store) = memory_cache(config).await;

    cache.add("x".to_string(), 9).await.unwrap();
    tokio::time::sleep(Duration::from_millis(600)).await;

    assert!(!cache.active_lookup(&"x".to_string()).unwrap());
    assert_eq!(cache.get(&"x".to_string()).await.unwrap(), None);
    assert_eq!(cache.dormant_count().await.unwrap(), 0);
    cache.dispose().await.unwrap();
}

#[tokio::test]
async fn ttl_expiry_with_refresh_replaces_the_value() {
    let config = quiet_config().with_active_ttl_ms(150);
    let (cache, _store) = memory_cache(config).await;

    cache
        .add_with_refresh("x".to_string(), 9, Arc::new(|| -> u32 { 10 }) as RefreshFn<u32>)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(600)).await;

    assert_eq!(cache.get_active(&"x".to_string()).unwrap(), Some(10));

    // The refresh itself left the frequency alone; only the lookup above
    // counted, and the modification time moved
    let record = cache.remove(&"x".to_string()).await.unwrap().unwrap();
    assert_eq!(record.frequency, 2);
    assert!(record.modified_at > record.created_at);
    cache.dispose().await.unwrap();
}

#[tokio::test]
async fn expiry_refill_promotes_hottest_dormant_record() {
    let config = quiet_config().with_capacity(1).with_active_ttl_ms(150);
    let (cache, store) = memory_cache(config).await;

    cache.add("gone".to_string(), 1).await.unwrap();
    let mut seeded = HashMap::new();
    seeded.insert("warm".to_string(), record_with_frequency(7, 3));
    seeded.insert("hot".to_string(), record_with_frequency(8, 9));
    store.write(&seeded).await.unwrap();

    tokio::time::sleep(Duration::from_millis(600)).await;

    // The expired entry's slot was refilled with the hottest dormant record
    assert!(cache.active_lookup(&"hot".to_string()).unwrap());
    assert!(!cache.active_lookup(&"warm".to_string()).unwrap());
    cache.dispose().await.unwrap();
}

#[tokio::test]
async fn restart_loads_top_frequency_records() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("dormant.json");

    let seed_store: FileDormantStore<String, u32> =
        FileDormantStore::new(path.clone(), LONG_MS);
    let mut seeded = HashMap::new();
    for i in 1..=5u32 {
        seeded.insert(format!("f{i}"), record_with_frequency(i, i as u64));
    }
    seed_store.write(&seeded).await.unwrap();

    let config = quiet_config().with_capacity(3);
    let store: Arc<dyn DormantStore<String, u32>> =
        Arc::new(FileDormantStore::new(path, LONG_MS));
    let cache = TierCache::create(config, store).await.unwrap();

    assert_eq!(cache.active_count().unwrap(), 3);
    for hot in ["f3", "f4", "f5"] {
        assert!(cache.active_lookup(&hot.to_string()).unwrap(), "{hot} should be hot");
    }
    assert_eq!(cache.dormant_count().await.unwrap(), 2);
    cache.dispose().await.unwrap();
}

#[tokio::test]
async fn dispose_flush_survives_restart() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("dormant.json");

    let store: Arc<dyn DormantStore<String, u32>> =
        Arc::new(FileDormantStore::new(path.clone(), LONG_MS));
    let cache = TierCache::create(quiet_config(), store).await.unwrap();
    cache.add("kept".to_string(), 42).await.unwrap();
    cache.dispose().await.unwrap();

    let store: Arc<dyn DormantStore<String, u32>> =
        Arc::new(FileDormantStore::new(path, LONG_MS));
    let revived = TierCache::create(quiet_config(), store).await.unwrap();
    assert_eq!(revived.get(&"kept".to_string()).await.unwrap(), Some(42));
    revived.dispose().await.unwrap();
}

#[tokio::test]
async fn clear_emits_empty_event_and_cleaner_repeats_it() {
    let config = quiet_config().with_cleaner_period_ms(300);
    let (cache, _store) = memory_cache(config).await;

    cache.add("a".to_string(), 1).await.unwrap();
    let mut events = cache.subscribe();

    cache.clear().await.unwrap();
    let first = tokio::time::timeout(Duration::from_secs(1), events.recv())
        .await
        .expect("clear should emit")
        .unwrap();
    assert_eq!(first, CacheEvent::EmptyCache);
    assert_eq!(cache.count().await.unwrap(), 0);

    // While both tiers stay empty, cleaner ticks keep signalling
    let repeated = tokio::time::timeout(Duration::from_secs(3), events.recv())
        .await
        .expect("cleaner should emit while empty")
        .unwrap();
    assert_eq!(repeated, CacheEvent::EmptyCache);
    cache.dispose().await.unwrap();
}

#[tokio::test]
async fn removing_the_last_record_emits_empty_event() {
    let (cache, _store) = memory_cache(quiet_config()).await;
    cache.add("only".to_string(), 1).await.unwrap();

    let mut events = cache.subscribe();
    assert!(cache.remove(&"only".to_string()).await.unwrap().is_some());

    let event = tokio::time::timeout(Duration::from_secs(1), events.recv())
        .await
        .expect("event expected")
        .unwrap();
    assert_eq!(event, CacheEvent::EmptyCache);
    cache.dispose().await.unwrap();
}

#[tokio::test]
async fn remove_is_idempotent() {
    let (cache, _store) = memory_cache(quiet_config()).await;
    cache.add("a".to_string(), 1).await.unwrap();

    assert!(cache.remove(&"a".to_string()).await.unwrap().is_some());
    assert!(cache.remove(&"a".to_string()).await.unwrap().is_none());
    assert_eq!(cache.count().await.unwrap(), 0);
    cache.dispose().await.unwrap();
}

#[tokio::test]
async fn clear_is_idempotent() {
    let (cache, _store) = memory_cache(quiet_config()).await;
    cache.add("a".to_string(), 1).await.unwrap();
    cache.add("b".to_string(), 2).await.unwrap();
    cache.add("c".to_string(), 3).await.unwrap();

    cache.clear().await.unwrap();
    cache.clear().await.unwrap();
    assert_eq!(cache.count().await.unwrap(), 0);
    assert_eq!(cache.active_count().unwrap(), 0);
    cache.dispose().await.unwrap();
}

#[tokio::test]
async fn capacity_bound_holds_under_load() {
    let config = quiet_config().with_capacity(3);
    let (cache, _store) = memory_cache(config).await;

    for i in 0..10u32 {
        cache.add(format!("k{i}"), i).await.unwrap();
        assert!(cache.active_count().unwrap() <= 3);
    }
    assert_eq!(cache.count().await.unwrap(), 10);
    cache.dispose().await.unwrap();
}

#[tokio::test]
async fn update_reaches_both_tiers_and_keeps_frequency() {
    let (cache, _store) = memory_cache(quiet_config()).await;

    cache.add("hot".to_string(), 1).await.unwrap();
    cache.add("warm".to_string(), 2).await.unwrap();
    cache.add("cold".to_string(), 3).await.unwrap(); // overflows to dormant

    assert!(cache.update(&"hot".to_string(), 10).await.unwrap());
    assert_eq!(cache.get_active(&"hot".to_string()).unwrap(), Some(10));

    // Dormant-only key: promoted (or rewritten) and then updated
    assert!(cache.update(&"cold".to_string(), 30).await.unwrap());
    assert_eq!(cache.get(&"cold".to_string()).await.unwrap(), Some(30));

    assert!(!cache.update(&"missing".to_string(), 0).await.unwrap());
    cache.dispose().await.unwrap();
}

#[tokio::test]
async fn update_preserves_refresh_hook() {
    let config = quiet_config().with_active_ttl_ms(150);
    let (cache, _store) = memory_cache(config).await;

    let calls = Arc::new(AtomicU32::new(0));
    let hook_calls = calls.clone();
    cache
        .add_with_refresh(
            "x".to_string(),
            1,
            Arc::new(move || -> u32 {
                hook_calls.fetch_add(1, Ordering::SeqCst);
                99
            }) as RefreshFn<u32>,
        )
        .await
        .unwrap();

    // Replacing the value keeps the hook and restarts the timer
    assert!(cache.update(&"x".to_string(), 2).await.unwrap());
    tokio::time::sleep(Duration::from_millis(600)).await;

    assert_eq!(cache.get_active(&"x".to_string()).unwrap(), Some(99));
    assert!(calls.load(Ordering::SeqCst) >= 1);
    cache.dispose().await.unwrap();
}

#[tokio::test]
async fn previous_count_uses_last_known_dormant_size() {
    let (cache, store) = memory_cache(quiet_config()).await;

    cache.add("a".to_string(), 1).await.unwrap();
    cache.add("b".to_string(), 2).await.unwrap();
    cache.add("c".to_string(), 3).await.unwrap();
    assert_eq!(cache.count().await.unwrap(), 3);
    assert_eq!(cache.previous_count().unwrap(), 3);

    // previous_count follows the store's last-known cardinality without
    // forcing a fresh read
    store.clear().await.unwrap();
    assert_eq!(cache.previous_count().unwrap(), 2);
    assert_eq!(cache.count().await.unwrap(), 2);
    cache.dispose().await.unwrap();
}

#[tokio::test]
async fn update_reports_failure_when_dormant_write_fails() {
    let (cache, store) = memory_cache(quiet_config()).await;
    cache.add("a".to_string(), 1).await.unwrap();
    cache.add("b".to_string(), 2).await.unwrap();
    cache.add("c".to_string(), 3).await.unwrap(); // dormant

    store.set_write_faulted(true);
    // The new value cannot be persisted anywhere, so the update must not
    // claim success
    assert!(!cache.update(&"c".to_string(), 30).await.unwrap());
    // Active-tier updates do not touch the store and still succeed
    assert!(cache.update(&"a".to_string(), 10).await.unwrap());

    store.set_write_faulted(false);
    // A subsequent lookup observes the old value, consistent with the
    // reported failure
    assert_eq!(cache.get(&"c".to_string()).await.unwrap(), Some(3));
    cache.dispose().await.unwrap();
}

#[tokio::test]
async fn remove_reports_not_found_when_dormant_write_fails() {
    let (cache, store) = memory_cache(quiet_config()).await;
    cache.add("a".to_string(), 1).await.unwrap();
    cache.add("b".to_string(), 2).await.unwrap();
    cache.add("c".to_string(), 3).await.unwrap(); // dormant

    store.set_write_faulted(true);
    // The removal cannot be persisted, so the key was not removed and the
    // caller sees a miss
    assert!(cache.remove(&"c".to_string()).await.unwrap().is_none());

    store.set_write_faulted(false);
    // The key is still there; removing it now works and stays idempotent
    let removed = cache.remove(&"c".to_string()).await.unwrap().unwrap();
    assert_eq!(removed.value, 3);
    assert!(cache.remove(&"c".to_string()).await.unwrap().is_none());
    cache.dispose().await.unwrap();
}

#[tokio::test]
async fn unavailable_store_reads_as_not_found() {
    let (cache, store) = memory_cache(quiet_config()).await;
    cache.add("a".to_string(), 1).await.unwrap();
    cache.add("b".to_string(), 2).await.unwrap();
    cache.add("c".to_string(), 3).await.unwrap(); // dormant

    store.set_faulted(true);
    assert_eq!(cache.get(&"c".to_string()).await.unwrap(), None);
    assert_eq!(cache.dormant_count().await.unwrap(), 0);
    // Active tier is unaffected
    assert_eq!(cache.get(&"a".to_string()).await.unwrap(), Some(1));

    store.set_faulted(false);
    assert_eq!(cache.get(&"c".to_string()).await.unwrap(), Some(3));
    cache.dispose().await.unwrap();
}
