//! TTL, bans, refresh and cache-aside loading through the cache façade.

use async_trait::async_trait;
use cachet_engine::{
    Cache, CacheConfig, CacheEvent, KeyPattern, LoadError, Loader, PutOptions, RemovalCause,
    TtlMode,
};
use cachet_test_utils::assertions::assert_load_error;
use cachet_test_utils::{fixtures, init_test_tracing, RecordingStore, ScriptedLoader};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

type Store = Arc<RecordingStore<String, u32>>;
type Scripted = Arc<ScriptedLoader<String, u32>>;

fn key(name: &str) -> String {
    name.to_string()
}

fn build(config: CacheConfig) -> (Cache<String, u32>, Store) {
    init_test_tracing();
    let store: Store = Arc::new(RecordingStore::new());
    let cache = Cache::builder(config)
        .backing_store_arc(store.clone())
        .build()
        .unwrap();
    (cache, store)
}

fn build_with_loader(config: CacheConfig) -> (Cache<String, u32>, Scripted) {
    init_test_tracing();
    let loader: Scripted = Arc::new(ScriptedLoader::new());
    let cache = Cache::builder(config)
        .backing_store(RecordingStore::new())
        .loader_arc(loader.clone())
        .build()
        .unwrap();
    (cache, loader)
}

// ============================================================================
// TTL
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_fixed_ttl_boundary() {
    let (cache, _) = build(fixtures::fixed_ttl(16, Duration::from_secs(10)));
    cache.put(key("k"), 1, None).await.unwrap();

    sleep(Duration::from_millis(9_999)).await;
    assert_eq!(cache.get_if_present(&key("k")), Some(1));

    sleep(Duration::from_millis(1)).await;
    assert_eq!(cache.get_if_present(&key("k")), None);
    assert_eq!(cache.stats().expirations, 1);
}

#[tokio::test(start_paused = true)]
async fn test_sliding_ttl_extends_on_read() {
    let config = CacheConfig::new(16).with_ttl(TtlMode::Sliding, Duration::from_secs(1));
    let (cache, _) = build(config);
    cache.put(key("k"), 1, None).await.unwrap();

    for _ in 0..3 {
        sleep(Duration::from_millis(800)).await;
        assert_eq!(cache.get_if_present(&key("k")), Some(1));
    }

    sleep(Duration::from_millis(1_001)).await;
    assert_eq!(cache.get_if_present(&key("k")), None);
}

#[tokio::test(start_paused = true)]
async fn test_per_put_ttl_overrides_default() {
    let (cache, _) = build(CacheConfig::new(16));
    cache
        .put(key("short"), 1, Some(Duration::from_secs(1)))
        .await
        .unwrap();
    cache.put(key("forever"), 2, None).await.unwrap();

    assert_eq!(cache.time_to_live(&key("short")), Some(Duration::from_secs(1)));
    assert_eq!(cache.time_to_live(&key("forever")), None);

    sleep(Duration::from_secs(2)).await;
    assert!(!cache.contains_key(&key("short")));
    assert_eq!(cache.get_if_present(&key("forever")), Some(2));
}

#[tokio::test(start_paused = true)]
async fn test_persist_and_time_to_live() {
    let (cache, _) = build(fixtures::fixed_ttl(16, Duration::from_secs(10)));
    cache.put(key("k"), 1, None).await.unwrap();

    sleep(Duration::from_secs(4)).await;
    assert_eq!(cache.time_to_live(&key("k")), Some(Duration::from_secs(6)));

    assert!(cache.persist(&key("k")));
    assert_eq!(cache.time_to_live(&key("k")), None);
    sleep(Duration::from_secs(20)).await;
    assert_eq!(cache.get_if_present(&key("k")), Some(1));
    assert!(!cache.persist(&key("missing")));
}

#[tokio::test(start_paused = true)]
async fn test_manual_sweep_removes_expired() {
    let config = fixtures::fixed_ttl(16, Duration::from_secs(1))
        .with_sweep_interval(Duration::from_secs(3_600));
    let (cache, _) = build(config);
    let mut rx = cache.subscribe();

    cache.put(key("a"), 1, None).await.unwrap();
    cache.put(key("b"), 2, None).await.unwrap();
    sleep(Duration::from_secs(2)).await;

    // Expired but not yet swept.
    assert_eq!(cache.len(), 2);
    assert_eq!(cache.run_pending_tasks(), 2);
    assert!(cache.is_empty());

    let mut expired = fixtures::removed_keys(&fixtures::drain_events(&mut rx), RemovalCause::Expired);
    expired.sort();
    assert_eq!(expired, vec![key("a"), key("b")]);
    assert_eq!(cache.stats().expirations, 2);
}

#[tokio::test(start_paused = true)]
async fn test_background_sweep_runs_on_interval() {
    let config = fixtures::fixed_ttl(16, Duration::from_secs(1))
        .with_sweep_interval(Duration::from_millis(500));
    let (cache, _) = build(config);

    cache.put(key("a"), 1, None).await.unwrap();
    sleep(Duration::from_secs(2)).await;
    assert!(cache.is_empty());
}

// ============================================================================
// PURGE AND BANS
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_tag_ban_removes_exactly_tagged_keys() {
    let (cache, _) = build(CacheConfig::new(16));
    let mut rx = cache.subscribe();

    cache
        .put_with(key("a"), 1, fixtures::tagged(&["users"]))
        .await
        .unwrap();
    cache
        .put_with(key("b"), 2, fixtures::tagged(&["users", "admins"]))
        .await
        .unwrap();
    cache
        .put_with(key("c"), 3, fixtures::tagged(&["orders"]))
        .await
        .unwrap();
    cache.put(key("d"), 4, Some(Duration::from_secs(60))).await.unwrap();
    let ttl_before = cache.time_to_live(&key("d"));

    assert_eq!(cache.invalidate_by_tag("users"), 2);

    assert!(!cache.contains_key(&key("a")));
    assert!(!cache.contains_key(&key("b")));
    assert_eq!(cache.get_if_present(&key("c")), Some(3));
    assert_eq!(cache.get_if_present(&key("d")), Some(4));
    assert_eq!(cache.time_to_live(&key("d")), ttl_before);

    let mut banned = fixtures::removed_keys(&fixtures::drain_events(&mut rx), RemovalCause::Explicit);
    banned.sort();
    assert_eq!(banned, vec![key("a"), key("b")]);

    assert_eq!(cache.invalidate_by_tag("users"), 0);
    assert_eq!(cache.invalidate_by_tag("admins"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_overwrite_replaces_tags() {
    let (cache, _) = build(CacheConfig::new(16));
    cache
        .put_with(key("a"), 1, fixtures::tagged(&["old"]))
        .await
        .unwrap();
    cache
        .put_with(key("a"), 2, PutOptions::new().with_tag("new"))
        .await
        .unwrap();

    assert_eq!(cache.invalidate_by_tag("old"), 0);
    assert_eq!(cache.get_if_present(&key("a")), Some(2));
    assert_eq!(cache.invalidate_by_tag("new"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_pattern_ban() {
    let (cache, _) = build(CacheConfig::new(16));
    for name in ["user:1:profile", "user:2:profile", "user:1:settings", "order:1"] {
        cache.put(key(name), 1, None).await.unwrap();
    }

    assert_eq!(cache.invalidate_pattern(&KeyPattern::new("user:*:profile")), 2);
    assert!(cache.contains_key(&key("user:1:settings")));
    assert!(cache.contains_key(&key("order:1")));

    assert_eq!(cache.invalidate_matching(|k| k.starts_with("order:")), 1);
    assert_eq!(cache.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_invalidate_and_invalidate_all() {
    let (cache, _) = build(CacheConfig::new(16));
    for (i, name) in ["a", "b", "c"].iter().enumerate() {
        cache.put(key(name), i as u32, None).await.unwrap();
    }

    assert!(cache.invalidate(&key("a")));
    assert!(!cache.invalidate(&key("a")));
    assert_eq!(cache.invalidate_all(), 2);
    assert!(cache.is_empty());
    assert_eq!(cache.stats().invalidations, 3);
}

// ============================================================================
// REFRESH
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_refresh_replaces_in_background() {
    let (cache, loader) = build_with_loader(CacheConfig::new(16));
    let mut rx = cache.subscribe();
    loader.set(key("k"), 2);
    cache.put(key("k"), 1, None).await.unwrap();

    assert!(cache.refresh(key("k")));
    assert_eq!(cache.get_if_present(&key("k")), Some(1));

    sleep(Duration::from_millis(10)).await;
    assert_eq!(cache.get_if_present(&key("k")), Some(2));
    assert_eq!(cache.stats().refreshes, 1);
    assert!(fixtures::drain_events(&mut rx)
        .iter()
        .any(|event| matches!(event, CacheEvent::Refreshed { key: k, .. } if k == "k")));
}

#[tokio::test(start_paused = true)]
async fn test_refresh_failure_keeps_previous_value() {
    let (cache, loader) = build_with_loader(CacheConfig::new(16));
    let mut rx = cache.subscribe();
    cache.put(key("k"), 1, None).await.unwrap();

    loader.fail_next(1);
    assert!(cache.refresh(key("k")));
    sleep(Duration::from_millis(10)).await;

    assert_eq!(cache.get_if_present(&key("k")), Some(1));
    assert_eq!(cache.stats().refresh_failures, 1);
    assert!(fixtures::drain_events(&mut rx)
        .iter()
        .any(|event| matches!(event, CacheEvent::RefreshFailed { key: k, .. } if k == "k")));
}

#[tokio::test(start_paused = true)]
async fn test_refresh_of_absent_key_loads_it() {
    let (cache, loader) = build_with_loader(CacheConfig::new(16));
    loader.set(key("k"), 5);

    assert!(cache.refresh(key("k")));
    sleep(Duration::from_millis(10)).await;
    assert_eq!(cache.get_if_present(&key("k")), Some(5));
}

#[tokio::test(start_paused = true)]
async fn test_refresh_to_nothing_removes_entry() {
    let (cache, _loader) = build_with_loader(CacheConfig::new(16));
    let mut rx = cache.subscribe();
    cache.put(key("k"), 1, None).await.unwrap();

    assert!(cache.refresh(key("k")));
    sleep(Duration::from_millis(10)).await;

    assert!(!cache.contains_key(&key("k")));
    assert_eq!(
        fixtures::removed_keys(&fixtures::drain_events(&mut rx), RemovalCause::Explicit),
        vec![key("k")]
    );
}

#[tokio::test(start_paused = true)]
async fn test_invalidate_cancels_in_flight_refresh() {
    let (cache, loader) = build_with_loader(CacheConfig::new(16));
    loader.set(key("k"), 2);
    loader.set_delay(Some(Duration::from_millis(500)));
    cache.put(key("k"), 1, None).await.unwrap();

    assert!(cache.refresh(key("k")));
    sleep(Duration::from_millis(100)).await;
    assert!(cache.invalidate(&key("k")));

    sleep(Duration::from_secs(1)).await;
    assert!(!cache.contains_key(&key("k")));
    assert_eq!(loader.calls(), 1);
    assert_eq!(cache.stats().refreshes, 0);
}

#[tokio::test(start_paused = true)]
async fn test_refresh_does_not_duplicate() {
    let (cache, loader) = build_with_loader(CacheConfig::new(16));
    loader.set(key("k"), 2);
    loader.set_delay(Some(Duration::from_millis(200)));
    cache.put(key("k"), 1, None).await.unwrap();

    assert!(cache.refresh(key("k")));
    assert!(!cache.refresh(key("k")));
    sleep(Duration::from_secs(1)).await;
    assert_eq!(loader.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stale_while_revalidate_schedules_one_refresh() {
    let config = CacheConfig::new(16)
        .with_ttl(TtlMode::Fixed, Duration::from_secs(10))
        .with_stale_after(Duration::from_secs(2));
    let (cache, loader) = build_with_loader(config);
    loader.set(key("k"), 2);
    loader.set_delay(Some(Duration::from_millis(500)));
    cache.put(key("k"), 1, None).await.unwrap();

    sleep(Duration::from_secs(3)).await;
    let mut readers = Vec::new();
    for _ in 0..10 {
        let cache = cache.clone();
        readers.push(tokio::spawn(async move { cache.get_if_present(&key("k")) }));
    }
    for reader in readers {
        assert_eq!(reader.await.unwrap(), Some(1));
    }
    assert_eq!(cache.stats().stale_hits, 10);

    sleep(Duration::from_secs(1)).await;
    assert_eq!(loader.calls(), 1);
    assert_eq!(cache.get_if_present(&key("k")), Some(2));
    // The refreshed entry is fresh again.
    assert_eq!(cache.stats().stale_hits, 10);
}

#[tokio::test(start_paused = true)]
async fn test_stale_value_served_until_hard_expiry_when_refresh_fails() {
    let config = CacheConfig::new(16)
        .with_ttl(TtlMode::Fixed, Duration::from_secs(10))
        .with_stale_after(Duration::from_secs(2));
    let (cache, loader) = build_with_loader(config);
    cache.put(key("k"), 1, None).await.unwrap();

    sleep(Duration::from_secs(3)).await;
    for _ in 0..3 {
        loader.fail_next(1);
        assert_eq!(cache.get_if_present(&key("k")), Some(1));
        sleep(Duration::from_secs(1)).await;
    }
    assert_eq!(cache.stats().refresh_failures, 3);

    sleep(Duration::from_secs(5)).await;
    assert_eq!(cache.get_if_present(&key("k")), None);
}

#[tokio::test(start_paused = true)]
async fn test_refresh_does_not_overtake_queued_write() {
    let (cache, store) = build(fixtures::write_behind(16, Duration::from_secs(10)));
    store.seed(key("k"), 1);

    cache.put(key("k"), 2, None).await.unwrap();
    cache.invalidate(&key("k"));
    assert!(cache.refresh(key("k")));
    sleep(Duration::from_millis(10)).await;
    // The store still holds 1; caching it would hide the queued 2.
    assert_eq!(cache.get_if_present(&key("k")), None);

    sleep(Duration::from_secs(11)).await;
    assert_eq!(store.get(&key("k")), Some(2));
    assert_eq!(cache.get(&key("k")).await.unwrap(), Some(2));
}

// ============================================================================
// CACHE-ASIDE LOADING
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_get_loads_on_miss_once() {
    let (cache, loader) = build_with_loader(CacheConfig::new(16));
    loader.set(key("k"), 7);

    assert_eq!(cache.get(&key("k")).await.unwrap(), Some(7));
    assert_eq!(cache.get(&key("k")).await.unwrap(), Some(7));
    assert_eq!(loader.calls(), 1);

    let stats = cache.stats();
    assert_eq!(stats.loads, 1);
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.hit_rate(), 0.5);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_misses_share_one_load() {
    let (cache, loader) = build_with_loader(CacheConfig::new(16));
    loader.set(key("k"), 7);
    loader.set_delay(Some(Duration::from_millis(100)));

    let mut tasks = Vec::new();
    for _ in 0..5 {
        let cache = cache.clone();
        tasks.push(tokio::spawn(async move { cache.get(&key("k")).await }));
    }
    for task in tasks {
        assert_eq!(task.await.unwrap().unwrap(), Some(7));
    }
    assert_eq!(loader.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_load_failure_surfaces_and_caches_nothing() {
    let (cache, loader) = build_with_loader(CacheConfig::new(16));
    let mut rx = cache.subscribe();
    loader.set(key("k"), 7);
    loader.fail_next(1);

    assert_load_error(&cache.get(&key("k")).await);
    assert!(!cache.contains_key(&key("k")));
    assert_eq!(cache.stats().load_failures, 1);
    assert!(fixtures::drain_events(&mut rx)
        .iter()
        .any(|event| matches!(event, CacheEvent::LoadFailed { key: k, .. } if k == "k")));

    assert_eq!(cache.get(&key("k")).await.unwrap(), Some(7));
}

#[tokio::test(start_paused = true)]
async fn test_get_reads_backing_store_without_loader() {
    let (cache, store) = build(CacheConfig::new(16));
    store.seed(key("k"), 9);

    assert_eq!(cache.get(&key("k")).await.unwrap(), Some(9));
    assert_eq!(cache.get(&key("missing")).await.unwrap(), None);
    assert!(!cache.contains_key(&key("missing")));
    assert_eq!(store.read_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_get_all_returns_present_keys() {
    let (cache, loader) = build_with_loader(CacheConfig::new(16));
    cache.put(key("a"), 1, None).await.unwrap();
    loader.set(key("b"), 2);

    let found = cache
        .get_all([key("a"), key("b"), key("c")])
        .await;
    let expected: HashMap<String, u32> = [(key("a"), 1), (key("b"), 2)].into_iter().collect();
    assert_eq!(found, expected);
}

#[tokio::test(start_paused = true)]
async fn test_put_if_present() {
    let (cache, _) = build(CacheConfig::new(16));
    assert!(!cache.put_if_present(key("k"), 1).await.unwrap());
    assert!(!cache.contains_key(&key("k")));

    cache.put(key("k"), 1, None).await.unwrap();
    assert!(cache.put_if_present(key("k"), 2).await.unwrap());
    assert_eq!(cache.get_if_present(&key("k")), Some(2));
}

/// Reads its source, then takes a while to answer.
#[derive(Debug)]
struct SlowSourceLoader {
    source: AtomicU32,
    latency: Duration,
}

#[async_trait]
impl Loader<String, u32> for SlowSourceLoader {
    async fn load(&self, _key: &String) -> Result<Option<u32>, LoadError> {
        let value = self.source.load(Ordering::SeqCst);
        sleep(self.latency).await;
        Ok(Some(value))
    }
}

fn build_with_slow_source(initial: u32) -> (Cache<String, u32>, Arc<SlowSourceLoader>) {
    init_test_tracing();
    let loader = Arc::new(SlowSourceLoader {
        source: AtomicU32::new(initial),
        latency: Duration::from_millis(500),
    });
    let cache = Cache::builder(CacheConfig::new(16))
        .backing_store(RecordingStore::new())
        .loader_arc(loader.clone())
        .build()
        .unwrap();
    (cache, loader)
}

#[tokio::test(start_paused = true)]
async fn test_invalidate_during_load_is_not_undone() {
    let (cache, loader) = build_with_slow_source(1);

    let reader = cache.clone();
    let load = tokio::spawn(async move { reader.get(&key("k")).await });
    sleep(Duration::from_millis(100)).await;
    loader.source.store(2, Ordering::SeqCst);
    cache.invalidate(&key("k"));

    // The caller still gets what it read, but it is not cached.
    assert_eq!(load.await.unwrap().unwrap(), Some(1));
    assert!(!cache.contains_key(&key("k")));
    assert_eq!(cache.get(&key("k")).await.unwrap(), Some(2));
}

#[tokio::test(start_paused = true)]
async fn test_invalidate_all_during_load_is_not_undone() {
    let (cache, loader) = build_with_slow_source(1);

    let reader = cache.clone();
    let load = tokio::spawn(async move { reader.get(&key("k")).await });
    sleep(Duration::from_millis(100)).await;
    loader.source.store(2, Ordering::SeqCst);
    cache.invalidate_all();

    assert_eq!(load.await.unwrap().unwrap(), Some(1));
    assert!(cache.is_empty());
    assert_eq!(cache.get(&key("k")).await.unwrap(), Some(2));
}
