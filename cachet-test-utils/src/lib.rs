//! Cachet Test Utilities
//!
//! Shared test infrastructure for the Cachet workspace:
//! - Backing store and loader doubles with failure injection
//! - Proptest generators for configurations and operation sequences
//! - Fixtures for common scenarios
//! - Assertions over cache results and events

use async_trait::async_trait;
use cachet_core::{BackingStore, CacheKey, CacheValue, LoadError, Loader, StoreError};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

pub use cachet_core::{
    CacheConfig, CacheError, CacheResult, EvictionPolicyKind, PutOptions, RemovalCause, TtlMode,
    WritePolicyKind,
};
pub use cachet_events::CacheEvent;

/// Install a test subscriber honouring `RUST_LOG`. Safe to call from every
/// test.
pub fn init_test_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

// ============================================================================
// TEST DOUBLES
// ============================================================================

/// Backing store that records every write and can be told to fail.
#[derive(Debug)]
pub struct RecordingStore<K: CacheKey, V> {
    data: Mutex<HashMap<K, V>>,
    log: Mutex<Vec<(K, V)>>,
    reads: AtomicU64,
    failing_writes: AtomicU32,
    unavailable: AtomicBool,
    write_delay: Mutex<Option<Duration>>,
}

impl<K: CacheKey, V: CacheValue> RecordingStore<K, V> {
    pub fn new() -> Self {
        Self {
            data: Mutex::new(HashMap::new()),
            log: Mutex::new(Vec::new()),
            reads: AtomicU64::new(0),
            failing_writes: AtomicU32::new(0),
            unavailable: AtomicBool::new(false),
            write_delay: Mutex::new(None),
        }
    }

    pub fn with_entries<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
    {
        let store = Self::new();
        store.data.lock().extend(entries);
        store
    }

    /// Set a value without recording a write.
    pub fn seed(&self, key: K, value: V) {
        self.data.lock().insert(key, value);
    }

    /// Fail the next `count` writes.
    pub fn fail_next_writes(&self, count: u32) {
        self.failing_writes.store(count, Ordering::SeqCst);
    }

    /// Fail every read and write until cleared.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Delay every write by `delay` of tokio time.
    pub fn set_write_delay(&self, delay: Option<Duration>) {
        *self.write_delay.lock() = delay;
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.data.lock().get(key).cloned()
    }

    /// Every acknowledged write, in order.
    pub fn write_log(&self) -> Vec<(K, V)> {
        self.log.lock().clone()
    }

    /// Acknowledged values written for one key, in order.
    pub fn writes_for(&self, key: &K) -> Vec<V> {
        self.log
            .lock()
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
            .collect()
    }

    pub fn write_count(&self) -> usize {
        self.log.lock().len()
    }

    pub fn read_count(&self) -> u64 {
        self.reads.load(Ordering::SeqCst)
    }

    fn take_failure(&self) -> bool {
        self.failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl<K: CacheKey, V: CacheValue> Default for RecordingStore<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<K: CacheKey, V: CacheValue> BackingStore<K, V> for RecordingStore<K, V> {
    async fn read(&self, key: &K) -> Result<Option<V>, StoreError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::ReadFailed {
                key: format!("{key:?}"),
                reason: "store unavailable".to_string(),
            });
        }
        Ok(self.get(key))
    }

    async fn write(&self, key: &K, value: &V) -> Result<(), StoreError> {
        let delay = *self.write_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable {
                reason: "store unavailable".to_string(),
            });
        }
        if self.take_failure() {
            return Err(StoreError::WriteFailed {
                key: format!("{key:?}"),
                reason: "injected failure".to_string(),
            });
        }
        self.data.lock().insert(key.clone(), value.clone());
        self.log.lock().push((key.clone(), value.clone()));
        Ok(())
    }
}

/// Loader answering from a script that tests edit between calls.
#[derive(Debug)]
pub struct ScriptedLoader<K: CacheKey, V> {
    values: Mutex<HashMap<K, V>>,
    failing_loads: AtomicU32,
    calls: AtomicU64,
    delay: Mutex<Option<Duration>>,
}

impl<K: CacheKey, V: CacheValue> ScriptedLoader<K, V> {
    pub fn new() -> Self {
        Self {
            values: Mutex::new(HashMap::new()),
            failing_loads: AtomicU32::new(0),
            calls: AtomicU64::new(0),
            delay: Mutex::new(None),
        }
    }

    pub fn set(&self, key: K, value: V) {
        self.values.lock().insert(key, value);
    }

    pub fn remove(&self, key: &K) {
        self.values.lock().remove(key);
    }

    /// Fail the next `count` loads.
    pub fn fail_next(&self, count: u32) {
        self.failing_loads.store(count, Ordering::SeqCst);
    }

    /// Delay every load by `delay` of tokio time.
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock() = delay;
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl<K: CacheKey, V: CacheValue> Default for ScriptedLoader<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<K: CacheKey, V: CacheValue> Loader<K, V> for ScriptedLoader<K, V> {
    async fn load(&self, key: &K) -> Result<Option<V>, LoadError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let failed = self
            .failing_loads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(LoadError::Failed {
                key: format!("{key:?}"),
                reason: "scripted failure".to_string(),
            });
        }
        Ok(self.values.lock().get(key).cloned())
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for configurations and operation sequences.

    use super::*;
    use proptest::prelude::*;

    /// One step of a cache workload over a small key space.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum CacheOp {
        Put(u8, u32),
        Get(u8),
        Invalidate(u8),
    }

    impl CacheOp {
        pub fn key(&self) -> u8 {
            match self {
                Self::Put(key, _) | Self::Get(key) | Self::Invalidate(key) => *key,
            }
        }
    }

    pub fn arb_eviction_policy() -> impl Strategy<Value = EvictionPolicyKind> {
        prop_oneof![
            Just(EvictionPolicyKind::Lru),
            Just(EvictionPolicyKind::Lfu),
            Just(EvictionPolicyKind::Fifo),
            Just(EvictionPolicyKind::Hybrid),
        ]
    }

    pub fn arb_write_policy() -> impl Strategy<Value = WritePolicyKind> {
        prop_oneof![
            Just(WritePolicyKind::Through),
            Just(WritePolicyKind::Around),
            Just(WritePolicyKind::Behind),
            Just(WritePolicyKind::Back),
        ]
    }

    pub fn arb_ttl_mode() -> impl Strategy<Value = TtlMode> {
        prop_oneof![Just(TtlMode::Fixed), Just(TtlMode::Sliding), Just(TtlMode::None)]
    }

    /// A key drawn from `0..key_space`.
    pub fn arb_key(key_space: u8) -> impl Strategy<Value = u8> {
        0..key_space.max(1)
    }

    pub fn arb_op(key_space: u8) -> impl Strategy<Value = CacheOp> {
        prop_oneof![
            4 => (arb_key(key_space), any::<u32>()).prop_map(|(k, v)| CacheOp::Put(k, v)),
            4 => arb_key(key_space).prop_map(CacheOp::Get),
            1 => arb_key(key_space).prop_map(CacheOp::Invalidate),
        ]
    }

    pub fn arb_ops(key_space: u8, max_len: usize) -> impl Strategy<Value = Vec<CacheOp>> {
        prop::collection::vec(arb_op(key_space), 1..max_len.max(2))
    }

    /// One step of a lease contention scenario between `nodes` nodes.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum LeaseOp {
        Acquire(usize),
        Release(usize),
        Renew(usize),
        AdvanceMs(u64),
    }

    pub fn arb_lease_op(nodes: usize, max_advance_ms: u64) -> impl Strategy<Value = LeaseOp> {
        let nodes = nodes.max(1);
        prop_oneof![
            3 => (0..nodes).prop_map(LeaseOp::Acquire),
            1 => (0..nodes).prop_map(LeaseOp::Release),
            1 => (0..nodes).prop_map(LeaseOp::Renew),
            2 => (0..=max_advance_ms).prop_map(LeaseOp::AdvanceMs),
        ]
    }

    pub fn arb_lease_ops(
        nodes: usize,
        max_advance_ms: u64,
        max_len: usize,
    ) -> impl Strategy<Value = Vec<LeaseOp>> {
        prop::collection::vec(arb_lease_op(nodes, max_advance_ms), 1..max_len.max(2))
    }

    /// A configuration that passes validation.
    pub fn arb_valid_config() -> impl Strategy<Value = CacheConfig> {
        (
            1usize..512,
            arb_eviction_policy(),
            arb_write_policy(),
            arb_ttl_mode(),
            1u64..60_000,
            1usize..32,
            1u32..10,
            1u8..=50,
        )
            .prop_map(
                |(capacity, eviction, write_policy, ttl_mode, ttl_ms, shards, attempts, window)| {
                    let ttl = Duration::from_millis(ttl_ms);
                    let mut config = CacheConfig::new(capacity)
                        .with_eviction(eviction)
                        .with_write_policy(write_policy)
                        .with_shards(shards)
                        .with_max_flush_attempts(attempts)
                        .with_hybrid_window_percent(window);
                    if ttl_mode != TtlMode::None {
                        config = config.with_ttl(ttl_mode, ttl);
                    }
                    config
                },
            )
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built configurations and helpers for common scenarios.

    use super::*;
    use tokio::sync::broadcast;

    /// Small bounded cache with the given policies and no expiry.
    pub fn config(
        capacity: usize,
        eviction: EvictionPolicyKind,
        write_policy: WritePolicyKind,
    ) -> CacheConfig {
        CacheConfig::new(capacity)
            .with_eviction(eviction)
            .with_write_policy(write_policy)
            .with_shards(4)
    }

    /// Write-behind with the given flush interval.
    pub fn write_behind(capacity: usize, flush_interval: Duration) -> CacheConfig {
        config(capacity, EvictionPolicyKind::Lru, WritePolicyKind::Behind)
            .with_flush_interval(flush_interval)
    }

    /// Fixed TTL expiry.
    pub fn fixed_ttl(capacity: usize, ttl: Duration) -> CacheConfig {
        CacheConfig::new(capacity).with_ttl(TtlMode::Fixed, ttl)
    }

    pub fn tagged(tags: &[&str]) -> PutOptions {
        PutOptions::new().with_tags(tags.iter().copied())
    }

    /// Everything currently buffered on an event receiver.
    pub fn drain_events<K: Clone>(rx: &mut broadcast::Receiver<CacheEvent<K>>) -> Vec<CacheEvent<K>> {
        let mut events = Vec::new();
        loop {
            match rx.try_recv() {
                Ok(event) => events.push(event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => break,
            }
        }
        events
    }

    /// Keys removed with `cause`, in event order.
    pub fn removed_keys<K: Clone>(events: &[CacheEvent<K>], cause: RemovalCause) -> Vec<K> {
        events
            .iter()
            .filter_map(|event| match event {
                CacheEvent::Removed { key, cause: c } if *c == cause => Some(key.clone()),
                _ => None,
            })
            .collect()
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions over cache results.

    use super::*;

    #[track_caller]
    pub fn assert_ok<T: std::fmt::Debug>(result: &CacheResult<T>) {
        assert!(result.is_ok(), "Expected Ok, got Err: {:?}", result);
    }

    #[track_caller]
    pub fn assert_err<T: std::fmt::Debug>(result: &CacheResult<T>) {
        assert!(result.is_err(), "Expected Err, got Ok: {:?}", result);
    }

    #[track_caller]
    pub fn assert_store_error<T: std::fmt::Debug>(result: &CacheResult<T>) {
        match result {
            Err(CacheError::Store(_)) => {}
            other => panic!("Expected Store error, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_load_error<T: std::fmt::Debug>(result: &CacheResult<T>) {
        match result {
            Err(CacheError::Load(_)) => {}
            other => panic!("Expected Load error, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_shut_down<T: std::fmt::Debug>(result: &CacheResult<T>) {
        match result {
            Err(CacheError::ShutDown) => {}
            other => panic!("Expected ShutDown, got: {:?}", other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_recording_store_injects_failures() {
        let store = RecordingStore::<&str, u32>::new();
        store.fail_next_writes(1);
        assert!(store.write(&"k", &1).await.is_err());
        assert!(store.write(&"k", &2).await.is_ok());
        assert_eq!(store.write_log(), vec![("k", 2)]);
        assert_eq!(store.writes_for(&"k"), vec![2]);
    }

    #[tokio::test]
    async fn test_scripted_loader_follows_script() {
        let loader = ScriptedLoader::<&str, u32>::new();
        loader.set("a", 1);
        assert_eq!(loader.load(&"a").await, Ok(Some(1)));
        loader.fail_next(1);
        assert!(loader.load(&"a").await.is_err());
        assert_eq!(loader.load(&"b").await, Ok(None));
        assert_eq!(loader.calls(), 3);
    }

    mod prop_tests {
        use super::super::generators::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn prop_generated_configs_validate(config in arb_valid_config()) {
                prop_assert!(config.validate().is_ok());
            }
        }
    }
}
