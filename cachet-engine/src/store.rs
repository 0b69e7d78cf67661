//! Entry Store.
//!
//! A capacity-bounded, lock-striped map from key to [`CacheEntry`]. It is
//! the only owner of entries; the eviction policy and tag index see keys.
//!
//! Every method is synchronous and holds locks only for its own critical
//! section. Lock order is always shard, then policy, then tags. Eviction
//! never holds the inserting key's shard while it removes a victim.

use crate::eviction::{EvictionPolicy, Policy};
use crate::invalidation::TagIndex;
use cachet_core::{
    CacheConfig, CacheEntry, CacheKey, CacheValue, Clock, RemovalCause, Removed,
};
use parking_lot::Mutex;
use std::collections::hash_map::RandomState;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::hash::BuildHasher;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::trace;

type Shard<K, V> = HashMap<K, CacheEntry<K, V>>;

// ============================================================================
// RESULT TYPES
// ============================================================================

/// Outcome of a counted lookup.
#[derive(Debug)]
pub enum Lookup<K, V> {
    Hit {
        value: V,
        /// Past the stale-while-revalidate threshold.
        stale: bool,
        dirty: bool,
        version: u64,
    },
    Miss,
    /// The entry was found past its expiry and removed.
    Expired(Removed<K, V>),
}

/// Read-only view of a live entry.
#[derive(Debug, Clone)]
pub struct EntrySnapshot<V> {
    pub value: V,
    pub version: u64,
    pub dirty: bool,
    pub remaining_ttl: Option<Duration>,
}

#[derive(Debug, Clone, Default)]
pub struct InsertOptions {
    pub ttl: Option<Duration>,
    pub tags: BTreeSet<String>,
    pub dirty: bool,
}

#[derive(Debug)]
pub struct InsertOutcome<K, V> {
    /// Previous occupant of the key, if any.
    pub replaced: Option<Removed<K, V>>,
    /// Victims removed to make room.
    pub evicted: Vec<Removed<K, V>>,
}

// ============================================================================
// ENTRY STORE
// ============================================================================

pub struct EntryStore<K, V> {
    shards: Box<[Mutex<Shard<K, V>>]>,
    hasher: RandomState,
    policy: Mutex<EvictionPolicy<K>>,
    tags: Mutex<TagIndex<K>>,
    /// Resident entries plus slots reserved by in-progress inserts.
    len: AtomicUsize,
    versions: AtomicU64,
    capacity: usize,
    config: CacheConfig,
    clock: Arc<dyn Clock>,
}

impl<K: CacheKey, V: CacheValue> EntryStore<K, V> {
    pub fn new(config: &CacheConfig, clock: Arc<dyn Clock>) -> Self {
        let shards = (0..config.shards.max(1))
            .map(|_| Mutex::new(HashMap::new()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            shards,
            hasher: RandomState::new(),
            policy: Mutex::new(EvictionPolicy::new(
                config.eviction,
                config.capacity,
                config.hybrid_window_percent,
            )),
            tags: Mutex::new(TagIndex::new()),
            len: AtomicUsize::new(0),
            versions: AtomicU64::new(0),
            capacity: config.capacity,
            config: config.clone(),
            clock,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Allocate the next entry version. Versions are unique per store.
    pub fn next_version(&self) -> u64 {
        self.versions.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Look up a key, counting it as an access.
    ///
    /// An entry at or past its expiry is removed and reported as expired.
    pub fn get(&self, key: &K) -> Lookup<K, V> {
        let now = self.clock.now();
        let mut shard = self.shard(key).lock();

        let Some(entry) = shard.get_mut(key) else {
            return Lookup::Miss;
        };
        if !entry.is_expired(now) {
            entry.touch(now);
            self.policy.lock().on_access(key);
            return Lookup::Hit {
                value: entry.value.clone(),
                stale: entry.is_stale(now),
                dirty: entry.dirty,
                version: entry.version,
            };
        }

        match shard.remove(key) {
            Some(entry) => {
                self.detach(&entry);
                Lookup::Expired(Removed::from_entry(entry, RemovalCause::Expired))
            }
            None => Lookup::Miss,
        }
    }

    /// Look at a live entry without recording an access.
    pub fn peek(&self, key: &K) -> Option<EntrySnapshot<V>> {
        let now = self.clock.now();
        let shard = self.shard(key).lock();
        shard
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| EntrySnapshot {
                value: entry.value.clone(),
                version: entry.version,
                dirty: entry.dirty,
                remaining_ttl: entry.remaining_ttl(now),
            })
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.peek(key).is_some()
    }

    /// Insert or overwrite a key at `version`.
    ///
    /// A new key beyond capacity first evicts policy-selected victims; they
    /// are returned so the caller can hand them to the write coordinator.
    pub fn insert(
        &self,
        key: K,
        value: V,
        options: InsertOptions,
        version: u64,
    ) -> InsertOutcome<K, V> {
        let now = self.clock.now();

        {
            let mut shard = self.shard(&key).lock();
            if let Some(existing) = shard.get_mut(&key) {
                let fresh = self.build_entry(key.clone(), value, &options, version, now);
                return InsertOutcome {
                    replaced: Some(self.overwrite(existing, fresh, now)),
                    evicted: Vec::new(),
                };
            }
        }

        let evicted = self.reserve_slot(&key);

        let mut shard = self.shard(&key).lock();
        let fresh = self.build_entry(key.clone(), value, &options, version, now);
        if let Some(existing) = shard.get_mut(&key) {
            // Raced with another insert of the same key; give the slot back.
            self.len.fetch_sub(1, Ordering::AcqRel);
            return InsertOutcome {
                replaced: Some(self.overwrite(existing, fresh, now)),
                evicted,
            };
        }

        self.policy.lock().on_insert(&key);
        self.tags.lock().insert(&key, &fresh.tags);
        shard.insert(key, fresh);
        InsertOutcome {
            replaced: None,
            evicted,
        }
    }

    /// Swap in a reloaded value, but only over the exact version the reload
    /// started from, and never over a dirty or expired entry.
    pub fn replace_if_version(&self, key: &K, expected: u64, value: V, version: u64) -> bool {
        let now = self.clock.now();
        let mut shard = self.shard(key).lock();
        let Some(entry) = shard.get_mut(key) else {
            return false;
        };
        if entry.version != expected || entry.dirty || entry.is_expired(now) {
            return false;
        }

        let ttl = entry.sliding_ttl.or_else(|| {
            entry
                .expire_at
                .map(|at| at.saturating_duration_since(entry.inserted_at))
        });
        entry.value = value;
        entry.version = version;
        entry.inserted_at = now;
        entry.expire_at = ttl.map(|ttl| now + ttl);
        entry.refresh_at = self.config.stale_after.map(|after| now + after);
        self.policy.lock().on_update(key);
        true
    }

    pub fn remove(&self, key: &K, cause: RemovalCause) -> Option<Removed<K, V>> {
        self.remove_if(key, cause, |_| true)
    }

    /// Remove a key if `predicate` holds for its entry.
    ///
    /// A caller-initiated removal of an already expired entry is reported
    /// as expired.
    pub fn remove_if<F>(&self, key: &K, cause: RemovalCause, predicate: F) -> Option<Removed<K, V>>
    where
        F: FnOnce(&CacheEntry<K, V>) -> bool,
    {
        let now = self.clock.now();
        let mut shard = self.shard(key).lock();
        if !shard.get(key).is_some_and(predicate) {
            return None;
        }
        let entry = shard.remove(key)?;
        self.detach(&entry);
        let cause = effective_cause(&entry, cause, now);
        Some(Removed::from_entry(entry, cause))
    }

    /// Acknowledge persistence of `version`. Newer versions stay dirty.
    pub fn mark_clean(&self, key: &K, version: u64) -> bool {
        let mut shard = self.shard(key).lock();
        match shard.get_mut(key) {
            Some(entry) if entry.version == version => {
                entry.dirty = false;
                true
            }
            _ => false,
        }
    }

    /// Drop a live entry's expiry.
    pub fn persist(&self, key: &K) -> bool {
        let now = self.clock.now();
        let mut shard = self.shard(key).lock();
        match shard.get_mut(key) {
            Some(entry) if !entry.is_expired(now) => {
                entry.expire_at = None;
                entry.sliding_ttl = None;
                true
            }
            _ => false,
        }
    }

    /// Live keys satisfying `predicate`.
    pub fn keys_matching<F>(&self, predicate: F) -> Vec<K>
    where
        F: Fn(&K) -> bool,
    {
        let now = self.clock.now();
        let mut keys = Vec::new();
        for shard in self.shards.iter() {
            let shard = shard.lock();
            keys.extend(
                shard
                    .values()
                    .filter(|entry| !entry.is_expired(now) && predicate(&entry.key))
                    .map(|entry| entry.key.clone()),
            );
        }
        keys
    }

    pub fn tagged_keys(&self, tag: &str) -> Vec<K> {
        self.tags.lock().keys(tag)
    }

    pub fn dirty_keys(&self) -> Vec<K> {
        let mut keys = Vec::new();
        for shard in self.shards.iter() {
            let shard = shard.lock();
            keys.extend(
                shard
                    .values()
                    .filter(|entry| entry.dirty)
                    .map(|entry| entry.key.clone()),
            );
        }
        keys
    }

    /// Remove every expired entry.
    pub fn sweep_expired(&self) -> Vec<Removed<K, V>> {
        let now = self.clock.now();
        self.drain_where(|entry| entry.is_expired(now), RemovalCause::Expired)
    }

    /// Remove every entry satisfying `predicate`.
    pub fn drain_where<F>(&self, predicate: F, cause: RemovalCause) -> Vec<Removed<K, V>>
    where
        F: Fn(&CacheEntry<K, V>) -> bool,
    {
        let now = self.clock.now();
        let mut removed = Vec::new();
        for shard in self.shards.iter() {
            let mut shard = shard.lock();
            let keys: Vec<K> = shard
                .values()
                .filter(|entry| predicate(entry))
                .map(|entry| entry.key.clone())
                .collect();
            for key in keys {
                if let Some(entry) = shard.remove(&key) {
                    self.detach(&entry);
                    let cause = effective_cause(&entry, cause, now);
                    removed.push(Removed::from_entry(entry, cause));
                }
            }
        }
        if !removed.is_empty() {
            trace!(count = removed.len(), cause = %cause, "Drained entries");
        }
        removed
    }

    fn shard(&self, key: &K) -> &Mutex<Shard<K, V>> {
        let idx = (self.hasher.hash_one(key) as usize) % self.shards.len();
        &self.shards[idx]
    }

    fn build_entry(
        &self,
        key: K,
        value: V,
        options: &InsertOptions,
        version: u64,
        now: Instant,
    ) -> CacheEntry<K, V> {
        let ttl = self.config.effective_ttl(options.ttl);
        let sliding = self.config.ttl_mode == cachet_core::TtlMode::Sliding;
        CacheEntry {
            key,
            value,
            inserted_at: now,
            last_access_at: now,
            access_count: 0,
            expire_at: ttl.map(|ttl| now + ttl),
            sliding_ttl: if sliding { ttl } else { None },
            refresh_at: self.config.stale_after.map(|after| now + after),
            tags: options.tags.clone(),
            dirty: options.dirty,
            version,
        }
    }

    /// Replace a resident entry in place. Called with its shard locked.
    fn overwrite(
        &self,
        existing: &mut CacheEntry<K, V>,
        fresh: CacheEntry<K, V>,
        now: Instant,
    ) -> Removed<K, V> {
        let previous = std::mem::replace(existing, fresh);
        self.policy.lock().on_update(&existing.key);
        {
            let mut tags = self.tags.lock();
            tags.remove(&previous.key, &previous.tags);
            tags.insert(&existing.key, &existing.tags);
        }
        let cause = if previous.is_expired(now) {
            RemovalCause::Expired
        } else {
            RemovalCause::Replaced
        };
        Removed::from_entry(previous, cause)
    }

    /// Forget a removed entry. Called with its shard locked.
    fn detach(&self, entry: &CacheEntry<K, V>) {
        self.len.fetch_sub(1, Ordering::AcqRel);
        self.policy.lock().on_remove(&entry.key);
        self.tags.lock().remove(&entry.key, &entry.tags);
    }

    /// Claim one unit of capacity for `incoming`, evicting as needed.
    fn reserve_slot(&self, incoming: &K) -> Vec<Removed<K, V>> {
        let max_attempts = self.capacity + self.shards.len();
        let mut evicted = Vec::new();
        let mut attempts = 0usize;

        loop {
            let current = self.len.load(Ordering::Acquire);
            if current < self.capacity {
                if self
                    .len
                    .compare_exchange_weak(current, current + 1, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    return evicted;
                }
                continue;
            }

            attempts += 1;
            let victim = self.policy.lock().select_victim(Some(incoming));
            match victim {
                Some(victim) if attempts <= max_attempts => {
                    if let Some(removed) = self.remove(&victim, RemovalCause::Size) {
                        trace!(key = ?removed.key, "Selected eviction victim");
                        evicted.push(removed);
                    }
                }
                _ => {
                    // Nothing evictable: admit without eviction.
                    self.len.fetch_add(1, Ordering::AcqRel);
                    return evicted;
                }
            }
        }
    }
}

fn effective_cause<K, V>(entry: &CacheEntry<K, V>, cause: RemovalCause, now: Instant) -> RemovalCause {
    let by_caller = matches!(cause, RemovalCause::Explicit | RemovalCause::Replaced);
    if by_caller && entry.is_expired(now) {
        RemovalCause::Expired
    } else {
        cause
    }
}

impl<K, V> fmt::Debug for EntryStore<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntryStore")
            .field("shards", &self.shards.len())
            .field("capacity", &self.capacity)
            .field("len", &self.len.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cachet_core::{EvictionPolicyKind, ManualClock, TtlMode};

    fn store(config: CacheConfig) -> (EntryStore<&'static str, u32>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        (EntryStore::new(&config, clock.clone()), clock)
    }

    fn put(store: &EntryStore<&'static str, u32>, key: &'static str, value: u32) -> InsertOutcome<&'static str, u32> {
        let version = store.next_version();
        store.insert(key, value, InsertOptions::default(), version)
    }

    fn tagged(tags: &[&str]) -> InsertOptions {
        InsertOptions {
            tags: tags.iter().map(|t| t.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_get_hit_and_miss() {
        let (store, _) = store(CacheConfig::new(4));
        put(&store, "a", 1);
        assert!(matches!(store.get(&"a"), Lookup::Hit { value: 1, .. }));
        assert!(matches!(store.get(&"b"), Lookup::Miss));
    }

    #[test]
    fn test_lru_scenario_evicts_b() {
        let (store, _) = store(CacheConfig::new(3).with_eviction(EvictionPolicyKind::Lru));
        for (k, v) in [("A", 1), ("B", 2), ("C", 3)] {
            put(&store, k, v);
        }
        store.get(&"A");
        let outcome = put(&store, "D", 4);
        assert_eq!(outcome.evicted.len(), 1);
        assert_eq!(outcome.evicted[0].key, "B");
        assert_eq!(outcome.evicted[0].cause, RemovalCause::Size);
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn test_overwrite_does_not_evict() {
        let (store, _) = store(CacheConfig::new(2));
        put(&store, "a", 1);
        put(&store, "b", 2);
        let outcome = put(&store, "a", 10);
        assert!(outcome.evicted.is_empty());
        let replaced = outcome.replaced.unwrap();
        assert_eq!(replaced.value, 1);
        assert_eq!(replaced.cause, RemovalCause::Replaced);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_expiry_boundary() {
        let config = CacheConfig::new(4).with_ttl(TtlMode::Fixed, Duration::from_secs(10));
        let (store, clock) = store(config);
        put(&store, "a", 1);

        clock.advance(Duration::from_millis(9_999));
        assert!(matches!(store.get(&"a"), Lookup::Hit { .. }));

        clock.advance(Duration::from_millis(1));
        match store.get(&"a") {
            Lookup::Expired(removed) => assert_eq!(removed.cause, RemovalCause::Expired),
            other => panic!("expected expiry, got {other:?}"),
        }
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn test_sliding_ttl_extends_on_access() {
        let config = CacheConfig::new(4).with_ttl(TtlMode::Sliding, Duration::from_secs(10));
        let (store, clock) = store(config);
        put(&store, "a", 1);
        for _ in 0..3 {
            clock.advance(Duration::from_secs(8));
            assert!(matches!(store.get(&"a"), Lookup::Hit { .. }));
        }
        clock.advance(Duration::from_secs(10));
        assert!(matches!(store.get(&"a"), Lookup::Expired(_)));
    }

    #[test]
    fn test_stale_flag_after_threshold() {
        let config = CacheConfig::new(4)
            .with_ttl(TtlMode::Fixed, Duration::from_secs(10))
            .with_stale_after(Duration::from_secs(4));
        let (store, clock) = store(config);
        put(&store, "a", 1);
        assert!(matches!(store.get(&"a"), Lookup::Hit { stale: false, .. }));
        clock.advance(Duration::from_secs(4));
        assert!(matches!(store.get(&"a"), Lookup::Hit { stale: true, .. }));
    }

    #[test]
    fn test_tag_index_follows_overwrite() {
        let (store, _) = store(CacheConfig::new(4));
        let v = store.next_version();
        store.insert("a", 1, tagged(&["users"]), v);
        assert_eq!(store.tagged_keys("users"), vec!["a"]);

        let v = store.next_version();
        store.insert("a", 2, tagged(&["admins"]), v);
        assert!(store.tagged_keys("users").is_empty());
        assert_eq!(store.tagged_keys("admins"), vec!["a"]);

        store.remove(&"a", RemovalCause::Explicit);
        assert!(store.tagged_keys("admins").is_empty());
    }

    #[test]
    fn test_mark_clean_requires_matching_version() {
        let (store, _) = store(CacheConfig::new(4));
        let v1 = store.next_version();
        store.insert("a", 1, InsertOptions { dirty: true, ..Default::default() }, v1);
        let v2 = store.next_version();
        store.insert("a", 2, InsertOptions { dirty: true, ..Default::default() }, v2);

        assert!(!store.mark_clean(&"a", v1));
        assert!(store.peek(&"a").unwrap().dirty);
        assert!(store.mark_clean(&"a", v2));
        assert!(!store.peek(&"a").unwrap().dirty);
    }

    #[test]
    fn test_replace_if_version_guards() {
        let (store, _) = store(CacheConfig::new(4));
        let v1 = store.next_version();
        store.insert("a", 1, InsertOptions::default(), v1);

        let v2 = store.next_version();
        assert!(!store.replace_if_version(&"a", v1 + 100, 5, v2));
        assert!(store.replace_if_version(&"a", v1, 5, v2));
        assert_eq!(store.peek(&"a").unwrap().value, 5);

        let v3 = store.next_version();
        store.insert("a", 6, InsertOptions { dirty: true, ..Default::default() }, v3);
        let v4 = store.next_version();
        assert!(!store.replace_if_version(&"a", v3, 7, v4));
    }

    #[test]
    fn test_sweep_removes_only_expired() {
        let config = CacheConfig::new(4).with_ttl(TtlMode::Fixed, Duration::from_secs(5));
        let (store, clock) = store(config);
        put(&store, "a", 1);
        let v = store.next_version();
        store.insert(
            "b",
            2,
            InsertOptions {
                ttl: Some(Duration::from_secs(60)),
                ..Default::default()
            },
            v,
        );

        clock.advance(Duration::from_secs(6));
        let swept = store.sweep_expired();
        assert_eq!(swept.len(), 1);
        assert_eq!(swept[0].key, "a");
        assert!(store.contains_key(&"b"));
    }

    #[test]
    fn test_explicit_removal_of_expired_entry_reports_expiry() {
        let config = CacheConfig::new(4).with_ttl(TtlMode::Fixed, Duration::from_secs(1));
        let (store, clock) = store(config);
        put(&store, "a", 1);
        clock.advance(Duration::from_secs(2));
        let removed = store.remove(&"a", RemovalCause::Explicit).unwrap();
        assert_eq!(removed.cause, RemovalCause::Expired);
    }

    #[test]
    fn test_persist_clears_expiry() {
        let config = CacheConfig::new(4).with_ttl(TtlMode::Fixed, Duration::from_secs(1));
        let (store, clock) = store(config);
        put(&store, "a", 1);
        assert!(store.persist(&"a"));
        clock.advance(Duration::from_secs(5));
        assert!(store.contains_key(&"a"));
        assert_eq!(store.peek(&"a").unwrap().remaining_ttl, None);
    }

    #[test]
    fn test_capacity_respected_across_shards() {
        let (store, _) = store(CacheConfig::new(5).with_shards(4));
        let keys = ["a", "b", "c", "d", "e", "f", "g", "h", "i", "j"];
        for (i, key) in keys.iter().enumerate() {
            put(&store, key, i as u32);
            assert!(store.len() <= 5);
        }
        assert_eq!(store.len(), 5);
    }

    #[test]
    fn test_concurrent_inserts_stay_within_capacity() {
        let (store, _) = store(CacheConfig::new(32).with_shards(8));
        let store = Arc::new(store);
        let keys: Vec<&'static str> = (0..256)
            .map(|i| &*Box::leak(format!("k{i}").into_boxed_str()))
            .collect();

        std::thread::scope(|scope| {
            for chunk in keys.chunks(64) {
                let store = Arc::clone(&store);
                scope.spawn(move || {
                    for key in chunk {
                        let v = store.next_version();
                        store.insert(key, 0, InsertOptions::default(), v);
                    }
                });
            }
        });

        assert_eq!(store.len(), 32);
        assert_eq!(store.keys_matching(|_| true).len(), 32);
    }
}
