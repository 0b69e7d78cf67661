//! In-memory backing store.

use async_trait::async_trait;
use cachet_core::{BackingStore, CacheKey, CacheValue, StoreError};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// A [`BackingStore`] over a concurrent map, for embedding without a real
/// database and for tests.
#[derive(Debug)]
pub struct InMemoryBackingStore<K: CacheKey, V> {
    data: DashMap<K, V>,
    reads: AtomicU64,
    writes: AtomicU64,
}

impl<K: CacheKey, V: CacheValue> InMemoryBackingStore<K, V> {
    pub fn new() -> Self {
        Self {
            data: DashMap::new(),
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
        }
    }

    /// Create a store pre-populated with `entries`. Seeding is not counted
    /// as writes.
    pub fn with_entries<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
    {
        let store = Self::new();
        for (key, value) in entries {
            store.data.insert(key, value);
        }
        store
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.data.get(key).map(|v| v.value().clone())
    }

    /// Set a value directly, bypassing the write counter.
    pub fn insert(&self, key: K, value: V) {
        self.data.insert(key, value);
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn read_count(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }
}

impl<K: CacheKey, V: CacheValue> Default for InMemoryBackingStore<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<K: CacheKey, V: CacheValue> BackingStore<K, V> for InMemoryBackingStore<K, V> {
    async fn read(&self, key: &K) -> Result<Option<V>, StoreError> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        Ok(self.get(key))
    }

    async fn write(&self, key: &K, value: &V) -> Result<(), StoreError> {
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.data.insert(key.clone(), value.clone());
        Ok(())
    }
}
