//! The cache façade.

use crate::builder::CacheBuilder;
use crate::inner::CacheInner;
use crate::invalidation::KeyPattern;
use crate::scheduler::{Scheduler, ShutdownReport};
use crate::write::FlushSummary;
use cachet_core::{
    CacheConfig, CacheError, CacheKey, CacheResult, CacheStats, CacheValue, PutOptions,
};
use cachet_events::CacheEvent;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;

/// A policy-pluggable in-process cache.
///
/// Handles are cheap to clone and share one store. Background tasks stop
/// when the last handle is dropped, after draining pending writes within
/// the configured shutdown timeout.
pub struct Cache<K: CacheKey, V: CacheValue> {
    inner: Arc<CacheInner<K, V>>,
    scheduler: Arc<Scheduler<K>>,
}

impl<K: CacheKey, V: CacheValue> Clone for Cache<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            scheduler: Arc::clone(&self.scheduler),
        }
    }
}

impl<K: CacheKey, V: CacheValue> fmt::Debug for Cache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cache")
            .field("store", &self.inner.store)
            .field("write_policy", &self.inner.config.write_policy)
            .finish()
    }
}

impl<K: CacheKey, V: CacheValue> Cache<K, V> {
    pub fn builder(config: CacheConfig) -> CacheBuilder<K, V> {
        CacheBuilder::new(config)
    }

    pub(crate) fn from_parts(inner: Arc<CacheInner<K, V>>, scheduler: Scheduler<K>) -> Self {
        Self {
            inner,
            scheduler: Arc::new(scheduler),
        }
    }

    // ===== READS =====

    /// Cached value, without loading on miss.
    pub fn get_if_present(&self, key: &K) -> Option<V> {
        self.inner.lookup(key)
    }

    /// Cached value, loading through the loader (or the backing store) on
    /// miss. A failed load is returned as an error and nothing is cached.
    pub async fn get(&self, key: &K) -> CacheResult<Option<V>> {
        self.inner.get_or_load(key).await
    }

    /// Look up several keys, loading misses. Keys with no value, or whose
    /// load failed, are left out.
    pub async fn get_all<I>(&self, keys: I) -> HashMap<K, V>
    where
        I: IntoIterator<Item = K>,
    {
        let mut found = HashMap::new();
        for key in keys {
            if let Ok(Some(value)) = self.inner.get_or_load(&key).await {
                found.insert(key, value);
            }
        }
        found
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.inner.store.contains_key(key)
    }

    /// Remaining lifetime of a live entry. `None` if absent or immortal.
    pub fn time_to_live(&self, key: &K) -> Option<Duration> {
        self.inner
            .store
            .peek(key)
            .and_then(|snapshot| snapshot.remaining_ttl)
    }

    // ===== WRITES =====

    /// Insert a value, returning the previous live value.
    ///
    /// Under write-through the backing store write happens first; if it
    /// fails the error is returned and the cache is left untouched.
    pub async fn put(&self, key: K, value: V, ttl: Option<Duration>) -> CacheResult<Option<V>> {
        let options = PutOptions {
            ttl,
            ..Default::default()
        };
        self.inner.put(key, value, options).await
    }

    pub async fn put_with(&self, key: K, value: V, options: PutOptions) -> CacheResult<Option<V>> {
        self.inner.put(key, value, options).await
    }

    /// Overwrite a key only if it currently holds a live entry.
    pub async fn put_if_present(&self, key: K, value: V) -> CacheResult<bool> {
        self.inner.put_if_present(key, value).await
    }

    /// Make a live entry never expire.
    pub fn persist(&self, key: &K) -> bool {
        self.inner.store.persist(key)
    }

    // ===== INVALIDATION =====

    /// Remove one key. Returns whether a live entry was removed.
    pub fn invalidate(&self, key: &K) -> bool {
        self.inner.invalidate(key)
    }

    /// Remove every entry. Returns the number of live entries removed.
    pub fn invalidate_all(&self) -> usize {
        self.inner.invalidate_all()
    }

    /// Remove exactly the entries tagged with `tag`.
    pub fn invalidate_by_tag(&self, tag: &str) -> usize {
        self.inner.invalidate_by_tag(tag)
    }

    pub fn invalidate_matching<F>(&self, predicate: F) -> usize
    where
        F: Fn(&K) -> bool,
    {
        self.inner.invalidate_matching(predicate)
    }

    /// Ask for a background reload of `key`. Returns false if one is already
    /// running or the cached copy has unpersisted changes.
    pub fn refresh(&self, key: K) -> bool {
        self.inner.refresh(key)
    }

    // ===== OBSERVABILITY =====

    pub fn stats(&self) -> CacheStats {
        self.inner.metrics.snapshot(self.len() as u64)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent<K>> {
        self.inner.events.subscribe()
    }

    pub fn len(&self) -> usize {
        self.inner.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.store.is_empty()
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// Writes queued for the backing store.
    pub fn pending_writes(&self) -> usize {
        self.inner.writer.queue().len()
    }

    // ===== LIFECYCLE =====

    /// Run an expiry sweep now. Returns the number of entries removed.
    pub fn run_pending_tasks(&self) -> usize {
        self.inner.run_sweep()
    }

    /// Write every pending write now, ignoring backoff.
    pub async fn flush(&self) -> CacheResult<FlushSummary> {
        self.scheduler.flush_now().await.ok_or(CacheError::ShutDown)
    }

    /// Stop accepting writes and drain pending ones within `timeout`.
    ///
    /// Calling it again returns an empty report.
    pub async fn shutdown(&self, timeout: Duration) -> ShutdownReport<K> {
        self.inner.shut_down.store(true, Ordering::Release);
        let deadline = Instant::now() + timeout;
        self.scheduler
            .shutdown(deadline)
            .await
            .unwrap_or(ShutdownReport {
                flushed: 0,
                dead_lettered: 0,
                unflushed: Vec::new(),
                timed_out: false,
            })
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::Acquire)
    }
}

impl<K, V> Cache<K, V>
where
    K: CacheKey + AsRef<str>,
    V: CacheValue,
{
    /// Remove every entry whose key matches a glob pattern.
    pub fn invalidate_pattern(&self, pattern: &KeyPattern) -> usize {
        self.inner
            .invalidate_matching(|key| pattern.matches(key.as_ref()))
    }
}
