use crate::cache::Cache;
use crate::inner::CacheInner;
use crate::invalidation::RefreshTracker;
use crate::keylock::KeyLocks;
use crate::scheduler::Scheduler;
use crate::store::EntryStore;
use crate::write::WriteCoordinator;
use cachet_core::{
    BackingStore, CacheConfig, CacheKey, CacheMetrics, CacheValue, Clock, ConfigError, Loader,
    TokioClock,
};
use cachet_events::EventBroadcaster;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tokio::runtime::Handle;

/// Lock stripes per store shard.
const KEY_LOCKS_PER_SHARD: usize = 4;

/// Assembles a [`Cache`] from a configuration and its collaborators.
///
/// A backing store is required. The loader is optional; without one,
/// misses and refreshes read from the backing store.
pub struct CacheBuilder<K: CacheKey, V: CacheValue> {
    config: CacheConfig,
    backing: Option<Arc<dyn BackingStore<K, V>>>,
    loader: Option<Arc<dyn Loader<K, V>>>,
    clock: Arc<dyn Clock>,
}

impl<K: CacheKey, V: CacheValue> CacheBuilder<K, V> {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            backing: None,
            loader: None,
            clock: Arc::new(TokioClock),
        }
    }

    pub fn backing_store<S>(self, store: S) -> Self
    where
        S: BackingStore<K, V> + 'static,
    {
        self.backing_store_arc(Arc::new(store))
    }

    pub fn backing_store_arc(mut self, store: Arc<dyn BackingStore<K, V>>) -> Self {
        self.backing = Some(store);
        self
    }

    pub fn loader<L>(self, loader: L) -> Self
    where
        L: Loader<K, V> + 'static,
    {
        self.loader_arc(Arc::new(loader))
    }

    pub fn loader_arc(mut self, loader: Arc<dyn Loader<K, V>>) -> Self {
        self.loader = Some(loader);
        self
    }

    /// Override the time source. Background timers still follow tokio time.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Validate the configuration and start the cache's background tasks.
    ///
    /// Must be called from within a tokio runtime.
    pub fn build(self) -> Result<Cache<K, V>, ConfigError> {
        self.config.validate()?;
        let backing = self.backing.ok_or_else(|| ConfigError::MissingRequired {
            field: "backing_store".to_string(),
        })?;
        let runtime = Handle::try_current().map_err(|_| ConfigError::NoRuntime)?;

        let config = self.config;
        let metrics = Arc::new(CacheMetrics::new());
        let events = EventBroadcaster::new(config.event_capacity);
        let writer = WriteCoordinator::new(
            config.write_policy,
            Arc::clone(&backing),
            Arc::clone(&metrics),
            events.clone(),
            Arc::clone(&self.clock),
            config.max_flush_attempts,
            config.retry_backoff,
            config.max_retry_backoff,
        );

        let inner = Arc::new(CacheInner {
            store: EntryStore::new(&config, Arc::clone(&self.clock)),
            writer,
            loader: self.loader,
            backing,
            key_locks: KeyLocks::new(config.shards * KEY_LOCKS_PER_SHARD),
            refreshes: RefreshTracker::new(),
            loads: RefreshTracker::new(),
            metrics,
            events,
            runtime,
            shut_down: AtomicBool::new(false),
            config,
        });
        let scheduler = Scheduler::start(&inner);

        tracing::info!(
            capacity = inner.config.capacity,
            eviction = %inner.config.eviction,
            write_policy = %inner.config.write_policy,
            ttl_mode = %inner.config.ttl_mode,
            "Cache started"
        );

        Ok(Cache::from_parts(inner, scheduler))
    }
}
