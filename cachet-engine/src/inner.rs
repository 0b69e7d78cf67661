//! State shared by a cache's handles and its background tasks.

use crate::invalidation::RefreshTracker;
use crate::keylock::KeyLocks;
use crate::scheduler::ShutdownReport;
use crate::store::{EntryStore, InsertOptions, Lookup};
use crate::write::{Admission, FlushMode, FlushSummary, WriteCoordinator};
use cachet_core::{
    BackingStore, CacheConfig, CacheError, CacheKey, CacheMetrics, CacheResult, CacheValue,
    LoadError, Loader, PutOptions, RemovalCause, Removed, WritePolicyKind,
};
use cachet_events::{CacheEvent, EventBroadcaster};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::time::Instant;
use tracing::{debug, warn};

pub(crate) struct CacheInner<K: CacheKey, V: CacheValue> {
    pub(crate) config: CacheConfig,
    pub(crate) store: EntryStore<K, V>,
    pub(crate) writer: WriteCoordinator<K, V>,
    pub(crate) loader: Option<Arc<dyn Loader<K, V>>>,
    pub(crate) backing: Arc<dyn BackingStore<K, V>>,
    pub(crate) key_locks: KeyLocks,
    pub(crate) refreshes: RefreshTracker<K>,
    pub(crate) loads: RefreshTracker<K>,
    pub(crate) metrics: Arc<CacheMetrics>,
    pub(crate) events: EventBroadcaster<CacheEvent<K>>,
    pub(crate) runtime: Handle,
    pub(crate) shut_down: AtomicBool,
}

impl<K: CacheKey, V: CacheValue> CacheInner<K, V> {
    pub(crate) fn ensure_running(&self) -> CacheResult<()> {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(CacheError::ShutDown);
        }
        Ok(())
    }

    // ========================================================================
    // READ PATH
    // ========================================================================

    /// Counted lookup. A stale hit schedules a background refresh unless the
    /// cached copy is dirty.
    pub(crate) fn lookup(self: &Arc<Self>, key: &K) -> Option<V> {
        match self.store.get(key) {
            Lookup::Hit {
                value,
                stale,
                dirty,
                version,
            } => {
                CacheMetrics::incr(&self.metrics.hits);
                if stale {
                    CacheMetrics::incr(&self.metrics.stale_hits);
                    if !dirty {
                        self.schedule_refresh(key.clone(), Some(version));
                    }
                }
                Some(value)
            }
            Lookup::Miss => {
                CacheMetrics::incr(&self.metrics.misses);
                None
            }
            Lookup::Expired(removed) => {
                CacheMetrics::incr(&self.metrics.misses);
                self.handle_removed(&removed);
                None
            }
        }
    }

    /// Lookup with cache-aside load on miss. Concurrent misses on one key
    /// share a single load.
    pub(crate) async fn get_or_load(self: &Arc<Self>, key: &K) -> CacheResult<Option<V>> {
        if let Some(value) = self.lookup(key) {
            return Ok(Some(value));
        }

        let _guard = self.key_locks.lock(key).await;
        if let Some(snapshot) = self.store.peek(key) {
            return Ok(Some(snapshot.value));
        }

        // A write still queued for the store is newer than anything the
        // store can return.
        if let Some((value, version)) = self.writer.pending(key) {
            let options = InsertOptions {
                dirty: true,
                ..Default::default()
            };
            self.admit(key.clone(), value.clone(), options, version);
            return Ok(Some(value));
        }

        // Invalidations do not take the key lock; they cancel the ticket
        // instead, and a cancelled load is returned but not cached.
        let ticket = self.loads.supersede(key);
        let result = self.load_value(key).await;
        let current = self.loads.finish(key, ticket);

        match result {
            Ok(Some(value)) => {
                CacheMetrics::incr(&self.metrics.loads);
                if current {
                    let version = self.store.next_version();
                    self.admit(key.clone(), value.clone(), InsertOptions::default(), version);
                } else {
                    debug!(key = ?key, "Key invalidated while loading, not caching result");
                }
                Ok(Some(value))
            }
            Ok(None) => Ok(None),
            Err(e) => {
                CacheMetrics::incr(&self.metrics.load_failures);
                warn!(key = ?key, error = %e, "Cache-aside load failed");
                self.events.broadcast(CacheEvent::LoadFailed {
                    key: key.clone(),
                    error: e.clone(),
                });
                Err(e.into())
            }
        }
    }

    /// Shared load path: the loader when one is configured, otherwise the
    /// backing store.
    async fn load_value(&self, key: &K) -> Result<Option<V>, LoadError> {
        match &self.loader {
            Some(loader) => loader.load(key).await,
            None => self.backing.read(key).await.map_err(|e| LoadError::Failed {
                key: format!("{key:?}"),
                reason: e.to_string(),
            }),
        }
    }

    // ========================================================================
    // WRITE PATH
    // ========================================================================

    pub(crate) async fn put(&self, key: K, value: V, options: PutOptions) -> CacheResult<Option<V>> {
        self.ensure_running()?;
        let _guard = self.key_locks.lock(&key).await;
        self.write_locked(key, value, options).await
    }

    /// Overwrite only a live entry.
    pub(crate) async fn put_if_present(&self, key: K, value: V) -> CacheResult<bool> {
        self.ensure_running()?;
        let _guard = self.key_locks.lock(&key).await;
        if !self.store.contains_key(&key) {
            return Ok(false);
        }
        self.write_locked(key, value, PutOptions::default()).await?;
        Ok(true)
    }

    /// Route a write through the coordinator. Caller holds the key lock.
    async fn write_locked(&self, key: K, value: V, options: PutOptions) -> CacheResult<Option<V>> {
        self.ensure_running()?;
        let version = self.store.next_version();
        match self.writer.on_write(&key, &value, version).await? {
            Admission::Cache { dirty } => {
                let options = InsertOptions {
                    ttl: options.ttl,
                    tags: options.tags,
                    dirty,
                };
                Ok(self.admit(key, value, options, version))
            }
            Admission::Bypass => {
                let previous = self.store.remove(&key, RemovalCause::Replaced);
                Ok(previous.and_then(|removed| self.settle_replaced(removed)))
            }
        }
    }

    /// Insert into the store and settle everything the insert displaced.
    /// Returns the previous live value.
    fn admit(&self, key: K, value: V, options: InsertOptions, version: u64) -> Option<V> {
        let outcome = self.store.insert(key, value, options, version);
        for removed in &outcome.evicted {
            self.handle_removed(removed);
        }
        outcome
            .replaced
            .and_then(|removed| self.settle_replaced(removed))
    }

    fn settle_replaced(&self, removed: Removed<K, V>) -> Option<V> {
        self.handle_removed(&removed);
        (removed.cause == RemovalCause::Replaced).then_some(removed.value)
    }

    // ========================================================================
    // REMOVAL
    // ========================================================================

    pub(crate) fn handle_removed(&self, removed: &Removed<K, V>) {
        match removed.cause {
            RemovalCause::Size => CacheMetrics::incr(&self.metrics.evictions),
            RemovalCause::Expired => CacheMetrics::incr(&self.metrics.expirations),
            RemovalCause::Explicit => CacheMetrics::incr(&self.metrics.invalidations),
            RemovalCause::Replaced | RemovalCause::Shutdown => {}
        }
        if removed.cause != RemovalCause::Replaced {
            self.refreshes.cancel(&removed.key);
        }
        self.writer.on_evict(removed);
        debug!(key = ?removed.key, cause = %removed.cause, dirty = removed.dirty, "Entry removed");
        self.events.broadcast(CacheEvent::Removed {
            key: removed.key.clone(),
            cause: removed.cause,
        });
    }

    pub(crate) fn invalidate(&self, key: &K) -> bool {
        self.refreshes.cancel(key);
        self.loads.cancel(key);
        match self.store.remove(key, RemovalCause::Explicit) {
            Some(removed) => {
                self.handle_removed(&removed);
                removed.cause == RemovalCause::Explicit
            }
            None => false,
        }
    }

    pub(crate) fn invalidate_all(&self) -> usize {
        self.refreshes.cancel_all();
        self.loads.cancel_all();
        let removed = self.store.drain_where(|_| true, RemovalCause::Explicit);
        self.settle_explicit(removed)
    }

    pub(crate) fn invalidate_by_tag(&self, tag: &str) -> usize {
        let removed = self
            .store
            .tagged_keys(tag)
            .into_iter()
            .filter_map(|key| {
                self.store
                    .remove_if(&key, RemovalCause::Explicit, |entry| entry.has_tag(tag))
            })
            .collect();
        self.settle_explicit(removed)
    }

    pub(crate) fn invalidate_matching<F>(&self, predicate: F) -> usize
    where
        F: Fn(&K) -> bool,
    {
        self.refreshes.cancel_where(&predicate);
        self.loads.cancel_where(&predicate);
        let removed = self
            .store
            .drain_where(|entry| predicate(&entry.key), RemovalCause::Explicit);
        self.settle_explicit(removed)
    }

    /// Settle a bulk invalidation, counting only entries that were live.
    fn settle_explicit(&self, removed: Vec<Removed<K, V>>) -> usize {
        let mut live = 0;
        for removed in &removed {
            self.handle_removed(removed);
            if removed.cause == RemovalCause::Explicit {
                live += 1;
            }
        }
        live
    }

    pub(crate) fn run_sweep(&self) -> usize {
        let removed = self.store.sweep_expired();
        for removed in &removed {
            self.handle_removed(removed);
        }
        if !removed.is_empty() {
            debug!(count = removed.len(), "Swept expired entries");
        }
        removed.len()
    }

    // ========================================================================
    // REFRESH
    // ========================================================================

    /// Start a refresh for `key` unless one is already in flight.
    ///
    /// `expected` is the version the refresh replaces; `None` refreshes an
    /// absent key and only inserts if it is still absent.
    pub(crate) fn schedule_refresh(self: &Arc<Self>, key: K, expected: Option<u64>) -> bool {
        let Some(ticket) = self.refreshes.begin(&key) else {
            return false;
        };
        let inner = Arc::clone(self);
        self.runtime.spawn(async move {
            inner.run_refresh(key, ticket, expected).await;
        });
        true
    }

    /// Refresh the current version of `key`. Dirty entries are skipped.
    pub(crate) fn refresh(self: &Arc<Self>, key: K) -> bool {
        match self.store.peek(&key) {
            Some(snapshot) if snapshot.dirty => false,
            Some(snapshot) => self.schedule_refresh(key, Some(snapshot.version)),
            None => self.schedule_refresh(key, None),
        }
    }

    async fn run_refresh(&self, key: K, ticket: u64, expected: Option<u64>) {
        let result = self.load_value(&key).await;

        let _guard = self.key_locks.lock(&key).await;
        if !self.refreshes.finish(&key, ticket) {
            warn!(key = ?key, "Dropping refresh result, entry was removed while loading");
            return;
        }
        if self.writer.pending(&key).is_some() {
            debug!(key = ?key, "Dropping refresh result, a newer write is still queued");
            return;
        }

        match result {
            Ok(Some(value)) => {
                let version = self.store.next_version();
                let committed = match expected {
                    Some(expected) => self.store.replace_if_version(&key, expected, value, version),
                    None if !self.store.contains_key(&key) => {
                        self.admit(key.clone(), value, InsertOptions::default(), version);
                        true
                    }
                    None => false,
                };
                if committed {
                    CacheMetrics::incr(&self.metrics.refreshes);
                    debug!(key = ?key, version, "Entry refreshed");
                    self.events.broadcast(CacheEvent::Refreshed { key, version });
                } else {
                    debug!(key = ?key, "Refresh superseded by a newer write");
                }
            }
            Ok(None) => {
                let Some(expected) = expected else {
                    return;
                };
                let removed = self.store.remove_if(&key, RemovalCause::Explicit, |entry| {
                    entry.version == expected && !entry.dirty
                });
                if let Some(removed) = removed {
                    self.handle_removed(&removed);
                }
            }
            Err(e) => {
                CacheMetrics::incr(&self.metrics.refresh_failures);
                warn!(key = ?key, error = %e, "Refresh failed, keeping previous value");
                self.events
                    .broadcast(CacheEvent::RefreshFailed { key, error: e });
            }
        }
    }

    // ========================================================================
    // SHUTDOWN
    // ========================================================================

    /// Persist what is still owed to the backing store before `deadline`.
    pub(crate) async fn drain(&self, deadline: Instant) -> ShutdownReport<K> {
        self.shut_down.store(true, Ordering::Release);
        self.refreshes.cancel_all();
        self.loads.cancel_all();

        if self.writer.kind() == WritePolicyKind::Back {
            let dirty = self
                .store
                .drain_where(|entry| entry.dirty, RemovalCause::Shutdown);
            for removed in &dirty {
                self.handle_removed(removed);
            }
        }

        let mut summary = FlushSummary::default();
        let completed = tokio::time::timeout_at(deadline, async {
            summary.merge(self.writer.flush(&self.store, FlushMode::All).await);
            while let Some(next) = self.writer.next_due() {
                tokio::time::sleep_until(next).await;
                let pass = self.writer.flush(&self.store, FlushMode::Scheduled).await;
                if pass == FlushSummary::default() {
                    // The clock is not advancing; nothing more will become due.
                    break;
                }
                summary.merge(pass);
            }
        })
        .await
        .is_ok();

        let unflushed = self.writer.queue().keys();
        if !unflushed.is_empty() {
            warn!(
                count = unflushed.len(),
                timed_out = !completed,
                "Shutdown left writes unflushed"
            );
            self.events.broadcast(CacheEvent::Unflushed {
                keys: unflushed.clone(),
            });
        }

        ShutdownReport {
            flushed: summary.flushed,
            dead_lettered: summary.dead_lettered,
            unflushed,
            timed_out: !completed,
        }
    }
}
