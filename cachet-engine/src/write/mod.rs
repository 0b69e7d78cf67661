//! Write Coordinator.
//!
//! Decides how a cache write reaches the backing store:
//!
//! - **Through**: the store write happens inline and must succeed before the
//!   entry is admitted.
//! - **Around**: the value goes to the store only; the cached copy is
//!   dropped and the next miss loads it back.
//! - **Behind**: the entry is admitted dirty and a coalesced write is queued
//!   for the next periodic flush.
//! - **Back**: the entry is admitted dirty and written only when it leaves
//!   the cache by eviction, expiry or shutdown.
//!
//! All deferred writes go through one [`FlushQueue`] keyed by cache key, so
//! writes to one key reach the store in the order they were made.

mod queue;

pub use queue::{FlushMode, FlushQueue};

use crate::store::EntryStore;
use cachet_core::{
    BackingStore, CacheKey, CacheMetrics, CacheValue, Clock, PendingWrite, RemovalCause, Removed,
    StoreError, WritePolicyKind,
};
use cachet_events::{CacheEvent, EventBroadcaster};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, warn};

/// Where a write lands after the coordinator has handled it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Admit the value into the cache.
    Cache { dirty: bool },
    /// Keep the value out of the cache.
    Bypass,
}

/// Outcome of one flush pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushSummary {
    pub flushed: usize,
    pub retried: usize,
    pub dead_lettered: usize,
}

impl FlushSummary {
    pub fn merge(&mut self, other: FlushSummary) {
        self.flushed += other.flushed;
        self.retried += other.retried;
        self.dead_lettered += other.dead_lettered;
    }
}

pub struct WriteCoordinator<K: CacheKey, V: CacheValue> {
    kind: WritePolicyKind,
    backing: Arc<dyn BackingStore<K, V>>,
    queue: FlushQueue<K, V>,
    metrics: Arc<CacheMetrics>,
    events: EventBroadcaster<CacheEvent<K>>,
    clock: Arc<dyn Clock>,
    max_attempts: u32,
    retry_backoff: Duration,
    max_retry_backoff: Duration,
}

impl<K: CacheKey, V: CacheValue> WriteCoordinator<K, V> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        kind: WritePolicyKind,
        backing: Arc<dyn BackingStore<K, V>>,
        metrics: Arc<CacheMetrics>,
        events: EventBroadcaster<CacheEvent<K>>,
        clock: Arc<dyn Clock>,
        max_attempts: u32,
        retry_backoff: Duration,
        max_retry_backoff: Duration,
    ) -> Self {
        Self {
            kind,
            backing,
            queue: FlushQueue::new(),
            metrics,
            events,
            clock,
            max_attempts: max_attempts.max(1),
            retry_backoff,
            max_retry_backoff,
        }
    }

    pub fn kind(&self) -> WritePolicyKind {
        self.kind
    }

    pub fn queue(&self) -> &FlushQueue<K, V> {
        &self.queue
    }

    /// Handle a put of `value` at `version`. Called under the key's lock.
    ///
    /// Only write-through can fail here; every other policy isolates store
    /// failures to the flush path.
    pub async fn on_write(&self, key: &K, value: &V, version: u64) -> Result<Admission, StoreError> {
        match self.kind {
            WritePolicyKind::Through => match self.backing.write(key, value).await {
                Ok(()) => Ok(Admission::Cache { dirty: false }),
                Err(e) => {
                    CacheMetrics::incr(&self.metrics.write_failures);
                    warn!(key = ?key, error = %e, "Write-through failed, entry not admitted");
                    Err(e)
                }
            },
            WritePolicyKind::Around => {
                self.write_around(key, value, version).await;
                Ok(Admission::Bypass)
            }
            WritePolicyKind::Behind => {
                let now = self.clock.now();
                self.queue
                    .enqueue(PendingWrite::new(key.clone(), value.clone(), version, now));
                Ok(Admission::Cache { dirty: true })
            }
            WritePolicyKind::Back => Ok(Admission::Cache { dirty: true }),
        }
    }

    async fn write_around(&self, key: &K, value: &V, version: u64) {
        let now = self.clock.now();
        if self.queue.contains(key) {
            // An earlier write is still retrying; queue behind it instead of
            // overtaking it.
            self.queue
                .enqueue(PendingWrite::new(key.clone(), value.clone(), version, now).due_now(now));
            return;
        }

        match self.backing.write(key, value).await {
            Ok(()) => CacheMetrics::incr(&self.metrics.writes_flushed),
            Err(e) => {
                CacheMetrics::incr(&self.metrics.write_failures);
                let mut write = PendingWrite::new(key.clone(), value.clone(), version, now);
                write.attempts = 1;
                write.not_before = Some(now + self.backoff_for(1));
                warn!(key = ?key, error = %e, "Write-around failed, queued for retry");
                self.queue.enqueue(write);
                self.events.broadcast(CacheEvent::WriteFailed {
                    key: key.clone(),
                    attempt: 1,
                    error: e,
                });
            }
        }
    }

    /// React to an entry leaving the cache.
    ///
    /// Write-back persists dirty entries that were evicted, expired or
    /// drained. The write is queued, never awaited here.
    pub fn on_evict(&self, removed: &Removed<K, V>) {
        if self.kind != WritePolicyKind::Back || !removed.dirty {
            return;
        }
        if removed.cause.was_evicted() {
            let now = self.clock.now();
            self.queue.enqueue(
                PendingWrite::new(removed.key.clone(), removed.value.clone(), removed.version, now)
                    .due_now(now),
            );
            debug!(key = ?removed.key, cause = %removed.cause, "Queued write-back of evicted entry");
        } else if removed.cause == RemovalCause::Explicit {
            CacheMetrics::incr(&self.metrics.dirty_discarded);
            debug!(key = ?removed.key, "Discarded dirty entry on invalidation");
        }
    }

    /// Latest value queued for `key` and its version.
    pub fn pending(&self, key: &K) -> Option<(V, u64)> {
        self.queue.get(key)
    }

    /// Write the pending writes selected by `mode`, one key at a time.
    pub async fn flush(&self, store: &EntryStore<K, V>, mode: FlushMode) -> FlushSummary {
        let batch = self.queue.take(self.clock.now(), mode);
        let mut summary = FlushSummary::default();

        for write in batch {
            match self.backing.write(&write.key, &write.value).await {
                Ok(()) => {
                    self.queue.complete(&write.key, write.version);
                    store.mark_clean(&write.key, write.version);
                    CacheMetrics::incr(&self.metrics.writes_flushed);
                    summary.flushed += 1;
                }
                Err(e) => self.record_failure(write, e, &mut summary),
            }
        }

        if summary.flushed > 0 || summary.retried > 0 || summary.dead_lettered > 0 {
            debug!(
                mode = ?mode,
                flushed = summary.flushed,
                retried = summary.retried,
                dead_lettered = summary.dead_lettered,
                "Flush pass complete"
            );
        }
        summary
    }

    fn record_failure(&self, write: PendingWrite<K, V>, e: StoreError, summary: &mut FlushSummary) {
        CacheMetrics::incr(&self.metrics.write_failures);
        let attempts = write.attempts + 1;

        if attempts >= self.max_attempts {
            if self.queue.abandon(&write.key, write.version) {
                CacheMetrics::incr(&self.metrics.dead_letters);
                summary.dead_lettered += 1;
                error!(key = ?write.key, attempts, error = %e, "Write abandoned after exhausting retries");
                self.events.broadcast(CacheEvent::DeadLetter {
                    key: write.key,
                    attempts,
                    error: e,
                });
            }
            return;
        }

        let backoff = self.backoff_for(attempts);
        let not_before = self.clock.now() + backoff;
        if self.queue.retry(&write.key, write.version, attempts, not_before) {
            summary.retried += 1;
            warn!(
                key = ?write.key,
                attempt = attempts,
                backoff_ms = backoff.as_millis() as u64,
                error = %e,
                "Backing store write failed, will retry"
            );
            self.events.broadcast(CacheEvent::WriteFailed {
                key: write.key,
                attempt: attempts,
                error: e,
            });
        }
    }

    /// Exponential backoff after `attempts` failures, capped.
    pub fn backoff_for(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(16);
        self.retry_backoff
            .saturating_mul(1u32 << exponent)
            .min(self.max_retry_backoff)
    }

    /// Earliest instant a queued write becomes due.
    pub fn next_due(&self) -> Option<Instant> {
        self.queue.next_due(self.clock.now())
    }
}
