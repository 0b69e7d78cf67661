//! Background tasks owned by a cache instance.
//!
//! Two loops run per cache: the expiry sweep and the flush loop. Both stop
//! through one `watch` channel. The flush loop also takes commands, so an
//! explicit flush or shutdown is serialized with periodic flushes and a
//! key's writes are never issued by two passes at once.

use crate::inner::CacheInner;
use crate::write::{FlushMode, FlushSummary};
use cachet_core::{CacheKey, CacheValue};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};

/// What a shutdown drain achieved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownReport<K> {
    /// Writes acknowledged during the drain.
    pub flushed: usize,
    /// Writes abandoned during the drain.
    pub dead_lettered: usize,
    /// Keys whose writes were still pending when the drain ended.
    pub unflushed: Vec<K>,
    /// The drain hit its deadline.
    pub timed_out: bool,
}

impl<K> ShutdownReport<K> {
    /// Whether every owed write reached the backing store.
    pub fn is_clean(&self) -> bool {
        self.unflushed.is_empty() && self.dead_lettered == 0
    }
}

pub(crate) enum FlushCommand<K> {
    FlushNow {
        done: oneshot::Sender<FlushSummary>,
    },
    Shutdown {
        deadline: Instant,
        done: oneshot::Sender<ShutdownReport<K>>,
    },
}

/// Handle to a cache's background tasks. Dropping it stops them, draining
/// pending writes with the configured shutdown timeout.
pub(crate) struct Scheduler<K> {
    shutdown_tx: watch::Sender<bool>,
    commands: mpsc::UnboundedSender<FlushCommand<K>>,
}

impl<K: CacheKey> Scheduler<K> {
    pub(crate) fn start<V: CacheValue>(inner: &Arc<CacheInner<K, V>>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (commands, command_rx) = mpsc::unbounded_channel();

        inner
            .runtime
            .spawn(sweep_loop(Arc::clone(inner), shutdown_rx.clone()));
        inner
            .runtime
            .spawn(flush_loop(Arc::clone(inner), shutdown_rx, command_rx));

        Self {
            shutdown_tx,
            commands,
        }
    }

    /// Ask the flush loop to write everything pending now.
    pub(crate) async fn flush_now(&self) -> Option<FlushSummary> {
        let (done, rx) = oneshot::channel();
        self.commands.send(FlushCommand::FlushNow { done }).ok()?;
        rx.await.ok()
    }

    /// Drain and stop. `None` if the loops already stopped.
    pub(crate) async fn shutdown(&self, deadline: Instant) -> Option<ShutdownReport<K>> {
        let (done, rx) = oneshot::channel();
        self.commands
            .send(FlushCommand::Shutdown { deadline, done })
            .ok()?;
        let report = rx.await.ok();
        self.signal_shutdown();
        report
    }

    fn signal_shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

impl<K> Drop for Scheduler<K> {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

/// Periodically remove expired entries.
async fn sweep_loop<K: CacheKey, V: CacheValue>(
    inner: Arc<CacheInner<K, V>>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut sweep_interval = interval(inner.config.sweep_interval);
    sweep_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!(
        sweep_interval_ms = inner.config.sweep_interval.as_millis() as u64,
        "Expiry sweep started"
    );

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }

            _ = sweep_interval.tick() => {
                inner.run_sweep();
            }
        }
    }

    tracing::info!("Expiry sweep stopped");
}

/// Run periodic and on-demand flushes until shutdown, then drain.
async fn flush_loop<K: CacheKey, V: CacheValue>(
    inner: Arc<CacheInner<K, V>>,
    mut shutdown_rx: watch::Receiver<bool>,
    mut commands: mpsc::UnboundedReceiver<FlushCommand<K>>,
) {
    // First ticks are a full period out, so writes made right after start
    // still coalesce for one interval.
    let start = Instant::now();
    let mut flush_interval = interval_at(
        start + inner.config.flush_interval,
        inner.config.flush_interval,
    );
    flush_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut retry_interval = interval_at(
        start + inner.config.retry_backoff,
        inner.config.retry_backoff,
    );
    retry_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!(
        write_policy = %inner.config.write_policy,
        flush_interval_ms = inner.config.flush_interval.as_millis() as u64,
        "Flush loop started"
    );

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    let deadline = Instant::now() + inner.config.shutdown_timeout;
                    inner.drain(deadline).await;
                    break;
                }
            }

            command = commands.recv() => match command {
                Some(FlushCommand::FlushNow { done }) => {
                    let summary = inner.writer.flush(&inner.store, FlushMode::All).await;
                    let _ = done.send(summary);
                }
                Some(FlushCommand::Shutdown { deadline, done }) => {
                    let report = inner.drain(deadline).await;
                    let _ = done.send(report);
                    break;
                }
                None => {
                    let deadline = Instant::now() + inner.config.shutdown_timeout;
                    inner.drain(deadline).await;
                    break;
                }
            },

            _ = flush_interval.tick() => {
                inner.writer.flush(&inner.store, FlushMode::Scheduled).await;
            }

            _ = retry_interval.tick() => {
                inner.writer.flush(&inner.store, FlushMode::Due).await;
            }

            _ = inner.writer.queue().notified() => {
                inner.writer.flush(&inner.store, FlushMode::Due).await;
            }
        }
    }

    tracing::info!("Flush loop stopped");
}
