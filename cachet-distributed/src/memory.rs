//! In-process [`RemoteKv`] for single-process deployments and tests.

use crate::remote::{MessageStream, RemoteKv};
use async_trait::async_trait;
use cachet_core::{Clock, RemoteError, TokioClock};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tracing::warn;

const DEFAULT_CHANNEL_CAPACITY: usize = 1_024;

#[derive(Debug, Clone)]
struct StoredValue {
    value: String,
    expires_at: Instant,
}

impl StoredValue {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// Shared store living in one process. Clone the `Arc` to hand the same
/// store to several nodes.
#[derive(Debug)]
pub struct InMemoryRemote {
    values: DashMap<String, StoredValue>,
    counters: DashMap<String, u64>,
    channels: DashMap<String, broadcast::Sender<String>>,
    clock: Arc<dyn Clock>,
    available: AtomicBool,
    channel_capacity: usize,
}

impl InMemoryRemote {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(TokioClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            values: DashMap::new(),
            counters: DashMap::new(),
            channels: DashMap::new(),
            clock,
            available: AtomicBool::new(true),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }

    /// Simulate an outage: every command fails until restored.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check_available(&self, command: &str) -> Result<(), RemoteError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(RemoteError::Unavailable {
                reason: format!("{command}: store offline"),
            })
        }
    }
}

impl Default for InMemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteKv for InMemoryRemote {
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, RemoteError> {
        self.check_available("SET NX")?;
        let now = self.clock.now();
        let fresh = StoredValue {
            value: value.to_string(),
            expires_at: now + ttl,
        };
        match self.values.entry(key.to_string()) {
            Entry::Occupied(mut slot) if !slot.get().is_live(now) => {
                slot.insert(fresh);
                Ok(true)
            }
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(fresh);
                Ok(true)
            }
        }
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, RemoteError> {
        self.check_available("CAD")?;
        let now = self.clock.now();
        Ok(self
            .values
            .remove_if(key, |_, stored| stored.is_live(now) && stored.value == expected)
            .is_some())
    }

    async fn compare_and_expire(
        &self,
        key: &str,
        expected: &str,
        ttl: Duration,
    ) -> Result<bool, RemoteError> {
        self.check_available("CAS EXPIRE")?;
        let now = self.clock.now();
        match self.values.get_mut(key) {
            Some(mut stored) if stored.is_live(now) && stored.value == expected => {
                stored.expires_at = now + ttl;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get(&self, key: &str) -> Result<Option<String>, RemoteError> {
        self.check_available("GET")?;
        let now = self.clock.now();
        Ok(self
            .values
            .get(key)
            .filter(|stored| stored.is_live(now))
            .map(|stored| stored.value.clone()))
    }

    async fn incr(&self, key: &str) -> Result<u64, RemoteError> {
        self.check_available("INCR")?;
        let mut counter = self.counters.entry(key.to_string()).or_insert(0);
        *counter += 1;
        Ok(*counter)
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<usize, RemoteError> {
        self.check_available("PUBLISH")?;
        let delivered = self
            .channels
            .get(channel)
            .and_then(|tx| tx.send(payload.to_string()).ok())
            .unwrap_or(0);
        Ok(delivered)
    }

    async fn subscribe(&self, channel: &str) -> Result<MessageStream, RemoteError> {
        self.check_available("SUBSCRIBE")?;
        let rx = self
            .channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.channel_capacity).0)
            .subscribe();

        let channel = channel.to_string();
        let stream = BroadcastStream::new(rx).filter_map(move |result| match result {
            Ok(payload) => Some(payload),
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                warn!(channel = %channel, skipped, "Subscriber lagged, messages dropped");
                None
            }
        });
        Ok(Box::pin(stream))
    }
}
