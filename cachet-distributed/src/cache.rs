//! A local cache tier kept consistent with its peers.
//!
//! Every local mutation is published as an [`InvalidationMessage`] on a
//! shared channel. Each node runs one listener task that applies its peers'
//! messages to its own cache and ignores its own.
//!
//! ```text
//!  node A                      remote                      node B
//! put(k) ──→ Cache ─publish─→ channel ──────────→ listener ──→ invalidate(k)
//! ```

use crate::lease::LeaseManager;
use crate::remote::{MessageStream, RemoteKv};
use cachet_core::{
    new_node_id, CacheKey, CacheResult, CacheStats, CacheValue, Held, Lease, NodeId, PutOptions,
    RemoteError,
};
use cachet_engine::{Cache, ShutdownReport};
use cachet_events::{InvalidationMessage, InvalidationReason, InvalidationScope};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

pub const DEFAULT_INVALIDATION_CHANNEL: &str = "cachet:invalidations";

// ============================================================================
// CONFIGURATION
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistributedConfig {
    /// Pub/sub channel shared by every node of one logical cache.
    pub channel: String,
    pub node_id: NodeId,
}

impl Default for DistributedConfig {
    fn default() -> Self {
        Self {
            channel: DEFAULT_INVALIDATION_CHANNEL.to_string(),
            node_id: new_node_id(),
        }
    }
}

impl DistributedConfig {
    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = channel.into();
        self
    }

    pub fn with_node_id(mut self, node_id: NodeId) -> Self {
        self.node_id = node_id;
        self
    }
}

// ============================================================================
// STATISTICS
// ============================================================================

/// Invalidation traffic seen by one node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStats {
    pub published: u64,
    /// Local mutations whose invalidation could not be published.
    pub publish_failures: u64,
    /// Peer messages applied to the local cache.
    pub applied: u64,
    /// Own messages echoed back by the channel.
    pub ignored_own: u64,
    /// Payloads that failed to decode.
    pub malformed: u64,
    /// Exclusive writes whose lease could not be released, or had already
    /// lapsed by release time.
    pub lease_release_failures: u64,
}

#[derive(Debug, Default)]
struct SyncMetrics {
    published: AtomicU64,
    publish_failures: AtomicU64,
    applied: AtomicU64,
    ignored_own: AtomicU64,
    malformed: AtomicU64,
    lease_release_failures: AtomicU64,
}

impl SyncMetrics {
    fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> SyncStats {
        SyncStats {
            published: self.published.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
            applied: self.applied.load(Ordering::Relaxed),
            ignored_own: self.ignored_own.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            lease_release_failures: self.lease_release_failures.load(Ordering::Relaxed),
        }
    }
}

// ============================================================================
// DISTRIBUTED CACHE
// ============================================================================

/// A [`Cache`] that publishes its invalidations and applies its peers'.
///
/// Stops listening when dropped. The wrapped cache keeps running while
/// other handles to it exist.
pub struct DistributedCache<K: CacheKey, V: CacheValue> {
    local: Cache<K, V>,
    remote: Arc<dyn RemoteKv>,
    leases: LeaseManager,
    config: DistributedConfig,
    metrics: Arc<SyncMetrics>,
    shutdown_tx: watch::Sender<bool>,
}

impl<K: CacheKey, V: CacheValue> fmt::Debug for DistributedCache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DistributedCache")
            .field("node_id", &self.config.node_id)
            .field("channel", &self.config.channel)
            .field("local", &self.local)
            .finish()
    }
}

impl<K, V> DistributedCache<K, V>
where
    K: CacheKey + Serialize + DeserializeOwned,
    V: CacheValue,
{
    /// Subscribe to the invalidation channel and start applying peer
    /// messages to `local`. Leases use the cache's configured lease TTL.
    pub async fn connect(
        local: Cache<K, V>,
        remote: Arc<dyn RemoteKv>,
        config: DistributedConfig,
    ) -> CacheResult<Self> {
        let stream = remote.subscribe(&config.channel).await?;
        let leases = LeaseManager::new(
            Arc::clone(&remote),
            config.node_id,
            local.config().lease_ttl,
        );
        let metrics = Arc::new(SyncMetrics::default());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tokio::spawn(listen(
            local.clone(),
            stream,
            config.node_id,
            Arc::clone(&metrics),
            shutdown_rx,
        ));

        info!(
            node_id = %config.node_id,
            channel = %config.channel,
            "Distributed cache connected"
        );

        Ok(Self {
            local,
            remote,
            leases,
            config,
            metrics,
            shutdown_tx,
        })
    }

    // ===== READS =====

    pub async fn get(&self, key: &K) -> CacheResult<Option<V>> {
        self.local.get(key).await
    }

    pub fn get_if_present(&self, key: &K) -> Option<V> {
        self.local.get_if_present(key)
    }

    // ===== WRITES =====

    /// Write locally, then tell peers to drop their copies.
    pub async fn put(&self, key: K, value: V, ttl: Option<Duration>) -> CacheResult<Option<V>> {
        let previous = self.local.put(key.clone(), value, ttl).await?;
        self.publish(InvalidationMessage::key(
            self.config.node_id,
            key,
            InvalidationReason::Updated,
        ))
        .await;
        Ok(previous)
    }

    pub async fn put_with(&self, key: K, value: V, options: PutOptions) -> CacheResult<Option<V>> {
        let previous = self.local.put_with(key.clone(), value, options).await?;
        self.publish(InvalidationMessage::key(
            self.config.node_id,
            key,
            InvalidationReason::Updated,
        ))
        .await;
        Ok(previous)
    }

    /// Write under an already held lease. The lease's fencing token is
    /// checked immediately before the write; a superseded lease aborts with
    /// a [`LeaseError`](cachet_core::LeaseError) and nothing is written.
    pub async fn put_fenced(
        &self,
        lease: &Lease<Held>,
        key: K,
        value: V,
        ttl: Option<Duration>,
    ) -> CacheResult<Option<V>> {
        if let Err(e) = self.leases.validate(lease).await {
            warn!(lease = %lease, error = %e, "Rejecting write under superseded lease");
            return Err(e);
        }
        self.put(key, value, ttl).await
    }

    /// Take the key's lease, write, and release it.
    pub async fn put_exclusive(&self, key: K, value: V, ttl: Option<Duration>) -> CacheResult<Option<V>> {
        let resource = lease_resource(&key)?;
        let lease = self.leases.acquire(&resource).await?;
        let result = self.put_fenced(&lease, key, value, ttl).await;
        // The manager logs release failures; an unreleased lease lapses
        // after its TTL.
        match self.leases.release(lease).await {
            Ok(true) => {}
            Ok(false) | Err(_) => SyncMetrics::incr(&self.metrics.lease_release_failures),
        }
        result
    }

    // ===== INVALIDATION =====

    pub async fn invalidate(&self, key: &K) -> bool {
        let removed = self.local.invalidate(key);
        self.publish(InvalidationMessage::key(
            self.config.node_id,
            key.clone(),
            InvalidationReason::Removed,
        ))
        .await;
        removed
    }

    pub async fn invalidate_by_tag(&self, tag: &str) -> usize {
        let removed = self.local.invalidate_by_tag(tag);
        self.publish(InvalidationMessage::tag(self.config.node_id, tag))
            .await;
        removed
    }

    pub async fn invalidate_all(&self) -> usize {
        let removed = self.local.invalidate_all();
        self.publish(InvalidationMessage::all(self.config.node_id))
            .await;
        removed
    }

    // ===== ACCESSORS =====

    pub fn local(&self) -> &Cache<K, V> {
        &self.local
    }

    pub fn leases(&self) -> &LeaseManager {
        &self.leases
    }

    pub fn node_id(&self) -> NodeId {
        self.config.node_id
    }

    pub fn stats(&self) -> CacheStats {
        self.local.stats()
    }

    pub fn sync_stats(&self) -> SyncStats {
        self.metrics.snapshot()
    }

    /// Stop listening and shut the local cache down.
    pub async fn shutdown(&self, timeout: Duration) -> ShutdownReport<K> {
        let _ = self.shutdown_tx.send(true);
        self.local.shutdown(timeout).await
    }

    /// Publish failures are counted and logged; the local mutation stands.
    async fn publish(&self, message: InvalidationMessage<K>) {
        let payload = match message.to_json() {
            Ok(payload) => payload,
            Err(e) => {
                SyncMetrics::incr(&self.metrics.publish_failures);
                warn!(error = %e, "Failed to encode invalidation message");
                return;
            }
        };
        match self.remote.publish(&self.config.channel, &payload).await {
            Ok(receivers) => {
                SyncMetrics::incr(&self.metrics.published);
                debug!(
                    message_id = %message.message_id,
                    reason = %message.reason,
                    receivers,
                    "Published invalidation"
                );
            }
            Err(e) => {
                SyncMetrics::incr(&self.metrics.publish_failures);
                warn!(
                    message_id = %message.message_id,
                    error = %e,
                    "Failed to publish invalidation, peers may serve stale values"
                );
            }
        }
    }
}

impl<K: CacheKey, V: CacheValue> Drop for DistributedCache<K, V> {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

/// Lease resource naming a cache key.
fn lease_resource<K: Serialize>(key: &K) -> CacheResult<String> {
    let encoded = serde_json::to_string(key).map_err(|e| RemoteError::CommandFailed {
        command: "encode lease resource".to_string(),
        reason: e.to_string(),
    })?;
    Ok(format!("key:{encoded}"))
}

/// Apply peer invalidations until shutdown or the channel closes.
async fn listen<K, V>(
    local: Cache<K, V>,
    mut stream: MessageStream,
    node: NodeId,
    metrics: Arc<SyncMetrics>,
    mut shutdown_rx: watch::Receiver<bool>,
) where
    K: CacheKey + DeserializeOwned,
    V: CacheValue,
{
    info!(node_id = %node, "Invalidation listener started");

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }

            payload = stream.next() => match payload {
                Some(payload) => apply(&local, &payload, node, &metrics),
                None => {
                    warn!(node_id = %node, "Invalidation channel closed");
                    break;
                }
            },
        }
    }

    info!(node_id = %node, "Invalidation listener stopped");
}

fn apply<K, V>(local: &Cache<K, V>, payload: &str, node: NodeId, metrics: &SyncMetrics)
where
    K: CacheKey + DeserializeOwned,
    V: CacheValue,
{
    let message = match InvalidationMessage::<K>::from_json(payload) {
        Ok(message) => message,
        Err(e) => {
            SyncMetrics::incr(&metrics.malformed);
            warn!(error = %e, "Dropping malformed invalidation message");
            return;
        }
    };

    if message.is_from(node) {
        SyncMetrics::incr(&metrics.ignored_own);
        return;
    }

    let removed = match &message.scope {
        InvalidationScope::Key(key) => usize::from(local.invalidate(key)),
        InvalidationScope::Tag(tag) => local.invalidate_by_tag(tag),
        InvalidationScope::All => local.invalidate_all(),
    };
    SyncMetrics::incr(&metrics.applied);
    debug!(
        message_id = %message.message_id,
        origin = %message.origin,
        reason = %message.reason,
        removed,
        "Applied peer invalidation"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lease_resource_is_stable_per_key() {
        assert_eq!(lease_resource(&"user:1").unwrap(), "key:\"user:1\"");
        assert_eq!(lease_resource(&42u32).unwrap(), "key:42");
    }

    #[test]
    fn test_config_builders() {
        let node = new_node_id();
        let config = DistributedConfig::default()
            .with_channel("orders")
            .with_node_id(node);
        assert_eq!(config.channel, "orders");
        assert_eq!(config.node_id, node);
        assert_eq!(
            DistributedConfig::default().channel,
            DEFAULT_INVALIDATION_CHANNEL
        );
    }
}
