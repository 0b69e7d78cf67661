//! Remote key-value and pub/sub capability.
//!
//! The distributed layer needs only a handful of atomic primitives from the
//! shared store. Any client that offers them (a Redis connection, an etcd
//! session, the in-memory [`InMemoryRemote`](crate::InMemoryRemote)) can back
//! a [`LeaseManager`](crate::LeaseManager) and a
//! [`DistributedCache`](crate::DistributedCache).

use async_trait::async_trait;
use cachet_core::RemoteError;
use std::pin::Pin;
use std::time::Duration;
use tokio_stream::Stream;

/// Payloads delivered on a subscribed channel.
pub type MessageStream = Pin<Box<dyn Stream<Item = String> + Send>>;

#[async_trait]
pub trait RemoteKv: Send + Sync {
    /// Set `key` to `value` with an expiry unless it already holds a live
    /// value. Returns whether the value was set.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, RemoteError>;

    /// Delete `key` only if it currently holds `expected`.
    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, RemoteError>;

    /// Reset the expiry of `key` to `ttl` from now, only if it currently
    /// holds `expected`.
    async fn compare_and_expire(
        &self,
        key: &str,
        expected: &str,
        ttl: Duration,
    ) -> Result<bool, RemoteError>;

    async fn get(&self, key: &str) -> Result<Option<String>, RemoteError>;

    /// Atomically increment a counter, returning the new value. Counters
    /// start at zero and never expire.
    async fn incr(&self, key: &str) -> Result<u64, RemoteError>;

    /// Publish to every current subscriber of `channel`. Returns how many
    /// received it.
    async fn publish(&self, channel: &str, payload: &str) -> Result<usize, RemoteError>;

    /// Receive every payload published on `channel` from now on.
    async fn subscribe(&self, channel: &str) -> Result<MessageStream, RemoteError>;
}
