//! Lease Manager
//!
//! Time-bounded mutual exclusion over a [`RemoteKv`], with fencing tokens.
//!
//! Per resource the remote store holds two keys:
//!
//! - `cachet:fence:{resource}`: a counter bumped on every acquisition
//!   attempt. Its value is the attempt's fencing token, so tokens are never
//!   reused and grow with every acquisition.
//! - `cachet:lease:{resource}`: `{owner}:{token}` of the current holder,
//!   set-if-absent with the lease TTL so a crashed holder frees the
//!   resource when the TTL lapses.
//!
//! Work done under a lease calls [`LeaseManager::validate`] right before
//! committing. A holder whose lease silently expired and was re-acquired
//! elsewhere sees [`LeaseError::Fenced`] and must abort.

use crate::remote::RemoteKv;
use cachet_core::{
    CacheError, CacheResult, Clock, Held, Lease, LeaseData, LeaseError, NodeId, TokioClock,
};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

fn lease_key(resource: &str) -> String {
    format!("cachet:lease:{resource}")
}

fn fence_key(resource: &str) -> String {
    format!("cachet:fence:{resource}")
}

/// Token recorded in a holder value, if it parses.
fn holder_token(holder: &str) -> Option<u64> {
    holder
        .rsplit_once(':')
        .and_then(|(_, token)| token.parse().ok())
}

pub struct LeaseManager {
    remote: Arc<dyn RemoteKv>,
    node: NodeId,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for LeaseManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LeaseManager")
            .field("node", &self.node)
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl LeaseManager {
    pub fn new(remote: Arc<dyn RemoteKv>, node: NodeId, ttl: Duration) -> Self {
        Self {
            remote,
            node,
            ttl,
            clock: Arc::new(TokioClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn node_id(&self) -> NodeId {
        self.node
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Try once to take the lease on `resource`.
    pub async fn acquire(&self, resource: &str) -> CacheResult<Lease<Held>> {
        let token = self.remote.incr(&fence_key(resource)).await?;
        let now = self.clock.now();
        let data = LeaseData {
            resource_id: resource.to_string(),
            token,
            owner: self.node,
            acquired_at: now,
            expires_at: now + self.ttl,
        };

        let acquired = self
            .remote
            .set_if_absent(&lease_key(resource), &data.holder_value(), self.ttl)
            .await?;
        if !acquired {
            debug!(resource, token, "Lease held elsewhere");
            return Err(LeaseError::NotAcquired {
                resource: resource.to_string(),
            }
            .into());
        }

        debug!(resource, token, ttl_ms = self.ttl.as_millis() as u64, "Lease acquired");
        Ok(Lease::new(data))
    }

    /// Retry [`acquire`](Self::acquire) while the lease is held elsewhere,
    /// sleeping `backoff` between attempts. Other errors end the retry.
    pub async fn acquire_with_retry(
        &self,
        resource: &str,
        attempts: u32,
        backoff: Duration,
    ) -> CacheResult<Lease<Held>> {
        let attempts = attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.acquire(resource).await {
                Err(CacheError::Lease(LeaseError::NotAcquired { .. }))
                    if attempt < attempts =>
                {
                    attempt += 1;
                    tokio::time::sleep(backoff).await;
                }
                result => return result,
            }
        }
    }

    /// Extend a live lease by a full TTL. The token is unchanged.
    pub async fn renew(&self, lease: Lease<Held>) -> CacheResult<Lease<Held>> {
        let extended = self
            .remote
            .compare_and_expire(
                &lease_key(lease.resource_id()),
                &lease.data().holder_value(),
                self.ttl,
            )
            .await?;
        if !extended {
            warn!(lease = %lease, "Lease lost before renewal");
            return Err(LeaseError::NotHeld {
                resource: lease.resource_id().to_string(),
                token: lease.token(),
            }
            .into());
        }
        let expires_at = self.clock.now() + self.ttl;
        Ok(lease.renewed(expires_at))
    }

    /// Give the lease up. Returns whether it was still held.
    pub async fn release(&self, lease: Lease<Held>) -> CacheResult<bool> {
        let released = self
            .remote
            .compare_and_delete(
                &lease_key(lease.resource_id()),
                &lease.data().holder_value(),
            )
            .await
            .map_err(|e| {
                error!(lease = %lease, error = %e, "Lease release failed");
                e
            })?;

        let data = lease.release();
        if released {
            debug!(resource = %data.resource_id, token = data.token, "Lease released");
        } else {
            warn!(resource = %data.resource_id, token = data.token, "Lease already lost at release");
        }
        Ok(released)
    }

    /// Check that `lease` is still the current holder of its resource.
    pub async fn validate(&self, lease: &Lease<Held>) -> CacheResult<()> {
        let resource = lease.resource_id().to_string();
        let token = lease.token();
        let expired = lease.is_expired(self.clock.now());
        let current = self.remote.get(&lease_key(&resource)).await?;

        let err = match current {
            Some(holder) if holder == lease.data().holder_value() => {
                if !expired {
                    return Ok(());
                }
                LeaseError::Expired { resource, token }
            }
            Some(holder) => match holder_token(&holder) {
                Some(current) if current > token => LeaseError::Fenced {
                    resource,
                    token,
                    current,
                },
                _ if expired => LeaseError::Expired { resource, token },
                _ => LeaseError::NotHeld { resource, token },
            },
            None if expired => LeaseError::Expired { resource, token },
            None => LeaseError::NotHeld { resource, token },
        };
        Err(err.into())
    }
}
