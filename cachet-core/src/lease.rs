//! Lease typestate for compile-time safety of lease lifecycle.
//!
//! A lease is a time-bounded exclusive claim on a named resource. Each
//! acquisition carries a fencing token that is unique and strictly increasing
//! per resource, so an action taken under a superseded lease can be rejected.
//!
//! # State Transition Diagram
//!
//! ```text
//! (free) ─── acquire() ──→ Held ─── release() ──→ (free)
//!                            │
//!                        renew() ↺
//! ```

use std::fmt;
use std::marker::PhantomData;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

// ============================================================================
// LEASE DATA (state-independent)
// ============================================================================

/// Lease bookkeeping, independent of typestate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseData {
    pub resource_id: String,
    /// Fencing token, unique across every lease ever issued for the resource.
    pub token: u64,
    /// Identity of the acquiring node.
    pub owner: Uuid,
    pub acquired_at: Instant,
    pub expires_at: Instant,
}

impl LeaseData {
    /// Check if the lease has expired based on `now`.
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    /// Remaining lifetime, `None` once expired.
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        if now >= self.expires_at {
            None
        } else {
            Some(self.expires_at - now)
        }
    }

    /// Value stored under the lease key in the remote store.
    pub fn holder_value(&self) -> String {
        format!("{}:{}", self.owner, self.token)
    }
}

// ============================================================================
// TYPESTATE MARKERS
// ============================================================================

/// Marker trait for lease states.
pub trait LeaseState: private::Sealed + Send + Sync {}

/// Lease is currently held.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Held;
impl LeaseState for Held {}

/// Lease has been released (no runtime values exist in this state).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Released;
impl LeaseState for Released {}

mod private {
    pub trait Sealed {}
    impl Sealed for super::Held {}
    impl Sealed for super::Released {}
}

// ============================================================================
// LEASE TYPESTATE WRAPPER
// ============================================================================

/// A lease with compile-time state tracking.
///
/// Only `Lease<Held>` can be renewed or released, and both transitions
/// consume the value.
#[derive(Debug, Clone)]
pub struct Lease<S: LeaseState> {
    data: LeaseData,
    _state: PhantomData<S>,
}

impl<S: LeaseState> Lease<S> {
    pub fn data(&self) -> &LeaseData {
        &self.data
    }

    pub fn resource_id(&self) -> &str {
        &self.data.resource_id
    }

    pub fn token(&self) -> u64 {
        self.data.token
    }

    pub fn owner(&self) -> Uuid {
        self.data.owner
    }

    pub fn expires_at(&self) -> Instant {
        self.data.expires_at
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        self.data.is_expired(now)
    }
}

impl Lease<Held> {
    /// Wrap freshly acquired lease data.
    pub fn new(data: LeaseData) -> Self {
        Self {
            data,
            _state: PhantomData,
        }
    }

    /// Transition to a renewed lease with a new deadline. Token is unchanged.
    pub fn renewed(self, expires_at: Instant) -> Lease<Held> {
        let mut data = self.data;
        data.expires_at = expires_at;
        Lease {
            data,
            _state: PhantomData,
        }
    }

    /// Release the lease, consuming it and returning the final data.
    pub fn release(self) -> LeaseData {
        self.data
    }
}

impl<S: LeaseState> fmt::Display for Lease<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "lease({} token={} owner={})",
            self.data.resource_id, self.data.token, self.data.owner
        )
    }
}
