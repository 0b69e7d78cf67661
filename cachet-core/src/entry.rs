//! Cache entry, pending write, and removal types.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::hash::Hash;
use std::time::Duration;
use tokio::time::Instant;

// ============================================================================
// KEY / VALUE BOUNDS
// ============================================================================

/// Opaque, hashable, comparable cache key.
pub trait CacheKey: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static {}

impl<T> CacheKey for T where T: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static {}

/// Cached value.
pub trait CacheValue: Clone + Send + Sync + 'static {}

impl<T> CacheValue for T where T: Clone + Send + Sync + 'static {}

// ============================================================================
// CACHE ENTRY
// ============================================================================

/// A resident cache entry.
///
/// Owned exclusively by the entry store. Eviction policies and the tag index
/// refer to entries by key only.
#[derive(Debug, Clone)]
pub struct CacheEntry<K, V> {
    pub key: K,
    pub value: V,
    pub inserted_at: Instant,
    pub last_access_at: Instant,
    pub access_count: u64,
    /// Past this instant the entry is logically absent.
    pub expire_at: Option<Instant>,
    /// Lifetime used to recompute `expire_at` on access under sliding expiry.
    pub sliding_ttl: Option<Duration>,
    /// Past this instant reads serve the value and schedule a refresh.
    pub refresh_at: Option<Instant>,
    pub tags: BTreeSet<String>,
    /// Set until the backing store acknowledges this entry's current version.
    pub dirty: bool,
    pub version: u64,
}

impl<K, V> CacheEntry<K, V> {
    /// Whether the entry is expired at `now`. The boundary instant counts as
    /// expired.
    pub fn is_expired(&self, now: Instant) -> bool {
        self.expire_at.is_some_and(|at| now >= at)
    }

    /// Whether the entry has crossed its stale-while-revalidate threshold.
    pub fn is_stale(&self, now: Instant) -> bool {
        self.refresh_at.is_some_and(|at| now >= at)
    }

    /// Record a read at `now`.
    pub fn touch(&mut self, now: Instant) {
        self.last_access_at = now;
        self.access_count = self.access_count.saturating_add(1);
        if let Some(ttl) = self.sliding_ttl {
            self.expire_at = Some(now + ttl);
        }
    }

    /// Remaining lifetime, or `None` if the entry never expires.
    pub fn remaining_ttl(&self, now: Instant) -> Option<Duration> {
        self.expire_at.map(|at| at.saturating_duration_since(now))
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }
}

// ============================================================================
// PUT OPTIONS
// ============================================================================

/// Per-insert options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PutOptions {
    /// Overrides the configured default TTL for this entry.
    pub ttl: Option<Duration>,
    pub tags: BTreeSet<String>,
}

impl PutOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }
}

// ============================================================================
// PENDING WRITE
// ============================================================================

/// A coalesced backing-store write awaiting flush.
///
/// Keyed by cache key in the flush queue, so a newer write to the same key
/// replaces the older one instead of queueing behind it.
#[derive(Debug, Clone)]
pub struct PendingWrite<K, V> {
    pub key: K,
    pub value: V,
    /// Entry version this write persists.
    pub version: u64,
    pub enqueued_at: Instant,
    /// Failed attempts so far.
    pub attempts: u32,
    /// Not eligible for flushing before this instant. `None` means the next
    /// scheduled flush.
    pub not_before: Option<Instant>,
}

impl<K, V> PendingWrite<K, V> {
    pub fn new(key: K, value: V, version: u64, enqueued_at: Instant) -> Self {
        Self {
            key,
            value,
            version,
            enqueued_at,
            attempts: 0,
            not_before: None,
        }
    }

    /// Mark the write as due immediately.
    pub fn due_now(mut self, now: Instant) -> Self {
        self.not_before = Some(now);
        self
    }

    pub fn is_due(&self, now: Instant) -> bool {
        match self.not_before {
            Some(at) => now >= at,
            None => true,
        }
    }
}

// ============================================================================
// REMOVAL
// ============================================================================

/// Why an entry left the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RemovalCause {
    /// Invalidated by key, tag, pattern, or clear.
    Explicit,
    /// Overwritten by a newer put.
    Replaced,
    /// Past its expiry instant.
    Expired,
    /// Chosen as a victim to respect capacity.
    Size,
    /// Drained at shutdown.
    Shutdown,
}

impl RemovalCause {
    /// Whether the removal was an eviction (as opposed to a caller action).
    pub fn was_evicted(&self) -> bool {
        matches!(self, Self::Expired | Self::Size | Self::Shutdown)
    }
}

impl fmt::Display for RemovalCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Explicit => "explicit",
            Self::Replaced => "replaced",
            Self::Expired => "expired",
            Self::Size => "size",
            Self::Shutdown => "shutdown",
        };
        f.write_str(s)
    }
}

/// An entry removed from the store, handed to the write coordinator.
#[derive(Debug, Clone)]
pub struct Removed<K, V> {
    pub key: K,
    pub value: V,
    pub version: u64,
    pub dirty: bool,
    pub cause: RemovalCause,
}

impl<K, V> Removed<K, V> {
    pub fn from_entry(entry: CacheEntry<K, V>, cause: RemovalCause) -> Self {
        Self {
            key: entry.key,
            value: entry.value,
            version: entry.version,
            dirty: entry.dirty,
            cause,
        }
    }
}
