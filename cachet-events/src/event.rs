//! Local cache events.
//!
//! Everything the engine does off the caller's path (flushes, refreshes,
//! expiry sweeps) reports its outcome here instead of through an error
//! return, so failures stay observable without leaking into unrelated
//! callers.

use cachet_core::{LoadError, RemovalCause, StoreError};

/// Events published by a cache instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent<K> {
    // ========================================================================
    // LIFECYCLE EVENTS
    // ========================================================================
    /// An entry left the cache.
    Removed { key: K, cause: RemovalCause },

    /// A refresh replaced an entry with a newer version.
    Refreshed { key: K, version: u64 },

    // ========================================================================
    // FAILURE EVENTS
    // ========================================================================
    /// A background refresh failed; the previous value was kept.
    RefreshFailed { key: K, error: LoadError },

    /// A cache-aside load failed.
    LoadFailed { key: K, error: LoadError },

    /// A backing-store write attempt failed and will be retried.
    WriteFailed {
        key: K,
        attempt: u32,
        error: StoreError,
    },

    /// A write exhausted its retry budget and was abandoned.
    DeadLetter {
        key: K,
        attempts: u32,
        error: StoreError,
    },

    /// Writes still pending when the shutdown drain deadline passed.
    Unflushed { keys: Vec<K> },
}

impl<K> CacheEvent<K> {
    /// Get the event type name for logging.
    pub fn event_type(&self) -> &'static str {
        match self {
            CacheEvent::Removed { .. } => "Removed",
            CacheEvent::Refreshed { .. } => "Refreshed",
            CacheEvent::RefreshFailed { .. } => "RefreshFailed",
            CacheEvent::LoadFailed { .. } => "LoadFailed",
            CacheEvent::WriteFailed { .. } => "WriteFailed",
            CacheEvent::DeadLetter { .. } => "DeadLetter",
            CacheEvent::Unflushed { .. } => "Unflushed",
        }
    }

    /// Key the event is about, if it concerns a single key.
    pub fn key(&self) -> Option<&K> {
        match self {
            CacheEvent::Removed { key, .. }
            | CacheEvent::Refreshed { key, .. }
            | CacheEvent::RefreshFailed { key, .. }
            | CacheEvent::LoadFailed { key, .. }
            | CacheEvent::WriteFailed { key, .. }
            | CacheEvent::DeadLetter { key, .. } => Some(key),
            CacheEvent::Unflushed { .. } => None,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            CacheEvent::RefreshFailed { .. }
                | CacheEvent::LoadFailed { .. }
                | CacheEvent::WriteFailed { .. }
                | CacheEvent::DeadLetter { .. }
                | CacheEvent::Unflushed { .. }
        )
    }
}
