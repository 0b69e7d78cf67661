//! cachet Core - Data Types
//!
//! Pure data structures shared by every cachet crate: entries, leases,
//! configuration, statistics and the error taxonomy. Nothing here spawns
//! tasks or performs I/O.

use chrono::{DateTime, Utc};
use uuid::Uuid;

pub mod clock;
pub mod config;
pub mod entry;
pub mod error;
pub mod lease;
pub mod stats;
pub mod traits;

pub use clock::{Clock, ManualClock, TokioClock};
pub use config::{CacheConfig, EvictionPolicyKind, PolicyParseError, TtlMode, WritePolicyKind};
pub use entry::{CacheEntry, CacheKey, CacheValue, PendingWrite, PutOptions, RemovalCause, Removed};
pub use error::{
    CacheError, CacheResult, ConfigError, LeaseError, LoadError, RemoteError, StoreError,
};
pub use lease::{Held, Lease, LeaseData, LeaseState, Released};
pub use stats::{CacheMetrics, CacheStats};
pub use traits::{BackingStore, FnLoader, Loader};

// ============================================================================
// IDENTITY TYPES
// ============================================================================

/// Identity of a cache node in a distributed deployment.
/// UUIDv7 so node ids sort by start time in logs.
pub type NodeId = Uuid;

/// Wall-clock timestamp carried by messages that cross process boundaries.
pub type Timestamp = DateTime<Utc>;

/// Generate a fresh node identity.
pub fn new_node_id() -> NodeId {
    Uuid::now_v7()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_ids_are_unique_and_ordered() {
        let a = new_node_id();
        let b = new_node_id();
        assert_ne!(a, b);
        assert!(a < b);
    }
}
