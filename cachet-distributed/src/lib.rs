//! cachet Distributed - Cross-Node Coordination
//!
//! Composes local [`Cache`](cachet_engine::Cache) instances into one logical
//! cache:
//!
//! - [`LeaseManager`]: time-bounded exclusive leases with fencing tokens,
//!   so work committed under a superseded lease is rejected.
//! - [`DistributedCache`]: wraps a local cache, publishes every local
//!   invalidation and applies the ones its peers publish.
//!
//! Both sit on the [`RemoteKv`] capability. [`InMemoryRemote`] implements
//! it in-process; production deployments plug in a client for their shared
//! store.

mod cache;
mod lease;
mod memory;
mod remote;

pub use cache::{DistributedCache, DistributedConfig, SyncStats, DEFAULT_INVALIDATION_CHANNEL};
pub use lease::LeaseManager;
pub use memory::InMemoryRemote;
pub use remote::{MessageStream, RemoteKv};

pub use cachet_core::{Held, Lease, LeaseData, LeaseError, NodeId, RemoteError};
