//! Cachet Engine - Policy-Pluggable Cache
//!
//! An in-process cache whose behaviour is the product of three independent
//! policy axes, each chosen once at construction:
//!
//! ```text
//!                 ┌─────────────────────────────┐
//!   get / put ──► │          Cache façade       │ ──► events (subscribe)
//!                 └──────┬─────────┬────────────┘
//!                        │         │
//!          ┌─────────────▼──┐  ┌───▼──────────────────┐
//!          │  Entry Store   │  │  Write Coordinator   │──► BackingStore
//!          │ (lock striped) │  │ through/around/      │
//!          └──────┬─────────┘  │ behind/back + queue  │
//!                 │            └──────────────────────┘
//!     ┌───────────▼──────────┐  ┌──────────────────────┐
//!     │ Eviction Policy      │  │ Invalidation         │──► Loader
//!     │ LRU/LFU/FIFO/Hybrid  │  │ TTL, tags, refresh   │
//!     └──────────────────────┘  └──────────────────────┘
//! ```
//!
//! Background work (expiry sweep, write flushes, refreshes) runs on tasks
//! owned by the cache and never on the caller's path.

pub mod builder;
pub mod cache;
pub mod eviction;
pub mod invalidation;
pub mod keylock;
pub mod memory;
pub mod scheduler;
pub mod store;
pub mod write;

mod inner;

pub use builder::CacheBuilder;
pub use cache::Cache;
pub use eviction::{EvictionPolicy, Policy};
pub use invalidation::KeyPattern;
pub use memory::InMemoryBackingStore;
pub use scheduler::ShutdownReport;
pub use write::{FlushMode, FlushSummary};

pub use cachet_core::{
    BackingStore, CacheConfig, CacheError, CacheKey, CacheResult, CacheStats, CacheValue, Clock,
    ConfigError, EvictionPolicyKind, FnLoader, LoadError, Loader, ManualClock, PutOptions,
    RemovalCause, StoreError, TokioClock, TtlMode, WritePolicyKind,
};
pub use cachet_events::CacheEvent;
