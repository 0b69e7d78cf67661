//! cachet Events - Typed Messages
//!
//! Two kinds of messages leave a cache instance:
//!
//! - [`CacheEvent`]: local observations (removals, failed refreshes, failed
//!   or abandoned writes) delivered to in-process subscribers through an
//!   [`EventBroadcaster`].
//! - [`InvalidationMessage`]: cross-node invalidations published on a
//!   remote pub/sub channel and applied by every other node.
//!
//! ```text
//! Cache ──CacheEvent──→ EventBroadcaster ──→ subscribers
//!   │
//!   └──InvalidationMessage──→ remote channel ──→ peer caches
//! ```

mod broadcast;
mod event;
mod invalidation;

pub use broadcast::{EventBroadcaster, NamedEvent};
pub use event::CacheEvent;
pub use invalidation::{InvalidationMessage, InvalidationReason, InvalidationScope};
