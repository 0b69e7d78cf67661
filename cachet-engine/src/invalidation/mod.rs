//! Invalidation Manager building blocks.
//!
//! TTL expiry itself lives on the entries (lazy check in the store, eager
//! sweep from the scheduler). This module holds what bans and refreshes
//! need on top of that: the tag index, key patterns, and the per-key
//! refresh tracker.

mod pattern;
mod refresh;
mod tags;

pub use pattern::KeyPattern;
pub use refresh::RefreshTracker;
pub use tags::TagIndex;
