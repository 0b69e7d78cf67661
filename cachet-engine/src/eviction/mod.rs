//! Eviction Policy Engine.
//!
//! Policies track resident keys only; the entry store owns the entries. The
//! store reports every insert, read, overwrite and removal, and asks for a
//! victim when it needs room. `select_victim` only nominates a key: the
//! store removes it and then reports the removal back through `on_remove`.

mod fifo;
mod hybrid;
mod lfu;
mod list;
mod lru;
mod sketch;

pub use fifo::FifoPolicy;
pub use hybrid::HybridPolicy;
pub use lfu::LfuPolicy;
pub use list::OrderList;
pub use lru::LruPolicy;
pub use sketch::FrequencySketch;

use cachet_core::{CacheKey, EvictionPolicyKind};

/// Replacement strategy capability.
pub trait Policy<K> {
    /// A key became resident.
    fn on_insert(&mut self, key: &K);

    /// A resident key was read.
    fn on_access(&mut self, key: &K);

    /// A resident key was overwritten.
    fn on_update(&mut self, _key: &K) {}

    /// A key left the store.
    fn on_remove(&mut self, key: &K);

    /// Nominate a resident key to evict so `incoming` can be admitted.
    /// `None` only when nothing is resident.
    fn select_victim(&mut self, incoming: Option<&K>) -> Option<K>;

    /// Number of tracked keys.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn clear(&mut self);
}

/// The configured policy, selected once at construction.
#[derive(Debug)]
pub enum EvictionPolicy<K> {
    Lru(LruPolicy<K>),
    Lfu(LfuPolicy<K>),
    Fifo(FifoPolicy<K>),
    Hybrid(HybridPolicy<K>),
}

impl<K: CacheKey> EvictionPolicy<K> {
    pub fn new(kind: EvictionPolicyKind, capacity: usize, window_percent: u8) -> Self {
        match kind {
            EvictionPolicyKind::Lru => Self::Lru(LruPolicy::with_capacity(capacity)),
            EvictionPolicyKind::Lfu => Self::Lfu(LfuPolicy::new()),
            EvictionPolicyKind::Fifo => Self::Fifo(FifoPolicy::with_capacity(capacity)),
            EvictionPolicyKind::Hybrid => {
                Self::Hybrid(HybridPolicy::new(capacity, window_percent))
            }
        }
    }

    pub fn kind(&self) -> EvictionPolicyKind {
        match self {
            Self::Lru(_) => EvictionPolicyKind::Lru,
            Self::Lfu(_) => EvictionPolicyKind::Lfu,
            Self::Fifo(_) => EvictionPolicyKind::Fifo,
            Self::Hybrid(_) => EvictionPolicyKind::Hybrid,
        }
    }
}

macro_rules! dispatch {
    ($self:ident, $p:ident => $body:expr) => {
        match $self {
            EvictionPolicy::Lru($p) => $body,
            EvictionPolicy::Lfu($p) => $body,
            EvictionPolicy::Fifo($p) => $body,
            EvictionPolicy::Hybrid($p) => $body,
        }
    };
}

impl<K: CacheKey> Policy<K> for EvictionPolicy<K> {
    fn on_insert(&mut self, key: &K) {
        dispatch!(self, p => p.on_insert(key))
    }

    fn on_access(&mut self, key: &K) {
        dispatch!(self, p => p.on_access(key))
    }

    fn on_update(&mut self, key: &K) {
        dispatch!(self, p => p.on_update(key))
    }

    fn on_remove(&mut self, key: &K) {
        dispatch!(self, p => p.on_remove(key))
    }

    fn select_victim(&mut self, incoming: Option<&K>) -> Option<K> {
        dispatch!(self, p => p.select_victim(incoming))
    }

    fn len(&self) -> usize {
        dispatch!(self, p => p.len())
    }

    fn clear(&mut self) {
        dispatch!(self, p => p.clear())
    }
}
