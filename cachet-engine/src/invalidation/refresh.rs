use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};

/// In-flight reloads, one per key.
///
/// Each reload gets a ticket. Invalidation or eviction of the key cancels
/// the ticket, and a reload may only commit while its ticket is still the
/// registered one. The cache keeps one tracker for background refreshes and
/// one for cache-aside loads.
#[derive(Debug)]
pub struct RefreshTracker<K: Eq + Hash> {
    in_flight: DashMap<K, u64>,
    next_ticket: AtomicU64,
}

impl<K: Eq + Hash + Clone> RefreshTracker<K> {
    pub fn new() -> Self {
        Self {
            in_flight: DashMap::new(),
            next_ticket: AtomicU64::new(1),
        }
    }

    /// Register a refresh. `None` if one is already running for the key.
    pub fn begin(&self, key: &K) -> Option<u64> {
        match self.in_flight.entry(key.clone()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
                slot.insert(ticket);
                Some(ticket)
            }
        }
    }

    /// Register a reload, replacing any ticket already held for the key.
    pub fn supersede(&self, key: &K) -> u64 {
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        self.in_flight.insert(key.clone(), ticket);
        ticket
    }

    /// Retire a ticket. False means it was cancelled or superseded and its
    /// result must be discarded.
    pub fn finish(&self, key: &K, ticket: u64) -> bool {
        self.in_flight
            .remove_if(key, |_, current| *current == ticket)
            .is_some()
    }

    pub fn cancel(&self, key: &K) -> bool {
        self.in_flight.remove(key).is_some()
    }

    /// Cancel every ticket whose key satisfies `predicate`.
    pub fn cancel_where<F>(&self, predicate: F)
    where
        F: Fn(&K) -> bool,
    {
        self.in_flight.retain(|key, _| !predicate(key));
    }

    pub fn cancel_all(&self) {
        self.in_flight.clear();
    }

    pub fn is_refreshing(&self, key: &K) -> bool {
        self.in_flight.contains_key(key)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }
}

impl<K: Eq + Hash + Clone> Default for RefreshTracker<K> {
    fn default() -> Self {
        Self::new()
    }
}
