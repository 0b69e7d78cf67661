use super::{OrderList, Policy};
use std::hash::Hash;

/// Least recently used. Reads and overwrites both count as use.
#[derive(Debug)]
pub struct LruPolicy<K> {
    order: OrderList<K>,
}

impl<K: Clone + Eq + Hash> LruPolicy<K> {
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            order: OrderList::with_capacity(capacity),
        }
    }

    /// Keys from most to least recently used.
    pub fn recency_order(&self) -> Vec<K> {
        self.order.iter().cloned().collect()
    }
}

impl<K: Clone + Eq + Hash> Default for LruPolicy<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Clone + Eq + Hash> Policy<K> for LruPolicy<K> {
    fn on_insert(&mut self, key: &K) {
        self.order.push_front(key.clone());
    }

    fn on_access(&mut self, key: &K) {
        self.order.move_to_front(key);
    }

    fn on_update(&mut self, key: &K) {
        self.order.move_to_front(key);
    }

    fn on_remove(&mut self, key: &K) {
        self.order.remove(key);
    }

    fn select_victim(&mut self, _incoming: Option<&K>) -> Option<K> {
        self.order.back().cloned()
    }

    fn len(&self) -> usize {
        self.order.len()
    }

    fn clear(&mut self) {
        self.order.clear();
    }
}
