use super::{OrderList, Policy};
use std::hash::Hash;

/// First in, first out. Reads and overwrites never reorder.
#[derive(Debug)]
pub struct FifoPolicy<K> {
    order: OrderList<K>,
}

impl<K: Clone + Eq + Hash> FifoPolicy<K> {
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            order: OrderList::with_capacity(capacity),
        }
    }
}

impl<K: Clone + Eq + Hash> Default for FifoPolicy<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Clone + Eq + Hash> Policy<K> for FifoPolicy<K> {
    fn on_insert(&mut self, key: &K) {
        if !self.order.contains(key) {
            self.order.push_front(key.clone());
        }
    }

    fn on_access(&mut self, _key: &K) {}

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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_do_not_change_order() {
        let mut fifo = FifoPolicy::new();
        for key in 1..=3 {
            fifo.on_insert(&key);
        }
        fifo.on_access(&1);
        fifo.on_update(&1);
        assert_eq!(fifo.select_victim(Some(&4)), Some(1));
    }

    #[test]
    fn test_eviction_follows_insertion() {
        let mut fifo = FifoPolicy::new();
        for key in 1..=3 {
            fifo.on_insert(&key);
        }
        let mut evicted = Vec::new();
        while let Some(victim) = fifo.select_victim(None) {
            fifo.on_remove(&victim);
            evicted.push(victim);
        }
        assert_eq!(evicted, vec![1, 2, 3]);
    }
}
