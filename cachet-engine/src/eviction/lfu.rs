use super::Policy;
use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;

#[derive(Debug, Clone, Copy)]
struct Meta {
    freq: u64,
    seq: u64,
}

/// Least frequently used.
///
/// Frequency buckets map an access count to the keys holding it, ordered by
/// insertion sequence. The victim is the oldest key of the lowest bucket.
/// Only reads increment frequency; a fresh insert starts at zero.
///
/// Buckets and their members are ordered maps, so an increment and a victim
/// selection each cost O(log n) under the policy lock.
#[derive(Debug)]
pub struct LfuPolicy<K> {
    buckets: BTreeMap<u64, BTreeMap<u64, K>>,
    meta: HashMap<K, Meta>,
    next_seq: u64,
}

impl<K: Clone + Eq + Hash> LfuPolicy<K> {
    pub fn new() -> Self {
        Self {
            buckets: BTreeMap::new(),
            meta: HashMap::new(),
            next_seq: 0,
        }
    }

    /// Recorded access count of a resident key.
    pub fn frequency(&self, key: &K) -> Option<u64> {
        self.meta.get(key).map(|m| m.freq)
    }
}

impl<K: Clone + Eq + Hash> Default for LfuPolicy<K> {
    fn default() -> Self {
        Self::new()
    }
}

fn detach<K>(buckets: &mut BTreeMap<u64, BTreeMap<u64, K>>, meta: Meta) {
    if let Some(bucket) = buckets.get_mut(&meta.freq) {
        bucket.remove(&meta.seq);
        if bucket.is_empty() {
            buckets.remove(&meta.freq);
        }
    }
}

impl<K: Clone + Eq + Hash> Policy<K> for LfuPolicy<K> {
    fn on_insert(&mut self, key: &K) {
        if self.meta.contains_key(key) {
            return;
        }
        let meta = Meta {
            freq: 0,
            seq: self.next_seq,
        };
        self.next_seq += 1;
        self.meta.insert(key.clone(), meta);
        self.buckets
            .entry(meta.freq)
            .or_default()
            .insert(meta.seq, key.clone());
    }

    fn on_access(&mut self, key: &K) {
        let Some(meta) = self.meta.get_mut(key) else {
            return;
        };
        detach(&mut self.buckets, *meta);
        meta.freq = meta.freq.saturating_add(1);
        self.buckets
            .entry(meta.freq)
            .or_default()
            .insert(meta.seq, key.clone());
    }

    fn on_remove(&mut self, key: &K) {
        if let Some(meta) = self.meta.remove(key) {
            detach(&mut self.buckets, meta);
        }
    }

    fn select_victim(&mut self, _incoming: Option<&K>) -> Option<K> {
        self.buckets
            .values()
            .next()
            .and_then(|bucket| bucket.values().next())
            .cloned()
    }

    fn len(&self) -> usize {
        self.meta.len()
    }

    fn clear(&mut self) {
        self.buckets.clear();
        self.meta.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lowest_frequency_evicted() {
        let mut lfu = LfuPolicy::new();
        for key in ["a", "b", "c"] {
            lfu.on_insert(&key);
        }
        lfu.on_access(&"a");
        lfu.on_access(&"a");
        lfu.on_access(&"b");
        lfu.on_access(&"c");
        lfu.on_access(&"c");
        lfu.on_access(&"c");
        assert_eq!(lfu.select_victim(None), Some("b"));
    }

    #[test]
    fn test_ties_break_toward_oldest_insertion() {
        let mut lfu = LfuPolicy::new();
        for key in [3, 1, 2] {
            lfu.on_insert(&key);
            lfu.on_access(&key);
        }
        assert_eq!(lfu.select_victim(None), Some(3));
    }

    #[test]
    fn test_insert_does_not_count_as_access() {
        let mut lfu = LfuPolicy::new();
        lfu.on_insert(&1);
        lfu.on_update(&1);
        assert_eq!(lfu.frequency(&1), Some(0));
        lfu.on_access(&1);
        assert_eq!(lfu.frequency(&1), Some(1));
    }

    #[test]
    fn test_remove_clears_bucket() {
        let mut lfu = LfuPolicy::new();
        lfu.on_insert(&1);
        lfu.on_insert(&2);
        lfu.on_access(&2);
        lfu.on_remove(&1);
        assert_eq!(lfu.select_victim(None), Some(2));
        lfu.on_remove(&2);
        assert!(lfu.buckets.is_empty());
        assert_eq!(lfu.select_victim(None), None);
    }
}
