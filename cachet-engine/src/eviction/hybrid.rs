//! Frequency-aware admission in front of a recency-ordered main region.
//!
//! New keys enter a small LRU window. When the window outgrows its share of
//! capacity its oldest key moves to the main region. On overflow the victim
//! is normally the window's coldest key, with two exceptions decided by the
//! frequency sketch:
//!
//! - if the window's coldest key is more popular than the main region's
//!   coldest, it is promoted and the main region's coldest is evicted;
//! - if the incoming key is more popular than the window's coldest, that
//!   resident is evicted and the incomer is admitted straight into main.

use super::{FrequencySketch, OrderList, Policy};
use std::hash::Hash;

#[derive(Debug)]
pub struct HybridPolicy<K> {
    window: OrderList<K>,
    main: OrderList<K>,
    sketch: FrequencySketch,
    window_capacity: usize,
    admit_to_main: Option<K>,
}

impl<K: Clone + Eq + Hash> HybridPolicy<K> {
    pub fn new(capacity: usize, window_percent: u8) -> Self {
        let window_capacity = (capacity.saturating_mul(window_percent as usize) / 100).max(1);
        Self {
            window: OrderList::with_capacity(window_capacity),
            main: OrderList::with_capacity(capacity),
            sketch: FrequencySketch::new(capacity),
            window_capacity,
            admit_to_main: None,
        }
    }

    pub fn window_len(&self) -> usize {
        self.window.len()
    }

    pub fn main_len(&self) -> usize {
        self.main.len()
    }

    pub fn in_main(&self, key: &K) -> bool {
        self.main.contains(key)
    }

    pub fn estimate(&self, key: &K) -> u8 {
        self.sketch.estimate(key)
    }

    fn record(&mut self, key: &K) {
        self.sketch.increment(key);
        if !self.window.move_to_front(key) {
            self.main.move_to_front(key);
        }
    }
}

impl<K: Clone + Eq + Hash> Policy<K> for HybridPolicy<K> {
    fn on_insert(&mut self, key: &K) {
        self.sketch.increment(key);
        let admit = self.admit_to_main.take();
        if admit.as_ref() == Some(key) {
            self.main.push_front(key.clone());
            return;
        }
        self.window.push_front(key.clone());
        while self.window.len() > self.window_capacity {
            match self.window.pop_back() {
                Some(demoted) => {
                    self.main.push_front(demoted);
                }
                None => break,
            }
        }
    }

    fn on_access(&mut self, key: &K) {
        self.record(key);
    }

    fn on_update(&mut self, key: &K) {
        self.record(key);
    }

    fn on_remove(&mut self, key: &K) {
        if !self.window.remove(key) {
            self.main.remove(key);
        }
    }

    fn select_victim(&mut self, incoming: Option<&K>) -> Option<K> {
        let Some(candidate) = self.window.back().cloned() else {
            return self.main.back().cloned();
        };
        let candidate_freq = self.sketch.estimate(&candidate);

        if let Some(incoming) = incoming {
            if self.sketch.estimate(incoming) > candidate_freq {
                self.admit_to_main = Some(incoming.clone());
                return Some(candidate);
            }
        }

        if let Some(main_victim) = self.main.back().cloned() {
            if candidate_freq > self.sketch.estimate(&main_victim) {
                self.window.remove(&candidate);
                self.main.push_front(candidate);
                return Some(main_victim);
            }
        }

        Some(candidate)
    }

    fn len(&self) -> usize {
        self.window.len() + self.main.len()
    }

    fn clear(&mut self) {
        self.window.clear();
        self.main.clear();
        self.admit_to_main = None;
    }
}
