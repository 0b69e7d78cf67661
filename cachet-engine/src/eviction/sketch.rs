//! Count-min frequency sketch.
//!
//! Four rows of 4-bit saturating counters (stored one per byte). Counters are
//! halved after a sample period so that old popularity decays. The sketch
//! records keys whether or not they are resident, which is what lets a
//! recently evicted key compete fairly on re-admission.

use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hash};

const ROWS: usize = 4;
const MAX_COUNT: u8 = 15;
const MIN_WIDTH: usize = 16;
const SAMPLE_FACTOR: usize = 10;

const SEEDS: [u64; ROWS] = [
    0x9E37_79B9_7F4A_7C15,
    0xC2B2_AE3D_27D4_EB4F,
    0x1656_67B1_9E37_79F9,
    0x27D4_EB2F_1656_67C5,
];

#[derive(Debug)]
pub struct FrequencySketch {
    counters: Vec<u8>,
    width_mask: usize,
    hasher: RandomState,
    additions: usize,
    sample_size: usize,
}

impl FrequencySketch {
    /// Size the sketch for roughly `capacity` distinct hot keys.
    pub fn new(capacity: usize) -> Self {
        let width = capacity.max(MIN_WIDTH).next_power_of_two();
        Self {
            counters: vec![0; width * ROWS],
            width_mask: width - 1,
            hasher: RandomState::new(),
            additions: 0,
            sample_size: capacity.max(MIN_WIDTH).saturating_mul(SAMPLE_FACTOR),
        }
    }

    /// Record one occurrence of `key`.
    pub fn increment<K: Hash + ?Sized>(&mut self, key: &K) {
        let hash = self.hasher.hash_one(key);
        let mut added = false;
        for row in 0..ROWS {
            let idx = self.slot(hash, row);
            if self.counters[idx] < MAX_COUNT {
                self.counters[idx] += 1;
                added = true;
            }
        }
        if added {
            self.additions += 1;
            if self.additions >= self.sample_size {
                self.age();
            }
        }
    }

    /// Estimated occurrences of `key`, capped at 15.
    pub fn estimate<K: Hash + ?Sized>(&self, key: &K) -> u8 {
        let hash = self.hasher.hash_one(key);
        (0..ROWS)
            .map(|row| self.counters[self.slot(hash, row)])
            .min()
            .unwrap_or(0)
    }

    /// Halve every counter.
    pub fn age(&mut self) {
        for counter in &mut self.counters {
            *counter >>= 1;
        }
        self.additions /= 2;
    }

    pub fn clear(&mut self) {
        self.counters.iter_mut().for_each(|c| *c = 0);
        self.additions = 0;
    }

    fn slot(&self, hash: u64, row: usize) -> usize {
        let mixed = (hash ^ SEEDS[row]).wrapping_mul(SEEDS[(row + 1) % ROWS]);
        let mixed = mixed ^ (mixed >> 32);
        row * (self.width_mask + 1) + (mixed as usize & self.width_mask)
    }
}
