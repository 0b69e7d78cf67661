use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hash};
use tokio::sync::{Mutex, MutexGuard};

/// Striped async locks serializing operations on the same key.
///
/// Two keys may share a stripe; that only costs concurrency, never
/// correctness. Guards are held across backing-store awaits, so these are
/// tokio mutexes rather than the store's blocking ones.
#[derive(Debug)]
pub struct KeyLocks {
    stripes: Box<[Mutex<()>]>,
    hasher: RandomState,
}

impl KeyLocks {
    pub fn new(stripes: usize) -> Self {
        let stripes = stripes.max(1).next_power_of_two();
        Self {
            stripes: (0..stripes).map(|_| Mutex::new(())).collect(),
            hasher: RandomState::new(),
        }
    }

    pub async fn lock<K: Hash>(&self, key: &K) -> MutexGuard<'_, ()> {
        let idx = (self.hasher.hash_one(key) as usize) & (self.stripes.len() - 1);
        self.stripes[idx].lock().await
    }

    pub fn stripe_count(&self) -> usize {
        self.stripes.len()
    }
}
