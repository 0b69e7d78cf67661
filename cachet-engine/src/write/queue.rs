use cachet_core::{CacheKey, CacheValue, PendingWrite};
use parking_lot::Mutex;
use std::collections::HashMap;
use tokio::sync::futures::Notified;
use tokio::sync::Notify;
use tokio::time::Instant;

/// Which pending writes a flush pass picks up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushMode {
    /// Writes explicitly due by now: evictions and retries past their
    /// backoff.
    Due,
    /// The periodic flush: everything not held back by a backoff.
    Scheduled,
    /// Everything, ignoring backoff.
    All,
}

/// Coalescing map of writes awaiting the backing store, one per key.
///
/// A write stays in the map while it is in flight. It is only removed by
/// [`complete`](Self::complete) or [`abandon`](Self::abandon) with the
/// version that was written, so a newer write queued meanwhile survives.
#[derive(Debug)]
pub struct FlushQueue<K, V> {
    pending: Mutex<HashMap<K, PendingWrite<K, V>>>,
    notify: Notify,
}

impl<K: CacheKey, V: CacheValue> FlushQueue<K, V> {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            notify: Notify::new(),
        }
    }

    /// Queue a write, replacing any older write for the same key.
    pub fn enqueue(&self, write: PendingWrite<K, V>) {
        let wake = write.not_before.is_some();
        self.pending.lock().insert(write.key.clone(), write);
        if wake {
            self.notify.notify_one();
        }
    }

    pub fn get(&self, key: &K) -> Option<(V, u64)> {
        self.pending
            .lock()
            .get(key)
            .map(|write| (write.value.clone(), write.version))
    }

    pub fn contains(&self, key: &K) -> bool {
        self.pending.lock().contains_key(key)
    }

    /// Snapshot the writes selected by `mode`.
    pub fn take(&self, now: Instant, mode: FlushMode) -> Vec<PendingWrite<K, V>> {
        self.pending
            .lock()
            .values()
            .filter(|write| match mode {
                FlushMode::All => true,
                FlushMode::Scheduled => write.is_due(now),
                FlushMode::Due => write.not_before.is_some_and(|at| now >= at),
            })
            .cloned()
            .collect()
    }

    /// Drop a write that the backing store acknowledged.
    pub fn complete(&self, key: &K, version: u64) -> bool {
        self.remove_version(key, version)
    }

    /// Drop a write that exhausted its attempts.
    pub fn abandon(&self, key: &K, version: u64) -> bool {
        self.remove_version(key, version)
    }

    /// Record a failed attempt and hold the write back until `not_before`.
    pub fn retry(&self, key: &K, version: u64, attempts: u32, not_before: Instant) -> bool {
        match self.pending.lock().get_mut(key) {
            Some(write) if write.version == version => {
                write.attempts = attempts;
                write.not_before = Some(not_before);
                true
            }
            _ => false,
        }
    }

    /// Earliest instant at which a write becomes due, if any.
    pub fn next_due(&self, now: Instant) -> Option<Instant> {
        self.pending
            .lock()
            .values()
            .map(|write| write.not_before.unwrap_or(now))
            .min()
    }

    pub fn keys(&self) -> Vec<K> {
        self.pending.lock().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    /// Resolves when a due-now write is queued.
    pub fn notified(&self) -> Notified<'_> {
        self.notify.notified()
    }

    fn remove_version(&self, key: &K, version: u64) -> bool {
        let mut pending = self.pending.lock();
        match pending.get(key) {
            Some(write) if write.version == version => {
                pending.remove(key);
                true
            }
            _ => false,
        }
    }
}

impl<K: CacheKey, V: CacheValue> Default for FlushQueue<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_coalesces_last_write_wins() {
        let queue = FlushQueue::new();
        let now = Instant::now();
        for (version, value) in [(1, 10), (2, 20), (3, 30)] {
            queue.enqueue(PendingWrite::new("k", value, version, now));
        }
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.get(&"k"), Some((30, 3)));
    }

    #[test]
    fn test_stale_completion_keeps_newer_write() {
        let queue = FlushQueue::new();
        let now = Instant::now();
        queue.enqueue(PendingWrite::new("k", 1, 1, now));
        let in_flight = queue.take(now, FlushMode::All);
        queue.enqueue(PendingWrite::new("k", 2, 2, now));

        assert!(!queue.complete(&"k", in_flight[0].version));
        assert_eq!(queue.get(&"k"), Some((2, 2)));
        assert!(queue.complete(&"k", 2));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_modes_respect_backoff() {
        let queue = FlushQueue::new();
        let now = Instant::now();
        queue.enqueue(PendingWrite::new("scheduled", 1, 1, now));
        queue.enqueue(PendingWrite::new("evicted", 2, 2, now).due_now(now));
        queue.enqueue(PendingWrite::new("backoff", 3, 3, now));
        assert!(queue.retry(&"backoff", 3, 1, now + Duration::from_secs(1)));

        let keys = |mode| {
            let mut keys: Vec<_> = queue.take(now, mode).into_iter().map(|w| w.key).collect();
            keys.sort();
            keys
        };
        assert_eq!(keys(FlushMode::Due), vec!["evicted"]);
        assert_eq!(keys(FlushMode::Scheduled), vec!["evicted", "scheduled"]);
        assert_eq!(keys(FlushMode::All), vec!["backoff", "evicted", "scheduled"]);
        assert_eq!(queue.next_due(now), Some(now));
    }
}
