//! In-process event fan-out over a tokio broadcast channel.

use crate::CacheEvent;
use tokio::sync::broadcast;
use tracing::debug;

/// Events that can name themselves in logs.
pub trait NamedEvent {
    fn event_type(&self) -> &'static str;
}

impl<K> NamedEvent for CacheEvent<K> {
    fn event_type(&self) -> &'static str {
        CacheEvent::event_type(self)
    }
}

/// Broadcast channel shared by a cache and its subscribers.
#[derive(Debug)]
pub struct EventBroadcaster<E> {
    tx: broadcast::Sender<E>,
}

impl<E> Clone for EventBroadcaster<E> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<E: Clone + NamedEvent> EventBroadcaster<E> {
    /// Create a broadcaster buffering up to `capacity` events per subscriber.
    ///
    /// Slow subscribers past the buffer observe `RecvError::Lagged` instead
    /// of blocking the publisher.
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event to all current subscribers. Never blocks.
    ///
    /// Returns the number of subscribers that received it.
    pub fn broadcast(&self, event: E) -> usize {
        let event_type = event.event_type();
        match self.tx.send(event) {
            Ok(receiver_count) => {
                debug!(
                    event_type = event_type,
                    receivers = receiver_count,
                    "Broadcast event"
                );
                receiver_count
            }
            Err(_) => {
                // No subscribers
                0
            }
        }
    }

    /// Subscribe to events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<E> {
        self.tx.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
