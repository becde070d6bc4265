use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tokio::sync::mpsc;

/// Non-blocking fan-out of events to N subscribers. A full subscriber
/// buffer drops the event for that subscriber only — `broadcast` never
/// blocks on a slow or disconnected reader.
pub struct EventBroker<E> {
    subscribers: RwLock<HashMap<u64, mpsc::Sender<E>>>,
    next_id: AtomicU64,
}

const SUBSCRIBER_BUFFER: usize = 16;

impl<E> Default for EventBroker<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> EventBroker<E> {
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a new subscriber, returning its handle (for `unsubscribe`)
    /// and the receiving half of its bounded channel.
    pub fn subscribe(&self) -> (u64, mpsc::Receiver<E>) {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.subscribers.write().insert(id, tx);
        (id, rx)
    }

    /// Remove a subscriber. Dropping its sender closes the channel from
    /// this side; the receiver observes `None` on its next `recv()`.
    pub fn unsubscribe(&self, id: u64) {
        self.subscribers.write().remove(&id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

impl<E: Clone> EventBroker<E> {
    /// Send `event` to every current subscriber without blocking. A
    /// subscriber whose buffer is full, or whose receiver has been
    /// dropped, silently misses this event.
    pub fn broadcast(&self, event: E) {
        let subscribers = self.subscribers.read();
        for sender in subscribers.values() {
            let _ = sender.try_send(event.clone());
        }
    }
}
