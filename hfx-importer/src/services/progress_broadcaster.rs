//! Progress fan-out
//!
//! Each observer gets its own bounded queue. Broadcasting never blocks: when
//! an observer's queue is full the event is dropped for that observer only,
//! so a stalled observer cannot stall the import.

use hfx_common::events::ProgressEvent;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, trace};

type SubscriberMap = HashMap<u64, mpsc::Sender<ProgressEvent>>;

struct Registry {
    subscribers: Mutex<SubscriberMap>,
    next_id: AtomicU64,
    capacity: usize,
}

impl Registry {
    fn lock(&self) -> MutexGuard<'_, SubscriberMap> {
        // The map stays consistent even if a holder panicked
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Registry of live progress observers
#[derive(Clone)]
pub struct ProgressBroadcaster {
    registry: Arc<Registry>,
}

impl ProgressBroadcaster {
    /// Create a broadcaster with `capacity` queued events per observer
    pub fn new(capacity: usize) -> Self {
        Self {
            registry: Arc::new(Registry {
                subscribers: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                capacity: capacity.max(1),
            }),
        }
    }

    /// Register a new observer
    ///
    /// The observer is removed when the returned [`Subscription`] is dropped.
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::channel(self.registry.capacity);
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        self.registry.lock().insert(id, tx);
        debug!(subscriber = id, "Progress observer subscribed");

        Subscription {
            id,
            rx,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Remove an observer; unknown ids are ignored
    pub fn unsubscribe(&self, id: u64) {
        if self.registry.lock().remove(&id).is_some() {
            debug!(subscriber = id, "Progress observer unsubscribed");
        }
    }

    /// Enqueue `event` for every observer without blocking
    ///
    /// Returns the number of observers the event was delivered to. Full
    /// queues drop the event; closed queues are pruned.
    pub fn broadcast(&self, event: &ProgressEvent) -> usize {
        let mut subscribers = self.registry.lock();
        let mut delivered = 0;
        subscribers.retain(|id, tx| match tx.try_send(event.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                trace!(
                    subscriber = id,
                    event = event.event_type(),
                    "Observer queue full, event dropped"
                );
                true
            }
            Err(TrySendError::Closed(_)) => false,
        });
        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry.lock().len()
    }
}

/// One observer's receiving end
pub struct Subscription {
    id: u64,
    rx: mpsc::Receiver<ProgressEvent>,
    registry: Weak<Registry>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wait for the next event; None once the broadcaster is gone
    pub async fn recv(&mut self) -> Option<ProgressEvent> {
        self.rx.recv().await
    }

    /// Take an already-queued event without waiting
    pub fn try_recv(&mut self) -> Option<ProgressEvent> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.lock().remove(&self.id);
        }
    }
}
