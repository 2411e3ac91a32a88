//! Event fan-out to registered subscribers.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ami_proto::Message;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Outcome of handing one item to a sink.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Delivery {
    /// Accepted.
    Delivered,
    /// Sink is backpressured; this item was dropped, the sink stays.
    Dropped,
    /// Sink's transport is gone; the subscriber is removed.
    Closed,
}

/// Receiver of AMI events.
///
/// Called synchronously from the connection task while the subscriber set
/// is locked: implementations must not block and must not call back into
/// [`EventFanOut`].
pub trait EventSink: Send + Sync {
    /// Deliver one event.
    fn deliver(&self, event: &Arc<Message>) -> Delivery;

    /// The AMI connection went up or down.
    fn connection_changed(&self, _connected: bool) -> Delivery {
        Delivery::Delivered
    }
}

impl EventSink for mpsc::Sender<Arc<Message>> {
    fn deliver(&self, event: &Arc<Message>) -> Delivery {
        match self.try_send(Arc::clone(event)) {
            Ok(()) => Delivery::Delivered,
            Err(mpsc::error::TrySendError::Full(_)) => Delivery::Dropped,
            Err(mpsc::error::TrySendError::Closed(_)) => Delivery::Closed,
        }
    }
}

/// Opaque subscriber handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub_{}", self.0)
    }
}

struct Subscriber {
    id: SubscriberId,
    sink: Arc<dyn EventSink>,
}

/// Ordered set of event subscribers.
pub struct EventFanOut {
    subscribers: Mutex<Vec<Subscriber>>,
    next_id: AtomicU64,
}

impl EventFanOut {
    /// Empty fan-out.
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a sink at the end of the delivery order.
    pub fn subscribe(&self, sink: Arc<dyn EventSink>) -> SubscriberId {
        self.subscribe_with(sink, |_| {})
    }

    /// Register a sink, running `greet` on it under the subscriber lock.
    ///
    /// Nothing is published or notified between `greet` and the sink
    /// joining the set, so a greeting reflects state no later than the
    /// first item the sink receives.
    pub fn subscribe_with(
        &self,
        sink: Arc<dyn EventSink>,
        greet: impl FnOnce(&dyn EventSink),
    ) -> SubscriberId {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut subs = self.subscribers.lock();
        greet(sink.as_ref());
        subs.push(Subscriber { id, sink });
        debug!(subscriber = %id, total = subs.len(), "subscriber attached");
        id
    }

    /// In-process subscriber backed by a bounded channel.
    pub fn subscribe_channel(
        &self,
        capacity: usize,
    ) -> (SubscriberId, mpsc::Receiver<Arc<Message>>) {
        let (tx, rx) = mpsc::channel(capacity);
        (self.subscribe(Arc::new(tx)), rx)
    }

    /// Remove a subscriber. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let mut subs = self.subscribers.lock();
        let before = subs.len();
        subs.retain(|s| s.id != id);
        let removed = subs.len() != before;
        if removed {
            debug!(subscriber = %id, total = subs.len(), "subscriber detached");
        }
        removed
    }

    /// Number of registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Deliver an event to every subscriber in registration order.
    ///
    /// Returns the number of subscribers that accepted it.
    pub fn publish(&self, event: &Arc<Message>) -> usize {
        self.each(|sink| sink.deliver(event))
    }

    /// Tell every subscriber the connection went up or down.
    pub fn notify_connection(&self, connected: bool) -> usize {
        self.each(|sink| sink.connection_changed(connected))
    }

    fn each(&self, mut f: impl FnMut(&dyn EventSink) -> Delivery) -> usize {
        let mut subs = self.subscribers.lock();
        let mut delivered = 0;
        subs.retain(|sub| match f(sub.sink.as_ref()) {
            Delivery::Delivered => {
                delivered += 1;
                true
            }
            Delivery::Dropped => {
                metrics::counter!("ami_events_dropped_total").increment(1);
                warn!(subscriber = %sub.id, "subscriber backpressured, item dropped");
                true
            }
            Delivery::Closed => {
                debug!(subscriber = %sub.id, "subscriber closed, removing");
                false
            }
        });
        delivered
    }
}

impl Default for EventFanOut {
    fn default() -> Self {
        Self::new()
    }
}
