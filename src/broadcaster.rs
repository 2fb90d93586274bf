//! Process-wide event fan-out
//!
//! `Broadcaster` is the single publish point for every producer. It knows
//! nothing about transports: receivers register a bounded channel and the
//! broadcaster performs a non-blocking send to each of them. A full channel
//! loses that one event; the publisher and the other receivers never wait.

use crate::types::{CloudEvent, DriftAlert, Event, TOPIC_DRIFT, TOPIC_FALCO, TOPIC_STATE_CHANGE};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::mpsc::{self, error::TrySendError};

/// Handle identifying one registered channel
pub type SubscriptionId = u64;

/// Sending half of a subscriber channel (held by the broadcaster)
pub type EventSender = mpsc::Sender<Arc<Event>>;

/// Receiving half of a subscriber channel (held by the consumer)
pub type EventReceiver = mpsc::Receiver<Arc<Event>>;

/// Central at-most-once, best-effort fan-out
///
/// Construct one per process and share it as `Arc<Broadcaster>` with every
/// producer and consumer.
pub struct Broadcaster {
    /// Registered channels (subscription id → sender)
    subscribers: RwLock<HashMap<SubscriptionId, EventSender>>,

    next_id: AtomicU64,
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl Broadcaster {
    /// Create a broadcaster with no subscribers
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a receiver channel.
    ///
    /// The broadcaster takes the sending half; the channel closes once the
    /// returned id is passed to [`Broadcaster::unsubscribe`].
    pub fn subscribe(&self, sender: EventSender) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let count = {
            let mut subs = self
                .subscribers
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            subs.insert(id, sender);
            subs.len()
        };

        tracing::debug!(subscription = id, subscribers = count, "Subscriber registered");
        id
    }

    /// Create a bounded channel and register it in one step
    pub fn subscribe_channel(&self, capacity: usize) -> (SubscriptionId, EventReceiver) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (self.subscribe(tx), rx)
    }

    /// Deregister a channel and close it.
    ///
    /// Must be called exactly once per successful subscribe. A second call
    /// is a programming error: it trips a debug assertion and is otherwise
    /// only logged.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        let (removed, count) = {
            let mut subs = self
                .subscribers
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            (subs.remove(&id), subs.len())
        };

        match removed {
            // Dropping the only sender closes the channel.
            Some(sender) => {
                drop(sender);
                tracing::debug!(subscription = id, subscribers = count, "Subscriber removed");
            }
            None => {
                tracing::warn!(subscription = id, "Unsubscribe of unknown subscription");
                debug_assert!(false, "subscription {id} unsubscribed twice or never registered");
            }
        }
    }

    /// Deliver an event to every registered channel without blocking.
    ///
    /// Returns the number of channels that accepted the event; full or
    /// closed channels are skipped.
    pub fn broadcast(&self, event: Event) -> usize {
        let event = Arc::new(event);
        let subs = self
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner);

        let mut delivered = 0;
        for (id, sender) in subs.iter() {
            match sender.try_send(Arc::clone(&event)) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    tracing::debug!(
                        subscription = *id,
                        event_type = %event.event_type,
                        "Subscriber channel full, event dropped"
                    );
                }
                Err(TrySendError::Closed(_)) => {
                    tracing::debug!(
                        subscription = *id,
                        "Subscriber channel closed before unsubscribe"
                    );
                }
            }
        }

        tracing::trace!(
            event_type = %event.event_type,
            delivered,
            subscribers = subs.len(),
            "Event broadcast"
        );
        delivered
    }

    /// Publish a drift alert as a `drift` event
    pub fn broadcast_drift_alert(&self, alert: &DriftAlert) -> usize {
        self.broadcast(Event::new(TOPIC_DRIFT, alert.to_payload()))
    }

    /// Publish a normalized cloud change event as a `falco` event
    pub fn broadcast_event(&self, event: &CloudEvent) -> usize {
        self.broadcast(Event::new(TOPIC_FALCO, event.to_payload()))
    }

    /// Publish an infrastructure state change as a `state_change` event
    pub fn broadcast_state_change(
        &self,
        resource_type: &str,
        resource_id: &str,
        changes: Map<String, Value>,
    ) -> usize {
        let mut payload = Map::new();
        payload.insert("resource_type".into(), resource_type.into());
        payload.insert("resource_id".into(), resource_id.into());
        payload.insert("changes".into(), Value::Object(changes));
        self.broadcast(Event::new(TOPIC_STATE_CHANGE, payload))
    }

    /// Number of registered channels
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
