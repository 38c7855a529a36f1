//! Minimal publish/subscribe event bus.
//!
//! Subscribers register a handler per topic; publish is fire-and-forget —
//! a handler failure is logged and does not abort delivery to other
//! handlers. Ordering is preserved per topic, not across topics.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// An event published on the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Topic this event was published on.
    pub topic: String,
    /// Event payload.
    pub payload: serde_json::Value,
    /// Publication timestamp.
    pub at: chrono::DateTime<chrono::Utc>,
}

impl Event {
    /// Construct a new event for `topic`.
    pub fn new(topic: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            topic: topic.into(),
            payload,
            at: chrono::Utc::now(),
        }
    }
}

/// A subscriber callback. Handlers run synchronously on the publishing
/// task; long-running work should be spawned off rather than blocking here.
pub trait EventHandler: Send + Sync {
    /// Handle one event.
    fn handle(&self, event: &Event);
}

impl<F> EventHandler for F
where
    F: Fn(&Event) + Send + Sync,
{
    fn handle(&self, event: &Event) {
        self(event)
    }
}

struct Subscriber {
    id: u64,
    handler: Arc<dyn EventHandler>,
}

impl fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber").field("id", &self.id).finish()
    }
}

/// A topic-keyed publish/subscribe hub, safe for concurrent publishers and
/// subscribers.
#[derive(Clone)]
pub struct EventBus {
    subscribers: Arc<RwLock<HashMap<String, Vec<Subscriber>>>>,
    next_id: Arc<std::sync::atomic::AtomicU64>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// A handle returned on subscription, used to unsubscribe later.
#[derive(Debug, Clone, Copy)]
pub struct SubscriptionId {
    topic_hash: u64,
    id: u64,
}

impl EventBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self {
            subscribers: Arc::new(RwLock::new(HashMap::new())),
            next_id: Arc::new(std::sync::atomic::AtomicU64::new(1)),
        }
    }

    /// Register `handler` for the given topics.
    pub fn subscribe<I, S>(&self, topics: I, handler: Arc<dyn EventHandler>) -> Vec<SubscriptionId>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut subs = self.subscribers.write();
        topics
            .into_iter()
            .map(|topic| {
                let topic = topic.into();
                let id = self
                    .next_id
                    .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                let mut hasher = std::collections::hash_map::DefaultHasher::new();
                std::hash::Hash::hash(&topic, &mut hasher);
                let topic_hash = std::hash::Hasher::finish(&hasher);

                subs.entry(topic).or_default().push(Subscriber {
                    id,
                    handler: handler.clone(),
                });
                SubscriptionId { topic_hash, id }
            })
            .collect()
    }

    /// Publish an event to every subscriber of its topic, in subscription
    /// order. A handler that panics is caught and logged; it does not stop
    /// delivery to subsequent handlers.
    pub fn publish(&self, event: Event) {
        let handlers: Vec<Arc<dyn EventHandler>> = {
            let subs = self.subscribers.read();
            subs.get(&event.topic)
                .map(|v| v.iter().map(|s| s.handler.clone()).collect())
                .unwrap_or_default()
        };
        for handler in handlers {
            let event_ref = &event;
            if let Err(panic) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                handler.handle(event_ref)
            })) {
                tracing::error!(topic = %event.topic, ?panic, "event handler panicked");
            }
        }
    }

    /// Number of subscribers registered for `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.subscribers
            .read()
            .get(topic)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn subscribers_receive_published_events_in_order() {
        let bus = EventBus::new();
        let seen = Arc::new(RwLock::new(Vec::new()));
        let seen_clone = seen.clone();
        bus.subscribe(
            ["node_completed"],
            Arc::new(move |event: &Event| {
                seen_clone.write().push(event.payload.clone());
            }),
        );

        bus.publish(Event::new("node_completed", serde_json::json!(1)));
        bus.publish(Event::new("node_completed", serde_json::json!(2)));

        assert_eq!(*seen.read(), vec![serde_json::json!(1), serde_json::json!(2)]);
    }

    #[test]
    fn a_panicking_handler_does_not_stop_delivery() {
        let bus = EventBus::new();
        let counter = Arc::new(AtomicUsize::new(0));

        bus.subscribe(["topic"], Arc::new(|_: &Event| panic!("boom")));
        let counter_clone = counter.clone();
        bus.subscribe(
            ["topic"],
            Arc::new(move |_: &Event| {
                counter_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );

        bus.publish(Event::new("topic", serde_json::json!(null)));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unrelated_topics_are_isolated() {
        let bus = EventBus::new();
        bus.subscribe(["a"], Arc::new(|_: &Event| {}));
        assert_eq!(bus.subscriber_count("a"), 1);
        assert_eq!(bus.subscriber_count("b"), 0);
    }
}
