//! Topic-based event fan-out.
//!
//! Subscribers register per topic (a project id, job id or session id).
//! Delivery is best-effort: an event published to a topic with no subscribers
//! is dropped, and there is no replay for late subscribers.

use crate::events::Event;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Why a single delivery did not happen.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryError {
    /// The connection is gone and will be pruned.
    #[error("connection closed")]
    Closed,
    /// The connection's buffer is full; this event is dropped for it.
    #[error("connection buffer full")]
    Full,
}

/// A live connection that can receive events.
pub trait Subscriber: Send + Sync {
    /// Stable identifier of the connection.
    fn connection_id(&self) -> &str;

    /// Hands one event to the connection without blocking.
    fn deliver(&self, event: &Event) -> Result<(), DeliveryError>;
}

/// Subscriber backed by a bounded tokio channel.
#[derive(Debug)]
pub struct ChannelSubscriber {
    connection_id: String,
    sender: mpsc::Sender<Event>,
}

impl ChannelSubscriber {
    /// Wraps an existing sender.
    pub fn new(connection_id: impl Into<String>, sender: mpsc::Sender<Event>) -> Self {
        Self { connection_id: connection_id.into(), sender }
    }
}

impl Subscriber for ChannelSubscriber {
    fn connection_id(&self) -> &str {
        &self.connection_id
    }

    fn deliver(&self, event: &Event) -> Result<(), DeliveryError> {
        self.sender.try_send(event.clone()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryError::Full,
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }
}

/// Receiving end handed out by [`Notifier::subscribe_channel`].
#[derive(Debug)]
pub struct Subscription {
    /// Connection identifier, usable with `unsubscribe`/`disconnect`.
    pub connection_id: String,
    receiver: mpsc::Receiver<Event>,
}

impl Subscription {
    /// Waits for the next event. Returns `None` once the connection is dropped
    /// by the notifier and drained.
    pub async fn recv(&mut self) -> Option<Event> {
        self.receiver.recv().await
    }

    /// Returns the next buffered event, if any.
    pub fn try_recv(&mut self) -> Option<Event> {
        self.receiver.try_recv().ok()
    }

    /// Drains every buffered event.
    pub fn drain(&mut self) -> Vec<Event> {
        let mut events = Vec::new();
        while let Ok(event) = self.receiver.try_recv() {
            events.push(event);
        }
        events
    }
}

type TopicMap = HashMap<String, HashMap<String, Arc<dyn Subscriber>>>;

/// Event fan-out hub.
pub struct Notifier {
    topics: RwLock<TopicMap>,
    channel_capacity: usize,
    next_connection: AtomicU64,
}

impl fmt::Debug for Notifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notifier")
            .field("topic_count", &self.topic_count())
            .field("channel_capacity", &self.channel_capacity)
            .finish_non_exhaustive()
    }
}

impl Notifier {
    /// Creates a notifier whose channel subscriptions buffer up to `channel_capacity` events.
    #[must_use]
    pub fn new(channel_capacity: usize) -> Self {
        Self { topics: RwLock::new(HashMap::new()), channel_capacity: channel_capacity.max(1), next_connection: AtomicU64::new(1) }
    }

    /// Registers a connection for a topic. Re-subscribing replaces the previous registration.
    pub fn subscribe(&self, subscriber: Arc<dyn Subscriber>, topic: &str) {
        let connection_id = subscriber.connection_id().to_string();
        debug!(connection_id = %connection_id, topic = %topic, "Subscribing");
        let mut topics = self.topics.write().unwrap_or_else(PoisonError::into_inner);
        topics.entry(topic.to_string()).or_default().insert(connection_id, subscriber);
    }

    /// Creates a channel-backed connection subscribed to `topic`.
    pub fn subscribe_channel(&self, topic: &str) -> Subscription {
        let id = self.next_connection.fetch_add(1, Ordering::Relaxed);
        let connection_id = format!("conn-{id}");
        let (sender, receiver) = mpsc::channel(self.channel_capacity);
        self.subscribe(Arc::new(ChannelSubscriber::new(connection_id.clone(), sender)), topic);
        Subscription { connection_id, receiver }
    }

    /// Removes one registration.
    ///
    /// # Returns
    /// Returns `true` if the connection was subscribed to the topic.
    pub fn unsubscribe(&self, connection_id: &str, topic: &str) -> bool {
        let mut topics = self.topics.write().unwrap_or_else(PoisonError::into_inner);
        let Some(subscribers) = topics.get_mut(topic) else {
            return false;
        };
        let removed = subscribers.remove(connection_id).is_some();
        if subscribers.is_empty() {
            topics.remove(topic);
        }
        removed
    }

    /// Removes a connection from every topic, returning how many registrations were dropped.
    pub fn disconnect(&self, connection_id: &str) -> usize {
        let mut topics = self.topics.write().unwrap_or_else(PoisonError::into_inner);
        let mut removed = 0;
        topics.retain(|_, subscribers| {
            if subscribers.remove(connection_id).is_some() {
                removed += 1;
            }
            !subscribers.is_empty()
        });
        debug!(connection_id = %connection_id, removed, "Connection disconnected");
        removed
    }

    /// Fans `event` out to the current subscribers of `topic`.
    ///
    /// Never fails: closed connections are pruned and full ones skip this event.
    ///
    /// # Returns
    /// The number of connections the event was delivered to.
    pub fn publish(&self, topic: &str, event: &Event) -> usize {
        let subscribers: Vec<Arc<dyn Subscriber>> = {
            let topics = self.topics.read().unwrap_or_else(PoisonError::into_inner);
            match topics.get(topic) {
                Some(subscribers) => subscribers.values().cloned().collect(),
                None => {
                    trace!(topic = %topic, event_type = %event.event_type, "No subscribers, event dropped");
                    return 0;
                }
            }
        };

        let mut delivered = 0;
        let mut closed = Vec::new();
        for subscriber in subscribers {
            match subscriber.deliver(event) {
                Ok(()) => delivered += 1,
                Err(DeliveryError::Full) => {
                    debug!(connection_id = %subscriber.connection_id(), topic = %topic, "Subscriber buffer full, event dropped");
                }
                Err(DeliveryError::Closed) => closed.push(subscriber.connection_id().to_string()),
            }
        }

        for connection_id in closed {
            debug!(connection_id = %connection_id, topic = %topic, "Pruning closed connection");
            self.unsubscribe(&connection_id, topic);
        }
        delivered
    }

    /// Number of subscribers on a topic.
    #[must_use]
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics.read().unwrap_or_else(PoisonError::into_inner).get(topic).map_or(0, HashMap::len)
    }

    /// Number of topics with at least one subscriber.
    #[must_use]
    pub fn topic_count(&self) -> usize {
        self.topics.read().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventType;
    use serde_json::json;

    fn event(n: u64) -> Event {
        Event::new(EventType::Progress, "proj", json!({ "n": n }))
    }

    #[test]
    fn test_publish_fans_out_in_order() {
        let notifier = Notifier::new(16);
        let mut a = notifier.subscribe_channel("proj");
        let mut b = notifier.subscribe_channel("proj");

        for n in 0..3 {
            assert_eq!(notifier.publish("proj", &event(n)), 2);
        }

        for sub in [&mut a, &mut b] {
            let seen: Vec<_> = sub.drain().into_iter().map(|e| e.payload["n"].as_u64().unwrap()).collect();
            assert_eq!(seen, vec![0, 1, 2]);
        }
    }

    #[test]
    fn test_no_subscribers_drops_event_without_replay() {
        let notifier = Notifier::new(16);
        assert_eq!(notifier.publish("proj", &event(1)), 0);

        let mut late = notifier.subscribe_channel("proj");
        assert!(late.try_recv().is_none());
    }

    #[test]
    fn test_closed_connection_is_pruned() {
        let notifier = Notifier::new(16);
        let dropped = notifier.subscribe_channel("proj");
        let mut alive = notifier.subscribe_channel("proj");
        drop(dropped);

        assert_eq!(notifier.publish("proj", &event(1)), 1);
        assert_eq!(notifier.subscriber_count("proj"), 1);
        assert!(alive.try_recv().is_some());
    }

    #[test]
    fn test_full_buffer_drops_only_that_event() {
        let notifier = Notifier::new(1);
        let mut sub = notifier.subscribe_channel("proj");

        assert_eq!(notifier.publish("proj", &event(1)), 1);
        assert_eq!(notifier.publish("proj", &event(2)), 0);
        assert_eq!(notifier.subscriber_count("proj"), 1);

        assert_eq!(sub.try_recv().unwrap().payload["n"], 1);
        assert_eq!(notifier.publish("proj", &event(3)), 1);
        assert_eq!(sub.try_recv().unwrap().payload["n"], 3);
    }

    #[test]
    fn test_unsubscribe_and_disconnect() {
        let notifier = Notifier::new(16);
        let sub = notifier.subscribe_channel("proj");
        let (tx, _rx) = mpsc::channel(4);
        let shared = Arc::new(ChannelSubscriber::new(sub.connection_id.clone(), tx));
        notifier.subscribe(shared, "job-1");

        assert!(notifier.unsubscribe(&sub.connection_id, "proj"));
        assert!(!notifier.unsubscribe(&sub.connection_id, "proj"));
        assert_eq!(notifier.disconnect(&sub.connection_id), 1);
        assert_eq!(notifier.topic_count(), 0);
    }
}
