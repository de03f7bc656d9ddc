//! Publish/Subscribe
//!
//! Channels are plain names with no relation to the keyspace. A subscribing
//! connection registers the sending half of its own unbounded queue; PUBLISH
//! pushes a `message` frame into every subscriber's queue and each
//! connection writes its frames out from its own task.
//!
//! ```text
//!   PUBLISH news hi ──> PubSub ──┬──> queue of client 3 ──> socket 3
//!                                └──> queue of client 7 ──> socket 7
//! ```

use crate::protocol::RespValue;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::trace;

pub type MessageSender = mpsc::UnboundedSender<RespValue>;
pub type MessageReceiver = mpsc::UnboundedReceiver<RespValue>;

/// Channel registry shared by every connection.
#[derive(Debug, Default)]
pub struct PubSub {
    registry: Mutex<Registry>,
    next_id: AtomicU64,
}

#[derive(Debug, Default)]
struct Registry {
    /// channel -> subscriber id -> queue
    channels: HashMap<Bytes, HashMap<u64, MessageSender>>,
    /// subscriber id -> channels
    subscriptions: HashMap<u64, HashSet<Bytes>>,
}

impl Registry {
    fn detach(&mut self, id: u64, channel: &[u8]) {
        if let Some(subscribers) = self.channels.get_mut(channel) {
            subscribers.remove(&id);
            if subscribers.is_empty() {
                self.channels.remove(channel);
            }
        }
    }

    fn count(&self, id: u64) -> usize {
        self.subscriptions.get(&id).map_or(0, HashSet::len)
    }
}

impl PubSub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hands out a fresh subscriber id.
    pub fn register(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Subscribes `id` to `channel`. Subscribing twice is a no-op.
    ///
    /// Returns how many channels `id` is now subscribed to.
    pub fn subscribe(&self, id: u64, channel: Bytes, sender: &MessageSender) -> usize {
        let mut registry = self.registry.lock();
        registry
            .channels
            .entry(channel.clone())
            .or_default()
            .insert(id, sender.clone());
        registry.subscriptions.entry(id).or_default().insert(channel);
        registry.count(id)
    }

    /// Returns how many channels `id` is still subscribed to.
    pub fn unsubscribe(&self, id: u64, channel: &[u8]) -> usize {
        let mut registry = self.registry.lock();
        registry.detach(id, channel);

        if let Some(channels) = registry.subscriptions.get_mut(&id) {
            channels.remove(channel);
            if channels.is_empty() {
                registry.subscriptions.remove(&id);
            }
        }
        registry.count(id)
    }

    /// Drops every subscription held by `id`.
    pub fn unsubscribe_all(&self, id: u64) {
        let mut registry = self.registry.lock();
        if let Some(channels) = registry.subscriptions.remove(&id) {
            for channel in channels {
                registry.detach(id, &channel);
            }
        }
    }

    /// Channels `id` is subscribed to, sorted.
    pub fn channels_of(&self, id: u64) -> Vec<Bytes> {
        let registry = self.registry.lock();
        let mut channels: Vec<Bytes> = registry
            .subscriptions
            .get(&id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        channels.sort();
        channels
    }

    /// Sends `message` to every subscriber of `channel`.
    ///
    /// Returns the number of subscribers whose queue accepted it.
    pub fn publish(&self, channel: &[u8], message: Bytes) -> usize {
        let registry = self.registry.lock();
        let Some(subscribers) = registry.channels.get(channel) else {
            return 0;
        };

        let frame = RespValue::bulk_array([
            Bytes::from_static(b"message"),
            Bytes::copy_from_slice(channel),
            message,
        ]);
        let delivered = subscribers
            .values()
            .filter(|sender| sender.send(frame.clone()).is_ok())
            .count();

        trace!(
            channel = %String::from_utf8_lossy(channel),
            delivered,
            "Published message"
        );
        delivered
    }

    /// Number of subscribers on `channel`.
    pub fn subscribers(&self, channel: &[u8]) -> usize {
        self.registry.lock().channels.get(channel).map_or(0, HashMap::len)
    }

    /// Number of channels with at least one subscriber.
    pub fn channel_count(&self) -> usize {
        self.registry.lock().channels.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn b(s: &str) -> Bytes {
        Bytes::from(s.to_string())
    }

    #[test]
    fn test_publish_without_subscribers() {
        let pubsub = PubSub::new();
        assert_eq!(pubsub.publish(b"news", b("hi")), 0);
    }

    #[test]
    fn test_subscribe_counts_and_delivery() {
        let pubsub = PubSub::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = pubsub.register();

        assert_eq!(pubsub.subscribe(id, b("news"), &tx), 1);
        assert_eq!(pubsub.subscribe(id, b("sport"), &tx), 2);
        // Already subscribed.
        assert_eq!(pubsub.subscribe(id, b("news"), &tx), 2);

        assert_eq!(pubsub.publish(b"news", b("hi")), 1);
        assert_eq!(
            rx.try_recv().unwrap(),
            RespValue::bulk_array([b("message"), b("news"), b("hi")])
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_unsubscribe_drops_empty_channels() {
        let pubsub = PubSub::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let (a, c) = (pubsub.register(), pubsub.register());

        pubsub.subscribe(a, b("news"), &tx);
        pubsub.subscribe(c, b("news"), &tx);
        assert_eq!(pubsub.subscribers(b"news"), 2);

        assert_eq!(pubsub.unsubscribe(a, b"news"), 0);
        assert_eq!(pubsub.subscribers(b"news"), 1);
        // Not subscribed, nothing changes.
        assert_eq!(pubsub.unsubscribe(a, b"news"), 0);

        assert_eq!(pubsub.unsubscribe(c, b"news"), 0);
        assert_eq!(pubsub.channel_count(), 0);
    }

    #[test]
    fn test_unsubscribe_all() {
        let pubsub = PubSub::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let id = pubsub.register();

        pubsub.subscribe(id, b("b"), &tx);
        pubsub.subscribe(id, b("a"), &tx);
        assert_eq!(pubsub.channels_of(id), vec![b("a"), b("b")]);

        pubsub.unsubscribe_all(id);
        assert!(pubsub.channels_of(id).is_empty());
        assert_eq!(pubsub.channel_count(), 0);
    }

    #[test]
    fn test_closed_queue_is_not_counted() {
        let pubsub = PubSub::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let id = pubsub.register();
        pubsub.subscribe(id, b("news"), &tx);

        drop(rx);
        assert_eq!(pubsub.publish(b"news", b("hi")), 0);
    }
}
