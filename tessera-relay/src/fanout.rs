//! Per-topic fan-out to every subscribed connection.
//!
//! Uses tokio broadcast channels: a publish encodes the `Deliver` frame once
//! and every subscriber's forwarding task receives the same `Arc`ed bytes.
//! A subscriber that falls more than `capacity` frames behind loses the
//! oldest ones, which the sync protocol tolerates like any other loss.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

use tessera_sync::{Message, PeerId, ProtocolError, RelayFrame, Topic};

/// Encoded frame shared by all receivers.
pub type Frame = Arc<Vec<u8>>;

/// Statistics for one topic group.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupStats {
    pub messages_sent: u64,
    pub subscribers: usize,
}

/// Fan-out group for a single topic.
pub struct TopicGroup {
    sender: broadcast::Sender<Frame>,
    /// Subscribed connection ids
    subscribers: RwLock<HashSet<u64>>,
    messages_sent: AtomicU64,
}

impl TopicGroup {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            subscribers: RwLock::new(HashSet::new()),
            messages_sent: AtomicU64::new(0),
        }
    }

    /// Add a connection and return its receiver.
    pub async fn subscribe(&self, connection: u64) -> broadcast::Receiver<Frame> {
        self.subscribers.write().await.insert(connection);
        self.sender.subscribe()
    }

    pub async fn unsubscribe(&self, connection: u64) -> bool {
        self.subscribers.write().await.remove(&connection)
    }

    /// Deliver `message` to every subscriber, the publisher included.
    ///
    /// Returns the number of receivers.
    pub fn publish(&self, message: Message) -> Result<usize, ProtocolError> {
        let encoded = RelayFrame::Deliver(message).encode()?;
        let count = self.sender.send(Arc::new(encoded)).unwrap_or(0);
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        Ok(count)
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }

    pub async fn stats(&self) -> GroupStats {
        GroupStats {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            subscribers: self.subscribers.read().await.len(),
        }
    }
}

/// Maps topics to their fan-out groups.
pub struct TopicRegistry {
    topics: RwLock<HashMap<Topic, Arc<TopicGroup>>>,
    capacity: usize,
}

impl TopicRegistry {
    pub fn new(capacity: usize) -> Self {
        Self { topics: RwLock::new(HashMap::new()), capacity }
    }

    /// Add `connection` to the topic's group, creating the group if needed.
    ///
    /// Runs under the registry's write lock so that a concurrent
    /// [`unsubscribe`](Self::unsubscribe) cannot drop the group in between.
    pub async fn subscribe(&self, topic: &Topic, connection: u64) -> broadcast::Receiver<Frame> {
        let mut topics = self.topics.write().await;
        let group = topics
            .entry(topic.clone())
            .or_insert_with(|| Arc::new(TopicGroup::new(self.capacity)));
        group.subscribe(connection).await
    }

    pub async fn get(&self, topic: &Topic) -> Option<Arc<TopicGroup>> {
        self.topics.read().await.get(topic).cloned()
    }

    /// Remove `connection` and drop the group once its last subscriber is gone.
    ///
    /// Returns whether the group was dropped.
    pub async fn unsubscribe(&self, topic: &Topic, connection: u64) -> bool {
        let mut topics = self.topics.write().await;
        let Some(group) = topics.get(topic) else {
            return false;
        };
        group.unsubscribe(connection).await;
        if group.subscriber_count().await == 0 {
            topics.remove(topic);
            return true;
        }
        false
    }

    pub async fn topic_count(&self) -> usize {
        self.topics.read().await.len()
    }
}
