//! In-process broadcast hub.
//!
//! Every peer connected to the same [`LocalHub`] gets an [`Inbox`]; a
//! broadcast is copied (as an `Arc`) into the inbox of each subscriber of the
//! message's topic. Sending never awaits, which matches the requirement that
//! `drive()`/`release()` return immediately.
//!
//! A drop filter can be installed to simulate a best-effort medium: any
//! (message, recipient) pair the filter matches is silently discarded.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::mpsc;

use super::{Inbox, InboxSender, SubscriptionHandle, Transport, TransportError};
use crate::protocol::{Message, PeerId, Topic};

type DropFilter = Box<dyn Fn(&Message, PeerId) -> bool + Send + Sync>;

/// Statistics for monitoring hub traffic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HubStats {
    pub messages_sent: u64,
    pub deliveries: u64,
    pub messages_dropped: u64,
    pub active_peers: usize,
    pub active_topics: usize,
}

/// Lock-free counters, read via [`LocalHub::stats`].
#[derive(Default)]
struct AtomicHubStats {
    messages_sent: AtomicU64,
    deliveries: AtomicU64,
    messages_dropped: AtomicU64,
}

struct Subscriber {
    id: u64,
    peer: PeerId,
}

#[derive(Default)]
struct HubInner {
    /// Connected peers and their inboxes
    peers: RwLock<HashMap<PeerId, InboxSender>>,
    /// Subscribers per topic
    topics: RwLock<HashMap<Topic, Vec<Subscriber>>>,
    next_subscription: AtomicU64,
    drop_filter: RwLock<Option<DropFilter>>,
    stats: AtomicHubStats,
}

/// Shared in-process broadcast medium.
#[derive(Clone, Default)]
pub struct LocalHub {
    inner: Arc<HubInner>,
}

impl LocalHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect a peer, returning its transport endpoint and inbox.
    ///
    /// Connecting an already connected id replaces its inbox; messages for
    /// the old inbox stop flowing (the reconnect case).
    pub fn connect(&self, peer: PeerId) -> (Arc<HubEndpoint>, Inbox) {
        let (tx, rx) = mpsc::unbounded_channel();
        let replaced = self
            .inner
            .peers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(peer, tx)
            .is_some();
        if replaced {
            log::debug!("Hub: {peer} reconnected, previous inbox detached");
        }
        let endpoint = Arc::new(HubEndpoint { hub: self.inner.clone(), peer });
        (endpoint, rx)
    }

    /// Disconnect a peer and drop all of its subscriptions.
    pub fn disconnect(&self, peer: PeerId) {
        self.inner.peers.write().unwrap_or_else(PoisonError::into_inner).remove(&peer);
        let mut topics = self.inner.topics.write().unwrap_or_else(PoisonError::into_inner);
        for subscribers in topics.values_mut() {
            subscribers.retain(|s| s.peer != peer);
        }
        topics.retain(|_, subscribers| !subscribers.is_empty());
    }

    /// Discard every delivery for which `filter(message, recipient)` is true.
    pub fn drop_matching(&self, filter: impl Fn(&Message, PeerId) -> bool + Send + Sync + 'static) {
        *self.inner.drop_filter.write().unwrap_or_else(PoisonError::into_inner) = Some(Box::new(filter));
    }

    /// Remove the drop filter; the medium becomes lossless again.
    pub fn clear_drop_filter(&self) {
        *self.inner.drop_filter.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Number of subscriptions on a topic.
    pub fn subscriber_count(&self, topic: &Topic) -> usize {
        self.inner
            .topics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(topic)
            .map_or(0, Vec::len)
    }

    /// Snapshot of hub statistics.
    pub fn stats(&self) -> HubStats {
        let stats = &self.inner.stats;
        HubStats {
            messages_sent: stats.messages_sent.load(Ordering::Relaxed),
            deliveries: stats.deliveries.load(Ordering::Relaxed),
            messages_dropped: stats.messages_dropped.load(Ordering::Relaxed),
            active_peers: self.inner.peers.read().unwrap_or_else(PoisonError::into_inner).len(),
            active_topics: self.inner.topics.read().unwrap_or_else(PoisonError::into_inner).len(),
        }
    }
}

/// One peer's view of a [`LocalHub`].
pub struct HubEndpoint {
    hub: Arc<HubInner>,
    peer: PeerId,
}

impl Transport for HubEndpoint {
    fn local_peer(&self) -> PeerId {
        self.peer
    }

    fn subscribe(&self, topic: &Topic) -> Result<SubscriptionHandle, TransportError> {
        if !self.hub.peers.read().unwrap_or_else(PoisonError::into_inner).contains_key(&self.peer) {
            return Err(TransportError::UnknownPeer(self.peer));
        }
        let id = self.hub.next_subscription.fetch_add(1, Ordering::Relaxed);
        self.hub
            .topics
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(topic.clone())
            .or_default()
            .push(Subscriber { id, peer: self.peer });
        log::trace!("Hub: {} subscribed to {topic}", self.peer);
        Ok(SubscriptionHandle::new(id, topic.clone()))
    }

    fn broadcast(&self, message: Message) -> Result<(), TransportError> {
        let stats = &self.hub.stats;
        stats.messages_sent.fetch_add(1, Ordering::Relaxed);

        let recipients: Vec<PeerId> = self
            .hub
            .topics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&message.topic)
            .map(|subs| subs.iter().map(|s| s.peer).collect())
            .unwrap_or_default();

        let message = Arc::new(message);
        let filter = self.hub.drop_filter.read().unwrap_or_else(PoisonError::into_inner);
        let peers = self.hub.peers.read().unwrap_or_else(PoisonError::into_inner);
        for recipient in recipients {
            if filter.as_ref().is_some_and(|f| f(&*message, recipient)) {
                stats.messages_dropped.fetch_add(1, Ordering::Relaxed);
                continue;
            }
            match peers.get(&recipient) {
                Some(inbox) if inbox.send(message.clone()).is_ok() => {
                    stats.deliveries.fetch_add(1, Ordering::Relaxed);
                }
                _ => {
                    stats.messages_dropped.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        Ok(())
    }

    fn unsubscribe(&self, handle: SubscriptionHandle) {
        let mut topics = self.hub.topics.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(subscribers) = topics.get_mut(handle.topic()) {
            subscribers.retain(|s| s.id != handle.id());
            if subscribers.is_empty() {
                topics.remove(handle.topic());
            }
        }
        log::trace!("Hub: {} unsubscribed from {}", self.peer, handle.topic());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::MessageKind;

    fn topic(id: &str) -> Topic {
        Topic::new(id).unwrap()
    }

    #[test]
    fn test_fan_out_includes_sender() {
        let hub = LocalHub::new();
        let (a, mut inbox_a) = hub.connect(PeerId(1));
        let (b, mut inbox_b) = hub.connect(PeerId(2));
        let t = topic("t1");
        a.subscribe(&t).unwrap();
        b.subscribe(&t).unwrap();

        a.broadcast(Message::lock(t.clone(), PeerId(1))).unwrap();

        assert_eq!(inbox_a.try_recv().unwrap().kind, MessageKind::Lock);
        assert_eq!(inbox_b.try_recv().unwrap().origin, PeerId(1));
        assert_eq!(hub.stats().deliveries, 2);
    }

    #[test]
    fn test_topics_are_isolated() {
        let hub = LocalHub::new();
        let (a, _inbox_a) = hub.connect(PeerId(1));
        let (b, mut inbox_b) = hub.connect(PeerId(2));
        b.subscribe(&topic("map")).unwrap();

        a.broadcast(Message::hello(topic("svg"), PeerId(1))).unwrap();

        assert!(inbox_b.try_recv().is_err());
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let hub = LocalHub::new();
        let (a, _inbox_a) = hub.connect(PeerId(1));
        let (b, mut inbox_b) = hub.connect(PeerId(2));
        let t = topic("t1");
        let handle = b.subscribe(&t).unwrap();
        assert_eq!(hub.subscriber_count(&t), 1);

        b.unsubscribe(handle);
        a.broadcast(Message::unlock(t.clone(), PeerId(1))).unwrap();

        assert!(inbox_b.try_recv().is_err());
        assert_eq!(hub.subscriber_count(&t), 0);
        assert_eq!(hub.stats().active_topics, 0);
    }

    #[test]
    fn test_drop_filter_discards_matching() {
        let hub = LocalHub::new();
        let (a, _inbox_a) = hub.connect(PeerId(1));
        let (b, mut inbox_b) = hub.connect(PeerId(2));
        let t = topic("t1");
        b.subscribe(&t).unwrap();
        hub.drop_matching(|msg, to| msg.kind == MessageKind::Unlock && to == PeerId(2));

        a.broadcast(Message::unlock(t.clone(), PeerId(1))).unwrap();
        a.broadcast(Message::lock(t.clone(), PeerId(1))).unwrap();

        assert_eq!(inbox_b.try_recv().unwrap().kind, MessageKind::Lock);
        assert!(inbox_b.try_recv().is_err());
        assert_eq!(hub.stats().messages_dropped, 1);

        hub.clear_drop_filter();
        a.broadcast(Message::unlock(t, PeerId(1))).unwrap();
        assert_eq!(inbox_b.try_recv().unwrap().kind, MessageKind::Unlock);
    }

    #[test]
    fn test_disconnect_removes_subscriptions() {
        let hub = LocalHub::new();
        let (a, _inbox_a) = hub.connect(PeerId(1));
        let t = topic("t1");
        a.subscribe(&t).unwrap();

        hub.disconnect(PeerId(1));

        assert_eq!(hub.subscriber_count(&t), 0);
        assert!(matches!(a.subscribe(&t), Err(TransportError::UnknownPeer(PeerId(1)))));
        assert_eq!(hub.stats().active_peers, 0);
    }

    #[test]
    fn test_reconnect_replaces_inbox() {
        let hub = LocalHub::new();
        let (a, _inbox_a) = hub.connect(PeerId(1));
        let (b, mut old_inbox) = hub.connect(PeerId(2));
        let t = topic("t1");
        b.subscribe(&t).unwrap();

        let (_b2, mut new_inbox) = hub.connect(PeerId(2));
        a.broadcast(Message::hello(t, PeerId(1))).unwrap();

        assert!(old_inbox.try_recv().is_err());
        assert_eq!(new_inbox.try_recv().unwrap().kind, MessageKind::Hello);
    }
}
