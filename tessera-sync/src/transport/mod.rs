//! Channel transport contract and its implementations.
//!
//! The core only needs three operations: subscribe to a topic, broadcast a
//! message to the topic's subscribers, and unsubscribe. Deliveries for all
//! of a peer's subscriptions land in one [`Inbox`], which the peer's event
//! loop drains one message at a time.
//!
//! Every transport here delivers to *all* subscribers, including the sender.
//! Self-delivery is filtered by the sync primitive using the message origin.
//!
//! - [`hub`]: in-process fan-out with optional fault injection
//! - [`relay`]: WebSocket client for the `tessera-relay` server

pub mod hub;
pub mod relay;

use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::protocol::{Message, PeerId, ProtocolError, Topic};

/// Receiving end of a peer's deliveries, across all of its topics.
pub type Inbox = mpsc::UnboundedReceiver<Arc<Message>>;

/// Sending end of a peer's inbox, held by the transport.
pub(crate) type InboxSender = mpsc::UnboundedSender<Arc<Message>>;

/// Token returned by [`Transport::subscribe`], consumed by `unsubscribe`.
#[derive(Debug, PartialEq, Eq)]
pub struct SubscriptionHandle {
    id: u64,
    topic: Topic,
}

impl SubscriptionHandle {
    pub(crate) fn new(id: u64, topic: Topic) -> Self {
        Self { id, topic }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn topic(&self) -> &Topic {
        &self.topic
    }
}

/// Point-to-multipoint broadcast scoped to a topic.
///
/// Implementations must not block: `broadcast` enqueues and returns.
pub trait Transport: Send + Sync {
    /// Peer id this endpoint publishes as.
    fn local_peer(&self) -> PeerId;

    /// Start receiving the topic's messages in this peer's inbox.
    fn subscribe(&self, topic: &Topic) -> Result<SubscriptionHandle, TransportError>;

    /// Deliver `message` to every current subscriber of `message.topic`.
    fn broadcast(&self, message: Message) -> Result<(), TransportError>;

    /// Stop receiving the subscription's topic.
    fn unsubscribe(&self, handle: SubscriptionHandle);
}

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Transport closed")]
    Closed,
    #[error("Connection failed: {0}")]
    Connect(String),
    #[error("Peer {0} is not connected")]
    UnknownPeer(PeerId),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}
