//! Message envelope for the exclusive-driver sync protocol.
//!
//! Wire format (bincode-encoded):
//! ```text
//! ┌──────────┬──────────┬──────────┬────────────────────┐
//! │ topic    │ kind     │ origin   │ payload (optional) │
//! │ string   │ 1 byte   │ varint   │ JSON bytes         │
//! └──────────┴──────────┴──────────┴────────────────────┘
//! ```
//!
//! The payload is opaque to the protocol. Widgets pick their own state shape
//! and we carry it as a JSON document so any serde type round-trips.
//!
//! The relay connection wraps messages in [`RelayFrame`] so the same codec
//! serves both the in-process hub and the WebSocket relay.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Message kinds of the sync protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageKind {
    /// A peer has just subscribed and asks to be brought up to date
    Hello = 1,
    /// The sender claims driver status for the topic
    Lock = 2,
    /// The sender gives up driver status
    Unlock = 3,
    /// Full replicated state produced by the driver
    State = 4,
}

/// Identifies one display (one tile of the wall).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(pub u32);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer-{}", self.0)
    }
}

/// Name of one independently arbitrated value or collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Topic(String);

impl Topic {
    /// Validate and wrap a topic identifier.
    ///
    /// Topics end up embedded in derived child topics and log lines, so we
    /// reject empty names and names containing whitespace up front.
    pub fn new(id: impl Into<String>) -> Result<Self, ProtocolError> {
        let id = id.into();
        if id.is_empty() || id.chars().any(char::is_whitespace) {
            return Err(ProtocolError::InvalidTopic(id));
        }
        Ok(Self(id))
    }

    /// Derive the topic of a child entity: `<parent>_<child>`.
    pub fn child(&self, child_id: &str) -> Result<Self, ProtocolError> {
        Self::new(format!("{}_{}", self.0, child_id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque application state carried by `STATE` messages (JSON bytes).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload(Vec<u8>);

impl Payload {
    /// Serialize an application value into a payload.
    pub fn encode<T: Serialize>(value: &T) -> Result<Self, ProtocolError> {
        serde_json::to_vec(value)
            .map(Self)
            .map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    /// Deserialize the payload back into an application value.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        serde_json::from_slice(&self.0).map_err(|e| ProtocolError::Deserialization(e.to_string()))
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Top-level protocol message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub topic: Topic,
    pub kind: MessageKind,
    /// Sending peer, used to drop our own broadcasts on delivery
    pub origin: PeerId,
    /// Present only on `STATE`
    pub payload: Option<Payload>,
}

impl Message {
    /// Create a join announcement.
    pub fn hello(topic: Topic, origin: PeerId) -> Self {
        Self { topic, kind: MessageKind::Hello, origin, payload: None }
    }

    /// Create a driver claim.
    pub fn lock(topic: Topic, origin: PeerId) -> Self {
        Self { topic, kind: MessageKind::Lock, origin, payload: None }
    }

    /// Create a driver release.
    pub fn unlock(topic: Topic, origin: PeerId) -> Self {
        Self { topic, kind: MessageKind::Unlock, origin, payload: None }
    }

    /// Create a state message carrying `payload`.
    pub fn state(topic: Topic, origin: PeerId, payload: Payload) -> Self {
        Self { topic, kind: MessageKind::State, origin, payload: Some(payload) }
    }

    /// Serialize to binary wire format.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    /// Deserialize from binary wire format.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (msg, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| ProtocolError::Deserialization(e.to_string()))?;
        Ok(msg)
    }
}

/// Frames exchanged between a peer and the WebSocket relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RelayFrame {
    /// First frame of a connection: binds the connection to a peer id
    Join { peer: PeerId },
    Subscribe { topic: Topic },
    Unsubscribe { topic: Topic },
    /// Client to relay: fan this message out to the topic's subscribers
    Publish(Message),
    /// Relay to client: a message published on a subscribed topic
    Deliver(Message),
    Ping,
    Pong,
    /// Relay to client: another connection joined with the same peer id
    Duplicate,
}

impl RelayFrame {
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (frame, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| ProtocolError::Deserialization(e.to_string()))?;
        Ok(frame)
    }
}

/// Protocol errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Deserialization error: {0}")]
    Deserialization(String),
    #[error("Invalid topic identifier: {0:?}")]
    InvalidTopic(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topic(id: &str) -> Topic {
        Topic::new(id).unwrap()
    }

    #[test]
    fn test_state_message_roundtrip() {
        let payload = Payload::encode(&serde_json::json!({ "x": 3 })).unwrap();
        let msg = Message::state(topic("t1"), PeerId(7), payload.clone());

        let decoded = Message::decode(&msg.encode().unwrap()).unwrap();

        assert_eq!(decoded.kind, MessageKind::State);
        assert_eq!(decoded.origin, PeerId(7));
        assert_eq!(decoded.topic.as_str(), "t1");
        let value: serde_json::Value = decoded.payload.unwrap().decode().unwrap();
        assert_eq!(value["x"], 3);
    }

    #[test]
    fn test_control_messages_have_no_payload() {
        for msg in [
            Message::hello(topic("t"), PeerId(1)),
            Message::lock(topic("t"), PeerId(1)),
            Message::unlock(topic("t"), PeerId(1)),
        ] {
            let decoded = Message::decode(&msg.encode().unwrap()).unwrap();
            assert!(decoded.payload.is_none());
            assert_eq!(decoded, msg);
        }
    }

    #[test]
    fn test_topic_validation() {
        assert!(Topic::new("thr0w_map_main").is_ok());
        assert_eq!(Topic::new(""), Err(ProtocolError::InvalidTopic(String::new())));
        assert!(Topic::new("has space").is_err());
        assert!(Topic::new("tab\there").is_err());
    }

    #[test]
    fn test_child_topic_is_deterministic() {
        let parent = topic("windows_wall");
        assert_eq!(parent.child("a1").unwrap().as_str(), "windows_wall_a1");
        assert_eq!(parent.child("a1").unwrap(), parent.child("a1").unwrap());
        assert!(parent.child("bad id").is_err());
    }

    #[test]
    fn test_payload_decode_type_mismatch() {
        let payload = Payload::encode(&"text").unwrap();
        let result: Result<u32, _> = payload.decode();
        assert!(matches!(result, Err(ProtocolError::Deserialization(_))));
    }

    #[test]
    fn test_decode_invalid_bytes() {
        let garbage = vec![0xFF, 0xFE, 0xFD];
        assert!(Message::decode(&garbage).is_err());
        assert!(RelayFrame::decode(&garbage).is_err());
    }

    #[test]
    fn test_relay_frame_wraps_message() {
        let msg = Message::lock(topic("t"), PeerId(2));
        let frame = RelayFrame::Publish(msg.clone());
        match RelayFrame::decode(&frame.encode().unwrap()).unwrap() {
            RelayFrame::Publish(inner) => assert_eq!(inner, msg),
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[test]
    fn test_message_kind_values() {
        assert_eq!(MessageKind::Hello as u8, 1);
        assert_eq!(MessageKind::Lock as u8, 2);
        assert_eq!(MessageKind::Unlock as u8, 3);
        assert_eq!(MessageKind::State as u8, 4);
    }

    #[test]
    fn test_control_message_size_small() {
        let encoded = Message::unlock(topic("thr0w_leaflet_main"), PeerId(12)).encode().unwrap();
        assert!(encoded.len() < 32, "Encoded size {} too large", encoded.len());
    }

    #[test]
    fn test_peer_id_display() {
        assert_eq!(PeerId(4).to_string(), "peer-4");
    }
}
