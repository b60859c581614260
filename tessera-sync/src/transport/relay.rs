//! WebSocket client transport for the `tessera-relay` server.
//!
//! Provides:
//! - Connection setup (join with our peer id)
//! - Topic subscribe/unsubscribe frames
//! - Publish without awaiting (frames go through an unbounded queue to the
//!   writer task)
//! - Deliveries decoded by a reader task into the peer's [`Inbox`]
//!
//! The relay stamps the publishing connection's peer id as `origin`, so a
//! peer cannot impersonate another one.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use super::{Inbox, SubscriptionHandle, Transport, TransportError};
use crate::config::SyncConfig;
use crate::protocol::{Message, PeerId, RelayFrame, Topic};

/// Relay connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
}

/// Transport endpoint backed by a relay WebSocket connection.
pub struct RelayTransport {
    peer: PeerId,
    url: String,
    state: Arc<RwLock<ConnectionState>>,
    outgoing: mpsc::UnboundedSender<RelayFrame>,
    next_subscription: AtomicU64,
    /// Local subscription count per topic; the relay only sees the first
    /// subscribe and the last unsubscribe
    subscriptions: Mutex<HashMap<Topic, usize>>,
}

impl RelayTransport {
    /// Connect to the relay at `url` and join as `peer`.
    ///
    /// Spawns background tasks for reading and writing WebSocket frames.
    pub async fn connect(
        url: impl Into<String>,
        peer: PeerId,
    ) -> Result<(Arc<Self>, Inbox), TransportError> {
        let url = url.into();
        let state = Arc::new(RwLock::new(ConnectionState::Connecting));

        let (ws_stream, _) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<RelayFrame>();
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();

        // Join must be the first frame the relay sees.
        out_tx.send(RelayFrame::Join { peer }).map_err(|_| TransportError::Closed)?;

        // Connected before the tasks start, so a socket that closes at once
        // ends up Disconnected.
        *state.write().unwrap_or_else(PoisonError::into_inner) = ConnectionState::Connected;

        // Writer task: forward queued frames to the WebSocket
        let writer_state = state.clone();
        tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                let encoded = match frame.encode() {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        log::warn!("Dropping unencodable frame: {e}");
                        continue;
                    }
                };
                if ws_writer.send(WsMessage::Binary(encoded.into())).await.is_err() {
                    break;
                }
            }
            let _ = ws_writer.close().await;
            *writer_state.write().unwrap_or_else(PoisonError::into_inner) = ConnectionState::Disconnected;
        });

        // Reader task: decode deliveries into the inbox
        let reader_state = state.clone();
        let pong_tx = out_tx.clone();
        tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                match msg {
                    Ok(WsMessage::Binary(data)) => match RelayFrame::decode(&data) {
                        Ok(RelayFrame::Deliver(message)) => {
                            if inbox_tx.send(Arc::new(message)).is_err() {
                                break;
                            }
                        }
                        Ok(RelayFrame::Ping) => {
                            let _ = pong_tx.send(RelayFrame::Pong);
                        }
                        Ok(RelayFrame::Pong) => log::trace!("Relay pong for {peer}"),
                        Ok(RelayFrame::Duplicate) => {
                            log::warn!("Relay closed {peer}: another connection joined with the same id");
                            break;
                        }
                        Ok(other) => log::debug!("Ignoring unexpected relay frame {other:?}"),
                        Err(e) => log::debug!("Discarding malformed relay frame: {e}"),
                    },
                    Ok(WsMessage::Close(_)) | Err(_) => break,
                    _ => {}
                }
            }
            *reader_state.write().unwrap_or_else(PoisonError::into_inner) = ConnectionState::Disconnected;
            log::info!("Relay connection for {peer} closed");
        });

        log::info!("{peer} connected to relay {url}");

        let transport = Arc::new(Self {
            peer,
            url,
            state,
            outgoing: out_tx,
            next_subscription: AtomicU64::new(0),
            subscriptions: Mutex::new(HashMap::new()),
        });
        Ok((transport, inbox_rx))
    }

    /// Connect using the relay URL and peer id of `config`.
    pub async fn connect_with(config: &SyncConfig) -> Result<(Arc<Self>, Inbox), TransportError> {
        Self::connect(config.relay_url.as_str(), config.peer_id).await
    }

    /// Current connection state.
    pub fn connection_state(&self) -> ConnectionState {
        *self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Relay URL this transport connected to.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Send a heartbeat ping.
    pub fn ping(&self) -> Result<(), TransportError> {
        self.send(RelayFrame::Ping)
    }

    fn send(&self, frame: RelayFrame) -> Result<(), TransportError> {
        if self.connection_state() == ConnectionState::Disconnected {
            return Err(TransportError::Closed);
        }
        self.outgoing.send(frame).map_err(|_| TransportError::Closed)
    }
}

impl Transport for RelayTransport {
    fn local_peer(&self) -> PeerId {
        self.peer
    }

    fn subscribe(&self, topic: &Topic) -> Result<SubscriptionHandle, TransportError> {
        let first = {
            let mut subs = self.subscriptions.lock().unwrap_or_else(PoisonError::into_inner);
            let count = subs.entry(topic.clone()).or_insert(0);
            *count += 1;
            *count == 1
        };
        if first {
            self.send(RelayFrame::Subscribe { topic: topic.clone() })?;
        }
        let id = self.next_subscription.fetch_add(1, Ordering::Relaxed);
        Ok(SubscriptionHandle::new(id, topic.clone()))
    }

    fn broadcast(&self, message: Message) -> Result<(), TransportError> {
        self.send(RelayFrame::Publish(message))
    }

    fn unsubscribe(&self, handle: SubscriptionHandle) {
        let last = {
            let mut subs = self.subscriptions.lock().unwrap_or_else(PoisonError::into_inner);
            match subs.get_mut(handle.topic()) {
                Some(count) if *count > 1 => {
                    *count -= 1;
                    false
                }
                Some(_) => {
                    subs.remove(handle.topic());
                    true
                }
                None => false,
            }
        };
        if last {
            // A closed connection has no subscriptions left to remove.
            let _ = self.send(RelayFrame::Unsubscribe { topic: handle.topic().clone() });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_connect_refused() {
        // Port 9 (discard) is not expected to speak WebSocket.
        let result = RelayTransport::connect("ws://127.0.0.1:9", PeerId(1)).await;
        assert!(matches!(result, Err(TransportError::Connect(_))));
    }

    #[tokio::test]
    async fn test_immediate_close_reports_disconnected() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            let _ = ws.close(None).await;
        });

        let (transport, _inbox) =
            RelayTransport::connect(format!("ws://127.0.0.1:{port}"), PeerId(1)).await.unwrap();
        let closed = tokio::time::timeout(Duration::from_secs(2), async {
            while transport.connection_state() != ConnectionState::Disconnected {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        assert!(closed.is_ok(), "closed socket should end Disconnected");
        assert!(matches!(transport.ping(), Err(TransportError::Closed)));
    }

    #[test]
    fn test_connection_state_values() {
        assert_ne!(ConnectionState::Connecting, ConnectionState::Connected);
        assert_ne!(ConnectionState::Connected, ConnectionState::Disconnected);
    }
}
