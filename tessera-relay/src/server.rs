//! WebSocket relay with topic-based routing.
//!
//! Architecture:
//! ```text
//! Peer 1 ──┐                    ┌── TopicGroup "map"      ──┐
//!           ├── Connection ──────┤                           ├──► every subscriber
//! Peer 2 ──┘   (join, stamp      └── TopicGroup "map_oob"  ──┘    (sender included)
//!               origin)
//! ```
//!
//! Each connection:
//! - binds to one peer id with its first `Join` frame
//! - owns one forwarding task per subscribed topic, feeding an outbound queue
//! - overwrites the `origin` of everything it publishes with its peer id
//!
//! A second connection joining with the same peer id replaces the first one,
//! which is told `Duplicate` and closed.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use tessera_sync::{PeerId, ProtocolError, RelayFrame, Topic};

use crate::fanout::{Frame, TopicRegistry};

/// Relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Maximum simultaneously joined peers
    pub max_peers: usize,
    /// Frames buffered per subscriber before the oldest are dropped
    pub topic_capacity: usize,
    /// Ping interval in seconds
    pub heartbeat_secs: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9190".to_string(),
            max_peers: 256,
            topic_capacity: 256,
            heartbeat_secs: 30,
        }
    }
}

/// Relay statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_frames: u64,
    pub total_bytes: u64,
    pub messages_relayed: u64,
    pub frames_lagged: u64,
    pub active_peers: usize,
    pub active_topics: usize,
}

/// Relay errors.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

#[derive(Default)]
struct AtomicRelayStats {
    total_connections: AtomicU64,
    active_connections: AtomicU64,
    total_frames: AtomicU64,
    total_bytes: AtomicU64,
    messages_relayed: AtomicU64,
    frames_lagged: AtomicU64,
}

/// Work for a connection's writer.
enum Outbound {
    Frame(Frame),
    /// Send nothing more and close
    Close,
}

struct PeerSlot {
    connection: u64,
    outbound: mpsc::UnboundedSender<Outbound>,
}

/// State shared by all connections.
struct Shared {
    config: RelayConfig,
    topics: TopicRegistry,
    peers: RwLock<HashMap<PeerId, PeerSlot>>,
    stats: AtomicRelayStats,
    next_connection: AtomicU64,
}

/// The relay server.
pub struct RelayServer {
    shared: Arc<Shared>,
}

impl RelayServer {
    pub fn new(config: RelayConfig) -> Self {
        let topics = TopicRegistry::new(config.topic_capacity);
        Self {
            shared: Arc::new(Shared {
                config,
                topics,
                peers: RwLock::new(HashMap::new()),
                stats: AtomicRelayStats::default(),
                next_connection: AtomicU64::new(0),
            }),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(RelayConfig::default())
    }

    pub fn config(&self) -> &RelayConfig {
        &self.shared.config
    }

    /// Bind the configured address and serve forever.
    pub async fn run(&self) -> Result<(), RelayError> {
        let listener = TcpListener::bind(&self.shared.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Accept connections from an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), RelayError> {
        log::info!("Relay listening on {}", listener.local_addr()?);

        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let shared = self.shared.clone();
            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(stream, addr, shared).await {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    /// Snapshot of relay statistics.
    pub async fn stats(&self) -> RelayStats {
        let shared = &self.shared;
        RelayStats {
            total_connections: shared.stats.total_connections.load(Ordering::Relaxed),
            active_connections: shared.stats.active_connections.load(Ordering::Relaxed),
            total_frames: shared.stats.total_frames.load(Ordering::Relaxed),
            total_bytes: shared.stats.total_bytes.load(Ordering::Relaxed),
            messages_relayed: shared.stats.messages_relayed.load(Ordering::Relaxed),
            frames_lagged: shared.stats.frames_lagged.load(Ordering::Relaxed),
            active_peers: shared.peers.read().await.len(),
            active_topics: shared.topics.topic_count().await,
        }
    }

    /// Handle a single WebSocket connection.
    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        shared: Arc<Shared>,
    ) -> Result<(), RelayError> {
        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();
        log::info!("WebSocket connection established from {addr}");

        shared.stats.total_connections.fetch_add(1, Ordering::Relaxed);
        shared.stats.active_connections.fetch_add(1, Ordering::Relaxed);

        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let mut connection = Connection {
            id: shared.next_connection.fetch_add(1, Ordering::Relaxed),
            peer: None,
            outbound: out_tx,
            forwarders: HashMap::new(),
            shared: shared.clone(),
        };

        let period = Duration::from_secs(shared.config.heartbeat_secs.max(1));
        let mut heartbeat = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

        let result = loop {
            tokio::select! {
                msg = ws_receiver.next() => {
                    match msg {
                        Some(Ok(WsMessage::Binary(data))) => {
                            shared.stats.total_frames.fetch_add(1, Ordering::Relaxed);
                            shared.stats.total_bytes.fetch_add(data.len() as u64, Ordering::Relaxed);
                            match RelayFrame::decode(&data) {
                                Ok(frame) => {
                                    if !connection.handle_frame(frame).await {
                                        break Ok(());
                                    }
                                }
                                Err(e) => log::debug!("Discarding malformed frame from {addr}: {e}"),
                            }
                        }
                        Some(Ok(WsMessage::Close(_))) | None => break Ok(()),
                        Some(Err(e)) => break Err(e.into()),
                        _ => {}
                    }
                }
                out = out_rx.recv() => {
                    match out {
                        Some(Outbound::Frame(bytes)) => {
                            if let Err(e) = ws_sender.send(WsMessage::Binary(bytes.to_vec().into())).await {
                                break Err(e.into());
                            }
                        }
                        Some(Outbound::Close) | None => {
                            let _ = ws_sender.close().await;
                            break Ok(());
                        }
                    }
                }
                _ = heartbeat.tick() => {
                    let ping = match RelayFrame::Ping.encode() {
                        Ok(bytes) => bytes,
                        Err(e) => break Err(e.into()),
                    };
                    if let Err(e) = ws_sender.send(WsMessage::Binary(ping.into())).await {
                        break Err(e.into());
                    }
                }
            }
        };

        connection.close().await;
        shared.stats.active_connections.fetch_sub(1, Ordering::Relaxed);
        log::info!("Connection from {addr} closed");
        result
    }
}

/// Per-connection state.
struct Connection {
    id: u64,
    peer: Option<PeerId>,
    outbound: mpsc::UnboundedSender<Outbound>,
    /// Forwarding task per subscribed topic
    forwarders: HashMap<Topic, JoinHandle<()>>,
    shared: Arc<Shared>,
}

impl Connection {
    /// Process one client frame. Returns `false` to close the connection.
    async fn handle_frame(&mut self, frame: RelayFrame) -> bool {
        match frame {
            RelayFrame::Join { peer } => return self.join(peer).await,
            RelayFrame::Ping => self.send(RelayFrame::Pong),
            RelayFrame::Pong => log::trace!("Pong from connection {}", self.id),
            RelayFrame::Deliver(_) | RelayFrame::Duplicate => {
                log::debug!("Ignoring server-only frame from connection {}", self.id);
            }
            RelayFrame::Subscribe { topic } => self.subscribe(topic).await,
            RelayFrame::Unsubscribe { topic } => self.unsubscribe(&topic).await,
            RelayFrame::Publish(mut message) => {
                let Some(peer) = self.peer else {
                    log::debug!("Publish before join on connection {}", self.id);
                    return true;
                };
                message.origin = peer;
                if let Some(group) = self.shared.topics.get(&message.topic).await {
                    match group.publish(message) {
                        Ok(_) => {
                            self.shared.stats.messages_relayed.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(e) => log::warn!("Failed to relay message from {peer}: {e}"),
                    }
                }
            }
        }
        true
    }

    async fn join(&mut self, peer: PeerId) -> bool {
        if let Some(current) = self.peer {
            log::debug!("Connection {} already joined as {current}", self.id);
            return true;
        }

        let mut peers = self.shared.peers.write().await;
        if !peers.contains_key(&peer) && peers.len() >= self.shared.config.max_peers {
            log::warn!("Rejecting {peer}: relay is full ({} peers)", peers.len());
            return false;
        }
        let slot = PeerSlot { connection: self.id, outbound: self.outbound.clone() };
        if let Some(previous) = peers.insert(peer, slot) {
            log::warn!("{peer} joined again; closing its previous connection");
            if let Ok(bytes) = RelayFrame::Duplicate.encode() {
                let _ = previous.outbound.send(Outbound::Frame(Arc::new(bytes)));
            }
            let _ = previous.outbound.send(Outbound::Close);
        }
        self.peer = Some(peer);
        log::info!("{peer} joined on connection {}", self.id);
        true
    }

    async fn subscribe(&mut self, topic: Topic) {
        let Some(peer) = self.peer else {
            log::debug!("Subscribe before join on connection {}", self.id);
            return;
        };
        if self.forwarders.contains_key(&topic) {
            return;
        }
        let mut rx = self.shared.topics.subscribe(&topic, self.id).await;
        let outbound = self.outbound.clone();
        let shared = self.shared.clone();
        let task_topic = topic.clone();

        let forwarder = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(bytes) => {
                        if outbound.send(Outbound::Frame(bytes)).is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        shared.stats.frames_lagged.fetch_add(n, Ordering::Relaxed);
                        log::warn!("{peer} lagged {n} frames behind on {task_topic}");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        self.forwarders.insert(topic.clone(), forwarder);
        log::debug!("{peer} subscribed to {topic}");
    }

    async fn unsubscribe(&mut self, topic: &Topic) {
        let Some(forwarder) = self.forwarders.remove(topic) else {
            return;
        };
        forwarder.abort();
        if self.shared.topics.unsubscribe(topic, self.id).await {
            log::debug!("Topic {topic} has no subscribers left");
        }
        log::debug!("Connection {} unsubscribed from {topic}", self.id);
    }

    fn send(&self, frame: RelayFrame) {
        match frame.encode() {
            Ok(bytes) => {
                let _ = self.outbound.send(Outbound::Frame(Arc::new(bytes)));
            }
            Err(e) => log::warn!("Failed to encode frame: {e}"),
        }
    }

    /// Drop every subscription and the peer registration.
    async fn close(&mut self) {
        let topics: Vec<Topic> = self.forwarders.keys().cloned().collect();
        for topic in &topics {
            self.unsubscribe(topic).await;
        }
        if let Some(peer) = self.peer {
            let mut peers = self.shared.peers.write().await;
            // A duplicate join may already own the slot.
            if peers.get(&peer).is_some_and(|slot| slot.connection == self.id) {
                peers.remove(&peer);
            }
        }
    }
}
