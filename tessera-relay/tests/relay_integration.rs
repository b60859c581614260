//! End-to-end tests: real relay, real WebSocket transports.

use std::sync::Arc;
use serde::{Deserialize, Serialize};
use tessera_relay::{RelayConfig, RelayServer};
use tessera_sync::{
    ConnectionState, DriverState, SyncConfig, Inbox, Message, MessageKind, PeerId, RelayTransport, Replica,
    SyncPrimitive, Topic, Transport,
};
use tokio::time::{timeout, Duration};

#[derive(Debug, Default)]
struct Dial {
    x: i64,
}

#[derive(Debug, Serialize, Deserialize)]
struct DialState {
    x: i64,
}

impl Replica for Dial {
    type State = DialState;

    fn produce_state(&self) -> DialState {
        DialState { x: self.x }
    }

    fn apply_state(&mut self, state: DialState) {
        self.x = state.x;
    }
}

/// Start a relay on a free port, return it and its URL.
async fn start_relay() -> (Arc<RelayServer>, String) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = Arc::new(RelayServer::new(RelayConfig {
        bind_addr: format!("127.0.0.1:{port}"),
        ..RelayConfig::default()
    }));
    let serving = server.clone();
    tokio::spawn(async move {
        serving.serve(listener).await.unwrap();
    });
    (server, format!("ws://127.0.0.1:{port}"))
}

async fn next_message(inbox: &mut Inbox) -> Arc<Message> {
    timeout(Duration::from_secs(2), inbox.recv())
        .await
        .expect("delivery within timeout")
        .expect("inbox open")
}

/// Join `topic` and wait for our own HELLO, which proves the relay has
/// registered the subscription.
async fn join(url: &str, id: u32, topic: &Topic) -> (SyncPrimitive<Dial>, Inbox) {
    let (transport, mut inbox) = RelayTransport::connect(url, PeerId(id)).await.unwrap();
    let mut dial = SyncPrimitive::new(topic.clone(), Dial::default(), transport).unwrap();
    loop {
        let msg = next_message(&mut inbox).await;
        let own_hello = msg.kind == MessageKind::Hello && msg.origin == PeerId(id);
        dial.handle(&msg);
        if own_hello {
            break;
        }
    }
    (dial, inbox)
}

#[tokio::test]
async fn test_relay_accepts_connections() {
    let (_server, url) = start_relay().await;
    let result = tokio_tungstenite::connect_async(&url).await;
    assert!(result.is_ok(), "Should connect to relay");
}

#[tokio::test]
async fn test_connect_from_config() {
    let (_server, url) = start_relay().await;
    let config = SyncConfig { peer_id: PeerId(4), relay_url: url.clone(), ..SyncConfig::default() };

    let (transport, mut inbox) = RelayTransport::connect_with(&config).await.unwrap();
    assert_eq!(transport.local_peer(), PeerId(4));
    assert_eq!(transport.url(), url);
    assert_eq!(transport.connection_state(), ConnectionState::Connected);

    let topic = Topic::new("configured").unwrap();
    let _dial = SyncPrimitive::new(topic, Dial::default(), transport.clone()).unwrap();
    let hello = next_message(&mut inbox).await;
    assert_eq!((hello.kind, hello.origin), (MessageKind::Hello, PeerId(4)));
}

#[tokio::test]
async fn test_drive_and_release_across_relay() {
    let (_server, url) = start_relay().await;
    let topic = Topic::new("thr0w_leaflet_main").unwrap();

    let (mut a, _inbox_a) = join(&url, 1, &topic).await;
    let (mut b, mut inbox_b) = join(&url, 2, &topic).await;

    a.replica_mut().x = 5;
    a.drive().unwrap();
    a.release().unwrap();

    let mut kinds = Vec::new();
    while kinds.len() < 3 {
        let msg = next_message(&mut inbox_b).await;
        assert_eq!(msg.origin, PeerId(1));
        kinds.push(msg.kind);
        b.handle(&msg);
    }

    assert_eq!(kinds, vec![MessageKind::Lock, MessageKind::State, MessageKind::Unlock]);
    assert_eq!(b.replica().x, 5);
    assert_eq!(b.state(), DriverState::Idle { last_driver: false });
}

#[tokio::test]
async fn test_late_joiner_catches_up_through_relay() {
    let (_server, url) = start_relay().await;
    let topic = Topic::new("svg_main").unwrap();

    let (mut a, mut inbox_a) = join(&url, 1, &topic).await;
    a.replica_mut().x = 3;
    a.drive().unwrap();
    a.release().unwrap();

    let (transport_c, mut inbox_c) = RelayTransport::connect(url.as_str(), PeerId(3)).await.unwrap();
    let mut c = SyncPrimitive::new(topic.clone(), Dial::default(), transport_c).unwrap();

    // A answers C's HELLO.
    loop {
        let msg = next_message(&mut inbox_a).await;
        a.handle(&msg);
        if msg.kind == MessageKind::Hello && msg.origin == PeerId(3) {
            break;
        }
    }

    loop {
        let msg = next_message(&mut inbox_c).await;
        c.handle(&msg);
        if msg.kind == MessageKind::State {
            break;
        }
    }
    assert_eq!(c.replica().x, 3);
    assert!(!c.is_locked_by_other());
}

#[tokio::test]
async fn test_relay_stamps_origin() {
    let (_server, url) = start_relay().await;
    let topic = Topic::new("stamp").unwrap();

    let (_b, mut inbox_b) = join(&url, 2, &topic).await;
    let (forger, _inbox) = RelayTransport::connect(url.as_str(), PeerId(1)).await.unwrap();
    forger.broadcast(Message::lock(topic.clone(), PeerId(2))).unwrap();

    let msg = next_message(&mut inbox_b).await;
    assert_eq!(msg.kind, MessageKind::Lock);
    assert_eq!(msg.origin, PeerId(1));
}

#[tokio::test]
async fn test_duplicate_peer_closes_previous_connection() {
    let (server, url) = start_relay().await;

    let (first, _inbox1) = RelayTransport::connect(url.as_str(), PeerId(7)).await.unwrap();
    // Make sure the first join is registered before the second one.
    let topic = Topic::new("dup").unwrap();
    let (_witness, _witness_inbox) = join(&url, 8, &topic).await;
    first.ping().unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let (_second, _inbox2) = RelayTransport::connect(url.as_str(), PeerId(7)).await.unwrap();

    let closed = timeout(Duration::from_secs(2), async {
        while first.connection_state() != ConnectionState::Disconnected {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(closed.is_ok(), "first connection should be closed");
    assert!(server.stats().await.active_peers >= 2);
}
