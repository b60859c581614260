//! # tessera-sync: Exclusive-driver replication for tiled display walls
//!
//! Every tile of a wall renders the same content. At any moment one tile
//! *drives* a topic (it owns the user's gesture or the running animation)
//! and every other tile mirrors the state it streams.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐   ┌─────────────────────────┐
//! │ ArbitratedView   │   │ ReplicatedCollection    │
//! │ live/anim/status │   │ roster + one per entity │
//! └────────┬─────────┘   └────────────┬────────────┘
//!          └───────────┬──────────────┘
//!                      ▼
//!              ┌───────────────┐      HELLO / LOCK / UNLOCK / STATE
//!              │ SyncPrimitive │ ◄──────────────────────────────────►
//!              │ (per topic)   │
//!              └───────┬───────┘
//!                      ▼
//!              ┌───────────────┐      LocalHub (in-process)
//!              │ Transport     │ ───► RelayTransport (WebSocket)
//!              └───────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`]: Message envelope, topics, relay frames
//! - [`transport`]: Broadcast contract, in-process hub, relay client
//! - [`sync`]: The per-topic sync primitive
//! - [`arbitration`]: Live interaction vs. animation on one view
//! - [`collection`]: Replicated membership with per-entity topics
//! - [`animation`] / [`ticker`]: Fixed-step animation and its timer
//! - [`runtime`]: Per-peer event loop
//! - [`view`] / [`viewport`] / [`panel`]: Map camera, drawing viewport and floating panel payloads

pub mod protocol;
pub mod transport;
pub mod sync;
pub mod animation;
pub mod ticker;
pub mod arbitration;
pub mod collection;
pub mod runtime;
pub mod config;
pub mod view;
pub mod viewport;
pub mod panel;

// Re-exports for convenience
pub use protocol::{Message, MessageKind, Payload, PeerId, ProtocolError, RelayFrame, Topic};
pub use transport::hub::{HubEndpoint, HubStats, LocalHub};
pub use transport::relay::{ConnectionState, RelayTransport};
pub use transport::{Inbox, SubscriptionHandle, Transport, TransportError};
pub use sync::{DriverState, Outcome, Replica, SyncError, SyncPrimitive};
pub use animation::{Animation, Frame, Interpolate, Transition};
pub use ticker::Ticker;
pub use arbitration::{ArbitratedView, Motion, SharedView, StatusBoard, StatusRecord};
pub use collection::{Entity, ReplicatedCollection, Roster};
pub use runtime::{Peer, PeerEvent, Synchronized};
pub use config::SyncConfig;
pub use view::MapView;
pub use viewport::Viewport;
pub use panel::{Panel, PanelDescriptor, PanelState, WallBounds};
