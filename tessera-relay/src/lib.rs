//! # tessera-relay: Topic relay for tessera-sync peers
//!
//! A WebSocket server that gives wall tiles on different machines the
//! best-effort, per-topic broadcast channel the sync protocol expects.
//!
//! ## Modules
//!
//! - [`fanout`]: Per-topic broadcast groups
//! - [`server`]: Connection handling, peer registration, origin stamping

pub mod fanout;
pub mod server;

pub use fanout::{GroupStats, TopicGroup, TopicRegistry};
pub use server::{RelayConfig, RelayError, RelayServer, RelayStats};
