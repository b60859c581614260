//! Peer configuration.

use std::time::Duration;

use crate::protocol::PeerId;

/// Default animation tick (roughly 30 frames per second).
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(33);

/// Configuration for one peer of the wall.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// This display's peer id
    pub peer_id: PeerId,
    /// Animation step interval
    pub tick_interval: Duration,
    /// Relay WebSocket URL, when peers talk through `tessera-relay`
    pub relay_url: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            peer_id: PeerId(0),
            tick_interval: DEFAULT_TICK_INTERVAL,
            relay_url: "ws://127.0.0.1:9190".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.tick_interval, Duration::from_millis(33));
        assert_eq!(config.relay_url, "ws://127.0.0.1:9190");

        let custom = SyncConfig { peer_id: PeerId(3), ..Default::default() };
        assert_eq!(custom.peer_id, PeerId(3));
        assert_eq!(custom.tick_interval, DEFAULT_TICK_INTERVAL);
    }
}
