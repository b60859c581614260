//! Per-peer event loop.
//!
//! Each peer is a single logical actor: transport deliveries and animation
//! ticks are merged into one stream of [`PeerEvent`]s and handled one at a
//! time, to completion. Nothing here awaits while a handler runs, so widget
//! state needs no locking beyond what [`crate::arbitration::SharedView`]
//! offers renderers.

use std::sync::Arc;
use tokio::sync::mpsc;

use crate::config::SyncConfig;
use crate::protocol::{Message, PeerId, Topic};
use crate::sync::Outcome;
use crate::ticker::Ticker;
use crate::transport::{Inbox, Transport};

/// Something that reacts to deliveries and ticks: a widget, a collection,
/// or a composite of several.
pub trait Synchronized {
    /// Process one delivered message.
    fn handle(&mut self, message: &Message) -> Outcome;

    /// A timer started for `topic` fired.
    fn on_tick(&mut self, _topic: &Topic) {}
}

/// Event yielded by [`Peer::next_event`].
#[derive(Debug, Clone)]
pub enum PeerEvent {
    Message(Arc<Message>),
    Tick(Topic),
}

/// A peer's transport endpoint together with its event sources.
pub struct Peer {
    transport: Arc<dyn Transport>,
    inbox: Inbox,
    ticks: mpsc::UnboundedReceiver<Topic>,
    ticker: Ticker,
}

impl Peer {
    pub fn new(transport: Arc<dyn Transport>, inbox: Inbox, config: &SyncConfig) -> Self {
        let (tick_tx, ticks) = mpsc::unbounded_channel();
        Self {
            transport,
            inbox,
            ticks,
            ticker: Ticker::new(tick_tx, config.tick_interval),
        }
    }

    pub fn id(&self) -> PeerId {
        self.transport.local_peer()
    }

    /// Transport handle to pass to widgets.
    pub fn transport(&self) -> Arc<dyn Transport> {
        self.transport.clone()
    }

    /// Ticker whose ticks come back through this peer's event stream.
    pub fn ticker(&self) -> Ticker {
        self.ticker.clone()
    }

    /// Wait for the next delivery or tick.
    ///
    /// Returns `None` once the transport has gone away; ticks alone do not
    /// keep a peer alive.
    pub async fn next_event(&mut self) -> Option<PeerEvent> {
        tokio::select! {
            biased;
            message = self.inbox.recv() => message.map(PeerEvent::Message),
            Some(topic) = self.ticks.recv() => Some(PeerEvent::Tick(topic)),
        }
    }

    /// Route one event to `target`.
    pub fn dispatch(target: &mut impl Synchronized, event: &PeerEvent) -> Option<Outcome> {
        match event {
            PeerEvent::Message(message) => Some(target.handle(message)),
            PeerEvent::Tick(topic) => {
                target.on_tick(topic);
                None
            }
        }
    }

    /// Handle every delivery already queued, without waiting.
    ///
    /// Handlers may broadcast, which can queue further deliveries; those are
    /// drained too. Returns the number of messages handled.
    pub fn pump(&mut self, target: &mut impl Synchronized) -> usize {
        let mut handled = 0;
        while let Ok(message) = self.inbox.try_recv() {
            target.handle(&message);
            handled += 1;
        }
        handled
    }

    /// Drive `target` until the transport closes.
    pub async fn run(mut self, target: &mut impl Synchronized) {
        let peer = self.id();
        while let Some(event) = self.next_event().await {
            Self::dispatch(target, &event);
        }
        log::info!("Event loop for {peer} finished");
    }
}
