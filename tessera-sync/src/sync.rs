//! Exclusive-driver replication for a single topic.
//!
//! One peer at a time *drives* a topic: it claims it with `LOCK`, streams
//! its full state with `STATE` for as long as the local interaction lasts,
//! and gives it up with `UNLOCK`. Every other peer applies the streamed state
//! verbatim and refrains from driving while it is locked out.
//!
//! ```text
//!             drive()                    release()
//!  ┌──────┐ ──────────► ┌────────┐ ──────────────► ┌──────────────────┐
//!  │ Idle │             │ Active │                 │ Idle (last drv)  │
//!  └──────┘ ◄────────┐  └────────┘                 └──────────────────┘
//!     │    UNLOCK    │                                  │
//!     │ LOCK         │                                  │ LOCK
//!     ▼              │                                  ▼
//!  ┌───────────┐ ────┘                            ┌───────────┐
//!  │ LockedOut │ ◄─────────────────────────────── │ LockedOut │
//!  └───────────┘                                  └───────────┘
//! ```
//!
//! There is no arbiter and no acknowledgement. A late joiner catches up only
//! through the answers to its `HELLO`: the current driver re-announces its
//! `LOCK`, and the most recent driver re-sends its state.
//!
//! Two peers that claim the same topic concurrently both stay `Active`: an
//! active peer ignores everything but `HELLO`. Resolving that race is left to
//! the status topic of [`crate::arbitration`].

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

use crate::protocol::{Message, MessageKind, Payload, PeerId, ProtocolError, Topic};
use crate::transport::{SubscriptionHandle, Transport, TransportError};

/// Capability interface connecting a primitive to the value it replicates.
pub trait Replica {
    /// Application-defined state shape carried in `STATE` payloads.
    type State: Serialize + DeserializeOwned;

    /// Snapshot of the local value, broadcast when this peer drives.
    fn produce_state(&self) -> Self::State;

    /// Adopt a state received from the driving peer.
    fn apply_state(&mut self, state: Self::State);
}

/// Per-(peer, topic) driver state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    /// Nobody is known to drive. `last_driver` records whether this peer
    /// produced the most recent session, which obliges it to answer `HELLO`
    /// with its state.
    Idle { last_driver: bool },
    /// This peer drives the topic.
    Active,
    /// Another peer announced `LOCK`; local driving is suppressed.
    LockedOut,
}

impl Default for DriverState {
    fn default() -> Self {
        Self::Idle { last_driver: false }
    }
}

/// What the receive path did with a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Message belongs to another topic
    Foreign,
    /// Our own broadcast echoed back
    OwnEcho,
    /// `HELLO` answered; flags tell which replies were sent
    Answered { lock: bool, state: bool },
    /// Dropped because this peer is driving
    IgnoredWhileDriving,
    /// `LOCK` received; this peer is now locked out
    LockedOut,
    /// `UNLOCK` received
    Unlocked,
    /// `STATE` applied to the replica
    Applied,
    /// `STATE` without a decodable payload
    Malformed,
    /// The primitive was destroyed
    Detached,
}

/// Errors raised locally by `drive`/`release`.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Exclusive-driver broadcast replication for one topic.
pub struct SyncPrimitive<R: Replica> {
    topic: Topic,
    local: PeerId,
    state: DriverState,
    replica: R,
    transport: Arc<dyn Transport>,
    subscription: Option<SubscriptionHandle>,
}

impl<R: Replica> SyncPrimitive<R> {
    /// Subscribe to `topic` and announce ourselves with `HELLO`.
    pub fn new(topic: Topic, replica: R, transport: Arc<dyn Transport>) -> Result<Self, SyncError> {
        let local = transport.local_peer();
        let subscription = transport.subscribe(&topic)?;
        transport.broadcast(Message::hello(topic.clone(), local))?;
        log::debug!("{local} joined topic {topic}");
        Ok(Self {
            topic,
            local,
            state: DriverState::default(),
            replica,
            transport,
            subscription: Some(subscription),
        })
    }

    /// Broadcast the current state, claiming the topic first if needed.
    ///
    /// Call repeatedly while a local interaction is in progress. Does nothing
    /// while another peer holds the topic.
    pub fn drive(&mut self) -> Result<(), SyncError> {
        match self.state {
            DriverState::LockedOut => return Ok(()),
            DriverState::Idle { .. } => {
                self.state = DriverState::Active;
                log::debug!("{} claims {}", self.local, self.topic);
                self.send(Message::lock(self.topic.clone(), self.local))?;
            }
            DriverState::Active => {}
        }
        self.send_state()
    }

    /// End the local session and let other peers drive.
    pub fn release(&mut self) -> Result<(), SyncError> {
        match self.state {
            DriverState::LockedOut => return Ok(()),
            DriverState::Active => self.state = DriverState::Idle { last_driver: true },
            DriverState::Idle { .. } => {}
        }
        log::debug!("{} releases {}", self.local, self.topic);
        self.send(Message::unlock(self.topic.clone(), self.local))
    }

    /// Process one delivered message.
    pub fn handle(&mut self, message: &Message) -> Outcome {
        if self.subscription.is_none() {
            return Outcome::Detached;
        }
        if message.topic != self.topic {
            return Outcome::Foreign;
        }
        if message.origin == self.local {
            return Outcome::OwnEcho;
        }

        match message.kind {
            MessageKind::Hello => self.answer_hello(message.origin),
            _ if self.state == DriverState::Active => {
                log::trace!("{} ignores {:?} on {} while driving", self.local, message.kind, self.topic);
                Outcome::IgnoredWhileDriving
            }
            MessageKind::Lock => {
                self.state = DriverState::LockedOut;
                Outcome::LockedOut
            }
            MessageKind::Unlock => {
                if self.state == DriverState::LockedOut {
                    self.state = DriverState::Idle { last_driver: false };
                }
                Outcome::Unlocked
            }
            MessageKind::State => {
                let decoded = message.payload.as_ref().map(Payload::decode::<R::State>);
                match decoded {
                    Some(Ok(state)) => {
                        self.replica.apply_state(state);
                        Outcome::Applied
                    }
                    Some(Err(e)) => {
                        log::debug!("Discarding malformed state on {} from {}: {e}", self.topic, message.origin);
                        Outcome::Malformed
                    }
                    None => Outcome::Malformed,
                }
            }
        }
    }

    /// Unsubscribe; later deliveries are reported as [`Outcome::Detached`].
    pub fn destroy(&mut self) {
        if let Some(handle) = self.subscription.take() {
            self.transport.unsubscribe(handle);
            log::debug!("{} left topic {}", self.local, self.topic);
        }
    }

    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    pub fn local_peer(&self) -> PeerId {
        self.local
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    pub fn is_driving(&self) -> bool {
        self.state == DriverState::Active
    }

    pub fn is_locked_by_other(&self) -> bool {
        self.state == DriverState::LockedOut
    }

    pub fn was_last_driver(&self) -> bool {
        matches!(self.state, DriverState::Active | DriverState::Idle { last_driver: true })
    }

    pub fn replica(&self) -> &R {
        &self.replica
    }

    pub fn replica_mut(&mut self) -> &mut R {
        &mut self.replica
    }

    fn answer_hello(&mut self, newcomer: PeerId) -> Outcome {
        let lock = self.state == DriverState::Active;
        let state = self.was_last_driver();
        if lock {
            if let Err(e) = self.send(Message::lock(self.topic.clone(), self.local)) {
                log::warn!("Failed to re-announce lock on {}: {e}", self.topic);
            }
        }
        if state {
            if let Err(e) = self.send_state() {
                log::warn!("Failed to answer hello on {}: {e}", self.topic);
            }
        }
        log::debug!("{} answered hello from {newcomer} on {} (lock: {lock}, state: {state})", self.local, self.topic);
        Outcome::Answered { lock, state }
    }

    fn send_state(&self) -> Result<(), SyncError> {
        let payload = Payload::encode(&self.replica.produce_state())?;
        self.send(Message::state(self.topic.clone(), self.local, payload))
    }

    fn send(&self, message: Message) -> Result<(), SyncError> {
        if self.subscription.is_none() {
            return Err(TransportError::Closed.into());
        }
        self.transport.broadcast(message)?;
        Ok(())
    }
}

impl<R: Replica> Drop for SyncPrimitive<R> {
    fn drop(&mut self) {
        self.destroy();
    }
}
