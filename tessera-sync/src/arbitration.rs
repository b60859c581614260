//! Arbitration between live interaction and programmatic animation.
//!
//! A widget whose value can change either through a user's gesture or through
//! an animated `move_to` uses three sync primitives:
//!
//! ```text
//!            ┌──────────────────────────────┐
//!            │        ArbitratedView        │
//!            └──────┬──────────┬─────────┬──┘
//!                   │          │         │
//!          <base>   ▼ <base>_animation   ▼ <base>_oob
//!      ┌──────────┐  ┌──────────┐  ┌──────────────┐
//!      │ live     │  │ animation│  │ status       │
//!      │ (view)   │  │ (view)   │  │ StatusRecord │
//!      └────┬─────┘  └────┬─────┘  └──────────────┘
//!           └──────┬──────┘
//!                  ▼
//!            SharedView<V>
//! ```
//!
//! The live and animation topics both replicate the view itself. The status
//! topic replicates two flags (is somebody interacting, is somebody
//! animating) plus an optional queued transition, so that every tile knows
//! which source currently owns the view. A user's gesture preempts any
//! animation; an animation requested while something else owns the view is
//! queued and started once both flags clear.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::animation::{Animation, Frame, Interpolate, Transition};
use crate::config::DEFAULT_TICK_INTERVAL;
use crate::protocol::{Message, Topic};
use crate::runtime::Synchronized;
use crate::sync::{Outcome, Replica, SyncError, SyncPrimitive};
use crate::ticker::Ticker;
use crate::transport::Transport;

/// Suffix of the animation topic.
pub const ANIMATION_SUFFIX: &str = "animation";
/// Suffix of the status (out-of-band) topic.
pub const STATUS_SUFFIX: &str = "oob";

/// View value shared between the live and animation primitives and readable
/// by a renderer.
#[derive(Debug, Default)]
pub struct SharedView<V>(Arc<RwLock<V>>);

impl<V> Clone for SharedView<V> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<V: Clone> SharedView<V> {
    pub fn new(value: V) -> Self {
        Self(Arc::new(RwLock::new(value)))
    }

    /// Snapshot of the current value.
    pub fn get(&self) -> V {
        self.0.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn set(&self, value: V) {
        *self.0.write().unwrap_or_else(PoisonError::into_inner) = value;
    }

    pub fn update<T>(&self, f: impl FnOnce(&mut V) -> T) -> T {
        f(&mut self.0.write().unwrap_or_else(PoisonError::into_inner))
    }
}

impl<V: Clone + Serialize + DeserializeOwned> Replica for SharedView<V> {
    type State = V;

    fn produce_state(&self) -> V {
        self.get()
    }

    fn apply_state(&mut self, state: V) {
        self.set(state);
    }
}

/// Control flags replicated on the status topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusRecord<V> {
    pub live_interaction_active: bool,
    pub animation_active: bool,
    pub queued_transition: Option<Transition<V>>,
}

impl<V> Default for StatusRecord<V> {
    fn default() -> Self {
        Self { live_interaction_active: false, animation_active: false, queued_transition: None }
    }
}

/// Replica of the status topic: the last known status record.
#[derive(Debug)]
pub struct StatusBoard<V> {
    record: StatusRecord<V>,
}

impl<V> Default for StatusBoard<V> {
    fn default() -> Self {
        Self { record: StatusRecord::default() }
    }
}

impl<V> StatusBoard<V> {
    pub fn record(&self) -> &StatusRecord<V> {
        &self.record
    }
}

impl<V: Clone + Serialize + DeserializeOwned> Replica for StatusBoard<V> {
    type State = StatusRecord<V>;

    fn produce_state(&self) -> StatusRecord<V> {
        self.record.clone()
    }

    fn apply_state(&mut self, state: StatusRecord<V>) {
        self.record = state;
    }
}

/// Status fields changed by this peer and not yet published.
///
/// Kept apart from the replicated record so that a remote `STATE` applied
/// while the status topic is locked does not erase them.
#[derive(Debug)]
struct StatusPatch<V> {
    live_interaction_active: Option<bool>,
    animation_active: Option<bool>,
    queued_transition: Option<Option<Transition<V>>>,
}

impl<V> Default for StatusPatch<V> {
    fn default() -> Self {
        Self { live_interaction_active: None, animation_active: None, queued_transition: None }
    }
}

impl<V: Clone> StatusPatch<V> {
    fn live(mut self, active: bool) -> Self {
        self.live_interaction_active = Some(active);
        self
    }

    fn animation(mut self, active: bool) -> Self {
        self.animation_active = Some(active);
        self
    }

    fn queued(mut self, transition: Option<Transition<V>>) -> Self {
        self.queued_transition = Some(transition);
        self
    }

    fn apply_to(&self, record: &mut StatusRecord<V>) {
        if let Some(active) = self.live_interaction_active {
            record.live_interaction_active = active;
        }
        if let Some(active) = self.animation_active {
            record.animation_active = active;
        }
        if let Some(queued) = &self.queued_transition {
            record.queued_transition = queued.clone();
        }
    }

    /// Fold a later patch into this one; later fields win.
    fn merge(&mut self, later: StatusPatch<V>) {
        if later.live_interaction_active.is_some() {
            self.live_interaction_active = later.live_interaction_active;
        }
        if later.animation_active.is_some() {
            self.animation_active = later.animation_active;
        }
        if later.queued_transition.is_some() {
            self.queued_transition = later.queued_transition;
        }
    }
}

/// What `move_to` did with a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Motion {
    /// Animation started on this peer
    Started,
    /// This peer's running animation was retargeted
    Replaced,
    /// Something else owns the view; the transition waits
    Queued,
}

struct RunningAnimation<V> {
    animation: Animation<V>,
    timer: Option<CancellationToken>,
}

impl<V> RunningAnimation<V> {
    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.cancel();
        }
    }
}

/// A view value arbitrated between live interaction and animation.
pub struct ArbitratedView<V>
where
    V: Interpolate + Serialize + DeserializeOwned,
{
    view: SharedView<V>,
    live: SyncPrimitive<SharedView<V>>,
    animation: SyncPrimitive<SharedView<V>>,
    status: SyncPrimitive<StatusBoard<V>>,
    /// This peer owns the current live session
    interacting: bool,
    running: Option<RunningAnimation<V>>,
    /// Transition waiting for the view to become free
    pending: Option<Transition<V>>,
    /// Status changes made while another peer held the status topic
    unpublished: Option<StatusPatch<V>>,
    ticker: Option<Ticker>,
    interval: Duration,
}

impl<V> ArbitratedView<V>
where
    V: Interpolate + Serialize + DeserializeOwned,
{
    /// Create the three primitives for `base`, each announcing itself.
    pub fn new(base: Topic, initial: V, transport: Arc<dyn Transport>) -> Result<Self, SyncError> {
        let view = SharedView::new(initial);
        let animation_topic = base.child(ANIMATION_SUFFIX)?;
        let status_topic = base.child(STATUS_SUFFIX)?;

        let live = SyncPrimitive::new(base, view.clone(), transport.clone())?;
        let animation = SyncPrimitive::new(animation_topic, view.clone(), transport.clone())?;
        let status = SyncPrimitive::new(status_topic, StatusBoard::default(), transport)?;

        Ok(Self {
            view,
            live,
            animation,
            status,
            interacting: false,
            running: None,
            pending: None,
            unpublished: None,
            ticker: None,
            interval: DEFAULT_TICK_INTERVAL,
        })
    }

    /// Drive animations from `ticker` instead of manual [`tick`](Self::tick) calls.
    pub fn with_ticker(mut self, ticker: Ticker) -> Self {
        self.interval = ticker.interval();
        self.ticker = Some(ticker);
        self
    }

    /// Step length used when no ticker is attached.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Start a live interaction on this peer.
    ///
    /// Preempts any animation, local or remote. Returns `false` when another
    /// peer currently drives the live topic.
    pub fn begin_interaction(&mut self) -> Result<bool, SyncError> {
        if self.live.is_locked_by_other() {
            return Ok(false);
        }
        self.cancel_animation()?;
        self.live.drive()?;
        self.interacting = true;
        self.publish_status(StatusPatch::default().live(true).animation(false))?;
        Ok(true)
    }

    /// Change the view during a live interaction and stream it.
    ///
    /// Returns `false` (and leaves the view alone) when this peer does not
    /// own a live session.
    pub fn update_interaction(&mut self, f: impl FnOnce(&mut V)) -> Result<bool, SyncError> {
        if !self.interacting {
            return Ok(false);
        }
        self.view.update(f);
        self.live.drive()?;
        Ok(true)
    }

    /// End this peer's live interaction and resume any queued transition.
    pub fn end_interaction(&mut self) -> Result<(), SyncError> {
        if !self.interacting {
            return Ok(());
        }
        self.interacting = false;
        self.live.release()?;
        self.publish_status(StatusPatch::default().live(false))?;
        self.resume_pending()
    }

    /// Apply a one-shot change, such as a zoom button, on the live topic.
    pub fn nudge(&mut self, f: impl FnOnce(&mut V)) -> Result<bool, SyncError> {
        if self.live.is_locked_by_other() {
            return Ok(false);
        }
        self.view.update(f);
        self.live.drive()?;
        if !self.interacting {
            self.live.release()?;
        }
        Ok(true)
    }

    /// Animate toward `transition.target`.
    pub fn move_to(&mut self, transition: Transition<V>) -> Result<Motion, SyncError> {
        if let Some(running) = self.running.as_mut() {
            running.animation = Animation::new(self.view.get(), transition, self.interval);
            log::debug!("{}: animation retargeted", self.animation.topic());
            return Ok(Motion::Replaced);
        }

        let record = self.status.replica().record();
        if record.live_interaction_active || record.animation_active {
            log::debug!("{}: view busy, queueing transition", self.live.topic());
            self.pending = Some(transition.clone());
            self.publish_status(StatusPatch::default().queued(Some(transition)))?;
            return Ok(Motion::Queued);
        }

        self.start_animation(transition)?;
        Ok(Motion::Started)
    }

    /// Stop any animation and drop the queued transition.
    pub fn stop_animation(&mut self) -> Result<(), SyncError> {
        let record = self.status.replica().record();
        let busy = record.animation_active || record.queued_transition.is_some();
        if self.running.is_none() && self.pending.is_none() && !busy {
            return Ok(());
        }
        self.cancel_animation()?;
        self.pending = None;
        self.publish_status(StatusPatch::default().animation(false).queued(None))
    }

    /// Advance this peer's animation by one interval.
    pub fn tick(&mut self) -> Result<(), SyncError> {
        let Some(running) = self.running.as_mut() else {
            return Ok(());
        };
        match running.animation.step() {
            Frame::Step(value) => {
                self.view.set(value);
                self.animation.drive()
            }
            Frame::Done(value) => {
                running.cancel_timer();
                self.running = None;
                self.view.set(value);
                self.animation.drive()?;
                self.animation.release()?;
                log::debug!("{}: animation finished", self.animation.topic());
                self.publish_status(StatusPatch::default().animation(false))?;
                self.resume_pending()
            }
        }
    }

    /// Route a delivery to the primitive owning its topic.
    pub fn handle(&mut self, message: &Message) -> Outcome {
        if message.topic == *self.live.topic() {
            return self.live.handle(message);
        }
        if message.topic == *self.animation.topic() {
            return self.animation.handle(message);
        }
        if message.topic == *self.status.topic() {
            let outcome = self.status.handle(message);
            let result = match outcome {
                Outcome::Applied => {
                    if let Some(patch) = &self.unpublished {
                        patch.apply_to(&mut self.status.replica_mut().record);
                    }
                    self.reconcile()
                }
                Outcome::Unlocked if self.unpublished.is_some() => self.flush_status(),
                _ => Ok(()),
            };
            if let Err(e) = result {
                log::warn!("{}: failed to reconcile status: {e}", self.status.topic());
            }
            return outcome;
        }
        Outcome::Foreign
    }

    /// Current value of the view.
    pub fn value(&self) -> V {
        self.view.get()
    }

    /// Shared handle for renderers.
    pub fn view(&self) -> &SharedView<V> {
        &self.view
    }

    /// Last known status record.
    pub fn status(&self) -> &StatusRecord<V> {
        self.status.replica().record()
    }

    pub fn pending(&self) -> Option<&Transition<V>> {
        self.pending.as_ref()
    }

    pub fn is_interacting(&self) -> bool {
        self.interacting
    }

    pub fn is_animating(&self) -> bool {
        self.running.is_some()
    }

    pub fn live(&self) -> &SyncPrimitive<SharedView<V>> {
        &self.live
    }

    pub fn animation(&self) -> &SyncPrimitive<SharedView<V>> {
        &self.animation
    }

    pub fn status_primitive(&self) -> &SyncPrimitive<StatusBoard<V>> {
        &self.status
    }

    /// React to a status record applied from another peer.
    fn reconcile(&mut self) -> Result<(), SyncError> {
        let record = self.status.replica().record();
        let live_ended = !record.live_interaction_active;
        let animation_ended = !record.animation_active;

        if self.interacting && live_ended {
            log::debug!("{}: live session ended remotely", self.live.topic());
            self.interacting = false;
            self.live.release()?;
        }
        if self.running.is_some() && animation_ended {
            log::debug!("{}: animation cancelled remotely", self.animation.topic());
            self.cancel_animation()?;
        }
        self.resume_pending()
    }

    fn resume_pending(&mut self) -> Result<(), SyncError> {
        let record = self.status.replica().record();
        if record.live_interaction_active || record.animation_active || self.running.is_some() {
            return Ok(());
        }
        match self.pending.take() {
            Some(transition) => self.start_animation(transition),
            None => Ok(()),
        }
    }

    fn start_animation(&mut self, transition: Transition<V>) -> Result<(), SyncError> {
        self.publish_status(StatusPatch::default().animation(true).queued(None))?;
        self.animation.drive()?;
        let timer = self.ticker.as_ref().map(|ticker| ticker.start(self.animation.topic().clone()));
        self.running = Some(RunningAnimation {
            animation: Animation::new(self.view.get(), transition, self.interval),
            timer,
        });
        log::debug!("{}: animation started", self.animation.topic());
        Ok(())
    }

    /// Stop the local animation, if any, and give up its topic.
    fn cancel_animation(&mut self) -> Result<(), SyncError> {
        if let Some(mut running) = self.running.take() {
            running.cancel_timer();
            self.animation.release()?;
        }
        Ok(())
    }

    /// Update the local status record and broadcast it once.
    ///
    /// While another peer holds the status topic the broadcast is deferred
    /// until its `UNLOCK` arrives, and the patch is re-applied over every
    /// record received in the meantime.
    fn publish_status(&mut self, patch: StatusPatch<V>) -> Result<(), SyncError> {
        patch.apply_to(&mut self.status.replica_mut().record);
        if self.status.is_locked_by_other() {
            match self.unpublished.as_mut() {
                Some(unpublished) => unpublished.merge(patch),
                None => self.unpublished = Some(patch),
            }
            return Ok(());
        }
        self.flush_status()
    }

    fn flush_status(&mut self) -> Result<(), SyncError> {
        self.unpublished = None;
        self.status.drive()?;
        self.status.release()
    }
}

impl<V> Synchronized for ArbitratedView<V>
where
    V: Interpolate + Serialize + DeserializeOwned,
{
    fn handle(&mut self, message: &Message) -> Outcome {
        ArbitratedView::handle(self, message)
    }

    fn on_tick(&mut self, topic: &Topic) {
        if topic != self.animation.topic() {
            return;
        }
        if let Err(e) = self.tick() {
            log::warn!("{topic}: animation step failed: {e}");
        }
    }
}

impl<V> Drop for ArbitratedView<V>
where
    V: Interpolate + Serialize + DeserializeOwned,
{
    fn drop(&mut self) {
        if let Some(mut running) = self.running.take() {
            running.cancel_timer();
        }
    }
}
