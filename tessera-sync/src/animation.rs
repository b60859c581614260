//! Fixed-step animation toward a target value.
//!
//! An [`Animation`] advances by one tick interval per [`Animation::step`] and
//! yields either an intermediate frame or the exact target once the elapsed
//! time exceeds the transition's duration. Timing lives elsewhere
//! (see [`crate::ticker`]); stepping is pure so it can be tested without a
//! runtime.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Values that can be blended for intermediate animation frames.
pub trait Interpolate: Clone {
    /// Value at fraction `t` (0.0 = `self`, 1.0 = `to`).
    fn interpolate(&self, to: &Self, t: f64) -> Self;
}

impl Interpolate for f64 {
    fn interpolate(&self, to: &Self, t: f64) -> Self {
        self + (to - self) * t
    }
}

impl Interpolate for f32 {
    fn interpolate(&self, to: &Self, t: f64) -> Self {
        self + (to - self) * t as f32
    }
}

/// A requested move: reach `target` within `duration`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition<V> {
    pub duration: Duration,
    pub target: V,
}

impl<V> Transition<V> {
    pub fn new(duration: Duration, target: V) -> Self {
        Self { duration, target }
    }
}

/// Result of one animation step.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame<V> {
    /// Intermediate value; the animation continues
    Step(V),
    /// Exact target; the animation is over
    Done(V),
}

/// Deterministic stepper from a start value to a transition's target.
#[derive(Debug, Clone)]
pub struct Animation<V> {
    from: V,
    to: V,
    elapsed: Duration,
    duration: Duration,
    interval: Duration,
}

impl<V: Interpolate> Animation<V> {
    pub fn new(from: V, transition: Transition<V>, interval: Duration) -> Self {
        Self {
            from,
            to: transition.target,
            elapsed: Duration::ZERO,
            duration: transition.duration,
            interval,
        }
    }

    /// Advance by one interval.
    pub fn step(&mut self) -> Frame<V> {
        self.elapsed += self.interval;
        if self.elapsed > self.duration {
            return Frame::Done(self.to.clone());
        }
        Frame::Step(self.from.interpolate(&self.to, self.progress()))
    }

    /// Fraction of the duration covered so far, in `[0, 1]`.
    pub fn progress(&self) -> f64 {
        if self.duration.is_zero() {
            return 1.0;
        }
        (self.elapsed.as_secs_f64() / self.duration.as_secs_f64()).min(1.0)
    }

    pub fn target(&self) -> &V {
        &self.to
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TICK: Duration = Duration::from_millis(33);

    #[test]
    fn test_steps_until_duration_exceeded() {
        let mut anim = Animation::new(0.0_f64, Transition::new(Duration::from_millis(100), 10.0), TICK);

        let mut frames = Vec::new();
        loop {
            match anim.step() {
                Frame::Step(v) => frames.push(v),
                Frame::Done(v) => {
                    assert_eq!(v, 10.0);
                    break;
                }
            }
        }

        // 33, 66, 99 are within 100ms; 132 finishes.
        assert_eq!(frames.len(), 3);
        assert!(frames.windows(2).all(|w| w[0] < w[1]));
        assert!(frames.iter().all(|v| *v < 10.0));
    }

    #[test]
    fn test_zero_duration_finishes_on_first_step() {
        let mut anim = Animation::new(1.0_f64, Transition::new(Duration::ZERO, 5.0), TICK);
        assert_eq!(anim.step(), Frame::Done(5.0));
        assert_eq!(anim.progress(), 1.0);
    }

    #[test]
    fn test_exact_duration_boundary_is_still_a_step() {
        let mut anim = Animation::new(0.0_f64, Transition::new(TICK, 1.0), TICK);
        assert_eq!(anim.step(), Frame::Step(1.0));
        assert_eq!(anim.step(), Frame::Done(1.0));
    }

    #[test]
    fn test_interpolate_f64() {
        assert_eq!(2.0_f64.interpolate(&4.0, 0.5), 3.0);
        assert_eq!(2.0_f64.interpolate(&4.0, 0.0), 2.0);
    }
}
