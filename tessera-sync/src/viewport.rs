//! Viewport payload: the visible rectangle of a zoomable vector drawing.
//!
//! The rectangle is expressed in drawing units. At zoom level 1 it covers the
//! whole drawing; at level `z` it is `1/z` of the drawing on each axis and
//! can be panned anywhere inside it.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::animation::{Interpolate, Transition};

/// Zoom change applied by the zoom buttons.
pub const ZOOM_STEP: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
    pub zoom_level: f64,
    /// Drawing extent at zoom level 1
    pub content_width: f64,
    pub content_height: f64,
    pub max_zoom: f64,
}

impl Viewport {
    /// Whole drawing visible at zoom level 1.
    pub fn new(content_width: f64, content_height: f64, max_zoom: f64) -> Self {
        Self {
            left: 0.0,
            top: 0.0,
            width: content_width,
            height: content_height,
            zoom_level: 1.0,
            content_width,
            content_height,
            max_zoom: max_zoom.max(1.0),
        }
    }

    /// Fit a drawing's view box into an element of another aspect ratio.
    ///
    /// The drawing's shorter side is extended so that the viewport keeps the
    /// element's aspect ratio.
    pub fn fitted(view_box: (f64, f64), element: (f64, f64), max_zoom: f64) -> Self {
        let (box_w, box_h) = view_box;
        let (el_w, el_h) = element;
        let factor_x = box_w / el_w;
        let factor_y = box_h / el_h;
        let width = if factor_x < factor_y { (box_h * el_w / el_h).floor() } else { box_w };
        let height = if factor_y < factor_x { (box_w * el_h / el_w).floor() } else { box_h };
        Self::new(width, height, max_zoom)
    }

    /// Set the zoom level, clamped to `[1, max_zoom]`, keeping the center fixed
    /// as far as the drawing's edges allow.
    pub fn zoom(&mut self, level: f64) {
        let (center_x, center_y) = self.center();
        self.zoom_level = level.clamp(1.0, self.max_zoom);
        self.width = self.content_width / self.zoom_level;
        self.height = self.content_height / self.zoom_level;
        self.left = self.clamp_left(center_x - self.width / 2.0);
        self.top = self.clamp_top(center_y - self.height / 2.0);
    }

    pub fn zoom_in(&mut self) {
        self.zoom(self.zoom_level + ZOOM_STEP);
    }

    pub fn zoom_out(&mut self) {
        self.zoom(self.zoom_level - ZOOM_STEP);
    }

    /// Shift by drawing units; the rectangle stays inside the drawing.
    pub fn pan(&mut self, dx: f64, dy: f64) {
        self.left = self.clamp_left(self.left + dx);
        self.top = self.clamp_top(self.top + dy);
    }

    /// Center on a drawing point, as far as the edges allow.
    pub fn center_on(&mut self, x: f64, y: f64) {
        self.left = self.clamp_left(x - self.width / 2.0);
        self.top = self.clamp_top(y - self.height / 2.0);
    }

    pub fn center(&self) -> (f64, f64) {
        (self.left + self.width / 2.0, self.top + self.height / 2.0)
    }

    /// Transition that zooms to `zoom` (current level if `None`) and then
    /// centers on `(x, y)`.
    ///
    /// `duration` is the time a full-range change takes in each phase. The
    /// zoom phase lasts the share of `[1, max_zoom]` it covers, the move phase
    /// the share of the free travel along the axis that moves furthest.
    pub fn move_to(&self, duration: Duration, x: f64, y: f64, zoom: Option<f64>) -> Transition<Viewport> {
        let mut zoomed = *self;
        zoomed.zoom(zoom.unwrap_or(self.zoom_level));
        let mut target = zoomed;
        target.center_on(x, y);

        let (zoom_share, move_share) = phase_shares(self, &zoomed, &target);
        let full = duration.as_millis() as f64;
        let total = (full * zoom_share).floor() + (full * move_share).floor();
        Transition::new(Duration::from_millis(total as u64), target)
    }

    fn clamp_left(&self, left: f64) -> f64 {
        left.max(0.0).min(self.content_width - self.width)
    }

    fn clamp_top(&self, top: f64) -> f64 {
        top.max(0.0).min(self.content_height - self.height)
    }
}

/// Relative length of the zoom and move phases between `from` and `to`,
/// where `zoomed` is `from` at the target zoom level.
fn phase_shares(from: &Viewport, zoomed: &Viewport, to: &Viewport) -> (f64, f64) {
    let zoom_share = if from.max_zoom > 1.0 {
        (zoomed.zoom_level - from.zoom_level).abs() / (from.max_zoom - 1.0)
    } else {
        0.0
    };
    let share = |delta: f64, free: f64| if free > 0.0 { delta.abs() / free } else { 0.0 };
    let move_share = share(to.left - zoomed.left, zoomed.content_width - zoomed.width)
        .max(share(to.top - zoomed.top, zoomed.content_height - zoomed.height));
    (zoom_share, move_share)
}

impl Interpolate for Viewport {
    /// Zoom first with the center fixed, then move. `t` is split between the
    /// phases in proportion to their length.
    fn interpolate(&self, to: &Self, t: f64) -> Self {
        let mut zoomed = *self;
        zoomed.zoom(to.zoom_level);
        let (zoom_share, move_share) = phase_shares(self, &zoomed, to);
        let total = zoom_share + move_share;
        if total <= 0.0 {
            return *to;
        }

        let split = zoom_share / total;
        if t < split {
            let mut step = *self;
            step.zoom(self.zoom_level.interpolate(&to.zoom_level, t / split));
            return step;
        }
        let s = if split < 1.0 { (t - split) / (1.0 - split) } else { 1.0 };
        Self {
            left: zoomed.left.interpolate(&to.left, s),
            top: zoomed.top.interpolate(&to.top, s),
            ..zoomed
        }
    }
}
