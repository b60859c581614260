//! Map view payload: a slippy-map camera shared across the wall.

use serde::{Deserialize, Serialize};

use crate::animation::Interpolate;

/// Northernmost latitude the camera may center on.
pub const MAX_LAT: f64 = 80.0;
/// Southernmost latitude the camera may center on.
pub const MIN_LAT: f64 = -80.0;

/// Camera position of a map: center and zoom level.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MapView {
    pub lat: f64,
    pub lng: f64,
    pub zoom: f64,
    /// Zoom limits travel with the state so every tile clamps identically.
    pub min_zoom: f64,
    pub max_zoom: f64,
}

impl Default for MapView {
    fn default() -> Self {
        Self { lat: 0.0, lng: 0.0, zoom: 2.0, min_zoom: 0.0, max_zoom: 18.0 }
    }
}

impl MapView {
    pub fn new(lat: f64, lng: f64, zoom: f64) -> Self {
        let mut view = Self::default();
        view.center(lat, lng);
        view.set_zoom(zoom);
        view
    }

    pub fn with_zoom_limits(mut self, min_zoom: f64, max_zoom: f64) -> Self {
        self.min_zoom = min_zoom;
        self.max_zoom = max_zoom.max(min_zoom);
        self.set_zoom(self.zoom);
        self
    }

    /// Set the zoom level, clamped to the view's limits.
    pub fn set_zoom(&mut self, level: f64) {
        self.zoom = level.clamp(self.min_zoom, self.max_zoom);
    }

    pub fn zoom_in(&mut self) {
        self.set_zoom(self.zoom + 1.0);
    }

    pub fn zoom_out(&mut self) {
        self.set_zoom(self.zoom - 1.0);
    }

    /// Move the center, clamping latitude to the polar limits.
    pub fn center(&mut self, lat: f64, lng: f64) {
        self.lat = lat.clamp(MIN_LAT, MAX_LAT);
        self.lng = lng;
    }

    /// Shift the center by the given degrees.
    ///
    /// Past a polar limit, shifts further toward that pole are ignored.
    pub fn pan(&mut self, d_lat: f64, d_lng: f64) {
        if self.lat >= MAX_LAT && d_lat > 0.0 {
            return;
        }
        if self.lat <= MIN_LAT && d_lat < 0.0 {
            return;
        }
        self.center(self.lat + d_lat, self.lng + d_lng);
    }

    /// Whether a requested target lies within the latitude limits.
    pub fn is_valid_target(lat: f64, lng: f64) -> bool {
        (MIN_LAT..=MAX_LAT).contains(&lat) && lng.is_finite()
    }
}

impl Interpolate for MapView {
    fn interpolate(&self, to: &Self, t: f64) -> Self {
        Self {
            lat: self.lat.interpolate(&to.lat, t),
            lng: self.lng.interpolate(&to.lng, t),
            zoom: self.zoom.interpolate(&to.zoom, t),
            min_zoom: to.min_zoom,
            max_zoom: to.max_zoom,
        }
    }
}
