//! Floating panels: the collection entity used by the window manager.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::collection::Entity;
use crate::sync::Replica;

pub const DEFAULT_WIDTH: f64 = 200.0;
pub const DEFAULT_HEIGHT: f64 = 300.0;
pub const DEFAULT_SOURCE: &str = "/client/doc/";

/// Size of the wall's content area in pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WallBounds {
    pub width: f64,
    pub height: f64,
}

/// What the collection topic knows about a panel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PanelDescriptor {
    pub id: String,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub src: String,
}

/// Fine-grained state streamed on the panel's own topic.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PanelState {
    pub x: f64,
    pub y: f64,
    pub scroll_x: f64,
    pub scroll_y: f64,
}

/// A floating panel showing a document.
#[derive(Debug, Clone, PartialEq)]
pub struct Panel {
    id: String,
    x: f64,
    y: f64,
    width: f64,
    height: f64,
    src: String,
    scroll_x: f64,
    scroll_y: f64,
}

impl Panel {
    /// New panel at `(x, y)` with a random id and default size and source.
    pub fn new(x: f64, y: f64) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), x, y)
    }

    pub fn with_id(id: impl Into<String>, x: f64, y: f64) -> Self {
        Self {
            id: id.into(),
            x,
            y,
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            src: DEFAULT_SOURCE.to_string(),
            scroll_x: 0.0,
            scroll_y: 0.0,
        }
    }

    pub fn position(&self) -> (f64, f64) {
        (self.x, self.y)
    }

    pub fn size(&self) -> (f64, f64) {
        (self.width, self.height)
    }

    pub fn src(&self) -> &str {
        &self.src
    }

    pub fn scroll(&self) -> (f64, f64) {
        (self.scroll_x, self.scroll_y)
    }

    /// Drag by `(dx, dy)`, keeping the whole panel on the wall.
    pub fn move_by(&mut self, dx: f64, dy: f64, bounds: WallBounds) {
        self.x = (self.x + dx).min(bounds.width - self.width).max(0.0);
        self.y = (self.y + dy).min(bounds.height - self.height).max(0.0);
    }

    pub fn scroll_to(&mut self, scroll_x: f64, scroll_y: f64) {
        self.scroll_x = scroll_x;
        self.scroll_y = scroll_y;
    }
}

impl Replica for Panel {
    type State = PanelState;

    fn produce_state(&self) -> PanelState {
        PanelState { x: self.x, y: self.y, scroll_x: self.scroll_x, scroll_y: self.scroll_y }
    }

    fn apply_state(&mut self, state: PanelState) {
        self.x = state.x;
        self.y = state.y;
        self.scroll_x = state.scroll_x;
        self.scroll_y = state.scroll_y;
    }
}

impl Entity for Panel {
    type Descriptor = PanelDescriptor;

    fn id(&self) -> &str {
        &self.id
    }

    fn describe(&self) -> PanelDescriptor {
        PanelDescriptor {
            id: self.id.clone(),
            x: self.x,
            y: self.y,
            width: self.width,
            height: self.height,
            src: self.src.clone(),
        }
    }

    fn descriptor_id(descriptor: &PanelDescriptor) -> &str {
        &descriptor.id
    }

    fn materialize(descriptor: PanelDescriptor) -> Self {
        Self {
            id: descriptor.id,
            x: descriptor.x,
            y: descriptor.y,
            width: descriptor.width,
            height: descriptor.height,
            src: descriptor.src,
            scroll_x: 0.0,
            scroll_y: 0.0,
        }
    }
}
