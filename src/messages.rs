//! Typed messages crossing the worker's channel boundary.

use image::RgbaImage;
use serde::{Deserialize, Serialize};

use crate::geometry::{MonitorRect, Point};

/// Externally driven tracking state. `Active` and `Paused` do not clear
/// accumulated data; `Stopped` terminates the worker loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingState {
    Active,
    Paused,
    Stopped,
}

/// Which heatmap to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum RenderKind {
    Time,
    TimeSincePause,
    Speed,
    SingleClick,
    DoubleClick,
    HeldClick,
}

/// Single vs double classification is decided upstream and arrives on the
/// event itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClickKind {
    Single,
    Double,
}

/// Inbound events consumed by the tracker, in strict tick order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    Move {
        tick: u64,
        position: Point,
    },
    Click {
        button: u8,
        position: Point,
        kind: ClickKind,
        held: bool,
    },
    Key {
        code: u8,
        held: bool,
    },
    GamepadButton {
        gamepad: u8,
        button: u8,
        held: bool,
    },
    MonitorsChanged {
        rects: Vec<MonitorRect>,
    },
    TrackingState {
        state: TrackingState,
    },
}

/// A request for one rendered heatmap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderRequest {
    pub kind: RenderKind,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub colour_map: String,
    pub sampling: u32,
}

impl RenderRequest {
    pub fn new(kind: RenderKind, colour_map: impl Into<String>) -> Self {
        Self {
            kind,
            width: None,
            height: None,
            colour_map: colour_map.into(),
            sampling: 1,
        }
    }
}

/// A completed render, tagged with the move tick it reflects.
#[derive(Debug, Clone)]
pub struct RenderResponse {
    pub kind: RenderKind,
    pub image: RgbaImage,
    pub sampling: u32,
    pub tick: u64,
}

/// Everything the worker can receive on its inbox.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Event(Event),
    Render(RenderRequest),
}
