//! The action view of a page DOM.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ActionError;

/// Client-space bounding box
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    /// Zero-size boxes belong to elements that are not rendered.
    pub fn is_hidden(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }
}

/// Opaque reference to a page element plus its box at query time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementHandle {
    pub id: u64,
    pub rect: Rect,
}

/// How to look for elements
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElementQuery {
    /// Exact CSS class or attribute selector
    Selector(String),
    /// Clickable elements whose text or aria-label contains one of the
    /// phrases, case-insensitively
    TextOrLabel(Vec<String>),
    /// Every element whose class, id or text mentions the keyword
    Scan(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyPhase {
    Down,
    Up,
}

/// Vendor-prefixed fullscreen APIs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FullscreenVendor {
    Standard,
    Webkit,
    Moz,
    Ms,
}

impl FullscreenVendor {
    pub const ALL: [FullscreenVendor; 4] = [
        FullscreenVendor::Standard,
        FullscreenVendor::Webkit,
        FullscreenVendor::Moz,
        FullscreenVendor::Ms,
    ];
}

/// Page operations the executor needs. Every call may fail the way page
/// script can throw; callers treat each failure on its own.
#[async_trait]
pub trait PageDom: Send + Sync {
    async fn query(&self, query: &ElementQuery) -> Result<Vec<ElementHandle>, ActionError>;

    /// `element.click()`
    async fn invoke_click(&self, element: &ElementHandle) -> Result<(), ActionError>;

    /// Synthetic pointer down/up/click at client coordinates
    async fn dispatch_pointer(&self, x: f64, y: f64) -> Result<(), ActionError>;

    /// Whether the element is still attached and visible
    async fn still_present(&self, element: &ElementHandle) -> bool;

    async fn dispatch_key(&self, key: &str, phase: KeyPhase) -> Result<(), ActionError>;

    async fn video_count(&self) -> usize;

    /// Play a paused video or pause a playing one
    async fn toggle_playback(&self, index: usize) -> Result<(), ActionError>;

    async fn fullscreen_active(&self, vendor: FullscreenVendor) -> bool;

    async fn exit_fullscreen(&self, vendor: FullscreenVendor) -> Result<(), ActionError>;
}
