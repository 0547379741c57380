//! The ad-detection view of a page.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::WatchError;

/// Raw ad indicators read from the player subtree
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdSignals {
    /// A skip control is rendered and visible
    pub skip_control_visible: bool,
    /// The ad-content container has children
    pub ad_content_present: bool,
}

impl AdSignals {
    pub fn is_ad_active(&self) -> bool {
        self.skip_control_visible || self.ad_content_present
    }
}

/// Notifications pushed by the page
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageEvent {
    /// One batch of child-list or attribute mutations under the player
    Mutations,
    /// The page changed URL through the history API
    HistoryNavigated { url: String },
    /// The observed player subtree was removed from the document
    Detached,
}

/// Read-only access to the player plus a page event feed
#[async_trait]
pub trait PlayerSurface: Send + Sync {
    /// Succeeds once the player container is in the document.
    async fn locate_player(&self) -> Result<(), WatchError>;

    /// Re-read the ad indicators from scratch.
    async fn read_signals(&self) -> Result<AdSignals, WatchError>;

    async fn current_url(&self) -> String;

    /// Start a new page event feed.
    fn subscribe(&self) -> mpsc::UnboundedReceiver<PageEvent>;
}
