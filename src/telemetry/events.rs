//! Coordinator event types exposed to the CLI and to subscribers.

use serde::{Deserialize, Serialize};

use crate::action::ActionMethod;
use crate::messages::TabId;
use crate::settings::ScoldingVoice;

/// Which action profile produced an action result.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Skip,
    PauseAndExit,
}

/// Everything the coordinator reports about its own decisions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum CoordinatorEvent {
    AdStateChanged {
        tab_id: TabId,
        is_ad_active: bool,
    },
    SessionStarted {
        sensitivity: f32,
    },
    SessionStopped {
        reason: String,
    },
    LoudEvent {
        metric: f32,
        timestamp_ms: u64,
    },
    ActionCompleted {
        tab_id: Option<TabId>,
        kind: ActionKind,
        success: bool,
        method: ActionMethod,
        reason: Option<String>,
    },
    CaptureFailed {
        code: i32,
        message: String,
    },
    ContextRecreated {
        attempt: u32,
    },
    Escalation {
        count: u32,
        voice: ScoldingVoice,
    },
}
