//! Messages exchanged between the page, capture and coordinator contexts.
//!
//! Every message serializes as `{"type": "...", "payload": ...}` so the same
//! shapes can travel over a runtime message bus or a JSON pipe.

use serde::{Deserialize, Serialize};

use crate::action::ActionOutcome;
use crate::audio::LevelSnapshot;
use crate::coordinator::CoordinatorStatus;
use crate::error::{CaptureError, ErrorCode};
use crate::settings::Settings;

pub type TabId = u32;

/// Edge-triggered ad state reported by a page watcher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdStateChanged {
    pub tab_id: TabId,
    pub is_ad_active: bool,
    pub skip_control_visible: bool,
    pub ad_content_present: bool,
}

/// A loud event accepted by the monitor (threshold exceeded, outside cooldown)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoudEvent {
    pub metric: f32,
    pub timestamp_ms: u64,
}

/// Capture failure as plain data
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureFailure {
    pub code: i32,
    pub kind: String,
    pub message: String,
}

impl From<&CaptureError> for CaptureFailure {
    fn from(err: &CaptureError) -> Self {
        Self {
            code: err.code(),
            kind: err.kind().to_string(),
            message: err.message(),
        }
    }
}

/// Requests handled by the capture context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MonitorRequest {
    StartMonitoring { sensitivity: f32 },
    StopMonitoring,
    GetAudioLevel,
    Ping,
}

impl MonitorRequest {
    pub fn name(&self) -> &'static str {
        match self {
            MonitorRequest::StartMonitoring { .. } => "START_MONITORING",
            MonitorRequest::StopMonitoring => "STOP_MONITORING",
            MonitorRequest::GetAudioLevel => "GET_AUDIO_LEVEL",
            MonitorRequest::Ping => "PING",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MonitorResponse {
    Started { already_capturing: bool },
    StartFailed(CaptureFailure),
    Stopped { was_capturing: bool },
    Level(LevelSnapshot),
    Pong,
}

/// Requests handled by a page's action executor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionRequest {
    ExecuteSkipAction,
    PauseAndExit,
}

/// Inbound messages of the coordinator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CoordinatorMessage {
    AdStateChanged(AdStateChanged),
    EventDetected(LoudEvent),
    CaptureFailed(CaptureFailure),
    SettingsUpdated(Settings),
    GetSettings,
    GetStatus,
    GetAudioLevel,
    Ping,
}

impl CoordinatorMessage {
    pub fn name(&self) -> &'static str {
        match self {
            CoordinatorMessage::AdStateChanged(_) => "AD_STATE_CHANGED",
            CoordinatorMessage::EventDetected(_) => "EVENT_DETECTED",
            CoordinatorMessage::CaptureFailed(_) => "CAPTURE_FAILED",
            CoordinatorMessage::SettingsUpdated(_) => "SETTINGS_UPDATED",
            CoordinatorMessage::GetSettings => "GET_SETTINGS",
            CoordinatorMessage::GetStatus => "GET_STATUS",
            CoordinatorMessage::GetAudioLevel => "GET_AUDIO_LEVEL",
            CoordinatorMessage::Ping => "PING",
        }
    }
}

/// Replies of the coordinator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CoordinatorReply {
    Ack,
    Settings(Settings),
    Status(Box<CoordinatorStatus>),
    Level(LevelSnapshot),
    ActionResult(ActionOutcome),
    Pong,
    Error { code: i32, message: String },
}
