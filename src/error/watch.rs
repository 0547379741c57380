// Ad-state observation error types

use crate::error::ErrorCode;
use log::warn;
use std::fmt;

/// Watch error code constants
///
/// Error code range: 3001-3003
pub struct WatchErrorCodes;

impl WatchErrorCodes {
    pub const PLAYER_NOT_FOUND: i32 = 3001;
    pub const OBSERVATION_FAILED: i32 = 3002;
    pub const ATTACH_GAVE_UP: i32 = 3003;
}

/// Log a watch error; the watcher keeps running after every one of these.
pub fn log_watch_error(err: &WatchError, context: &str) {
    warn!(
        "Watch error in {}: code={}, component=AdStateWatcher, message={}",
        context,
        err.code(),
        err.message()
    );
}

#[derive(Debug, Clone, PartialEq)]
pub enum WatchError {
    /// Player subtree not rendered yet
    PlayerNotFound,

    /// Reading the ad predicate threw
    ObservationFailed { details: String },

    /// Bounded attach retries exhausted
    AttachGaveUp { attempts: u32 },
}

impl ErrorCode for WatchError {
    fn code(&self) -> i32 {
        match self {
            WatchError::PlayerNotFound => WatchErrorCodes::PLAYER_NOT_FOUND,
            WatchError::ObservationFailed { .. } => WatchErrorCodes::OBSERVATION_FAILED,
            WatchError::AttachGaveUp { .. } => WatchErrorCodes::ATTACH_GAVE_UP,
        }
    }

    fn message(&self) -> String {
        match self {
            WatchError::PlayerNotFound => "Player container not present".to_string(),
            WatchError::ObservationFailed { details } => {
                format!("Ad observation failed: {}", details)
            }
            WatchError::AttachGaveUp { attempts } => {
                format!("Gave up attaching to player after {} attempts", attempts)
            }
        }
    }
}

impl fmt::Display for WatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "WatchError::{:?} (code {}): {}",
            self,
            self.code(),
            self.message()
        )
    }
}

impl std::error::Error for WatchError {}
