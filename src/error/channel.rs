// Cross-context messaging error types

use crate::error::ErrorCode;
use log::error;
use std::fmt;

/// Channel error code constants
///
/// Error code range: 4001-4004
pub struct ChannelErrorCodes;

impl ChannelErrorCodes {
    pub const DISCONNECTED: i32 = 4001;
    pub const TIMEOUT: i32 = 4002;
    pub const CONTEXT_CREATE_FAILED: i32 = 4003;
    pub const UNEXPECTED_REPLY: i32 = 4004;
}

pub fn log_channel_error(err: &ChannelError, context: &str) {
    error!(
        "Channel error in {}: code={}, component=MonitorLink, message={}",
        context,
        err.code(),
        err.message()
    );
}

/// Errors talking to another context
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelError {
    /// Receiving end does not exist (context torn down)
    Disconnected { target: String },

    /// No reply within the request timeout
    Timeout { target: String, timeout_ms: u64 },

    /// Capture context could not be (re)created
    ContextCreateFailed { reason: String },

    /// Reply did not match the request
    UnexpectedReply { expected: String },
}

impl ChannelError {
    /// Connection-level failures are the ones worth recreating the context for.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, ChannelError::Disconnected { .. })
    }
}

impl ErrorCode for ChannelError {
    fn code(&self) -> i32 {
        match self {
            ChannelError::Disconnected { .. } => ChannelErrorCodes::DISCONNECTED,
            ChannelError::Timeout { .. } => ChannelErrorCodes::TIMEOUT,
            ChannelError::ContextCreateFailed { .. } => ChannelErrorCodes::CONTEXT_CREATE_FAILED,
            ChannelError::UnexpectedReply { .. } => ChannelErrorCodes::UNEXPECTED_REPLY,
        }
    }

    fn message(&self) -> String {
        match self {
            ChannelError::Disconnected { target } => {
                format!("Could not establish connection. Receiving end does not exist: {}", target)
            }
            ChannelError::Timeout { target, timeout_ms } => {
                format!("No reply from {} within {}ms", target, timeout_ms)
            }
            ChannelError::ContextCreateFailed { reason } => {
                format!("Failed to create capture context: {}", reason)
            }
            ChannelError::UnexpectedReply { expected } => {
                format!("Unexpected reply, expected {}", expected)
            }
        }
    }
}

impl fmt::Display for ChannelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ChannelError::{:?} (code {}): {}",
            self,
            self.code(),
            self.message()
        )
    }
}

impl std::error::Error for ChannelError {}
