// Page action and privileged input error types

use crate::error::ErrorCode;
use log::warn;
use std::fmt;

/// Action error code constants
///
/// Error code range: 2001-2006
pub struct ActionErrorCodes;

impl ActionErrorCodes {
    pub const DOM_EXCEPTION: i32 = 2001;
    pub const DISPATCH_REJECTED: i32 = 2002;
    pub const DEBUGGER_ATTACH_FAILED: i32 = 2003;
    pub const DEBUGGER_COMMAND_FAILED: i32 = 2004;
    pub const NO_TARGET_TAB: i32 = 2005;
    pub const PANICKED: i32 = 2006;
}

/// Log an action error with structured context
///
/// Action errors are recovered by moving to the next fallback stage, so they
/// are logged at warn level rather than error.
pub fn log_action_error(err: &ActionError, context: &str) {
    warn!(
        "Action error in {}: code={}, component=ActionExecutor, message={}",
        context,
        err.code(),
        err.message()
    );
}

/// Errors raised while acting on a page
#[derive(Debug, Clone, PartialEq)]
pub enum ActionError {
    /// Page script threw while querying or dispatching
    DomException { details: String },

    /// Page refused an untrusted event
    DispatchRejected { reason: String },

    /// Debugger could not attach to the tab
    DebuggerAttachFailed { tab_id: u32, reason: String },

    /// Debugger protocol command failed
    DebuggerCommandFailed { method: String, reason: String },

    /// No tab available to act on
    NoTargetTab,

    /// Action body panicked inside a scoped resource
    Panicked { context: String },
}

impl ErrorCode for ActionError {
    fn code(&self) -> i32 {
        match self {
            ActionError::DomException { .. } => ActionErrorCodes::DOM_EXCEPTION,
            ActionError::DispatchRejected { .. } => ActionErrorCodes::DISPATCH_REJECTED,
            ActionError::DebuggerAttachFailed { .. } => ActionErrorCodes::DEBUGGER_ATTACH_FAILED,
            ActionError::DebuggerCommandFailed { .. } => ActionErrorCodes::DEBUGGER_COMMAND_FAILED,
            ActionError::NoTargetTab => ActionErrorCodes::NO_TARGET_TAB,
            ActionError::Panicked { .. } => ActionErrorCodes::PANICKED,
        }
    }

    fn message(&self) -> String {
        match self {
            ActionError::DomException { details } => format!("DOM exception: {}", details),
            ActionError::DispatchRejected { reason } => {
                format!("Page rejected synthetic input: {}", reason)
            }
            ActionError::DebuggerAttachFailed { tab_id, reason } => {
                format!("Debugger attach to tab {} failed: {}", tab_id, reason)
            }
            ActionError::DebuggerCommandFailed { method, reason } => {
                format!("Debugger command {} failed: {}", method, reason)
            }
            ActionError::NoTargetTab => "No tab available for action".to_string(),
            ActionError::Panicked { context } => format!("Action panicked in {}", context),
        }
    }
}

impl fmt::Display for ActionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ActionError::{:?} (code {}): {}",
            self,
            self.code(),
            self.message()
        )
    }
}

impl std::error::Error for ActionError {}
