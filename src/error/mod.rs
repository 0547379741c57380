// Error types for the scream-to-skip pipeline
//
// Each context (capture, page watcher, action executor, coordinator link) has its
// own error enum with stable numeric codes so failures can cross message
// boundaries as plain data.

mod action;
mod audio;
mod channel;
mod watch;

pub use action::{log_action_error, ActionError, ActionErrorCodes};
pub use audio::{log_capture_error, CaptureError, CaptureErrorCodes};
pub use channel::{log_channel_error, ChannelError, ChannelErrorCodes};
pub use watch::{log_watch_error, WatchError, WatchErrorCodes};

/// Error codes for structured error reporting
///
/// This trait provides a standard way to get error codes and messages
/// from custom error types, enabling consistent error handling across
/// context boundaries.
pub trait ErrorCode {
    /// Get the numeric error code
    fn code(&self) -> i32;

    /// Get the human-readable error message
    fn message(&self) -> String;
}
