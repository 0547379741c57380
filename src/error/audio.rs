// Microphone acquisition and capture error types

use crate::error::ErrorCode;
use log::error;
use std::fmt;

/// Capture error code constants
///
/// Error code range: 1001-1008
pub struct CaptureErrorCodes;

impl CaptureErrorCodes {
    /// User or browser refused microphone access
    pub const PERMISSION_DENIED: i32 = 1001;

    /// No input device is connected
    pub const DEVICE_NOT_FOUND: i32 = 1002;

    /// Input device is held by another application
    pub const DEVICE_BUSY: i32 = 1003;

    /// Acquisition request was aborted before completing
    pub const ABORTED: i32 = 1004;

    /// Capture is not allowed from a non-secure context
    pub const INSECURE_CONTEXT: i32 = 1005;

    /// Backend failed to open an input stream
    pub const STREAM_OPEN_FAILED: i32 = 1006;

    /// Stream broke while capturing
    pub const STREAM_FAILURE: i32 = 1007;

    /// Mutex guarding capture state was poisoned
    pub const LOCK_POISONED: i32 = 1008;

    /// Codes for failures a fresh acquisition can clear without user action
    pub fn is_transient(code: i32) -> bool {
        matches!(
            code,
            Self::DEVICE_BUSY | Self::ABORTED | Self::STREAM_OPEN_FAILED | Self::STREAM_FAILURE
        )
    }
}

/// Log a capture error with structured context
///
/// Logs the numeric code, the component and the human-readable message.
pub fn log_capture_error(err: &CaptureError, context: &str) {
    error!(
        "Capture error in {}: code={}, component=AudioLevelMonitor, message={}",
        context,
        err.code(),
        err.message()
    );
}

/// Microphone acquisition and capture errors
///
/// Every acquisition failure leaves the monitor Idle; none of these are fatal
/// to the process.
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureError {
    /// Microphone permission denied or dismissed
    PermissionDenied,

    /// No microphone found
    DeviceNotFound,

    /// Microphone is in use elsewhere
    DeviceBusy,

    /// Acquisition request aborted
    Aborted,

    /// Capture requires a secure context
    InsecureContext,

    /// Failed to open audio stream
    StreamOpenFailed { reason: String },

    /// Stream failed after capture started
    StreamFailure { reason: String },

    /// Mutex was poisoned
    LockPoisoned { component: String },
}

impl CaptureError {
    /// Short machine-friendly name of the failure, used in status payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            CaptureError::PermissionDenied => "permission_denied",
            CaptureError::DeviceNotFound => "device_not_found",
            CaptureError::DeviceBusy => "device_busy",
            CaptureError::Aborted => "aborted",
            CaptureError::InsecureContext => "insecure_context",
            CaptureError::StreamOpenFailed { .. } => "stream_open_failed",
            CaptureError::StreamFailure { .. } => "stream_failure",
            CaptureError::LockPoisoned { .. } => "lock_poisoned",
        }
    }

    /// Short status line shown next to the level meter.
    pub fn status_text(&self) -> &'static str {
        match self {
            CaptureError::PermissionDenied => "Microphone permission denied",
            CaptureError::DeviceNotFound => "No microphone found",
            CaptureError::DeviceBusy => "Microphone in use",
            CaptureError::Aborted => "Microphone request aborted",
            CaptureError::InsecureContext => "Security error",
            CaptureError::StreamOpenFailed { .. }
            | CaptureError::StreamFailure { .. }
            | CaptureError::LockPoisoned { .. } => "Microphone error",
        }
    }

    /// Whether retrying the same request later could succeed without user action.
    pub fn is_transient(&self) -> bool {
        CaptureErrorCodes::is_transient(self.code())
    }
}

impl ErrorCode for CaptureError {
    fn code(&self) -> i32 {
        match self {
            CaptureError::PermissionDenied => CaptureErrorCodes::PERMISSION_DENIED,
            CaptureError::DeviceNotFound => CaptureErrorCodes::DEVICE_NOT_FOUND,
            CaptureError::DeviceBusy => CaptureErrorCodes::DEVICE_BUSY,
            CaptureError::Aborted => CaptureErrorCodes::ABORTED,
            CaptureError::InsecureContext => CaptureErrorCodes::INSECURE_CONTEXT,
            CaptureError::StreamOpenFailed { .. } => CaptureErrorCodes::STREAM_OPEN_FAILED,
            CaptureError::StreamFailure { .. } => CaptureErrorCodes::STREAM_FAILURE,
            CaptureError::LockPoisoned { .. } => CaptureErrorCodes::LOCK_POISONED,
        }
    }

    fn message(&self) -> String {
        match self {
            CaptureError::PermissionDenied => {
                "Microphone permission denied. Please allow microphone access in your browser settings."
                    .to_string()
            }
            CaptureError::DeviceNotFound => {
                "No microphone found. Please connect a microphone and try again.".to_string()
            }
            CaptureError::DeviceBusy => {
                "Microphone is in use by another application. Please close other apps using the microphone."
                    .to_string()
            }
            CaptureError::Aborted => {
                "Microphone request was aborted. This might be due to browser security restrictions."
                    .to_string()
            }
            CaptureError::InsecureContext => {
                "Security error accessing microphone. Capture requires a secure (HTTPS) context."
                    .to_string()
            }
            CaptureError::StreamOpenFailed { reason } => {
                format!("Failed to open audio stream: {}", reason)
            }
            CaptureError::StreamFailure { reason } => {
                format!("Audio stream failed: {}", reason)
            }
            CaptureError::LockPoisoned { component } => {
                format!("Lock poisoned on {}", component)
            }
        }
    }
}

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CaptureError::{:?} (code {}): {}",
            self,
            self.code(),
            self.message()
        )
    }
}

impl std::error::Error for CaptureError {}

impl From<std::io::Error> for CaptureError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::PermissionDenied => CaptureError::PermissionDenied,
            std::io::ErrorKind::NotFound => CaptureError::DeviceNotFound,
            _ => CaptureError::StreamOpenFailed {
                reason: err.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_error_codes_are_distinct() {
        let errors = [
            CaptureError::PermissionDenied,
            CaptureError::DeviceNotFound,
            CaptureError::DeviceBusy,
            CaptureError::Aborted,
            CaptureError::InsecureContext,
            CaptureError::StreamOpenFailed {
                reason: "x".to_string(),
            },
            CaptureError::StreamFailure {
                reason: "x".to_string(),
            },
            CaptureError::LockPoisoned {
                component: "x".to_string(),
            },
        ];
        let mut codes: Vec<i32> = errors.iter().map(|e| e.code()).collect();
        codes.sort();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
        assert_eq!(codes.first(), Some(&1001));
        assert_eq!(codes.last(), Some(&1008));
    }

    #[test]
    fn test_acquisition_messages_are_user_facing() {
        assert!(CaptureError::PermissionDenied
            .message()
            .contains("permission denied"));
        assert!(CaptureError::DeviceNotFound
            .message()
            .contains("No microphone found"));
        assert!(CaptureError::DeviceBusy.message().contains("in use"));
        assert!(CaptureError::Aborted.message().contains("aborted"));
        assert!(CaptureError::InsecureContext.message().contains("HTTPS"));
    }

    #[test]
    fn test_display_includes_code() {
        let err = CaptureError::DeviceBusy;
        let display = format!("{}", err);
        assert!(display.contains("CaptureError"));
        assert!(display.contains("1003"));
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope");
        assert_eq!(CaptureError::from(io_err), CaptureError::PermissionDenied);

        let io_err = std::io::Error::other("boom");
        match CaptureError::from(io_err) {
            CaptureError::StreamOpenFailed { reason } => assert!(reason.contains("boom")),
            other => panic!("Expected StreamOpenFailed, got {:?}", other),
        }
    }

    #[test]
    fn test_transient_classification() {
        assert!(CaptureError::DeviceBusy.is_transient());
        assert!(!CaptureError::PermissionDenied.is_transient());
        assert!(!CaptureError::InsecureContext.is_transient());
        assert!(CaptureError::StreamFailure {
            reason: "unplugged".to_string()
        }
        .is_transient());
        assert!(CaptureError::StreamOpenFailed {
            reason: "busy".to_string()
        }
        .is_transient());
        assert!(!CaptureErrorCodes::is_transient(CaptureErrorCodes::LOCK_POISONED));
    }
}
