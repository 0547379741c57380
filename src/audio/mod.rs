// Audio module - microphone capture, loudness metric and loud-event detection

pub mod capture;
pub mod detector;
#[cfg(feature = "cpal_backend")]
pub mod engine_cpal;
pub mod level;
pub mod monitor;
pub mod sample_ring;
pub mod service;
pub mod wav_fixture;

use std::sync::Arc;

// Re-export commonly used types for convenience
pub use capture::{CaptureConstraints, CaptureStream, MicrophoneSource, StreamGuard};
pub use detector::{LoudEventDetector, Verdict};
pub use level::{rms_u8, threshold_for};
pub use monitor::{AudioLevelMonitor, LevelSnapshot, MonitorEvent, MonitorPhase};
pub use service::{CaptureHost, LocalCaptureHost};
pub use wav_fixture::{WavFixture, WavFixtureMicrophone};

cfg_if::cfg_if! {
    if #[cfg(feature = "cpal_backend")] {
        pub use engine_cpal::CpalMicrophone;

        /// Microphone used when no fixture is given: the default cpal input.
        pub fn default_microphone() -> Option<Arc<dyn MicrophoneSource>> {
            Some(Arc::new(CpalMicrophone::new()))
        }
    } else {
        /// Built without a live backend; callers fall back to fixtures.
        pub fn default_microphone() -> Option<Arc<dyn MicrophoneSource>> {
            None
        }
    }
}
