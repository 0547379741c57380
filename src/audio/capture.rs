//! Microphone abstractions used by the level monitor.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::MonitorConfig;
use crate::error::CaptureError;

/// Processing constraints requested when acquiring the microphone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureConstraints {
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
    /// Samples delivered per analysis read
    pub window_size: usize,
}

impl CaptureConstraints {
    pub fn from_config(config: &MonitorConfig) -> Self {
        Self {
            echo_cancellation: config.echo_cancellation,
            noise_suppression: config.noise_suppression,
            auto_gain_control: config.auto_gain_control,
            window_size: config.fft_size,
        }
    }
}

impl Default for CaptureConstraints {
    fn default() -> Self {
        Self::from_config(&MonitorConfig::default())
    }
}

/// Something that can hand out microphone streams.
///
/// Acquisition is asynchronous because it may wait on a permission prompt.
#[async_trait]
pub trait MicrophoneSource: Send + Sync {
    async fn acquire(
        &self,
        constraints: CaptureConstraints,
    ) -> Result<Box<dyn CaptureStream>, CaptureError>;
}

/// A live microphone stream with an analyser attached.
pub trait CaptureStream: Send {
    /// Fill `window` with the most recent 8-bit unsigned time-domain samples.
    fn read_time_domain(&mut self, window: &mut [u8]) -> Result<(), CaptureError>;

    /// Stop every media track of the stream.
    fn stop_tracks(&mut self);

    /// Close the analysis context.
    fn close(&mut self);
}

/// Owns a stream and releases it exactly once.
///
/// `release` is called on every stop path; dropping an unreleased guard
/// releases it too.
pub struct StreamGuard {
    stream: Option<Box<dyn CaptureStream>>,
}

impl StreamGuard {
    pub fn new(stream: Box<dyn CaptureStream>) -> Self {
        Self {
            stream: Some(stream),
        }
    }

    pub fn is_released(&self) -> bool {
        self.stream.is_none()
    }

    pub fn read_time_domain(&mut self, window: &mut [u8]) -> Result<(), CaptureError> {
        match self.stream.as_mut() {
            Some(stream) => stream.read_time_domain(window),
            None => Err(CaptureError::StreamFailure {
                reason: "stream already released".to_string(),
            }),
        }
    }

    /// Stop tracks and close the context; later calls are no-ops.
    pub fn release(&mut self) -> bool {
        match self.stream.take() {
            Some(mut stream) => {
                stream.stop_tracks();
                stream.close();
                true
            }
            None => false,
        }
    }
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        if self.release() {
            log::debug!("[StreamGuard] Released stream on drop");
        }
    }
}
