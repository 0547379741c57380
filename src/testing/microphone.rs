//! Microphone doubles driven by scripted RMS levels.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::audio::{CaptureConstraints, CaptureStream, MicrophoneSource};
use crate::audio::level::SILENCE_MIDPOINT;
use crate::error::CaptureError;

/// Hands out streams whose RMS follows a script, one entry per read.
///
/// Each read fills the window with a square wave of amplitude
/// `round(level * 128)` around the midpoint, so `rms_u8` reproduces the
/// scripted level. Once the script runs out the last level is held.
pub struct ScriptedMicrophone {
    levels: Vec<f32>,
    fail_after: Option<usize>,
    grant_delay: Option<Duration>,
    acquisitions: AtomicUsize,
    live: Arc<AtomicUsize>,
}

impl ScriptedMicrophone {
    pub fn constant(level: f32) -> Self {
        Self::sequence(vec![level])
    }

    pub fn sequence(levels: Vec<f32>) -> Self {
        Self {
            levels,
            fail_after: None,
            grant_delay: None,
            acquisitions: AtomicUsize::new(0),
            live: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Every stream fails its read after `reads` successful ones.
    pub fn failing_after(mut self, reads: usize) -> Self {
        self.fail_after = Some(reads);
        self
    }

    /// Every acquisition waits this long before the stream is granted, like
    /// a permission prompt the user is slow to answer.
    pub fn granting_after(mut self, delay: Duration) -> Self {
        self.grant_delay = Some(delay);
        self
    }

    pub fn acquisitions(&self) -> usize {
        self.acquisitions.load(Ordering::SeqCst)
    }

    /// Streams handed out and not yet stopped.
    pub fn live_streams(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MicrophoneSource for ScriptedMicrophone {
    async fn acquire(
        &self,
        _constraints: CaptureConstraints,
    ) -> Result<Box<dyn CaptureStream>, CaptureError> {
        self.acquisitions.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.grant_delay {
            tokio::time::sleep(delay).await;
        }
        self.live.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedStream {
            levels: self.levels.clone(),
            reads: 0,
            fail_after: self.fail_after,
            live: Arc::clone(&self.live),
            stopped: false,
        }))
    }
}

struct ScriptedStream {
    levels: Vec<f32>,
    reads: usize,
    fail_after: Option<usize>,
    live: Arc<AtomicUsize>,
    stopped: bool,
}

impl CaptureStream for ScriptedStream {
    fn read_time_domain(&mut self, window: &mut [u8]) -> Result<(), CaptureError> {
        if self.stopped {
            return Err(CaptureError::StreamFailure {
                reason: "track ended".to_string(),
            });
        }
        if self.fail_after.is_some_and(|limit| self.reads >= limit) {
            return Err(CaptureError::StreamFailure {
                reason: "device unplugged".to_string(),
            });
        }

        let level = self
            .levels
            .get(self.reads)
            .or_else(|| self.levels.last())
            .copied()
            .unwrap_or(0.0);
        self.reads += 1;

        let amplitude = (level.clamp(0.0, 1.0) * 128.0).round();
        let high = (SILENCE_MIDPOINT + amplitude).min(255.0) as u8;
        let low = (SILENCE_MIDPOINT - amplitude).max(0.0) as u8;
        for (i, sample) in window.iter_mut().enumerate() {
            *sample = if i % 2 == 0 { high } else { low };
        }
        Ok(())
    }

    fn stop_tracks(&mut self) {
        if !self.stopped {
            self.stopped = true;
            self.live.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn close(&mut self) {}
}

/// Refuses every acquisition with a fixed error.
pub struct FailingMicrophone {
    error: CaptureError,
}

impl FailingMicrophone {
    pub fn new(error: CaptureError) -> Self {
        Self { error }
    }
}

#[async_trait]
impl MicrophoneSource for FailingMicrophone {
    async fn acquire(
        &self,
        _constraints: CaptureConstraints,
    ) -> Result<Box<dyn CaptureStream>, CaptureError> {
        Err(self.error.clone())
    }
}
