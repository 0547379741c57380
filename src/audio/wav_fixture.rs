//! WAV-file microphone used for replay, demos and end-to-end tests.
//!
//! The file is decoded once with `hound`, converted to the 8-bit analyser
//! scale (first channel only) and then fed through the same [`sample_ring`]
//! as a live backend, advancing one tick's worth of frames per read.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::audio::capture::{CaptureConstraints, CaptureStream, MicrophoneSource};
use crate::audio::level::{f32_to_u8, i16_to_u8};
use crate::audio::sample_ring::{sample_ring, SampleWindow, SampleWriter};
use crate::error::CaptureError;

/// Decoded fixture audio on the 8-bit analyser scale
#[derive(Debug, Clone)]
pub struct WavFixture {
    pub samples: Vec<u8>,
    pub sample_rate: u32,
}

impl WavFixture {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CaptureError> {
        let path = path.as_ref();
        let mut reader = hound::WavReader::open(path).map_err(|err| match err {
            hound::Error::IoError(io) => CaptureError::from(io),
            other => CaptureError::StreamOpenFailed {
                reason: format!("{}: {}", path.display(), other),
            },
        })?;
        let spec = reader.spec();
        let channels = spec.channels.max(1) as usize;

        let decode_err = |err: hound::Error| CaptureError::StreamOpenFailed {
            reason: format!("decoding {}: {}", path.display(), err),
        };

        let interleaved: Vec<u8> = match (spec.sample_format, spec.bits_per_sample) {
            (hound::SampleFormat::Float, _) => reader
                .samples::<f32>()
                .map(|s| s.map(f32_to_u8))
                .collect::<Result<_, _>>()
                .map_err(decode_err)?,
            (hound::SampleFormat::Int, 8) => reader
                .samples::<i8>()
                .map(|s| s.map(|v| (v as i16 + 128) as u8))
                .collect::<Result<_, _>>()
                .map_err(decode_err)?,
            (hound::SampleFormat::Int, 16) => reader
                .samples::<i16>()
                .map(|s| s.map(i16_to_u8))
                .collect::<Result<_, _>>()
                .map_err(decode_err)?,
            (hound::SampleFormat::Int, bits) => {
                let full_scale = (1i64 << (bits.saturating_sub(1))) as f32;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|v| f32_to_u8(v as f32 / full_scale)))
                    .collect::<Result<_, _>>()
                    .map_err(decode_err)?
            }
        };

        let samples = interleaved.into_iter().step_by(channels).collect();
        Ok(Self {
            samples,
            sample_rate: spec.sample_rate,
        })
    }

    /// Frames that elapse during one sampling tick.
    pub fn frames_per_tick(&self, tick_ms: u64) -> usize {
        ((self.sample_rate as u64 * tick_ms) / 1000).max(1) as usize
    }

    /// Number of ticks needed to play the whole file.
    pub fn tick_count(&self, tick_ms: u64) -> usize {
        self.samples.len().div_ceil(self.frames_per_tick(tick_ms))
    }

    /// Replay cursor producing one analysis window per tick.
    pub fn player(&self, tick_ms: u64, window_size: usize) -> FixturePlayer {
        let (writer, window) = sample_ring(window_size.max(self.frames_per_tick(tick_ms)) * 2, window_size);
        FixturePlayer {
            samples: self.samples.clone(),
            frames_per_tick: self.frames_per_tick(tick_ms),
            position: 0,
            writer,
            window,
        }
    }
}

/// Steps through a fixture one tick at a time
pub struct FixturePlayer {
    samples: Vec<u8>,
    frames_per_tick: usize,
    position: usize,
    writer: SampleWriter,
    window: SampleWindow,
}

impl FixturePlayer {
    pub fn is_finished(&self) -> bool {
        self.position >= self.samples.len()
    }

    /// Advance one tick and copy the latest window into `out`.
    ///
    /// Past the end of the file the stream keeps producing silence.
    pub fn next_window(&mut self, out: &mut [u8]) {
        let end = (self.position + self.frames_per_tick).min(self.samples.len());
        if self.position < end {
            self.writer.push_slice(&self.samples[self.position..end]);
        } else {
            for _ in 0..self.frames_per_tick.min(out.len()) {
                self.writer.push(128);
            }
        }
        self.position = end.max(self.position);
        self.window.read_latest(out);
    }
}

/// Microphone that replays a WAV file
pub struct WavFixtureMicrophone {
    path: PathBuf,
    tick_ms: u64,
}

impl WavFixtureMicrophone {
    pub fn new(path: impl Into<PathBuf>, tick_ms: u64) -> Self {
        Self {
            path: path.into(),
            tick_ms,
        }
    }
}

#[async_trait]
impl MicrophoneSource for WavFixtureMicrophone {
    async fn acquire(
        &self,
        constraints: CaptureConstraints,
    ) -> Result<Box<dyn CaptureStream>, CaptureError> {
        let fixture = WavFixture::load(&self.path)?;
        log::info!(
            "[WavFixtureMicrophone] Replaying {:?} ({} samples @ {} Hz)",
            self.path,
            fixture.samples.len(),
            fixture.sample_rate
        );
        Ok(Box::new(WavFixtureStream {
            player: fixture.player(self.tick_ms, constraints.window_size),
            stopped: false,
        }))
    }
}

struct WavFixtureStream {
    player: FixturePlayer,
    stopped: bool,
}

impl CaptureStream for WavFixtureStream {
    fn read_time_domain(&mut self, window: &mut [u8]) -> Result<(), CaptureError> {
        if self.stopped {
            return Err(CaptureError::StreamFailure {
                reason: "fixture stream stopped".to_string(),
            });
        }
        self.player.next_window(window);
        Ok(())
    }

    fn stop_tracks(&mut self) {
        self.stopped = true;
    }

    fn close(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::level::rms_u8;

    fn write_tone(path: &Path, sample_rate: u32, seconds: f32, amplitude: f32) {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        let total = (sample_rate as f32 * seconds) as usize;
        for i in 0..total {
            let value = if (i / 20) % 2 == 0 { amplitude } else { -amplitude };
            writer.write_sample((value * i16::MAX as f32) as i16).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn test_load_and_step_through_fixture() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        write_tone(&path, 8000, 0.5, 0.5);

        let fixture = WavFixture::load(&path).unwrap();
        assert_eq!(fixture.sample_rate, 8000);
        assert_eq!(fixture.samples.len(), 4000);
        assert_eq!(fixture.frames_per_tick(100), 800);
        assert_eq!(fixture.tick_count(100), 5);

        let mut player = fixture.player(100, 512);
        let mut window = vec![0u8; 512];
        player.next_window(&mut window);
        let rms = rms_u8(&window);
        assert!((rms - 0.5).abs() < 0.02, "rms = {}", rms);
    }

    #[test]
    fn test_silence_after_end() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.wav");
        write_tone(&path, 8000, 0.1, 0.9);

        let fixture = WavFixture::load(&path).unwrap();
        let mut player = fixture.player(100, 256);
        let mut window = vec![0u8; 256];
        player.next_window(&mut window);
        assert!(player.is_finished());
        for _ in 0..3 {
            player.next_window(&mut window);
        }
        assert_eq!(rms_u8(&window), 0.0);
    }

    #[test]
    fn test_missing_file_maps_to_device_not_found() {
        let err = WavFixture::load("/no/such/fixture.wav").unwrap_err();
        assert_eq!(err, CaptureError::DeviceNotFound);
    }
}
