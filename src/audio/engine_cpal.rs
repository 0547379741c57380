// CpalMicrophone - live microphone capture through cpal
//
// cpal streams are not Send on every platform, so each stream lives on its own
// owner thread. The input callback converts the first channel of every frame
// to the 8-bit analyser scale and pushes it into the sample ring; the stream
// handle handed to the monitor only owns the reading half and a stop signal.

use std::sync::mpsc;
use std::thread::JoinHandle;

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use super::capture::{CaptureConstraints, CaptureStream, MicrophoneSource};
use super::level::{f32_to_u8, i16_to_u8};
use super::sample_ring::{sample_ring, SampleWindow, SampleWriter, DEFAULT_RING_CAPACITY};
use crate::error::CaptureError;

/// Default input device of the default cpal host
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalMicrophone;

impl CpalMicrophone {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl MicrophoneSource for CpalMicrophone {
    async fn acquire(
        &self,
        constraints: CaptureConstraints,
    ) -> Result<Box<dyn CaptureStream>, CaptureError> {
        // Opening a device can block for a while on some hosts.
        tokio::task::spawn_blocking(move || open_stream(constraints))
            .await
            .map_err(|e| CaptureError::StreamOpenFailed {
                reason: format!("capture thread join failed: {}", e),
            })?
            .map(|stream| Box::new(stream) as Box<dyn CaptureStream>)
    }
}

fn open_stream(constraints: CaptureConstraints) -> Result<CpalCaptureStream, CaptureError> {
    let (writer, window) = sample_ring(DEFAULT_RING_CAPACITY, constraints.window_size);
    let (ready_tx, ready_rx) = mpsc::channel::<Result<(), CaptureError>>();
    let (stop_tx, stop_rx) = mpsc::channel::<()>();

    let owner = std::thread::Builder::new()
        .name("scream-skip-capture".to_string())
        .spawn(move || {
            let stream = match build_input_stream(writer) {
                Ok(stream) => stream,
                Err(err) => {
                    let _ = ready_tx.send(Err(err));
                    return;
                }
            };
            if let Err(e) = stream.play() {
                let _ = ready_tx.send(Err(CaptureError::StreamOpenFailed {
                    reason: format!("input start failed: {}", e),
                }));
                return;
            }
            let _ = ready_tx.send(Ok(()));
            // Park until the monitor releases the stream or drops its handle.
            let _ = stop_rx.recv();
            drop(stream);
            log::debug!("[CpalMicrophone] Input stream dropped");
        })
        .map_err(CaptureError::from)?;

    match ready_rx.recv() {
        Ok(Ok(())) => {
            log::info!("[CpalMicrophone] Input stream started");
            Ok(CpalCaptureStream {
                window,
                stop_tx: Some(stop_tx),
                owner: Some(owner),
            })
        }
        Ok(Err(err)) => {
            let _ = owner.join();
            Err(err)
        }
        Err(_) => Err(CaptureError::StreamOpenFailed {
            reason: "capture thread exited before reporting".to_string(),
        }),
    }
}

fn build_input_stream(mut writer: SampleWriter) -> Result<cpal::Stream, CaptureError> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or(CaptureError::DeviceNotFound)?;

    let config = device
        .default_input_config()
        .map_err(map_default_config_error)?;

    let stream_config: cpal::StreamConfig = config.clone().into();
    let channels_count = (stream_config.channels as usize).max(1);

    let err_fn = |err| log::error!("[CpalMicrophone] Input stream error: {}", err);

    let stream = match config.sample_format() {
        cpal::SampleFormat::F32 => device.build_input_stream(
            &stream_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                for frame in data.chunks(channels_count) {
                    writer.push(frame.first().copied().map(f32_to_u8).unwrap_or(128));
                }
            },
            err_fn,
            None,
        ),
        cpal::SampleFormat::I16 => device.build_input_stream(
            &stream_config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                for frame in data.chunks(channels_count) {
                    writer.push(frame.first().copied().map(i16_to_u8).unwrap_or(128));
                }
            },
            err_fn,
            None,
        ),
        cpal::SampleFormat::U8 => device.build_input_stream(
            &stream_config,
            move |data: &[u8], _: &cpal::InputCallbackInfo| {
                for frame in data.chunks(channels_count) {
                    writer.push(frame.first().copied().unwrap_or(128));
                }
            },
            err_fn,
            None,
        ),
        other => {
            return Err(CaptureError::StreamOpenFailed {
                reason: format!("unsupported input sample format {:?}", other),
            })
        }
    }
    .map_err(map_build_error)?;

    Ok(stream)
}

fn map_default_config_error(err: cpal::DefaultStreamConfigError) -> CaptureError {
    match err {
        cpal::DefaultStreamConfigError::DeviceNotAvailable => CaptureError::DeviceNotFound,
        other => CaptureError::StreamOpenFailed {
            reason: other.to_string(),
        },
    }
}

fn map_build_error(err: cpal::BuildStreamError) -> CaptureError {
    match err {
        cpal::BuildStreamError::DeviceNotAvailable => CaptureError::DeviceBusy,
        other => CaptureError::StreamOpenFailed {
            reason: other.to_string(),
        },
    }
}

struct CpalCaptureStream {
    window: SampleWindow,
    stop_tx: Option<mpsc::Sender<()>>,
    owner: Option<JoinHandle<()>>,
}

impl CaptureStream for CpalCaptureStream {
    fn read_time_domain(&mut self, window: &mut [u8]) -> Result<(), CaptureError> {
        if self.stop_tx.is_none() {
            return Err(CaptureError::StreamFailure {
                reason: "input stream stopped".to_string(),
            });
        }
        if self.owner.as_ref().is_some_and(|h| h.is_finished()) {
            return Err(CaptureError::StreamFailure {
                reason: "capture thread exited".to_string(),
            });
        }
        self.window.read_latest(window);
        Ok(())
    }

    fn stop_tracks(&mut self) {
        if let Some(stop) = self.stop_tx.take() {
            let _ = stop.send(());
        }
    }

    fn close(&mut self) {
        if let Some(owner) = self.owner.take() {
            let _ = owner.join();
        }
    }
}
