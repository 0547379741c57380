// AudioLevelMonitor - microphone lifecycle and the periodic sampling loop
//
// State machine: Idle -> Requesting -> Capturing -> Idle (stop or error).
//
// The monitor owns at most one stream. The sampling loop runs on its own
// tokio task and shares three things with the owner: the active flag, the
// stream guard and the level snapshot. Everything else stays in the loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::capture::{CaptureConstraints, MicrophoneSource, StreamGuard};
use super::detector::{LoudEventDetector, Verdict};
use super::level::{rms_u8, SILENCE_MIDPOINT};
use crate::clock::TimeSource;
use crate::config::MonitorConfig;
use crate::error::{log_capture_error, CaptureError};
use crate::messages::{CaptureFailure, LoudEvent};

const STATUS_IDLE: &str = "Idle";
const STATUS_REQUESTING: &str = "Requesting microphone access";
const STATUS_LISTENING: &str = "Listening";
const STATUS_STOPPED: &str = "Stopped";
const STATUS_DETECTED: &str = "Loud event detected";

/// How long the status text shows a detection before reverting to Listening
const DETECTED_STATUS_MS: u64 = 1000;

/// Lifecycle phase of the monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorPhase {
    Idle,
    Requesting,
    Capturing,
}

/// Pull-query answer for the level meter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelSnapshot {
    pub level: f32,
    pub phase: MonitorPhase,
    pub status: String,
}

impl LevelSnapshot {
    pub fn idle() -> Self {
        Self {
            level: 0.0,
            phase: MonitorPhase::Idle,
            status: STATUS_IDLE.to_string(),
        }
    }
}

/// Events pushed out of the sampling loop
#[derive(Debug, Clone, PartialEq)]
pub enum MonitorEvent {
    Detected(LoudEvent),
    Failed(CaptureFailure),
}

struct Shared {
    active: AtomicBool,
    stream: Mutex<Option<StreamGuard>>,
    snapshot: Mutex<LevelSnapshot>,
}

impl Shared {
    fn lock_stream(&self) -> Result<MutexGuard<'_, Option<StreamGuard>>, CaptureError> {
        self.stream.lock().map_err(|_| CaptureError::LockPoisoned {
            component: "stream".to_string(),
        })
    }

    fn lock_snapshot(&self) -> MutexGuard<'_, LevelSnapshot> {
        // The snapshot is plain data; a poisoned lock still holds a usable value.
        self.snapshot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_phase(&self, phase: MonitorPhase, status: &str) {
        let mut snapshot = self.lock_snapshot();
        snapshot.phase = phase;
        snapshot.status = status.to_string();
        if phase != MonitorPhase::Capturing {
            snapshot.level = 0.0;
        }
    }

    fn set_level(&self, level: f32) {
        self.lock_snapshot().level = level;
    }

    fn set_status(&self, status: &str) {
        self.lock_snapshot().status = status.to_string();
    }
}

/// Owns the microphone stream and the sampling loop of one capture context.
pub struct AudioLevelMonitor {
    config: MonitorConfig,
    microphone: Arc<dyn MicrophoneSource>,
    clock: Arc<dyn TimeSource>,
    events: mpsc::UnboundedSender<MonitorEvent>,
    shared: Arc<Shared>,
    sampler: Option<JoinHandle<()>>,
}

impl AudioLevelMonitor {
    pub fn new(
        config: MonitorConfig,
        microphone: Arc<dyn MicrophoneSource>,
        clock: Arc<dyn TimeSource>,
        events: mpsc::UnboundedSender<MonitorEvent>,
    ) -> Self {
        Self {
            config,
            microphone,
            clock,
            events,
            shared: Arc::new(Shared {
                active: AtomicBool::new(false),
                stream: Mutex::new(None),
                snapshot: Mutex::new(LevelSnapshot::idle()),
            }),
            sampler: None,
        }
    }

    pub fn phase(&self) -> MonitorPhase {
        self.shared.lock_snapshot().phase
    }

    pub fn is_capturing(&self) -> bool {
        self.phase() == MonitorPhase::Capturing
    }

    /// Current level, phase and status text.
    pub fn snapshot(&self) -> LevelSnapshot {
        self.shared.lock_snapshot().clone()
    }

    /// Acquire the microphone and start sampling.
    ///
    /// Returns `Ok(true)` when a stream was already Requesting or Capturing;
    /// in that case nothing changes.
    pub async fn start(&mut self, sensitivity: f32) -> Result<bool, CaptureError> {
        if self.phase() != MonitorPhase::Idle {
            log::debug!("[AudioLevelMonitor] start ignored, already {:?}", self.phase());
            return Ok(true);
        }

        // A sampler that ended on a read failure is finished but still held.
        if let Some(previous) = self.sampler.take() {
            previous.abort();
        }

        self.shared.set_phase(MonitorPhase::Requesting, STATUS_REQUESTING);
        let constraints = CaptureConstraints::from_config(&self.config);

        let stream = match self.microphone.acquire(constraints).await {
            Ok(stream) => stream,
            Err(err) => {
                log_capture_error(&err, "start");
                self.shared.set_phase(MonitorPhase::Idle, err.status_text());
                return Err(err);
            }
        };

        {
            let mut slot = match self.shared.lock_stream() {
                Ok(slot) => slot,
                Err(err) => {
                    self.shared.set_phase(MonitorPhase::Idle, err.status_text());
                    return Err(err);
                }
            };
            *slot = Some(StreamGuard::new(stream));
        }

        self.shared.active.store(true, Ordering::SeqCst);
        self.shared.set_phase(MonitorPhase::Capturing, STATUS_LISTENING);

        let detector = LoudEventDetector::new(sensitivity, self.config.cooldown_ms);
        log::info!(
            "[AudioLevelMonitor] Capturing (sensitivity={:.2}, threshold={:.2}, tick={}ms, window={})",
            sensitivity,
            detector.threshold(),
            self.config.tick_ms,
            self.config.fft_size
        );

        self.sampler = Some(tokio::spawn(sampling_loop(
            Arc::clone(&self.shared),
            self.config.clone(),
            detector,
            Arc::clone(&self.clock),
            self.events.clone(),
        )));

        Ok(false)
    }

    /// Stop sampling and release the microphone. Safe to call when Idle.
    ///
    /// Returns whether a stream was being captured.
    pub fn stop(&mut self) -> Result<bool, CaptureError> {
        self.shared.active.store(false, Ordering::SeqCst);
        if let Some(sampler) = self.sampler.take() {
            sampler.abort();
        }

        let released = self
            .shared
            .lock_stream()?
            .take()
            .map(|mut guard| guard.release())
            .unwrap_or(false);

        let was_capturing = self.phase() == MonitorPhase::Capturing || released;
        if was_capturing {
            log::info!("[AudioLevelMonitor] Stopped, microphone released");
            self.shared.set_phase(MonitorPhase::Idle, STATUS_STOPPED);
        }
        Ok(was_capturing)
    }
}

impl Drop for AudioLevelMonitor {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

async fn sampling_loop(
    shared: Arc<Shared>,
    config: MonitorConfig,
    mut detector: LoudEventDetector,
    clock: Arc<dyn TimeSource>,
    events: mpsc::UnboundedSender<MonitorEvent>,
) {
    let mut interval = tokio::time::interval(config.tick());
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut window = vec![SILENCE_MIDPOINT as u8; config.fft_size];
    let mut ticks: u64 = 0;
    let mut detected_until: Option<u64> = None;

    loop {
        interval.tick().await;
        if !shared.active.load(Ordering::SeqCst) {
            break;
        }

        let read = match shared.lock_stream() {
            Ok(mut slot) => match slot.as_mut() {
                Some(guard) => guard.read_time_domain(&mut window),
                None => break,
            },
            Err(err) => Err(err),
        };

        if let Err(err) = read {
            log_capture_error(&err, "sampling_loop");
            shared.active.store(false, Ordering::SeqCst);
            if let Ok(mut slot) = shared.lock_stream() {
                if let Some(mut guard) = slot.take() {
                    guard.release();
                }
            }
            shared.set_phase(MonitorPhase::Idle, err.status_text());
            let _ = events.send(MonitorEvent::Failed(CaptureFailure::from(&err)));
            break;
        }

        let metric = rms_u8(&window);
        shared.set_level(metric);
        ticks += 1;

        if config.log_every_n_ticks > 0 && ticks % config.log_every_n_ticks == 0 {
            tracing::debug!(
                ticks,
                level = metric,
                threshold = detector.threshold(),
                "[AudioLevelMonitor] level sample"
            );
        }

        let now_ms = clock.now_ms();
        if detected_until.is_some_and(|until| now_ms >= until) {
            detected_until = None;
            shared.set_status(STATUS_LISTENING);
        }

        match detector.observe(metric, now_ms) {
            Verdict::Detected(event) => {
                // stop() may have landed while this tick was running.
                if !shared.active.load(Ordering::SeqCst) {
                    break;
                }
                shared.set_status(STATUS_DETECTED);
                detected_until = Some(now_ms + DETECTED_STATUS_MS);
                tracing::info!(
                    metric = event.metric,
                    timestamp_ms = event.timestamp_ms,
                    "[AudioLevelMonitor] loud event"
                );
                if events.send(MonitorEvent::Detected(event)).is_err() {
                    tracing::warn!("[AudioLevelMonitor] event receiver gone");
                }
            }
            Verdict::Suppressed { remaining_ms } => {
                tracing::debug!(
                    metric,
                    remaining_ms,
                    "[AudioLevelMonitor] event suppressed by cooldown"
                );
            }
            Verdict::Quiet => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TokioTimeSource;
    use crate::testing::{FailingMicrophone, ScriptedMicrophone};
    use std::time::Duration;

    fn monitor_with(
        microphone: Arc<dyn MicrophoneSource>,
    ) -> (AudioLevelMonitor, mpsc::UnboundedReceiver<MonitorEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let monitor = AudioLevelMonitor::new(
            MonitorConfig {
                fft_size: 256,
                ..MonitorConfig::default()
            },
            microphone,
            Arc::new(TokioTimeSource::new()),
            tx,
        );
        (monitor, rx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_double_start_opens_one_stream() {
        let microphone = Arc::new(ScriptedMicrophone::constant(0.1));
        let (mut monitor, _rx) = monitor_with(microphone.clone());

        assert_eq!(monitor.start(0.5).await, Ok(false));
        assert_eq!(monitor.start(0.5).await, Ok(true));
        assert_eq!(microphone.acquisitions(), 1);
        assert_eq!(microphone.live_streams(), 1);
        assert_eq!(monitor.phase(), MonitorPhase::Capturing);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_releases_stream_and_is_idempotent() {
        let microphone = Arc::new(ScriptedMicrophone::constant(0.1));
        let (mut monitor, _rx) = monitor_with(microphone.clone());

        assert_eq!(monitor.stop(), Ok(false));
        monitor.start(0.5).await.unwrap();
        tokio::time::sleep(Duration::from_millis(350)).await;
        assert!(monitor.snapshot().level > 0.0);

        assert_eq!(monitor.stop(), Ok(true));
        assert_eq!(monitor.stop(), Ok(false));
        assert_eq!(microphone.live_streams(), 0);

        let snapshot = monitor.snapshot();
        assert_eq!(snapshot.phase, MonitorPhase::Idle);
        assert_eq!(snapshot.level, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scripted_levels_emit_single_event() {
        let microphone = Arc::new(ScriptedMicrophone::sequence(vec![0.1, 0.3, 0.6, 0.65, 0.2]));
        let (mut monitor, mut rx) = monitor_with(microphone);

        monitor.start(0.5).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1000)).await;
        monitor.stop().unwrap();

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert_eq!(events.len(), 1);
        match &events[0] {
            MonitorEvent::Detected(event) => {
                assert!((event.metric - 0.6).abs() < 0.01, "metric = {}", event.metric);
                assert_eq!(event.timestamp_ms, 200);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquisition_failure_leaves_idle_with_status() {
        let (mut monitor, _rx) =
            monitor_with(Arc::new(FailingMicrophone::new(CaptureError::PermissionDenied)));

        let err = monitor.start(0.5).await.unwrap_err();
        assert_eq!(err, CaptureError::PermissionDenied);

        let snapshot = monitor.snapshot();
        assert_eq!(snapshot.phase, MonitorPhase::Idle);
        assert_eq!(snapshot.status, CaptureError::PermissionDenied.status_text());
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_failure_reports_and_releases() {
        let microphone = Arc::new(ScriptedMicrophone::constant(0.1).failing_after(3));
        let (mut monitor, mut rx) = monitor_with(microphone.clone());

        monitor.start(0.5).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1000)).await;

        assert!(matches!(rx.try_recv(), Ok(MonitorEvent::Failed(_))));
        assert_eq!(monitor.phase(), MonitorPhase::Idle);
        assert_eq!(microphone.live_streams(), 0);

        // A fresh start after the failure acquires a new stream.
        assert_eq!(monitor.start(0.5).await, Ok(false));
        assert_eq!(microphone.acquisitions(), 2);
    }
}
