// Capture context - the task that hosts the AudioLevelMonitor
//
// The coordinator never touches the monitor directly. It talks to a capture
// context through `CaptureHost`: create it, close it, ask whether it is still
// alive and send it typed requests. The context serves requests one at a time
// and forwards loud events and capture failures back to the coordinator.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::capture::MicrophoneSource;
use super::monitor::{AudioLevelMonitor, MonitorEvent};
use crate::clock::TimeSource;
use crate::config::MonitorConfig;
use crate::coordinator::CoordinatorHandle;
use crate::error::{log_capture_error, ChannelError};
use crate::messages::{CoordinatorMessage, MonitorRequest, MonitorResponse};

const CAPTURE_TARGET: &str = "capture";
const REQUEST_QUEUE: usize = 16;

/// Lifecycle and messaging surface of the capture context
#[async_trait]
pub trait CaptureHost: Send + Sync {
    /// Whether a live context exists.
    async fn has_context(&self) -> bool;

    /// Create the context; a no-op when one is already alive.
    async fn create_context(&self) -> Result<(), ChannelError>;

    /// Tear the context down, releasing the microphone.
    async fn close_context(&self);

    /// Send one request and wait for its reply.
    async fn send(&self, request: MonitorRequest) -> Result<MonitorResponse, ChannelError>;
}

struct CaptureEnvelope {
    request: MonitorRequest,
    reply: oneshot::Sender<MonitorResponse>,
}

struct ContextSlot {
    requests: mpsc::Sender<CaptureEnvelope>,
    task: JoinHandle<()>,
}

impl ContextSlot {
    fn is_alive(&self) -> bool {
        !self.task.is_finished() && !self.requests.is_closed()
    }
}

/// In-process capture context backed by a tokio task
pub struct LocalCaptureHost {
    config: MonitorConfig,
    microphone: Arc<dyn MicrophoneSource>,
    clock: Arc<dyn TimeSource>,
    coordinator: CoordinatorHandle,
    request_timeout: Duration,
    slot: Mutex<Option<ContextSlot>>,
}

impl LocalCaptureHost {
    pub fn new(
        config: MonitorConfig,
        microphone: Arc<dyn MicrophoneSource>,
        clock: Arc<dyn TimeSource>,
        coordinator: CoordinatorHandle,
        request_timeout_ms: u64,
    ) -> Self {
        Self {
            config,
            microphone,
            clock,
            coordinator,
            request_timeout: Duration::from_millis(request_timeout_ms.max(1)),
            slot: Mutex::new(None),
        }
    }

    fn lock_slot(&self) -> Result<MutexGuard<'_, Option<ContextSlot>>, ChannelError> {
        self.slot.lock().map_err(|_| ChannelError::ContextCreateFailed {
            reason: "capture context slot poisoned".to_string(),
        })
    }

    /// Abort the context task without an orderly close, as when the browser
    /// tears the document down behind our back.
    pub fn kill(&self) {
        if let Ok(slot) = self.lock_slot() {
            if let Some(context) = slot.as_ref() {
                log::warn!("[CaptureHost] Killing capture context");
                context.task.abort();
            }
        }
    }
}

#[async_trait]
impl CaptureHost for LocalCaptureHost {
    async fn has_context(&self) -> bool {
        self.lock_slot()
            .map(|slot| slot.as_ref().is_some_and(ContextSlot::is_alive))
            .unwrap_or(false)
    }

    async fn create_context(&self) -> Result<(), ChannelError> {
        let mut slot = self.lock_slot()?;
        if slot.as_ref().is_some_and(ContextSlot::is_alive) {
            return Ok(());
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let monitor = AudioLevelMonitor::new(
            self.config.clone(),
            Arc::clone(&self.microphone),
            Arc::clone(&self.clock),
            events_tx,
        );
        let (requests_tx, requests_rx) = mpsc::channel(REQUEST_QUEUE);
        let task = tokio::spawn(run_capture_context(
            monitor,
            requests_rx,
            events_rx,
            self.coordinator.clone(),
        ));

        *slot = Some(ContextSlot {
            requests: requests_tx,
            task,
        });
        log::info!("[CaptureHost] Capture context created");
        Ok(())
    }

    async fn close_context(&self) {
        let context = match self.lock_slot() {
            Ok(mut slot) => slot.take(),
            Err(_) => None,
        };
        if let Some(context) = context {
            // Dropping the request sender ends the serve loop, which stops the monitor.
            drop(context.requests);
            let mut task = context.task;
            if tokio::time::timeout(self.request_timeout, &mut task)
                .await
                .is_err()
            {
                // Aborting drops the monitor, which releases the microphone.
                log::warn!("[CaptureHost] Capture context did not exit in time, aborting");
                task.abort();
            }
            log::info!("[CaptureHost] Capture context closed");
        }
    }

    async fn send(&self, request: MonitorRequest) -> Result<MonitorResponse, ChannelError> {
        let requests = {
            let slot = self.lock_slot()?;
            match slot.as_ref() {
                Some(context) if context.is_alive() => context.requests.clone(),
                _ => {
                    return Err(ChannelError::Disconnected {
                        target: CAPTURE_TARGET.to_string(),
                    })
                }
            }
        };

        let name = request.name();
        let (reply_tx, reply_rx) = oneshot::channel();
        let exchange = async move {
            requests
                .send(CaptureEnvelope {
                    request,
                    reply: reply_tx,
                })
                .await
                .map_err(|_| ChannelError::Disconnected {
                    target: CAPTURE_TARGET.to_string(),
                })?;
            reply_rx.await.map_err(|_| ChannelError::Disconnected {
                target: CAPTURE_TARGET.to_string(),
            })
        };

        match tokio::time::timeout(self.request_timeout, exchange).await {
            Ok(result) => result,
            Err(_) => {
                log::warn!("[CaptureHost] {} timed out", name);
                Err(ChannelError::Timeout {
                    target: CAPTURE_TARGET.to_string(),
                    timeout_ms: self.request_timeout.as_millis() as u64,
                })
            }
        }
    }
}

async fn run_capture_context(
    mut monitor: AudioLevelMonitor,
    mut requests: mpsc::Receiver<CaptureEnvelope>,
    mut events: mpsc::UnboundedReceiver<MonitorEvent>,
    coordinator: CoordinatorHandle,
) {
    loop {
        tokio::select! {
            envelope = requests.recv() => {
                let Some(envelope) = envelope else { break };
                let response = serve(&mut monitor, envelope.request).await;
                let _ = envelope.reply.send(response);
            }
            Some(event) = events.recv() => {
                let message = match event {
                    MonitorEvent::Detected(event) => CoordinatorMessage::EventDetected(event),
                    MonitorEvent::Failed(failure) => CoordinatorMessage::CaptureFailed(failure),
                };
                if let Err(err) = coordinator.notify(message) {
                    log::warn!("[CaptureContext] Coordinator unreachable: {}", err);
                }
            }
        }
    }

    if let Err(err) = monitor.stop() {
        log_capture_error(&err, "capture_context_shutdown");
    }
}

async fn serve(monitor: &mut AudioLevelMonitor, request: MonitorRequest) -> MonitorResponse {
    log::debug!("[CaptureContext] {}", request.name());
    match request {
        MonitorRequest::StartMonitoring { sensitivity } => match monitor.start(sensitivity).await {
            Ok(already_capturing) => MonitorResponse::Started { already_capturing },
            Err(err) => MonitorResponse::StartFailed((&err).into()),
        },
        MonitorRequest::StopMonitoring => {
            let was_capturing = monitor.stop().unwrap_or_else(|err| {
                log_capture_error(&err, "stop_monitoring");
                false
            });
            MonitorResponse::Stopped { was_capturing }
        }
        MonitorRequest::GetAudioLevel => MonitorResponse::Level(monitor.snapshot()),
        MonitorRequest::Ping => MonitorResponse::Pong,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::MonitorPhase;
    use crate::clock::TokioTimeSource;
    use crate::testing::ScriptedMicrophone;

    fn host(microphone: Arc<ScriptedMicrophone>) -> (LocalCaptureHost, crate::coordinator::Inbox) {
        let (handle, inbox) = CoordinatorHandle::channel();
        let host = LocalCaptureHost::new(
            MonitorConfig {
                fft_size: 256,
                ..MonitorConfig::default()
            },
            microphone,
            Arc::new(TokioTimeSource::new()),
            handle,
            5000,
        );
        (host, inbox)
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_without_context_is_disconnected() {
        let (host, _inbox) = host(Arc::new(ScriptedMicrophone::constant(0.0)));
        let err = host.send(MonitorRequest::Ping).await.unwrap_err();
        assert!(err.is_disconnect());
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_level_and_stop_through_context() {
        let microphone = Arc::new(ScriptedMicrophone::constant(0.4));
        let (host, _inbox) = host(microphone.clone());
        host.create_context().await.unwrap();
        assert!(host.has_context().await);

        let started = host
            .send(MonitorRequest::StartMonitoring { sensitivity: 0.2 })
            .await
            .unwrap();
        assert_eq!(started, MonitorResponse::Started { already_capturing: false });

        tokio::time::sleep(Duration::from_millis(250)).await;
        match host.send(MonitorRequest::GetAudioLevel).await.unwrap() {
            MonitorResponse::Level(snapshot) => {
                assert_eq!(snapshot.phase, MonitorPhase::Capturing);
                assert!((snapshot.level - 0.4).abs() < 0.01);
            }
            other => panic!("unexpected response {:?}", other),
        }

        let stopped = host.send(MonitorRequest::StopMonitoring).await.unwrap();
        assert_eq!(stopped, MonitorResponse::Stopped { was_capturing: true });
        assert_eq!(microphone.live_streams(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_loud_event_reaches_coordinator_inbox() {
        let (host, mut inbox) = host(Arc::new(ScriptedMicrophone::constant(0.9)));
        host.create_context().await.unwrap();
        host.send(MonitorRequest::StartMonitoring { sensitivity: 0.5 })
            .await
            .unwrap();

        let envelope = tokio::time::timeout(Duration::from_secs(1), inbox.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(
            envelope.message,
            CoordinatorMessage::EventDetected(_)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_kill_drops_context_and_releases_microphone() {
        let microphone = Arc::new(ScriptedMicrophone::constant(0.1));
        let (host, _inbox) = host(microphone.clone());
        host.create_context().await.unwrap();
        host.send(MonitorRequest::StartMonitoring { sensitivity: 0.5 })
            .await
            .unwrap();
        assert_eq!(microphone.live_streams(), 1);

        host.kill();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!host.has_context().await);
        assert_eq!(microphone.live_streams(), 0);
        assert!(host.send(MonitorRequest::Ping).await.unwrap_err().is_disconnect());

        host.create_context().await.unwrap();
        assert_eq!(host.send(MonitorRequest::Ping).await, Ok(MonitorResponse::Pong));
    }
}
