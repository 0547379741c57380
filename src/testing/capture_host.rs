//! Capture host double with scripted connection failures.

use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use crate::audio::{CaptureHost, LevelSnapshot};
use crate::error::ChannelError;
use crate::messages::{MonitorRequest, MonitorResponse};

#[derive(Debug, Default)]
struct HostState {
    alive: bool,
    capturing: bool,
    creates: usize,
    closes: usize,
    sends: usize,
    disconnects: usize,
    timeouts: usize,
}

/// Answers monitor requests without a real monitor. Queued failures are
/// consumed one per send, disconnects first.
#[derive(Debug, Default)]
pub struct FlakyCaptureHost {
    state: Mutex<HostState>,
}

impl FlakyCaptureHost {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, HostState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn disconnect_next_sends(&self, count: usize) {
        self.state().disconnects += count;
    }

    pub fn time_out_next_sends(&self, count: usize) {
        self.state().timeouts += count;
    }

    pub fn creates(&self) -> usize {
        self.state().creates
    }

    pub fn closes(&self) -> usize {
        self.state().closes
    }

    pub fn sends(&self) -> usize {
        self.state().sends
    }
}

#[async_trait]
impl CaptureHost for FlakyCaptureHost {
    async fn has_context(&self) -> bool {
        self.state().alive
    }

    async fn create_context(&self) -> Result<(), ChannelError> {
        let mut state = self.state();
        state.creates += 1;
        state.alive = true;
        Ok(())
    }

    async fn close_context(&self) {
        let mut state = self.state();
        state.closes += 1;
        state.alive = false;
        state.capturing = false;
    }

    async fn send(&self, request: MonitorRequest) -> Result<MonitorResponse, ChannelError> {
        let mut state = self.state();
        state.sends += 1;

        if state.disconnects > 0 {
            state.disconnects -= 1;
            return Err(ChannelError::Disconnected {
                target: "capture".to_string(),
            });
        }
        if state.timeouts > 0 {
            state.timeouts -= 1;
            return Err(ChannelError::Timeout {
                target: "capture".to_string(),
                timeout_ms: 5000,
            });
        }
        if !state.alive {
            return Err(ChannelError::Disconnected {
                target: "capture".to_string(),
            });
        }

        Ok(match request {
            MonitorRequest::StartMonitoring { .. } => {
                let already_capturing = std::mem::replace(&mut state.capturing, true);
                MonitorResponse::Started { already_capturing }
            }
            MonitorRequest::StopMonitoring => MonitorResponse::Stopped {
                was_capturing: std::mem::take(&mut state.capturing),
            },
            MonitorRequest::GetAudioLevel => MonitorResponse::Level(LevelSnapshot::idle()),
            MonitorRequest::Ping => MonitorResponse::Pong,
        })
    }
}
