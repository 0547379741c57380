// Coordinator - process-wide controller of the capture session
//
// Owns the monitoring session, the per-tab ad map, the settings, the scolding
// counter and the capture status. Every inbound message goes through
// `handle`, which never fails: errors become status flags or error replies.
//
// Transition rules, applied by `reconcile`:
//   !enabled                          => stopped
//   enabled && some tab shows an ad   => started
//   enabled && no tab shows an ad     => stopped
//   sensitivity change while running  => stop, then start with the new value

pub mod handle;
pub mod link;
pub mod session;
pub mod surfaces;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::MissedTickBehavior;

use crate::action::{ActionOutcome, ExecutorRegistry};
use crate::audio::{CaptureHost, LevelSnapshot};
use crate::config::{CoordinatorConfig, FalsePositivePolicy};
use crate::error::{
    log_channel_error, CaptureErrorCodes, ChannelError, ChannelErrorCodes, ErrorCode,
};
use crate::messages::{
    AdStateChanged, CaptureFailure, CoordinatorMessage, CoordinatorReply, LoudEvent,
    MonitorRequest, MonitorResponse, TabId,
};
use crate::settings::{ActionProfile, KeyValueStore, ScoldingVoice, Settings};
use crate::telemetry::{ActionKind, CoordinatorEvent, TelemetryCollector};

pub use handle::{CoordinatorHandle, Envelope, Inbox};
pub use link::MonitorLink;
pub use session::{MonitoringSession, ScoldingCounter, TabStates};
pub use surfaces::{Badge, EscalationSink, LogBadge, LogEscalation, ALERT_COLOR, ALERT_TEXT};

/// Capture health as shown to the UI
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CaptureStatus {
    Idle,
    Listening,
    Error { code: i32, message: String },
}

/// Answer to GET_STATUS
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinatorStatus {
    pub settings: Settings,
    pub session: MonitoringSession,
    pub capture: CaptureStatus,
    pub scolding_count: u32,
    pub recoveries: u32,
    pub has_capture_context: bool,
    pub tabs: Vec<AdStateChanged>,
}

/// External collaborators of the coordinator
pub struct CoordinatorDeps {
    pub store: Arc<dyn KeyValueStore>,
    pub capture: Arc<dyn CaptureHost>,
    pub executors: Arc<dyn ExecutorRegistry>,
    pub badge: Arc<dyn Badge>,
    pub escalation: Arc<dyn EscalationSink>,
    pub telemetry: Arc<TelemetryCollector>,
}

pub struct Coordinator {
    config: CoordinatorConfig,
    settings: Settings,
    store: Arc<dyn KeyValueStore>,
    link: MonitorLink,
    executors: Arc<dyn ExecutorRegistry>,
    badge: Arc<dyn Badge>,
    escalation: Arc<dyn EscalationSink>,
    telemetry: Arc<TelemetryCollector>,
    session: MonitoringSession,
    tabs: TabStates,
    scolding: ScoldingCounter,
    capture_status: CaptureStatus,
    recoveries: u32,
    badge_generation: Arc<AtomicU64>,
}

impl Coordinator {
    /// Seed missing settings keys, then load settings from the store.
    pub fn new(config: CoordinatorConfig, cooldown_ms: u64, deps: CoordinatorDeps) -> Self {
        if let Err(err) = Settings::seed_defaults(deps.store.as_ref()) {
            log::warn!("[Coordinator] Could not seed default settings: {}", err);
        }
        let settings = Settings::load(deps.store.as_ref()).unwrap_or_else(|err| {
            log::warn!("[Coordinator] Could not load settings, using defaults: {}", err);
            Settings::default()
        });
        log::info!(
            "[Coordinator] Initialized (enabled={}, sensitivity={:.2}, profile={:?})",
            settings.enabled,
            settings.sensitivity,
            settings.profile
        );

        Self {
            link: MonitorLink::new(deps.capture, config.reconnect_delay_ms),
            scolding: ScoldingCounter::new(config.escalation_threshold),
            session: MonitoringSession::new(cooldown_ms),
            config,
            settings,
            store: deps.store,
            executors: deps.executors,
            badge: deps.badge,
            escalation: deps.escalation,
            telemetry: deps.telemetry,
            tabs: TabStates::default(),
            capture_status: CaptureStatus::Idle,
            recoveries: 0,
            badge_generation: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn session(&self) -> &MonitoringSession {
        &self.session
    }

    pub fn capture_status(&self) -> &CaptureStatus {
        &self.capture_status
    }

    pub fn scolding_count(&self) -> u32 {
        self.scolding.count()
    }

    pub fn tab_state(&self, tab_id: TabId) -> Option<AdStateChanged> {
        self.tabs.get(tab_id)
    }

    pub fn telemetry(&self) -> Arc<TelemetryCollector> {
        Arc::clone(&self.telemetry)
    }

    pub async fn status(&self) -> CoordinatorStatus {
        CoordinatorStatus {
            settings: self.settings.clone(),
            session: self.session.clone(),
            capture: self.capture_status.clone(),
            scolding_count: self.scolding.count(),
            recoveries: self.recoveries,
            has_capture_context: self.link.has_context().await,
            tabs: self.tabs.snapshot(),
        }
    }

    // ========================================================================
    // Message handling
    // ========================================================================

    pub async fn handle(&mut self, message: CoordinatorMessage) -> CoordinatorReply {
        log::debug!("[Coordinator] {}", message.name());
        match message {
            CoordinatorMessage::AdStateChanged(change) => {
                self.on_ad_state(change).await;
                CoordinatorReply::Ack
            }
            CoordinatorMessage::EventDetected(event) => match self.on_loud_event(event).await {
                Some(outcome) => CoordinatorReply::ActionResult(outcome),
                None => CoordinatorReply::Ack,
            },
            CoordinatorMessage::CaptureFailed(failure) => {
                self.on_capture_failed(failure);
                CoordinatorReply::Ack
            }
            CoordinatorMessage::SettingsUpdated(settings) => {
                self.on_settings_updated(settings).await;
                CoordinatorReply::Settings(self.settings.clone())
            }
            CoordinatorMessage::GetSettings => CoordinatorReply::Settings(self.settings.clone()),
            CoordinatorMessage::GetStatus => CoordinatorReply::Status(Box::new(self.status().await)),
            CoordinatorMessage::GetAudioLevel => match self.audio_level().await {
                Ok(snapshot) => CoordinatorReply::Level(snapshot),
                Err(err) => CoordinatorReply::Error {
                    code: err.code(),
                    message: err.message(),
                },
            },
            CoordinatorMessage::Ping => CoordinatorReply::Pong,
        }
    }

    /// Serve the inbox until every handle is dropped, running the health
    /// check on its own period.
    pub async fn run(mut self, mut inbox: Inbox) {
        let period = Duration::from_millis(self.config.health_check_interval_ms.max(1));
        let mut health = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        health.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                envelope = inbox.recv() => {
                    let Some(Envelope { message, reply }) = envelope else { break };
                    let response = self.handle(message).await;
                    if let Some(reply) = reply {
                        let _ = reply.send(response);
                    }
                }
                _ = health.tick() => self.health_check().await,
            }
        }

        log::info!("[Coordinator] Inbox closed, shutting down");
        if self.session.active {
            self.stop_session("shutdown").await;
        }
        self.link.close().await;
    }

    async fn on_ad_state(&mut self, change: AdStateChanged) {
        self.tabs.record(change);
        self.telemetry.publish(CoordinatorEvent::AdStateChanged {
            tab_id: change.tab_id,
            is_ad_active: change.is_ad_active,
        });
        self.reconcile().await;
    }

    async fn on_settings_updated(&mut self, settings: Settings) {
        let settings = settings.normalized();
        let sensitivity_changed = (settings.sensitivity - self.settings.sensitivity).abs() > f32::EPSILON;
        let profile_changed = settings.profile != self.settings.profile;
        self.settings = settings;

        if let Err(err) = self.settings.save(self.store.as_ref()) {
            log::warn!("[Coordinator] Could not persist settings: {}", err);
        }
        if profile_changed {
            self.scolding.reset();
        }

        if sensitivity_changed && self.session.active && self.settings.enabled {
            log::info!(
                "[Coordinator] Sensitivity changed to {:.2}, restarting capture",
                self.settings.sensitivity
            );
            self.stop_session("sensitivity changed").await;
        }
        self.reconcile().await;
    }

    fn on_capture_failed(&mut self, failure: CaptureFailure) {
        log::warn!(
            "[Coordinator] Capture failed: code={}, kind={}, message={}",
            failure.code,
            failure.kind,
            failure.message
        );
        // The monitor is already Idle; only the bookkeeping follows.
        self.session.stop();
        self.capture_status = CaptureStatus::Error {
            code: failure.code,
            message: failure.message.clone(),
        };
        self.telemetry.publish(CoordinatorEvent::CaptureFailed {
            code: failure.code,
            message: failure.message,
        });
    }

    async fn on_loud_event(&mut self, event: LoudEvent) -> Option<ActionOutcome> {
        if !self.session.active {
            log::debug!(
                "[Coordinator] Ignoring loud event at {}ms, no active session",
                event.timestamp_ms
            );
            return None;
        }

        self.session.record_event(event.timestamp_ms);
        self.flash_badge();
        self.telemetry.publish(CoordinatorEvent::LoudEvent {
            metric: event.metric,
            timestamp_ms: event.timestamp_ms,
        });

        let outcome = match self.settings.profile {
            ActionProfile::Skip => self.skip_ad().await,
            ActionProfile::Scold { voice } => self.scold(voice).await,
        };
        Some(outcome)
    }

    async fn skip_ad(&mut self) -> ActionOutcome {
        let target = self.tabs.most_recent_ad_tab();
        let outcome = match target.and_then(|tab| self.executors.executor(tab)) {
            Some(executor) => executor.execute_skip().await,
            None => ActionOutcome::failed("no target tab".to_string()),
        };
        self.publish_action(target, ActionKind::Skip, &outcome);

        if outcome.success {
            if let Some(tab) = target {
                self.tabs.clear(tab);
            }
            tokio::time::sleep(Duration::from_millis(self.config.stop_after_skip_ms)).await;
            self.reconcile().await;
        } else if self.config.false_positive_policy == FalsePositivePolicy::StopListening {
            log::info!("[Coordinator] Action had no effect, stopping per policy");
            self.stop_session("no effect").await;
        }
        outcome
    }

    async fn scold(&mut self, voice: ScoldingVoice) -> ActionOutcome {
        let target = self
            .executors
            .active_tab()
            .or_else(|| self.tabs.most_recent_ad_tab());
        let outcome = match target.and_then(|tab| self.executors.executor(tab)) {
            Some(executor) => executor.pause_and_exit().await,
            None => ActionOutcome::failed("no target tab".to_string()),
        };
        self.publish_action(target, ActionKind::PauseAndExit, &outcome);

        if let Some(count) = self.scolding.bump() {
            log::warn!("[Coordinator] Scolding threshold reached ({})", count);
            self.escalation.escalate(count, voice);
            self.telemetry
                .publish(CoordinatorEvent::Escalation { count, voice });
        }
        outcome
    }

    fn publish_action(&self, tab_id: Option<TabId>, kind: ActionKind, outcome: &ActionOutcome) {
        log::info!(
            "[Coordinator] {:?} on tab {:?}: success={}, method={:?}, reason={:?}",
            kind,
            tab_id,
            outcome.success,
            outcome.method,
            outcome.reason
        );
        self.telemetry.publish(CoordinatorEvent::ActionCompleted {
            tab_id,
            kind,
            success: outcome.success,
            method: outcome.method,
            reason: outcome.reason.clone(),
        });
    }

    fn flash_badge(&self) {
        self.badge.set(ALERT_TEXT, ALERT_COLOR);
        let generation = self.badge_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let current = Arc::clone(&self.badge_generation);
        let badge = Arc::clone(&self.badge);
        let delay = Duration::from_millis(self.config.badge_clear_ms);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // A newer event owns the badge now.
            if current.load(Ordering::SeqCst) == generation {
                badge.clear();
            }
        });
    }

    async fn audio_level(&self) -> Result<LevelSnapshot, ChannelError> {
        if !self.link.has_context().await {
            return Ok(LevelSnapshot::idle());
        }
        match self.link.request(MonitorRequest::GetAudioLevel).await? {
            MonitorResponse::Level(snapshot) => Ok(snapshot),
            _ => Err(ChannelError::UnexpectedReply {
                expected: "LEVEL".to_string(),
            }),
        }
    }

    // ========================================================================
    // Session lifecycle
    // ========================================================================

    fn should_listen(&self) -> bool {
        self.settings.enabled && self.tabs.any_ad()
    }

    /// Bring the session in line with the transition rules.
    pub async fn reconcile(&mut self) {
        let should_listen = self.should_listen();
        if should_listen && !self.session.active {
            self.recoveries = 0;
            self.start_session(self.settings.sensitivity).await;
        } else if !should_listen && self.session.active {
            let reason = if self.settings.enabled {
                "no ad"
            } else {
                "disabled"
            };
            self.stop_session(reason).await;
        }
    }

    async fn start_session(&mut self, sensitivity: f32) -> bool {
        let result = self
            .link
            .request(MonitorRequest::StartMonitoring { sensitivity })
            .await;

        match result {
            Ok(MonitorResponse::Started { already_capturing }) => {
                if already_capturing {
                    log::debug!("[Coordinator] Capture context was already listening");
                }
                self.session.start(sensitivity);
                self.scolding.reset();
                self.capture_status = CaptureStatus::Listening;
                log::info!("[Coordinator] Listening (sensitivity={:.2})", sensitivity);
                self.telemetry
                    .publish(CoordinatorEvent::SessionStarted { sensitivity });
                true
            }
            Ok(MonitorResponse::StartFailed(failure)) => {
                self.on_capture_failed(failure);
                false
            }
            Ok(_) => {
                self.record_channel_error(ChannelError::UnexpectedReply {
                    expected: "STARTED".to_string(),
                });
                false
            }
            Err(err) => {
                let timed_out = matches!(err, ChannelError::Timeout { .. });
                self.record_channel_error(err);
                if timed_out {
                    // The context may still be waiting on the microphone grant.
                    // Closing it keeps a late grant from staying live.
                    self.link.close().await;
                }
                false
            }
        }
    }

    async fn stop_session(&mut self, reason: &str) {
        self.session.stop();
        self.recoveries = 0;
        if matches!(self.capture_status, CaptureStatus::Listening) {
            self.capture_status = CaptureStatus::Idle;
        }

        if self.link.has_context().await {
            match self.link.request(MonitorRequest::StopMonitoring).await {
                Ok(MonitorResponse::Stopped { .. }) => {}
                Ok(_) => log::warn!("[Coordinator] Unexpected reply to STOP_MONITORING"),
                Err(err) => log_channel_error(&err, "stop_session"),
            }
        }

        log::info!("[Coordinator] Stopped listening ({})", reason);
        self.telemetry.publish(CoordinatorEvent::SessionStopped {
            reason: reason.to_string(),
        });
    }

    fn record_channel_error(&mut self, err: ChannelError) {
        log_channel_error(&err, "coordinator");
        self.capture_status = CaptureStatus::Error {
            code: err.code(),
            message: err.message(),
        };
        self.telemetry.publish(CoordinatorEvent::CaptureFailed {
            code: err.code(),
            message: err.message(),
        });
    }

    /// Whether the last capture failure can clear without user action.
    fn capture_retryable(&self) -> bool {
        match &self.capture_status {
            CaptureStatus::Error { code, .. } => {
                CaptureErrorCodes::is_transient(*code)
                    || *code == ChannelErrorCodes::DISCONNECTED
                    || *code == ChannelErrorCodes::TIMEOUT
            }
            CaptureStatus::Idle | CaptureStatus::Listening => true,
        }
    }

    /// Bring capture back when the transition rules say it should run.
    ///
    /// Covers a capture context that disappeared under an active session and
    /// a session that ended on a transient capture failure while an ad is
    /// still showing. Permission and security failures wait for the next
    /// transition instead.
    pub async fn health_check(&mut self) {
        if !self.should_listen() {
            return;
        }
        if self.session.active {
            if self.link.has_context().await {
                return;
            }
            self.recover("capture context missing").await;
        } else if self.capture_retryable() {
            self.recover("capture not running").await;
        }
    }

    /// Restart capture once, counted against `max_recoveries`.
    ///
    /// Past the cap the failure stays in the capture status until the
    /// session ends.
    async fn recover(&mut self, reason: &str) -> bool {
        if self.recoveries >= self.config.max_recoveries {
            if !matches!(self.capture_status, CaptureStatus::Error { .. }) {
                log::error!(
                    "[Coordinator] {} and recovery limit ({}) reached",
                    reason,
                    self.config.max_recoveries
                );
                self.capture_status = CaptureStatus::Error {
                    code: ChannelErrorCodes::DISCONNECTED,
                    message: format!(
                        "Capture lost; gave up after {} recoveries",
                        self.recoveries
                    ),
                };
            }
            return false;
        }

        self.recoveries += 1;
        log::warn!(
            "[Coordinator] {}, recovery {}/{}",
            reason,
            self.recoveries,
            self.config.max_recoveries
        );
        match self.link.ensure_context().await {
            Ok(true) => self.telemetry.publish(CoordinatorEvent::ContextRecreated {
                attempt: self.recoveries,
            }),
            Ok(false) => {}
            Err(err) => {
                self.record_channel_error(err);
                return false;
            }
        }

        self.session.active = false;
        let started = self.start_session(self.settings.sensitivity).await;
        if !started {
            log::warn!("[Coordinator] Restart after recovery failed");
        }
        started
    }
}
