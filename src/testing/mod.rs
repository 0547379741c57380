//! Test doubles and a wired-up coordinator harness.
//!
//! Everything here runs in-process with no browser and no audio device, so
//! unit tests, the integration tests and the CLI `simulate` command share
//! the same page, surface and microphone models.

mod capture_host;
mod microphone;
mod page;
mod surface;

use std::sync::{Arc, Mutex, MutexGuard};

pub use capture_host::FlakyCaptureHost;
pub use microphone::{FailingMicrophone, ScriptedMicrophone};
pub use page::{FakeDebugger, FakePage};
pub use surface::FakeSurface;

use crate::action::{ActionExecutor, TabRegistry};
use crate::audio::{LocalCaptureHost, MicrophoneSource};
use crate::clock::TokioTimeSource;
use crate::config::{ActionConfig, CoordinatorConfig, MonitorConfig};
use crate::coordinator::{
    Badge, Coordinator, CoordinatorDeps, CoordinatorHandle, EscalationSink, Inbox,
};
use crate::error::CaptureError;
use crate::messages::TabId;
use crate::settings::{MemoryStore, ScoldingVoice, Settings};
use crate::telemetry::TelemetryCollector;

/// Tab that owns the harness page
pub const HARNESS_TAB: TabId = 1;

#[derive(Debug, Default)]
struct BadgeState {
    last_set: Option<(String, String)>,
    cleared: bool,
    sets: usize,
}

/// Badge that remembers what it shows.
#[derive(Debug, Default)]
pub struct MemoryBadge {
    state: Mutex<BadgeState>,
}

impl MemoryBadge {
    fn state(&self) -> MutexGuard<'_, BadgeState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn last_set(&self) -> Option<(String, String)> {
        self.state().last_set.clone()
    }

    /// True once the badge was cleared after its last `set`.
    pub fn is_cleared(&self) -> bool {
        self.state().cleared
    }

    pub fn sets(&self) -> usize {
        self.state().sets
    }
}

impl Badge for MemoryBadge {
    fn set(&self, text: &str, color: &str) {
        let mut state = self.state();
        state.last_set = Some((text.to_string(), color.to_string()));
        state.cleared = false;
        state.sets += 1;
    }

    fn clear(&self) {
        self.state().cleared = true;
    }
}

#[derive(Debug, Default)]
pub struct RecordingEscalation {
    calls: Mutex<Vec<(u32, ScoldingVoice)>>,
}

impl RecordingEscalation {
    pub fn calls(&self) -> Vec<(u32, ScoldingVoice)> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl EscalationSink for RecordingEscalation {
    fn escalate(&self, count: u32, voice: ScoldingVoice) {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((count, voice));
    }
}

/// A coordinator wired to a real capture context, one fake page on
/// [`HARNESS_TAB`] and recording surfaces.
pub struct Harness {
    pub coordinator: Coordinator,
    pub capture: Arc<ScriptedMicrophone>,
    pub host: Arc<LocalCaptureHost>,
    pub page: Arc<FakePage>,
    pub debugger: Arc<FakeDebugger>,
    pub registry: Arc<TabRegistry>,
    pub badge: Arc<MemoryBadge>,
    pub escalation: Arc<RecordingEscalation>,
    pub store: Arc<MemoryStore>,
    pub telemetry: Arc<TelemetryCollector>,
    /// Sender side of `inbox`, for watchers and UI requests
    pub handle: CoordinatorHandle,
    /// Messages the capture context sends back to the coordinator
    pub inbox: Inbox,
}

pub fn harness(settings: Settings) -> Harness {
    harness_with(settings, |_| {})
}

pub fn harness_with(settings: Settings, configure: impl FnOnce(&mut CoordinatorConfig)) -> Harness {
    let capture = Arc::new(ScriptedMicrophone::constant(0.0));
    build(settings, configure, capture.clone(), capture)
}

/// Harness whose microphone refuses every acquisition.
pub fn harness_failing(error: CaptureError) -> Harness {
    build(
        Settings::default(),
        |_| {},
        Arc::new(FailingMicrophone::new(error)),
        Arc::new(ScriptedMicrophone::constant(0.0)),
    )
}

/// Harness with a caller-provided microphone, e.g. a WAV fixture.
pub fn harness_with_microphone(
    settings: Settings,
    config: CoordinatorConfig,
    microphone: Arc<dyn MicrophoneSource>,
) -> Harness {
    build(
        settings,
        move |target| *target = config,
        microphone,
        Arc::new(ScriptedMicrophone::constant(0.0)),
    )
}

fn build(
    settings: Settings,
    configure: impl FnOnce(&mut CoordinatorConfig),
    microphone: Arc<dyn MicrophoneSource>,
    capture: Arc<ScriptedMicrophone>,
) -> Harness {
    let mut config = CoordinatorConfig::default();
    configure(&mut config);

    let store = Arc::new(MemoryStore::new());
    if let Err(err) = settings.save(store.as_ref()) {
        log::warn!("[Harness] Could not seed settings: {}", err);
    }

    let monitor_config = MonitorConfig {
        fft_size: 256,
        ..MonitorConfig::default()
    };
    let (handle, inbox) = CoordinatorHandle::channel();
    let host = Arc::new(LocalCaptureHost::new(
        monitor_config.clone(),
        microphone,
        Arc::new(TokioTimeSource::new()),
        handle.clone(),
        config.request_timeout_ms,
    ));

    let page = Arc::new(FakePage::new());
    let debugger = Arc::new(FakeDebugger::with_page(page.clone()));
    let registry = Arc::new(TabRegistry::new());
    registry.register(ActionExecutor::new(
        HARNESS_TAB,
        page.clone(),
        debugger.clone(),
        ActionConfig::default(),
    ));
    registry.set_active(Some(HARNESS_TAB));

    let badge = Arc::new(MemoryBadge::default());
    let escalation = Arc::new(RecordingEscalation::default());
    let telemetry = Arc::new(TelemetryCollector::default());

    let coordinator = Coordinator::new(
        config,
        monitor_config.cooldown_ms,
        CoordinatorDeps {
            store: store.clone(),
            capture: host.clone(),
            executors: registry.clone(),
            badge: badge.clone(),
            escalation: escalation.clone(),
            telemetry: telemetry.clone(),
        },
    );

    Harness {
        coordinator,
        capture,
        host,
        page,
        debugger,
        registry,
        badge,
        escalation,
        store,
        telemetry,
        handle,
        inbox,
    }
}
