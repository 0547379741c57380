use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use scream_skip::action::locator::SKIP_SELECTORS;
use scream_skip::action::{ActionExecutor, Rect, TabRegistry};
use scream_skip::audio::{
    default_microphone, rms_u8, LocalCaptureHost, LoudEventDetector, MicrophoneSource, Verdict,
    WavFixture, WavFixtureMicrophone,
};
use scream_skip::clock::{StubTimeSource, TimeSource, TokioTimeSource};
use scream_skip::config::AppConfig;
use scream_skip::coordinator::{
    Coordinator, CoordinatorDeps, CoordinatorHandle, CoordinatorStatus, LogBadge, LogEscalation,
};
use scream_skip::messages::{CoordinatorMessage, CoordinatorReply, LoudEvent, TabId};
use scream_skip::settings::{
    normalize_sensitivity, ActionProfile, JsonFileStore, KeyValueStore, MemoryStore, ScoldingVoice,
    Settings,
};
use scream_skip::telemetry::{CoordinatorEvent, TelemetryCollector};
use scream_skip::testing::{FakeDebugger, FakePage, FakeSurface};
use scream_skip::watcher::{AdSignals, AdStateWatcher, PageEvent};
use serde::Serialize;
use tokio::sync::watch;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt;

/// Tab id used for the simulated player page
const SIMULATED_TAB: TabId = 1;

#[derive(Parser, Debug)]
#[command(
    name = "scream_skip_cli",
    about = "Loud-event replay and end-to-end simulation for Scream Skip"
)]
struct Cli {
    /// JSON configuration file (defaults are used when absent)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Replay a WAV fixture through the level meter and loud-event detector
    Meter {
        #[arg(long)]
        fixture: PathBuf,
        #[arg(long, default_value_t = 0.5)]
        sensitivity: f32,
        /// Print one JSON line per tick before the report
        #[arg(long)]
        levels: bool,
        /// Exit with code 2 unless exactly this many events are detected
        #[arg(long)]
        expect_events: Option<usize>,
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Run the full pipeline against a simulated ad page
    Simulate {
        #[arg(long)]
        fixture: PathBuf,
        #[arg(long, default_value_t = 0.5)]
        sensitivity: f32,
        #[arg(long, value_enum, default_value_t = ProfileArg::Skip)]
        profile: ProfileArg,
        #[arg(long, value_enum, default_value_t = VoiceArg::Classic)]
        voice: VoiceArg,
        /// Persist settings to this JSON file instead of memory
        #[arg(long)]
        settings: Option<PathBuf>,
        /// Exit with code 2 unless the ad was skipped
        #[arg(long)]
        expect_skip: bool,
    },
    /// Print live microphone levels (requires the cpal_backend feature)
    Listen {
        #[arg(long, default_value_t = 0.5)]
        sensitivity: f32,
        #[arg(long, default_value_t = 10)]
        seconds: u64,
    },
    /// Show the resolved configuration and stored settings
    Config {
        #[arg(long)]
        settings: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ProfileArg {
    Skip,
    Scold,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum VoiceArg {
    Classic,
    Polite,
    Dramatic,
}

impl From<VoiceArg> for ScoldingVoice {
    fn from(voice: VoiceArg) -> Self {
        match voice {
            VoiceArg::Classic => ScoldingVoice::Classic,
            VoiceArg::Polite => ScoldingVoice::Polite,
            VoiceArg::Dramatic => ScoldingVoice::Dramatic,
        }
    }
}

fn main() -> ExitCode {
    scream_skip::init_logging();
    match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::from(1)
        }
    }
}

fn run() -> Result<ExitCode> {
    let cli = Cli::parse();
    let config = cli
        .config
        .as_deref()
        .map(AppConfig::load_from_file)
        .unwrap_or_default();

    match cli.command {
        Commands::Meter {
            fixture,
            sensitivity,
            levels,
            expect_events,
            output,
        } => run_meter(&config, &fixture, sensitivity, levels, expect_events, output),
        Commands::Simulate {
            fixture,
            sensitivity,
            profile,
            voice,
            settings,
            expect_skip,
        } => {
            let profile = match profile {
                ProfileArg::Skip => ActionProfile::Skip,
                ProfileArg::Scold => ActionProfile::Scold {
                    voice: voice.into(),
                },
            };
            let settings_store = open_store(settings);
            runtime()?.block_on(run_simulate(
                config,
                fixture,
                Settings {
                    enabled: true,
                    sensitivity,
                    profile,
                }
                .normalized(),
                settings_store,
                expect_skip,
            ))
        }
        Commands::Listen {
            sensitivity,
            seconds,
        } => runtime()?.block_on(run_listen(config, sensitivity, seconds)),
        Commands::Config { settings } => run_config(&config, settings),
    }
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")
}

fn open_store(path: Option<PathBuf>) -> Arc<dyn KeyValueStore> {
    match path {
        Some(path) => Arc::new(JsonFileStore::new(path)),
        None => Arc::new(MemoryStore::new()),
    }
}

#[derive(Serialize)]
struct TickLine {
    tick: usize,
    t_ms: u64,
    level: f32,
}

#[derive(Serialize)]
struct MeterReport<'a> {
    fixture: &'a str,
    sample_rate: u32,
    ticks: usize,
    threshold: f32,
    peak_level: f32,
    event_count: usize,
    events: &'a [LoudEvent],
}

fn run_meter(
    config: &AppConfig,
    fixture: &Path,
    sensitivity: f32,
    print_levels: bool,
    expect_events: Option<usize>,
    output_path: Option<PathBuf>,
) -> Result<ExitCode> {
    let wav = WavFixture::load(fixture)
        .with_context(|| format!("loading fixture {}", fixture.display()))?;
    let tick_ms = config.monitor.tick_ms.max(1);
    let clock = StubTimeSource::new(tick_ms);
    let mut detector =
        LoudEventDetector::new(normalize_sensitivity(sensitivity), config.monitor.cooldown_ms);
    let mut player = wav.player(tick_ms, config.monitor.fft_size);
    let mut window = vec![128u8; config.monitor.fft_size];

    let ticks = wav.tick_count(tick_ms);
    let mut events = Vec::new();
    let mut peak_level = 0.0f32;
    for tick in 0..ticks {
        player.next_window(&mut window);
        let level = rms_u8(&window);
        let now_ms = clock.now_ms();
        peak_level = peak_level.max(level);

        if print_levels {
            println!(
                "{}",
                serde_json::to_string(&TickLine {
                    tick,
                    t_ms: now_ms,
                    level
                })?
            );
        }
        if let Verdict::Detected(event) = detector.observe(level, now_ms) {
            events.push(event);
        }
    }

    let name = fixture.display().to_string();
    let report = MeterReport {
        fixture: &name,
        sample_rate: wav.sample_rate,
        ticks,
        threshold: detector.threshold(),
        peak_level,
        event_count: events.len(),
        events: &events,
    };
    emit_json(&report, output_path)?;

    match expect_events {
        Some(expected) if expected != events.len() => {
            eprintln!("expected {} event(s), detected {}", expected, events.len());
            Ok(ExitCode::from(2))
        }
        _ => Ok(ExitCode::from(0)),
    }
}

#[derive(Serialize)]
struct SimulationSummary {
    fixture: String,
    loud_events: usize,
    actions: usize,
    skipped: bool,
    status: CoordinatorStatus,
}

async fn run_simulate(
    config: AppConfig,
    fixture: PathBuf,
    settings: Settings,
    store: Arc<dyn KeyValueStore>,
    expect_skip: bool,
) -> Result<ExitCode> {
    let wav = WavFixture::load(&fixture)
        .with_context(|| format!("loading fixture {}", fixture.display()))?;
    let fixture_ms = wav.tick_count(config.monitor.tick_ms) as u64 * config.monitor.tick_ms;
    settings
        .save(store.as_ref())
        .context("persisting simulation settings")?;

    let microphone: Arc<dyn MicrophoneSource> = Arc::new(WavFixtureMicrophone::new(
        fixture.clone(),
        config.monitor.tick_ms,
    ));
    let (handle, inbox) = CoordinatorHandle::channel();
    let host = Arc::new(LocalCaptureHost::new(
        config.monitor.clone(),
        microphone,
        Arc::new(TokioTimeSource::new()),
        handle.clone(),
        config.coordinator.request_timeout_ms,
    ));

    let page = Arc::new(FakePage::new());
    page.add_selector(SKIP_SELECTORS[0], Rect::new(1040.0, 560.0, 120.0, 40.0));
    page.add_videos(1);
    let registry = Arc::new(TabRegistry::new());
    registry.register(ActionExecutor::new(
        SIMULATED_TAB,
        page.clone(),
        Arc::new(FakeDebugger::with_page(page.clone())),
        config.action.clone(),
    ));
    registry.set_active(Some(SIMULATED_TAB));

    let telemetry = Arc::new(TelemetryCollector::default());
    let mut events = UnboundedReceiverStream::new(telemetry.subscribe_unbounded());
    let coordinator = Coordinator::new(
        config.coordinator.clone(),
        config.monitor.cooldown_ms,
        CoordinatorDeps {
            store,
            capture: host,
            executors: registry,
            badge: Arc::new(LogBadge),
            escalation: Arc::new(LogEscalation),
            telemetry: telemetry.clone(),
        },
    );
    let coordinator_task = tokio::spawn(coordinator.run(inbox));

    let surface = Arc::new(FakeSurface::with_player());
    surface.set_signals(AdSignals {
        skip_control_visible: true,
        ad_content_present: true,
    });
    let watcher = AdStateWatcher::new(
        SIMULATED_TAB,
        surface.clone(),
        config.watcher.clone(),
        handle.clone(),
    );
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let watcher_task = tokio::spawn(watcher.run(shutdown_rx));

    let budget = Duration::from_millis(
        fixture_ms + config.coordinator.stop_after_skip_ms + config.action.lookup_delay_ms * 2 + 500,
    );
    let deadline = tokio::time::sleep(budget);
    tokio::pin!(deadline);

    let mut skipped = false;
    loop {
        tokio::select! {
            event = events.next() => {
                let Some(event) = event else { break };
                println!("{}", serde_json::to_string(&event)?);
                if let CoordinatorEvent::ActionCompleted { success: true, .. } = event {
                    if matches!(settings.profile, ActionProfile::Skip) {
                        skipped = true;
                        // The player moves on to the content once the ad is skipped.
                        surface.set_signals(AdSignals::default());
                        surface.emit(PageEvent::Mutations);
                    }
                }
            }
            _ = &mut deadline => break,
        }
    }

    let _ = shutdown_tx.send(true);
    if let Err(err) = watcher_task.await {
        log::warn!("[Simulate] Watcher task failed: {}", err);
    }

    let status = match handle.request(CoordinatorMessage::GetStatus).await? {
        CoordinatorReply::Status(status) => *status,
        other => bail!("unexpected reply to GET_STATUS: {:?}", other),
    };
    // Disabling releases the microphone before the runtime goes away.
    handle
        .request(CoordinatorMessage::SettingsUpdated(Settings {
            enabled: false,
            ..settings
        }))
        .await?;
    coordinator_task.abort();

    let summary = SimulationSummary {
        fixture: fixture.display().to_string(),
        loud_events: telemetry.count(|e| matches!(e, CoordinatorEvent::LoudEvent { .. })),
        actions: telemetry.count(|e| matches!(e, CoordinatorEvent::ActionCompleted { .. })),
        skipped,
        status,
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);

    if expect_skip && !skipped {
        eprintln!("expected the ad to be skipped");
        return Ok(ExitCode::from(2));
    }
    Ok(ExitCode::from(0))
}

async fn run_listen(config: AppConfig, sensitivity: f32, seconds: u64) -> Result<ExitCode> {
    let Some(microphone) = default_microphone() else {
        bail!("built without a live audio backend; rebuild with --features cpal_backend");
    };

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let mut monitor = scream_skip::audio::AudioLevelMonitor::new(
        config.monitor.clone(),
        microphone,
        Arc::new(TokioTimeSource::new()),
        tx,
    );
    monitor
        .start(normalize_sensitivity(sensitivity))
        .await
        .context("starting microphone capture")?;

    let mut ticker = tokio::time::interval(config.monitor.tick() * 5);
    let deadline = tokio::time::sleep(Duration::from_secs(seconds));
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                println!("{}", serde_json::to_string(&monitor.snapshot())?);
            }
            Some(event) = rx.recv() => {
                eprintln!("event: {:?}", event);
            }
            _ = &mut deadline => break,
        }
    }

    monitor.stop().context("stopping microphone capture")?;
    Ok(ExitCode::from(0))
}

#[derive(Serialize)]
struct ConfigReport<'a> {
    config: &'a AppConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    settings: Option<Settings>,
}

fn run_config(config: &AppConfig, settings_path: Option<PathBuf>) -> Result<ExitCode> {
    let settings = match settings_path {
        Some(path) => {
            let store = JsonFileStore::new(&path);
            Some(
                Settings::load(&store)
                    .with_context(|| format!("reading settings from {}", path.display()))?,
            )
        }
        None => None,
    };
    emit_json(&ConfigReport { config, settings }, None)?;
    Ok(ExitCode::from(0))
}

fn emit_json<T: Serialize>(value: &T, output_path: Option<PathBuf>) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    if let Some(path) = output_path {
        fs::write(&path, json).with_context(|| format!("writing {}", path.display()))?;
    } else {
        println!("{json}");
    }
    Ok(())
}
