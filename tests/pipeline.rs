//! End-to-end pipeline tests: watcher -> coordinator -> capture context ->
//! action executor, all in-process on tokio's paused clock.

use std::sync::Arc;
use std::time::Duration;

use scream_skip::action::locator::SKIP_SELECTORS;
use scream_skip::action::{FullscreenVendor, PageDom, Rect};
use scream_skip::config::{CoordinatorConfig, WatcherConfig};
use scream_skip::coordinator::{CaptureStatus, CoordinatorStatus};
use scream_skip::messages::{CoordinatorMessage, CoordinatorReply};
use scream_skip::settings::{ActionProfile, ScoldingVoice, Settings};
use scream_skip::telemetry::CoordinatorEvent;
use scream_skip::testing::{
    harness_with_microphone, FakeSurface, Harness, ScriptedMicrophone, HARNESS_TAB,
};
use scream_skip::watcher::{AdSignals, AdStateWatcher, PageEvent};
use scream_skip::CoordinatorHandle;
use tokio::sync::watch;

const AD: AdSignals = AdSignals {
    skip_control_visible: true,
    ad_content_present: true,
};

async fn status(handle: &CoordinatorHandle) -> CoordinatorStatus {
    match handle.request(CoordinatorMessage::GetStatus).await.unwrap() {
        CoordinatorReply::Status(status) => *status,
        other => panic!("unexpected reply {:?}", other),
    }
}

fn spawn_watcher(
    surface: &Arc<FakeSurface>,
    handle: &CoordinatorHandle,
) -> (watch::Sender<bool>, tokio::task::JoinHandle<()>) {
    let watcher = AdStateWatcher::new(
        HARNESS_TAB,
        surface.clone(),
        WatcherConfig::default(),
        handle.clone(),
    );
    let (tx, rx) = watch::channel(false);
    (tx, tokio::spawn(watcher.run(rx)))
}

#[tokio::test(start_paused = true)]
async fn shout_during_ad_skips_it_and_releases_microphone() {
    let microphone = Arc::new(ScriptedMicrophone::sequence(vec![0.05, 0.05, 0.05, 0.9]));
    let Harness {
        coordinator,
        page,
        telemetry,
        badge,
        handle,
        inbox,
        ..
    } = harness_with_microphone(
        Settings::default(),
        CoordinatorConfig::default(),
        microphone.clone(),
    );
    let control = page.add_selector(SKIP_SELECTORS[1], Rect::new(900.0, 500.0, 100.0, 36.0));
    let coordinator_task = tokio::spawn(coordinator.run(inbox));

    let surface = Arc::new(FakeSurface::with_player());
    surface.set_signals(AD);
    let (shutdown, watcher_task) = spawn_watcher(&surface, &handle);

    tokio::time::sleep(Duration::from_secs(3)).await;

    let status = status(&handle).await;
    assert!(!status.session.active, "session should end after the skip");
    assert_eq!(status.capture, CaptureStatus::Idle);
    assert!(status.tabs.iter().all(|tab| !tab.is_ad_active));
    assert_eq!(microphone.acquisitions(), 1);
    assert_eq!(microphone.live_streams(), 0);

    let skips = telemetry.count(|event| {
        matches!(
            event,
            CoordinatorEvent::ActionCompleted { success: true, .. }
        )
    });
    assert_eq!(skips, 1);
    assert!(badge.last_set().is_some());

    assert!(!page.still_present(&control).await);

    shutdown.send(true).unwrap();
    watcher_task.await.unwrap();
    coordinator_task.abort();
}

#[tokio::test(start_paused = true)]
async fn scold_profile_pauses_and_keeps_listening_until_ad_ends() {
    let microphone = Arc::new(ScriptedMicrophone::sequence(vec![0.0, 0.0, 0.95, 0.0]));
    let settings = Settings {
        profile: ActionProfile::Scold {
            voice: ScoldingVoice::Polite,
        },
        ..Settings::default()
    };
    let Harness {
        coordinator,
        page,
        handle,
        inbox,
        ..
    } = harness_with_microphone(settings, CoordinatorConfig::default(), microphone.clone());
    page.add_videos(1);
    page.set_fullscreen(FullscreenVendor::Standard, true);
    let coordinator_task = tokio::spawn(coordinator.run(inbox));

    let surface = Arc::new(FakeSurface::with_player());
    surface.set_signals(AD);
    let (shutdown, watcher_task) = spawn_watcher(&surface, &handle);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(page.playing_videos(), 0);
    assert!(!page.fullscreen(FullscreenVendor::Standard));

    let running = status(&handle).await;
    assert!(running.session.active);
    assert_eq!(running.scolding_count, 1);
    assert_eq!(microphone.live_streams(), 1);

    surface.set_signals(AdSignals::default());
    surface.emit(PageEvent::Mutations);
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(!status(&handle).await.session.active);
    assert_eq!(microphone.live_streams(), 0);

    shutdown.send(true).unwrap();
    watcher_task.await.unwrap();
    coordinator_task.abort();
}

#[tokio::test(start_paused = true)]
async fn settings_updates_restart_or_stop_capture() {
    let microphone = Arc::new(ScriptedMicrophone::constant(0.1));
    let Harness {
        coordinator,
        handle,
        inbox,
        ..
    } = harness_with_microphone(
        Settings::default(),
        CoordinatorConfig::default(),
        microphone.clone(),
    );
    let coordinator_task = tokio::spawn(coordinator.run(inbox));

    let surface = Arc::new(FakeSurface::with_player());
    surface.set_signals(AD);
    let (shutdown, watcher_task) = spawn_watcher(&surface, &handle);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(microphone.live_streams(), 1);

    let reply = handle
        .request(CoordinatorMessage::SettingsUpdated(Settings {
            sensitivity: 8.0,
            ..Settings::default()
        }))
        .await
        .unwrap();
    match reply {
        CoordinatorReply::Settings(settings) => {
            assert!((settings.sensitivity - 0.8).abs() < 1e-6)
        }
        other => panic!("unexpected reply {:?}", other),
    }
    assert_eq!(microphone.acquisitions(), 2);
    assert_eq!(microphone.live_streams(), 1);

    handle
        .request(CoordinatorMessage::SettingsUpdated(Settings {
            enabled: false,
            ..Settings::default()
        }))
        .await
        .unwrap();
    assert_eq!(microphone.live_streams(), 0);
    assert!(!status(&handle).await.session.active);

    // Ad transitions while disabled do not open the microphone.
    surface.set_signals(AdSignals::default());
    surface.emit(PageEvent::Mutations);
    surface.set_signals(AD);
    surface.emit(PageEvent::Mutations);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(microphone.acquisitions(), 2);

    shutdown.send(true).unwrap();
    watcher_task.await.unwrap();
    coordinator_task.abort();
}

#[tokio::test(start_paused = true)]
async fn level_query_tracks_capture_phase() {
    let microphone = Arc::new(ScriptedMicrophone::constant(0.3));
    let Harness {
        coordinator,
        handle,
        inbox,
        ..
    } = harness_with_microphone(
        Settings::default(),
        CoordinatorConfig::default(),
        microphone,
    );
    let coordinator_task = tokio::spawn(coordinator.run(inbox));

    match handle.request(CoordinatorMessage::GetAudioLevel).await.unwrap() {
        CoordinatorReply::Level(level) => assert_eq!(level.level, 0.0),
        other => panic!("unexpected reply {:?}", other),
    }

    let surface = Arc::new(FakeSurface::with_player());
    surface.set_signals(AD);
    let (shutdown, watcher_task) = spawn_watcher(&surface, &handle);
    tokio::time::sleep(Duration::from_millis(350)).await;

    match handle.request(CoordinatorMessage::GetAudioLevel).await.unwrap() {
        CoordinatorReply::Level(level) => {
            assert!((level.level - 0.3).abs() < 0.01, "level = {}", level.level);
            assert_eq!(level.status, "Listening");
        }
        other => panic!("unexpected reply {:?}", other),
    }

    shutdown.send(true).unwrap();
    watcher_task.await.unwrap();
    coordinator_task.abort();
}
