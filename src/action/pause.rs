// Pause-and-exit: stop playback and leave fullscreen.

use std::time::Duration;

use super::dom::{FullscreenVendor, KeyPhase, PageDom};
use super::{ActionMethod, ActionOutcome};
use crate::config::ActionConfig;
use crate::error::log_action_error;

/// Gap between the Escape keydown and keyup
const KEY_RELEASE_DELAY_MS: u64 = 50;

pub async fn pause_and_exit(dom: &dyn PageDom, config: &ActionConfig) -> ActionOutcome {
    let videos = dom.video_count().await;
    let mut toggled = 0usize;
    for index in 0..videos {
        match dom.toggle_playback(index).await {
            Ok(()) => toggled += 1,
            Err(err) => log_action_error(&err, "toggle_playback"),
        }
    }

    tokio::time::sleep(Duration::from_millis(config.pause_escape_delay_ms)).await;

    if let Err(err) = dom.dispatch_key("Escape", KeyPhase::Down).await {
        log_action_error(&err, "escape_keydown");
    }
    tokio::time::sleep(Duration::from_millis(KEY_RELEASE_DELAY_MS)).await;
    if let Err(err) = dom.dispatch_key("Escape", KeyPhase::Up).await {
        log_action_error(&err, "escape_keyup");
    }

    let mut exited = 0usize;
    for vendor in FullscreenVendor::ALL {
        if !dom.fullscreen_active(vendor).await {
            continue;
        }
        match dom.exit_fullscreen(vendor).await {
            Ok(()) => exited += 1,
            Err(err) => log_action_error(&err, "exit_fullscreen"),
        }
    }

    log::info!(
        "[PauseAndExit] Toggled {}/{} video(s), exited {} fullscreen variant(s)",
        toggled,
        videos,
        exited
    );

    if toggled > 0 || exited > 0 {
        ActionOutcome::succeeded(ActionMethod::Direct)
    } else {
        ActionOutcome::failed("no video or fullscreen element".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakePage;

    #[tokio::test(start_paused = true)]
    async fn test_pauses_every_video_and_exits_active_fullscreen() {
        let page = FakePage::new();
        page.add_videos(2);
        page.set_fullscreen(FullscreenVendor::Webkit, true);

        let started = tokio::time::Instant::now();
        let outcome = pause_and_exit(&page, &ActionConfig::default()).await;

        assert!(outcome.success);
        assert_eq!(page.playing_videos(), 0);
        assert!(!page.fullscreen(FullscreenVendor::Webkit));
        assert_eq!(page.exit_calls(), vec![FullscreenVendor::Webkit]);
        assert_eq!(
            page.keys(),
            vec![
                ("Escape".to_string(), KeyPhase::Down),
                ("Escape".to_string(), KeyPhase::Up)
            ]
        );
        assert!(started.elapsed() >= Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_each_video_is_guarded() {
        let page = FakePage::new();
        page.add_videos(3);
        page.fail_toggle_for(1);

        let outcome = pause_and_exit(&page, &ActionConfig::default()).await;
        assert!(outcome.success);
        assert_eq!(page.playing_videos(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_page_reports_failure() {
        let page = FakePage::new();
        let outcome = pause_and_exit(&page, &ActionConfig::default()).await;
        assert!(!outcome.success);
        assert_eq!(outcome.method, ActionMethod::None);
    }
}
