// AdStateWatcher - derives an edge-triggered "ad active" signal for one tab
//
// Every mutation batch re-reads the ad indicators from scratch and feeds the
// predicate through an EdgeTrigger, so consumers see one message per
// transition no matter how many mutations arrive. Navigation (history events
// or URL polling) resets the trigger and reattaches to the new player.

pub mod edge;
pub mod surface;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::config::WatcherConfig;
use crate::coordinator::CoordinatorHandle;
use crate::error::{log_watch_error, WatchError};
use crate::messages::{AdStateChanged, CoordinatorMessage, TabId};

pub use edge::EdgeTrigger;
pub use surface::{AdSignals, PageEvent, PlayerSurface};

/// Watches one tab's player and reports ad-state transitions.
pub struct AdStateWatcher {
    tab_id: TabId,
    surface: Arc<dyn PlayerSurface>,
    config: WatcherConfig,
    coordinator: CoordinatorHandle,
    trigger: EdgeTrigger<bool>,
    last_url: Option<String>,
}

impl AdStateWatcher {
    pub fn new(
        tab_id: TabId,
        surface: Arc<dyn PlayerSurface>,
        config: WatcherConfig,
        coordinator: CoordinatorHandle,
    ) -> Self {
        Self {
            tab_id,
            surface,
            config,
            coordinator,
            trigger: EdgeTrigger::new(false),
            last_url: None,
        }
    }

    pub fn tab_id(&self) -> TabId {
        self.tab_id
    }

    pub fn is_ad_active(&self) -> bool {
        *self.trigger.current()
    }

    /// Re-evaluate the ad predicate after a batch of mutations.
    ///
    /// Returns the message sent, if the predicate changed. A failed read is
    /// logged and the batch is skipped.
    pub async fn on_mutation_batch(&mut self) -> Option<AdStateChanged> {
        let signals = match self.surface.read_signals().await {
            Ok(signals) => signals,
            Err(err) => {
                log_watch_error(&err, "on_mutation_batch");
                return None;
            }
        };

        let active = self.trigger.update(signals.is_ad_active())?;
        Some(self.emit(active, signals))
    }

    /// Forget the debounced state after the page navigated.
    ///
    /// If the last reported state was "ad active", a `false` transition is
    /// sent so the coordinator does not keep a stale ad for this tab.
    pub fn on_navigation(&mut self, url: &str) -> Option<AdStateChanged> {
        log::info!("[AdStateWatcher] Tab {} navigated to {}", self.tab_id, url);
        self.last_url = Some(url.to_string());
        let active = self.trigger.reset()?;
        Some(self.emit(active, AdSignals::default()))
    }

    /// Wait for the player with capped exponential backoff, then take an
    /// initial reading.
    ///
    /// Gives up only when `attach_max_attempts` is set and exhausted, or when
    /// `shutdown` fires.
    pub async fn attach(&mut self, shutdown: &mut watch::Receiver<bool>) -> Result<(), WatchError> {
        let mut delay_ms = self.config.attach_retry_ms.max(1);
        let mut attempts: u32 = 0;

        loop {
            attempts += 1;
            match self.surface.locate_player().await {
                Ok(()) => break,
                Err(err) => {
                    if let Some(max) = self.config.attach_max_attempts {
                        if attempts >= max {
                            let err = WatchError::AttachGaveUp { attempts };
                            log_watch_error(&err, "attach");
                            return Err(err);
                        }
                    }
                    log::debug!(
                        "[AdStateWatcher] Attempt {} failed ({}), retrying in {}ms",
                        attempts,
                        err,
                        delay_ms
                    );
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => {}
                _ = shutdown.changed() => return Err(WatchError::PlayerNotFound),
            }
            delay_ms = (delay_ms * 2).min(self.config.attach_max_interval_ms.max(1));
        }

        log::info!(
            "[AdStateWatcher] Attached to player on tab {} after {} attempt(s)",
            self.tab_id,
            attempts
        );
        if self.last_url.is_none() {
            self.last_url = Some(self.surface.current_url().await);
        }
        self.on_mutation_batch().await;
        Ok(())
    }

    /// Observe until `shutdown` fires or the page event feed closes.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut events = self.surface.subscribe();
        if self.attach(&mut shutdown).await.is_err() {
            return;
        }

        let mut url_poll =
            tokio::time::interval(Duration::from_millis(self.config.url_poll_ms.max(1)));
        url_poll.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                event = events.recv() => match event {
                    Some(PageEvent::Mutations) => {
                        self.on_mutation_batch().await;
                    }
                    Some(PageEvent::HistoryNavigated { url }) => {
                        if !self.reattach_if_moved(&url, &mut shutdown).await {
                            break;
                        }
                    }
                    Some(PageEvent::Detached) => {
                        log::info!("[AdStateWatcher] Player detached on tab {}", self.tab_id);
                        if self.attach(&mut shutdown).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                },
                _ = url_poll.tick() => {
                    let url = self.surface.current_url().await;
                    if !self.reattach_if_moved(&url, &mut shutdown).await {
                        break;
                    }
                }
            }
        }
        log::info!("[AdStateWatcher] Stopped watching tab {}", self.tab_id);
    }

    /// Returns false when reattaching failed and the watcher should stop.
    async fn reattach_if_moved(&mut self, url: &str, shutdown: &mut watch::Receiver<bool>) -> bool {
        if self.last_url.as_deref() == Some(url) {
            return true;
        }
        self.on_navigation(url);
        self.attach(shutdown).await.is_ok()
    }

    fn emit(&self, is_ad_active: bool, signals: AdSignals) -> AdStateChanged {
        let change = AdStateChanged {
            tab_id: self.tab_id,
            is_ad_active,
            skip_control_visible: signals.skip_control_visible,
            ad_content_present: signals.ad_content_present,
        };
        log::info!(
            "[AdStateWatcher] Tab {} ad active: {} (skip={}, content={})",
            self.tab_id,
            is_ad_active,
            signals.skip_control_visible,
            signals.ad_content_present
        );
        if let Err(err) = self
            .coordinator
            .notify(CoordinatorMessage::AdStateChanged(change))
        {
            log::warn!("[AdStateWatcher] Could not report ad state: {}", err);
        }
        change
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::Inbox;
    use crate::testing::FakeSurface;

    fn watcher(surface: Arc<FakeSurface>, config: WatcherConfig) -> (AdStateWatcher, Inbox) {
        let (handle, inbox) = CoordinatorHandle::channel();
        (AdStateWatcher::new(7, surface, config, handle), inbox)
    }

    fn drain(inbox: &mut Inbox) -> Vec<AdStateChanged> {
        let mut changes = Vec::new();
        while let Ok(envelope) = inbox.try_recv() {
            if let CoordinatorMessage::AdStateChanged(change) = envelope.message {
                changes.push(change);
            }
        }
        changes
    }

    fn signals(active: bool) -> AdSignals {
        AdSignals {
            skip_control_visible: active,
            ad_content_present: false,
        }
    }

    #[tokio::test]
    async fn test_predicate_sequence_emits_two_transitions() {
        let surface = Arc::new(FakeSurface::with_player());
        let (mut watcher, mut inbox) = watcher(surface.clone(), WatcherConfig::default());

        for active in [false, false, true, true, false] {
            surface.set_signals(signals(active));
            watcher.on_mutation_batch().await;
        }

        let changes = drain(&mut inbox);
        let states: Vec<bool> = changes.iter().map(|c| c.is_ad_active).collect();
        assert_eq!(states, vec![true, false]);
        assert!(changes.iter().all(|c| c.tab_id == 7));
    }

    #[tokio::test]
    async fn test_content_only_counts_as_active() {
        let surface = Arc::new(FakeSurface::with_player());
        let (mut watcher, _inbox) = watcher(surface.clone(), WatcherConfig::default());
        surface.set_signals(AdSignals {
            skip_control_visible: false,
            ad_content_present: true,
        });
        let change = watcher.on_mutation_batch().await.unwrap();
        assert!(change.is_ad_active);
        assert!(change.ad_content_present);
    }

    #[tokio::test]
    async fn test_failed_read_skips_batch_and_keeps_state() {
        let surface = Arc::new(FakeSurface::with_player());
        let (mut watcher, mut inbox) = watcher(surface.clone(), WatcherConfig::default());

        surface.set_signals(signals(true));
        watcher.on_mutation_batch().await;
        surface.fail_next_read();
        assert_eq!(watcher.on_mutation_batch().await, None);
        assert!(watcher.is_ad_active());

        surface.set_signals(signals(false));
        watcher.on_mutation_batch().await;
        assert_eq!(drain(&mut inbox).len(), 2);
    }

    #[tokio::test]
    async fn test_navigation_resets_and_reports_stale_ad() {
        let surface = Arc::new(FakeSurface::with_player());
        let (mut watcher, mut inbox) = watcher(surface.clone(), WatcherConfig::default());

        assert_eq!(watcher.on_navigation("https://example.test/a"), None);

        surface.set_signals(signals(true));
        watcher.on_mutation_batch().await;
        let reset = watcher.on_navigation("https://example.test/b").unwrap();
        assert!(!reset.is_ad_active);

        let states: Vec<bool> = drain(&mut inbox).iter().map(|c| c.is_ad_active).collect();
        assert_eq!(states, vec![true, false]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attach_backs_off_until_player_appears() {
        let surface = Arc::new(FakeSurface::new());
        surface.player_appears_after(3);
        let (mut watcher, _inbox) = watcher(surface.clone(), WatcherConfig::default());
        let (_tx, mut shutdown) = watch::channel(false);

        let started = tokio::time::Instant::now();
        watcher.attach(&mut shutdown).await.unwrap();
        // 500 + 1000 + 2000 between four attempts
        assert_eq!(started.elapsed(), Duration::from_millis(3500));
        assert_eq!(surface.locate_attempts(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attach_gives_up_when_bounded() {
        let surface = Arc::new(FakeSurface::new());
        let config = WatcherConfig {
            attach_max_attempts: Some(2),
            ..WatcherConfig::default()
        };
        let (mut watcher, _inbox) = watcher(surface.clone(), config);
        let (_tx, mut shutdown) = watch::channel(false);

        assert_eq!(
            watcher.attach(&mut shutdown).await,
            Err(WatchError::AttachGaveUp { attempts: 2 })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_follows_mutations_and_navigation() {
        let surface = Arc::new(FakeSurface::with_player());
        let (watcher, mut inbox) = watcher(surface.clone(), WatcherConfig::default());
        let (shutdown_tx, shutdown) = watch::channel(false);
        let task = tokio::spawn(watcher.run(shutdown));
        tokio::time::sleep(Duration::from_millis(10)).await;

        surface.set_signals(signals(true));
        surface.emit(PageEvent::Mutations);
        surface.emit(PageEvent::Mutations);
        tokio::time::sleep(Duration::from_millis(10)).await;

        surface.navigate("https://example.test/next");
        tokio::time::sleep(Duration::from_millis(10)).await;

        shutdown_tx.send(true).unwrap();
        task.await.unwrap();

        let states: Vec<bool> = drain(&mut inbox).iter().map(|c| c.is_ad_active).collect();
        // true from the mutations, false from the navigation reset, then the
        // reattach reads the still-visible control again.
        assert_eq!(states, vec![true, false, true]);
    }
}
