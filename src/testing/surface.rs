//! Scriptable player surface for watcher tests.

use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::WatchError;
use crate::watcher::{AdSignals, PageEvent, PlayerSurface};

const START_URL: &str = "https://example.test/watch";

#[derive(Debug)]
struct SurfaceState {
    player_after: Option<usize>,
    locate_attempts: usize,
    signals: AdSignals,
    fail_next_read: bool,
    url: String,
    subscribers: Vec<mpsc::UnboundedSender<PageEvent>>,
}

#[derive(Debug)]
pub struct FakeSurface {
    state: Mutex<SurfaceState>,
}

impl FakeSurface {
    /// A page without a player; it never appears unless scripted.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SurfaceState {
                player_after: None,
                locate_attempts: 0,
                signals: AdSignals::default(),
                fail_next_read: false,
                url: START_URL.to_string(),
                subscribers: Vec::new(),
            }),
        }
    }

    pub fn with_player() -> Self {
        let surface = Self::new();
        surface.player_appears_after(0);
        surface
    }

    fn state(&self) -> MutexGuard<'_, SurfaceState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// The player is found from attempt `failures + 1` on.
    pub fn player_appears_after(&self, failures: usize) {
        self.state().player_after = Some(failures);
    }

    pub fn locate_attempts(&self) -> usize {
        self.state().locate_attempts
    }

    pub fn set_signals(&self, signals: AdSignals) {
        self.state().signals = signals;
    }

    pub fn fail_next_read(&self) {
        self.state().fail_next_read = true;
    }

    pub fn emit(&self, event: PageEvent) {
        self.state()
            .subscribers
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }

    /// Change the URL through the history API.
    pub fn navigate(&self, url: &str) {
        self.state().url = url.to_string();
        self.emit(PageEvent::HistoryNavigated {
            url: url.to_string(),
        });
    }
}

impl Default for FakeSurface {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PlayerSurface for FakeSurface {
    async fn locate_player(&self) -> Result<(), WatchError> {
        let mut state = self.state();
        state.locate_attempts += 1;
        match state.player_after {
            Some(failures) if state.locate_attempts > failures => Ok(()),
            _ => Err(WatchError::PlayerNotFound),
        }
    }

    async fn read_signals(&self) -> Result<AdSignals, WatchError> {
        let mut state = self.state();
        if std::mem::take(&mut state.fail_next_read) {
            return Err(WatchError::ObservationFailed {
                details: "player subtree threw".to_string(),
            });
        }
        Ok(state.signals)
    }

    async fn current_url(&self) -> String {
        self.state().url.clone()
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<PageEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state().subscribers.push(tx);
        rx
    }
}
