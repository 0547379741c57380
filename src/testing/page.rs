//! In-memory page and debugger for action tests.
//!
//! `FakePage` models just enough of a player page: skip controls that can be
//! found by selector, label or scan; videos that toggle; vendor fullscreen
//! flags. A page can be "hardened" so untrusted input is accepted but has no
//! effect, which is what forces the privileged path.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::action::debugger::{DebuggerHost, DISPATCH_MOUSE_EVENT};
use crate::action::{ElementHandle, ElementQuery, FullscreenVendor, KeyPhase, PageDom, Rect};
use crate::error::ActionError;
use crate::messages::TabId;

#[derive(Debug, Clone, PartialEq)]
enum Findable {
    Selector(String),
    Labelled,
    Scanned,
}

#[derive(Debug, Clone)]
struct FakeElement {
    id: u64,
    rect: Rect,
    findable: Findable,
    attached: bool,
}

#[derive(Debug, Default)]
struct PageState {
    next_id: u64,
    elements: Vec<FakeElement>,
    reveals: Vec<(String, Rect, usize)>,
    scan_passes: usize,
    failing_queries: Vec<ElementQuery>,
    ignore_untrusted: bool,
    fail_direct: bool,
    pointer_dispatches: Vec<(f64, f64)>,
    videos: Vec<bool>,
    failing_toggles: HashSet<usize>,
    fullscreen: HashMap<FullscreenVendor, bool>,
    exit_calls: Vec<FullscreenVendor>,
    keys: Vec<(String, KeyPhase)>,
}

impl PageState {
    fn add(&mut self, rect: Rect, findable: Findable) -> ElementHandle {
        self.next_id += 1;
        let id = self.next_id;
        self.elements.push(FakeElement {
            id,
            rect,
            findable,
            attached: true,
        });
        ElementHandle { id, rect }
    }

    fn remove(&mut self, id: u64) {
        if let Some(element) = self.elements.iter_mut().find(|e| e.id == id) {
            element.attached = false;
        }
    }

    fn remove_at(&mut self, x: f64, y: f64) {
        let hit = self.elements.iter_mut().find(|e| {
            e.attached
                && !e.rect.is_hidden()
                && x >= e.rect.x
                && x <= e.rect.x + e.rect.width
                && y >= e.rect.y
                && y <= e.rect.y + e.rect.height
        });
        if let Some(element) = hit {
            element.attached = false;
        }
    }

    fn apply_reveals(&mut self) {
        let passes = self.scan_passes;
        let (due, pending): (Vec<_>, Vec<_>) = self
            .reveals
            .drain(..)
            .partition(|(_, _, after)| passes >= *after);
        self.reveals = pending;
        for (selector, rect, _) in due {
            self.add(rect, Findable::Selector(selector));
        }
    }
}

#[derive(Debug, Default)]
pub struct FakePage {
    state: Mutex<PageState>,
}

impl FakePage {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, PageState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn add_selector(&self, selector: &str, rect: Rect) -> ElementHandle {
        self.state().add(rect, Findable::Selector(selector.to_string()))
    }

    /// A button whose label says "Skip ad" but carries no known class.
    pub fn add_labelled(&self, rect: Rect) -> ElementHandle {
        self.state().add(rect, Findable::Labelled)
    }

    /// An element only the keyword scan finds.
    pub fn add_scanned(&self, rect: Rect) -> ElementHandle {
        self.state().add(rect, Findable::Scanned)
    }

    /// Render a selector match once `passes` full lookup passes have run.
    pub fn reveal_selector_after(&self, selector: &str, rect: Rect, passes: usize) {
        self.state().reveals.push((selector.to_string(), rect, passes));
    }

    pub fn fail_queries_for(&self, query: ElementQuery) {
        self.state().failing_queries.push(query);
    }

    /// Completed lookup passes, counted at the final scan strategy.
    pub fn query_passes(&self) -> usize {
        self.state().scan_passes
    }

    pub fn ignore_untrusted_input(&self, ignore: bool) {
        self.state().ignore_untrusted = ignore;
    }

    pub fn fail_direct_clicks(&self, fail: bool) {
        self.state().fail_direct = fail;
    }

    pub fn pointer_dispatches(&self) -> Vec<(f64, f64)> {
        self.state().pointer_dispatches.clone()
    }

    /// Trusted click from the debugger; always lands.
    pub fn trusted_click(&self, x: f64, y: f64) {
        self.state().remove_at(x, y);
    }

    /// Add `count` playing videos.
    pub fn add_videos(&self, count: usize) {
        self.state().videos.extend(std::iter::repeat(true).take(count));
    }

    pub fn fail_toggle_for(&self, index: usize) {
        self.state().failing_toggles.insert(index);
    }

    pub fn playing_videos(&self) -> usize {
        self.state().videos.iter().filter(|playing| **playing).count()
    }

    pub fn set_fullscreen(&self, vendor: FullscreenVendor, active: bool) {
        self.state().fullscreen.insert(vendor, active);
    }

    pub fn fullscreen(&self, vendor: FullscreenVendor) -> bool {
        self.state().fullscreen.get(&vendor).copied().unwrap_or(false)
    }

    pub fn exit_calls(&self) -> Vec<FullscreenVendor> {
        self.state().exit_calls.clone()
    }

    pub fn keys(&self) -> Vec<(String, KeyPhase)> {
        self.state().keys.clone()
    }
}

#[async_trait]
impl PageDom for FakePage {
    async fn query(&self, query: &ElementQuery) -> Result<Vec<ElementHandle>, ActionError> {
        let mut state = self.state();
        if matches!(query, ElementQuery::Scan(_)) {
            state.scan_passes += 1;
        }
        if state.failing_queries.contains(query) {
            return Err(ActionError::DomException {
                details: format!("query {:?} threw", query),
            });
        }
        state.apply_reveals();

        let matches = state
            .elements
            .iter()
            .filter(|e| e.attached)
            .filter(|e| match (query, &e.findable) {
                (ElementQuery::Selector(wanted), Findable::Selector(have)) => wanted == have,
                (ElementQuery::TextOrLabel(_), Findable::Labelled) => true,
                (ElementQuery::Scan(_), Findable::Scanned) => true,
                _ => false,
            })
            .map(|e| ElementHandle {
                id: e.id,
                rect: e.rect,
            })
            .collect();
        Ok(matches)
    }

    async fn invoke_click(&self, element: &ElementHandle) -> Result<(), ActionError> {
        let mut state = self.state();
        if state.fail_direct {
            return Err(ActionError::DomException {
                details: "click() threw".to_string(),
            });
        }
        if !state.ignore_untrusted {
            state.remove(element.id);
        }
        Ok(())
    }

    async fn dispatch_pointer(&self, x: f64, y: f64) -> Result<(), ActionError> {
        let mut state = self.state();
        state.pointer_dispatches.push((x, y));
        if !state.ignore_untrusted {
            state.remove_at(x, y);
        }
        Ok(())
    }

    async fn still_present(&self, element: &ElementHandle) -> bool {
        self.state()
            .elements
            .iter()
            .any(|e| e.id == element.id && e.attached && !e.rect.is_hidden())
    }

    async fn dispatch_key(&self, key: &str, phase: KeyPhase) -> Result<(), ActionError> {
        self.state().keys.push((key.to_string(), phase));
        Ok(())
    }

    async fn video_count(&self) -> usize {
        self.state().videos.len()
    }

    async fn toggle_playback(&self, index: usize) -> Result<(), ActionError> {
        let mut state = self.state();
        if state.failing_toggles.contains(&index) {
            return Err(ActionError::DomException {
                details: format!("video {} rejected play()", index),
            });
        }
        match state.videos.get_mut(index) {
            Some(playing) => {
                *playing = !*playing;
                Ok(())
            }
            None => Err(ActionError::DomException {
                details: format!("no video at {}", index),
            }),
        }
    }

    async fn fullscreen_active(&self, vendor: FullscreenVendor) -> bool {
        self.fullscreen(vendor)
    }

    async fn exit_fullscreen(&self, vendor: FullscreenVendor) -> Result<(), ActionError> {
        let mut state = self.state();
        state.exit_calls.push(vendor);
        state.fullscreen.insert(vendor, false);
        Ok(())
    }
}

#[derive(Debug, Default)]
struct DebuggerState {
    attached: usize,
    attach_calls: usize,
    detach_calls: usize,
    commands: Vec<(String, Value)>,
    fail_commands: bool,
    fail_attach: bool,
    last_protocol_version: Option<String>,
}

/// Records debugger traffic; with a page, a released mouse button clicks it.
#[derive(Default)]
pub struct FakeDebugger {
    page: Option<Arc<FakePage>>,
    state: Mutex<DebuggerState>,
}

impl FakeDebugger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(page: Arc<FakePage>) -> Self {
        Self {
            page: Some(page),
            state: Mutex::default(),
        }
    }

    fn state(&self) -> MutexGuard<'_, DebuggerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn commands(&self) -> Vec<(String, Value)> {
        self.state().commands.clone()
    }

    /// Attachments not yet detached.
    pub fn attached_count(&self) -> usize {
        self.state().attached
    }

    pub fn attach_calls(&self) -> usize {
        self.state().attach_calls
    }

    pub fn detach_calls(&self) -> usize {
        self.state().detach_calls
    }

    pub fn fail_commands(&self, fail: bool) {
        self.state().fail_commands = fail;
    }

    pub fn fail_attach(&self, fail: bool) {
        self.state().fail_attach = fail;
    }

    pub fn last_protocol_version(&self) -> Option<String> {
        self.state().last_protocol_version.clone()
    }
}

#[async_trait]
impl DebuggerHost for FakeDebugger {
    async fn attach(&self, tab_id: TabId, protocol_version: &str) -> Result<(), ActionError> {
        let mut state = self.state();
        state.attach_calls += 1;
        state.last_protocol_version = Some(protocol_version.to_string());
        if state.fail_attach {
            return Err(ActionError::DebuggerAttachFailed {
                tab_id,
                reason: "another debugger is attached".to_string(),
            });
        }
        state.attached += 1;
        Ok(())
    }

    async fn detach(&self, _tab_id: TabId) -> Result<(), ActionError> {
        let mut state = self.state();
        state.detach_calls += 1;
        state.attached = state.attached.saturating_sub(1);
        Ok(())
    }

    async fn send_command(
        &self,
        _tab_id: TabId,
        method: &str,
        params: Value,
    ) -> Result<Value, ActionError> {
        {
            let mut state = self.state();
            if state.fail_commands {
                return Err(ActionError::DebuggerCommandFailed {
                    method: method.to_string(),
                    reason: "target closed".to_string(),
                });
            }
            state.commands.push((method.to_string(), params.clone()));
        }

        if method == DISPATCH_MOUSE_EVENT && params["type"] == "mouseReleased" {
            if let (Some(page), Some(x), Some(y)) =
                (&self.page, params["x"].as_f64(), params["y"].as_f64())
            {
                page.trusted_click(x, y);
            }
        }
        Ok(json!({}))
    }
}
