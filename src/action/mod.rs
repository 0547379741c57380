//! Page actions run once a loud event is confirmed.
//!
//! Two actions exist: skipping the current ad through the dispatch fallback
//! chain, and pausing playback while leaving fullscreen. Both always return
//! an [`ActionOutcome`]; failures are outcomes, never errors.

pub mod debugger;
pub mod dom;
pub mod fallback;
pub mod locator;
pub mod pause;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::ActionConfig;
use crate::messages::{ActionRequest, TabId};

pub use debugger::{DebuggerHost, DebuggerSession};
pub use dom::{ElementHandle, ElementQuery, FullscreenVendor, KeyPhase, PageDom, Rect};
pub use fallback::{
    DirectInvoke, DispatchStage, FallbackRunner, PrivilegedInjection, StageOutcome,
    SyntheticPointer,
};

pub const NOT_FOUND_REASON: &str = "not found";

/// How an action achieved its effect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionMethod {
    Direct,
    Synthetic,
    Privileged,
    None,
}

/// Result reported back to the coordinator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub success: bool,
    pub method: ActionMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ActionOutcome {
    pub fn succeeded(method: ActionMethod) -> Self {
        Self {
            success: true,
            method,
            reason: None,
        }
    }

    pub fn failed(reason: String) -> Self {
        Self {
            success: false,
            method: ActionMethod::None,
            reason: Some(reason),
        }
    }
}

/// Acts on one tab
pub struct ActionExecutor {
    tab_id: TabId,
    dom: Arc<dyn PageDom>,
    debugger: Arc<dyn DebuggerHost>,
    config: ActionConfig,
}

impl ActionExecutor {
    pub fn new(
        tab_id: TabId,
        dom: Arc<dyn PageDom>,
        debugger: Arc<dyn DebuggerHost>,
        config: ActionConfig,
    ) -> Self {
        Self {
            tab_id,
            dom,
            debugger,
            config,
        }
    }

    pub fn tab_id(&self) -> TabId {
        self.tab_id
    }

    /// Direct invocation, then synthetic pointer, then privileged injection.
    pub fn fallback_runner(&self) -> FallbackRunner {
        FallbackRunner::new(
            Arc::clone(&self.dom),
            vec![
                Box::new(DirectInvoke::new(Arc::clone(&self.dom))),
                Box::new(SyntheticPointer::new(Arc::clone(&self.dom))),
                Box::new(PrivilegedInjection::new(
                    Arc::clone(&self.debugger),
                    self.tab_id,
                    &self.config.debugger_protocol_version,
                )),
            ],
            Duration::from_millis(self.config.effect_settle_ms),
        )
    }

    pub async fn execute_skip(&self) -> ActionOutcome {
        let target = locator::locate(
            self.dom.as_ref(),
            &locator::skip_strategies(),
            self.config.lookup_attempts,
            Duration::from_millis(self.config.lookup_delay_ms),
        )
        .await;

        let Some(target) = target else {
            log::info!(
                "[ActionExecutor] Skip control not found on tab {} after {} attempt(s)",
                self.tab_id,
                self.config.lookup_attempts
            );
            return ActionOutcome::failed(NOT_FOUND_REASON.to_string());
        };

        self.fallback_runner().run(&target).await
    }

    pub async fn pause_and_exit(&self) -> ActionOutcome {
        pause::pause_and_exit(self.dom.as_ref(), &self.config).await
    }

    pub async fn handle(&self, request: ActionRequest) -> ActionOutcome {
        log::debug!("[ActionExecutor] {:?} on tab {}", request, self.tab_id);
        match request {
            ActionRequest::ExecuteSkipAction => self.execute_skip().await,
            ActionRequest::PauseAndExit => self.pause_and_exit().await,
        }
    }
}

/// Where the coordinator finds an executor for a tab
pub trait ExecutorRegistry: Send + Sync {
    fn executor(&self, tab_id: TabId) -> Option<Arc<ActionExecutor>>;

    /// The tab the user is looking at, if known
    fn active_tab(&self) -> Option<TabId>;
}

/// In-process registry of per-tab executors
#[derive(Default)]
pub struct TabRegistry {
    executors: Mutex<HashMap<TabId, Arc<ActionExecutor>>>,
    active: Mutex<Option<TabId>>,
}

impl TabRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, executor: ActionExecutor) -> Arc<ActionExecutor> {
        let executor = Arc::new(executor);
        if let Ok(mut executors) = self.executors.lock() {
            executors.insert(executor.tab_id(), Arc::clone(&executor));
        }
        executor
    }

    pub fn set_active(&self, tab_id: Option<TabId>) {
        if let Ok(mut active) = self.active.lock() {
            *active = tab_id;
        }
    }
}

impl ExecutorRegistry for TabRegistry {
    fn executor(&self, tab_id: TabId) -> Option<Arc<ActionExecutor>> {
        self.executors
            .lock()
            .ok()
            .and_then(|executors| executors.get(&tab_id).cloned())
    }

    fn active_tab(&self) -> Option<TabId> {
        self.active.lock().ok().and_then(|active| *active)
    }
}
