// FallbackRunner - ordered dispatch stages for activating a page control
//
// Stage order: direct invocation, synthetic pointer events, privileged input
// injection. After each stage the runner waits for the page to settle and
// checks whether the control went away; the first stage with an observable
// effect wins. A stage that errors is logged and the chain moves on.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::debugger::{self, DebuggerHost};
use super::dom::{ElementHandle, PageDom};
use super::{ActionMethod, ActionOutcome};
use crate::error::{log_action_error, ActionError, ErrorCode};
use crate::messages::TabId;

/// One way of activating a control
#[async_trait]
pub trait DispatchStage: Send + Sync {
    fn method(&self) -> ActionMethod;

    async fn dispatch(&self, target: &ElementHandle) -> Result<(), ActionError>;
}

/// Result of running one stage
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutcome {
    Effect,
    NoEffect { reason: String },
}

/// `element.click()`
pub struct DirectInvoke {
    dom: Arc<dyn PageDom>,
}

impl DirectInvoke {
    pub fn new(dom: Arc<dyn PageDom>) -> Self {
        Self { dom }
    }
}

#[async_trait]
impl DispatchStage for DirectInvoke {
    fn method(&self) -> ActionMethod {
        ActionMethod::Direct
    }

    async fn dispatch(&self, target: &ElementHandle) -> Result<(), ActionError> {
        self.dom.invoke_click(target).await
    }
}

/// Synthetic pointer events at the centre of the control
pub struct SyntheticPointer {
    dom: Arc<dyn PageDom>,
}

impl SyntheticPointer {
    pub fn new(dom: Arc<dyn PageDom>) -> Self {
        Self { dom }
    }
}

#[async_trait]
impl DispatchStage for SyntheticPointer {
    fn method(&self) -> ActionMethod {
        ActionMethod::Synthetic
    }

    async fn dispatch(&self, target: &ElementHandle) -> Result<(), ActionError> {
        let (x, y) = target.rect.center();
        self.dom.dispatch_pointer(x, y).await
    }
}

/// Trusted mouse press/release injected through the tab debugger
pub struct PrivilegedInjection {
    debugger: Arc<dyn DebuggerHost>,
    tab_id: TabId,
    protocol_version: String,
}

impl PrivilegedInjection {
    pub fn new(debugger: Arc<dyn DebuggerHost>, tab_id: TabId, protocol_version: &str) -> Self {
        Self {
            debugger,
            tab_id,
            protocol_version: protocol_version.to_string(),
        }
    }
}

#[async_trait]
impl DispatchStage for PrivilegedInjection {
    fn method(&self) -> ActionMethod {
        ActionMethod::Privileged
    }

    async fn dispatch(&self, target: &ElementHandle) -> Result<(), ActionError> {
        let (x, y) = target.rect.center();
        debugger::scoped(
            Arc::clone(&self.debugger),
            self.tab_id,
            &self.protocol_version,
            |session| async move { session.click_at(x, y).await },
        )
        .await
    }
}

/// Runs stages in order until one has an observable effect
pub struct FallbackRunner {
    dom: Arc<dyn PageDom>,
    stages: Vec<Box<dyn DispatchStage>>,
    settle: Duration,
}

impl FallbackRunner {
    pub fn new(dom: Arc<dyn PageDom>, stages: Vec<Box<dyn DispatchStage>>, settle: Duration) -> Self {
        Self { dom, stages, settle }
    }

    pub fn stage_methods(&self) -> Vec<ActionMethod> {
        self.stages.iter().map(|stage| stage.method()).collect()
    }

    pub async fn run(&self, target: &ElementHandle) -> ActionOutcome {
        let mut last_reason = "no dispatch stages".to_string();

        for stage in &self.stages {
            match self.attempt(stage.as_ref(), target).await {
                StageOutcome::Effect => {
                    log::info!("[FallbackRunner] Control activated via {:?}", stage.method());
                    return ActionOutcome::succeeded(stage.method());
                }
                StageOutcome::NoEffect { reason } => {
                    log::debug!("[FallbackRunner] {:?} had no effect: {}", stage.method(), reason);
                    last_reason = reason;
                }
            }
        }

        ActionOutcome::failed(last_reason)
    }

    async fn attempt(&self, stage: &dyn DispatchStage, target: &ElementHandle) -> StageOutcome {
        if let Err(err) = stage.dispatch(target).await {
            log_action_error(&err, "fallback_stage");
            return StageOutcome::NoEffect {
                reason: format!("{:?} failed with code {}", stage.method(), err.code()),
            };
        }

        tokio::time::sleep(self.settle).await;
        if self.dom.still_present(target).await {
            StageOutcome::NoEffect {
                reason: "control still present".to_string(),
            }
        } else {
            StageOutcome::Effect
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::dom::Rect;
    use crate::testing::{FakeDebugger, FakePage};

    fn runner(page: &Arc<FakePage>, debugger: &Arc<FakeDebugger>) -> FallbackRunner {
        let dom: Arc<dyn PageDom> = page.clone();
        FallbackRunner::new(
            Arc::clone(&dom),
            vec![
                Box::new(DirectInvoke::new(Arc::clone(&dom))),
                Box::new(SyntheticPointer::new(Arc::clone(&dom))),
                Box::new(PrivilegedInjection::new(debugger.clone(), 1, "1.3")),
            ],
            Duration::from_millis(100),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_direct_click_is_enough() {
        let page = Arc::new(FakePage::new());
        let debugger = Arc::new(FakeDebugger::with_page(page.clone()));
        let target = page.add_selector(".ytp-ad-skip-button", Rect::new(0.0, 0.0, 40.0, 20.0));

        let outcome = runner(&page, &debugger).run(&target).await;
        assert_eq!(outcome, ActionOutcome::succeeded(ActionMethod::Direct));
        assert_eq!(debugger.attach_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_escalates_to_privileged_when_page_ignores_untrusted_input() {
        let page = Arc::new(FakePage::new());
        page.ignore_untrusted_input(true);
        let debugger = Arc::new(FakeDebugger::with_page(page.clone()));
        let target = page.add_selector(".ytp-ad-skip-button", Rect::new(100.0, 40.0, 40.0, 20.0));

        let outcome = runner(&page, &debugger).run(&target).await;
        assert_eq!(outcome, ActionOutcome::succeeded(ActionMethod::Privileged));
        assert_eq!(page.pointer_dispatches(), vec![(120.0, 50.0)]);
        assert_eq!(debugger.attached_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stage_errors_do_not_abort_chain() {
        let page = Arc::new(FakePage::new());
        page.fail_direct_clicks(true);
        let debugger = Arc::new(FakeDebugger::with_page(page.clone()));
        let target = page.add_selector(".ytp-ad-skip-button", Rect::new(0.0, 0.0, 40.0, 20.0));

        let outcome = runner(&page, &debugger).run(&target).await;
        assert_eq!(outcome, ActionOutcome::succeeded(ActionMethod::Synthetic));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_effect_anywhere_reports_failure() {
        let page = Arc::new(FakePage::new());
        page.ignore_untrusted_input(true);
        let debugger = Arc::new(FakeDebugger::new());
        let target = page.add_selector(".ytp-ad-skip-button", Rect::new(0.0, 0.0, 40.0, 20.0));

        let outcome = runner(&page, &debugger).run(&target).await;
        assert!(!outcome.success);
        assert_eq!(outcome.method, ActionMethod::None);
        assert_eq!(outcome.reason.as_deref(), Some("control still present"));
        assert_eq!(debugger.attached_count(), 0);
    }
}
