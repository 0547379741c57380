// Privileged input injection through the tab debugger
//
// Attaching a debugger degrades the tab (info bar, paused devtools state), so
// every attachment is scoped: `scoped` detaches on success, on error and when
// the body panics. A failed attach is followed by a detach as well, since a
// half-completed attach can leave the tab attached.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use serde_json::{json, Value};

use crate::error::{log_action_error, ActionError};
use crate::messages::TabId;

pub const DISPATCH_MOUSE_EVENT: &str = "Input.dispatchMouseEvent";

/// Host-side debugger protocol access
#[async_trait]
pub trait DebuggerHost: Send + Sync {
    async fn attach(&self, tab_id: TabId, protocol_version: &str) -> Result<(), ActionError>;

    async fn detach(&self, tab_id: TabId) -> Result<(), ActionError>;

    async fn send_command(
        &self,
        tab_id: TabId,
        method: &str,
        params: Value,
    ) -> Result<Value, ActionError>;
}

/// An attached debugger, valid inside a `scoped` body
#[derive(Clone)]
pub struct DebuggerSession {
    host: Arc<dyn DebuggerHost>,
    tab_id: TabId,
}

impl DebuggerSession {
    pub fn tab_id(&self) -> TabId {
        self.tab_id
    }

    pub async fn send(&self, method: &str, params: Value) -> Result<Value, ActionError> {
        self.host.send_command(self.tab_id, method, params).await
    }

    /// Trusted left click: press then release at the same point.
    pub async fn click_at(&self, x: f64, y: f64) -> Result<(), ActionError> {
        for event_type in ["mousePressed", "mouseReleased"] {
            self.send(
                DISPATCH_MOUSE_EVENT,
                json!({
                    "type": event_type,
                    "x": x,
                    "y": y,
                    "button": "left",
                    "buttons": 1,
                    "clickCount": 1,
                }),
            )
            .await?;
        }
        Ok(())
    }
}

/// Attach, run `body`, detach.
pub async fn scoped<T, F, Fut>(
    host: Arc<dyn DebuggerHost>,
    tab_id: TabId,
    protocol_version: &str,
    body: F,
) -> Result<T, ActionError>
where
    F: FnOnce(DebuggerSession) -> Fut,
    Fut: Future<Output = Result<T, ActionError>>,
{
    if let Err(err) = host.attach(tab_id, protocol_version).await {
        log_action_error(&err, "debugger_attach");
        if let Err(detach_err) = host.detach(tab_id).await {
            log::debug!(
                "[Debugger] Detach after failed attach on tab {}: {}",
                tab_id,
                detach_err
            );
        }
        return Err(err);
    }
    log::debug!("[Debugger] Attached to tab {}", tab_id);

    let session = DebuggerSession {
        host: Arc::clone(&host),
        tab_id,
    };
    let outcome = AssertUnwindSafe(async move { body(session).await })
        .catch_unwind()
        .await;

    if let Err(err) = host.detach(tab_id).await {
        log_action_error(&err, "debugger_detach");
    } else {
        log::debug!("[Debugger] Detached from tab {}", tab_id);
    }

    match outcome {
        Ok(result) => result,
        Err(panic) => Err(ActionError::Panicked {
            context: format!("debugger session: {}", panic_message(panic.as_ref())),
        }),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
