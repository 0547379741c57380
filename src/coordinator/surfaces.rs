//! Fire-and-forget outputs of the coordinator.

use crate::settings::ScoldingVoice;

/// Activity badge colour for a detected loud event
pub const ALERT_COLOR: &str = "#ef4444";
pub const ALERT_TEXT: &str = "!";

/// Toolbar badge
pub trait Badge: Send + Sync {
    fn set(&self, text: &str, color: &str);
    fn clear(&self);
}

/// Side-channel action fired when the scolding counter reaches its threshold
pub trait EscalationSink: Send + Sync {
    fn escalate(&self, count: u32, voice: ScoldingVoice);
}

/// Badge that only logs, for headless runs
#[derive(Debug, Default)]
pub struct LogBadge;

impl Badge for LogBadge {
    fn set(&self, text: &str, color: &str) {
        log::info!("[Badge] {} ({})", text, color);
    }

    fn clear(&self) {
        log::debug!("[Badge] cleared");
    }
}

/// Escalation that only logs, for headless runs
#[derive(Debug, Default)]
pub struct LogEscalation;

impl EscalationSink for LogEscalation {
    fn escalate(&self, count: u32, voice: ScoldingVoice) {
        log::warn!("[Escalation] {} scoldings reached ({:?} voice)", count, voice);
    }
}
