//! Configuration management for timing and detection parameters
//!
//! Runtime configuration is loaded from a JSON file so cooldowns, retry
//! counts and tick rates can be tuned without recompilation. Missing fields
//! fall back to the defaults below.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Complete application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub monitor: MonitorConfig,
    pub watcher: WatcherConfig,
    pub action: ActionConfig,
    pub coordinator: CoordinatorConfig,
}

/// Microphone sampling and loud-event classification parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Sampling period in milliseconds (100ms = 10 Hz)
    pub tick_ms: u64,
    /// Samples read per tick (analyser FFT size)
    pub fft_size: usize,
    /// Minimum time between two accepted loud events
    pub cooldown_ms: u64,
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
    /// Emit a level/threshold debug line every N ticks
    pub log_every_n_ticks: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            tick_ms: 100,
            fft_size: 2048,
            cooldown_ms: 2000,
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
            log_every_n_ticks: 50,
        }
    }
}

impl MonitorConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms.max(1))
    }
}

/// Player observation parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    /// First delay between attach attempts when the player is missing
    pub attach_retry_ms: u64,
    /// Upper bound for the attach backoff delay
    pub attach_max_interval_ms: u64,
    /// Give up after this many attempts; `None` keeps polling at the capped interval
    pub attach_max_attempts: Option<u32>,
    /// URL polling period for single-page-app navigation
    pub url_poll_ms: u64,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            attach_retry_ms: 500,
            attach_max_interval_ms: 5000,
            attach_max_attempts: None,
            url_poll_ms: 1000,
        }
    }
}

/// Page action parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionConfig {
    /// Skip-control lookup attempts
    pub lookup_attempts: u32,
    /// Delay between lookup attempts
    pub lookup_delay_ms: u64,
    /// Wait after a dispatch stage before checking for an effect
    pub effect_settle_ms: u64,
    /// Pause between the playback toggle and the escape key
    pub pause_escape_delay_ms: u64,
    /// Debugger protocol version requested on attach
    pub debugger_protocol_version: String,
}

impl Default for ActionConfig {
    fn default() -> Self {
        Self {
            lookup_attempts: 3,
            lookup_delay_ms: 500,
            effect_settle_ms: 100,
            pause_escape_delay_ms: 200,
            debugger_protocol_version: "1.3".to_string(),
        }
    }
}

/// What to do when an action ran but produced no observable effect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FalsePositivePolicy {
    #[default]
    KeepListening,
    StopListening,
}

/// Coordinator lifecycle parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Period of the capture-context health check
    pub health_check_interval_ms: u64,
    /// Context recreations allowed per monitoring session
    pub max_recoveries: u32,
    /// Wait after recreating a dropped context before resending
    pub reconnect_delay_ms: u64,
    /// Reply deadline for requests to the capture context
    pub request_timeout_ms: u64,
    /// Scold events before the escalation action fires
    pub escalation_threshold: u32,
    /// Delay before the activity badge is cleared
    pub badge_clear_ms: u64,
    /// Wait after a successful skip before releasing the microphone
    pub stop_after_skip_ms: u64,
    pub false_positive_policy: FalsePositivePolicy,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            health_check_interval_ms: 60_000,
            max_recoveries: 3,
            reconnect_delay_ms: 1000,
            request_timeout_ms: 5000,
            escalation_threshold: 10,
            badge_clear_ms: 3000,
            stop_after_skip_ms: 500,
            false_positive_policy: FalsePositivePolicy::KeepListening,
        }
    }
}

impl AppConfig {
    /// Load configuration from JSON file
    ///
    /// # Arguments
    /// * `path` - Path to JSON config file
    ///
    /// # Returns
    /// The parsed configuration, or the defaults when the file is missing or
    /// the JSON is invalid.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Self {
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(config) => {
                    log::info!("[Config] Loaded configuration from {:?}", path.as_ref());
                    config
                }
                Err(err) => {
                    log::warn!(
                        "[Config] Failed to parse JSON from {:?}: {}. Using defaults.",
                        path.as_ref(),
                        err
                    );
                    Self::default()
                }
            },
            Err(err) => {
                log::warn!(
                    "[Config] Failed to read config file {:?}: {}. Using defaults.",
                    path.as_ref(),
                    err
                );
                Self::default()
            }
        }
    }

    pub fn load() -> Self {
        Self::load_from_file("assets/scream_skip.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.monitor.tick_ms, 100);
        assert_eq!(config.monitor.fft_size, 2048);
        assert_eq!(config.monitor.cooldown_ms, 2000);
        assert_eq!(config.action.lookup_attempts, 3);
        assert_eq!(config.action.lookup_delay_ms, 500);
        assert_eq!(config.coordinator.escalation_threshold, 10);
        assert_eq!(
            config.coordinator.false_positive_policy,
            FalsePositivePolicy::KeepListening
        );
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let parsed: AppConfig =
            serde_json::from_str(r#"{ "monitor": { "cooldown_ms": 3000 } }"#).unwrap();
        assert_eq!(parsed.monitor.cooldown_ms, 3000);
        assert_eq!(parsed.monitor.tick_ms, 100);
        assert_eq!(parsed.watcher.url_poll_ms, 1000);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = AppConfig::load_from_file("/definitely/not/here.json");
        assert_eq!(config.coordinator.max_recoveries, 3);
    }

    #[test]
    fn test_policy_serializes_snake_case() {
        let json = serde_json::to_string(&FalsePositivePolicy::StopListening).unwrap();
        assert_eq!(json, "\"stop_listening\"");
    }
}
