//! Time sources used for event timestamps and cooldown arithmetic.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Trait representing a millisecond clock.
pub trait TimeSource: Send + Sync {
    fn now_ms(&self) -> u64;
}

/// Wall-clock milliseconds since the Unix epoch.
#[derive(Default)]
pub struct SystemTimeSource {
    _unit: (),
}

impl TimeSource for SystemTimeSource {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// Monotonic milliseconds since construction, backed by `tokio::time::Instant`.
///
/// Follows tokio's paused clock in tests, so cooldowns can be exercised with
/// `tokio::time::advance`.
pub struct TokioTimeSource {
    origin: tokio::time::Instant,
}

impl TokioTimeSource {
    pub fn new() -> Self {
        Self {
            origin: tokio::time::Instant::now(),
        }
    }
}

impl Default for TokioTimeSource {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for TokioTimeSource {
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }
}

/// Deterministic time source for offline replay.
///
/// Each call to `now_ms()` returns the current offset and then advances it by
/// a fixed step.
pub struct StubTimeSource {
    offset_ms: AtomicU64,
    step_ms: u64,
}

impl StubTimeSource {
    pub fn new(step_ms: u64) -> Self {
        Self {
            offset_ms: AtomicU64::new(0),
            step_ms,
        }
    }
}

impl Default for StubTimeSource {
    fn default() -> Self {
        Self::new(10)
    }
}

impl TimeSource for StubTimeSource {
    fn now_ms(&self) -> u64 {
        self.offset_ms.fetch_add(self.step_ms, Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stub_time_source_steps() {
        let clock = StubTimeSource::new(100);
        assert_eq!(clock.now_ms(), 0);
        assert_eq!(clock.now_ms(), 100);
        assert_eq!(clock.now_ms(), 200);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokio_time_source_follows_paused_clock() {
        let clock = TokioTimeSource::new();
        assert_eq!(clock.now_ms(), 0);
        tokio::time::advance(std::time::Duration::from_millis(2500)).await;
        assert_eq!(clock.now_ms(), 2500);
    }
}
