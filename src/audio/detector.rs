use crate::audio::level::threshold_for;
use crate::messages::LoudEvent;

/// Why a tick did not produce an event
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Verdict {
    Quiet,
    /// Above threshold but inside the cooldown window
    Suppressed { remaining_ms: u64 },
    Detected(LoudEvent),
}

/// Threshold-plus-cooldown classifier for loudness metrics.
///
/// A metric strictly above the threshold is accepted only if at least
/// `cooldown_ms` elapsed since the previously accepted event. The metric may
/// stay above threshold for any length of time; events stay spaced.
#[derive(Debug, Clone)]
pub struct LoudEventDetector {
    threshold: f32,
    cooldown_ms: u64,
    last_event_at: Option<u64>,
}

impl LoudEventDetector {
    pub fn new(sensitivity: f32, cooldown_ms: u64) -> Self {
        Self {
            threshold: threshold_for(sensitivity),
            cooldown_ms,
            last_event_at: None,
        }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn last_event_at(&self) -> Option<u64> {
        self.last_event_at
    }

    /// Reset internal state (e.g. when a session restarts)
    pub fn reset(&mut self) {
        self.last_event_at = None;
    }

    pub fn observe(&mut self, metric: f32, now_ms: u64) -> Verdict {
        if metric <= self.threshold {
            return Verdict::Quiet;
        }

        if let Some(last) = self.last_event_at {
            let elapsed = now_ms.saturating_sub(last);
            if elapsed < self.cooldown_ms {
                return Verdict::Suppressed {
                    remaining_ms: self.cooldown_ms - elapsed,
                };
            }
        }

        self.last_event_at = Some(now_ms);
        Verdict::Detected(LoudEvent {
            metric,
            timestamp_ms: now_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(detector: &mut LoudEventDetector, metrics: &[f32], tick_ms: u64) -> Vec<LoudEvent> {
        metrics
            .iter()
            .enumerate()
            .filter_map(|(i, &m)| match detector.observe(m, i as u64 * tick_ms) {
                Verdict::Detected(event) => Some(event),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_single_event_on_first_crossing() {
        let mut detector = LoudEventDetector::new(0.5, 2000);
        let events = run(&mut detector, &[0.1, 0.3, 0.6, 0.65, 0.2], 100);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].metric, 0.6);
        assert_eq!(events[0].timestamp_ms, 200);
    }

    #[test]
    fn test_cooldown_spaces_sustained_loudness() {
        let mut detector = LoudEventDetector::new(0.5, 2000);
        let metrics = vec![0.9; 100];
        let events = run(&mut detector, &metrics, 100);
        assert_eq!(events.len(), 5);
        for pair in events.windows(2) {
            assert!(pair[1].timestamp_ms - pair[0].timestamp_ms >= 2000);
        }
    }

    #[test]
    fn test_suppressed_reports_remaining() {
        let mut detector = LoudEventDetector::new(0.5, 2000);
        assert!(matches!(detector.observe(0.8, 1000), Verdict::Detected(_)));
        assert_eq!(
            detector.observe(0.8, 1500),
            Verdict::Suppressed { remaining_ms: 1500 }
        );
        assert!(matches!(detector.observe(0.8, 3000), Verdict::Detected(_)));
    }

    #[test]
    fn test_threshold_is_strict() {
        let mut detector = LoudEventDetector::new(0.5, 0);
        assert_eq!(detector.observe(0.5, 0), Verdict::Quiet);
    }

    #[test]
    fn test_detection_count_non_decreasing_in_sensitivity() {
        let metrics: Vec<f32> = (0..200).map(|i| ((i * 37) % 100) as f32 / 100.0).collect();
        let mut previous = 0;
        for step in 0..=10 {
            let mut detector = LoudEventDetector::new(step as f32 / 10.0, 0);
            let count = run(&mut detector, &metrics, 100).len();
            assert!(count >= previous, "sensitivity step {} dropped detections", step);
            previous = count;
        }
    }

    #[test]
    fn test_reset_clears_cooldown() {
        let mut detector = LoudEventDetector::new(0.5, 2000);
        assert!(matches!(detector.observe(0.8, 0), Verdict::Detected(_)));
        detector.reset();
        assert!(matches!(detector.observe(0.8, 100), Verdict::Detected(_)));
    }
}
