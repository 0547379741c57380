/// Edge-triggered change detector.
///
/// Remembers the last value it was fed and reports a value only when it
/// differs from that record. Starts at, and resets to, a fixed baseline.
#[derive(Debug, Clone)]
pub struct EdgeTrigger<T> {
    baseline: T,
    last: T,
}

impl<T: Clone + PartialEq> EdgeTrigger<T> {
    pub fn new(baseline: T) -> Self {
        Self {
            last: baseline.clone(),
            baseline,
        }
    }

    pub fn current(&self) -> &T {
        &self.last
    }

    /// Record `value`; returns it when it is a transition.
    pub fn update(&mut self, value: T) -> Option<T> {
        if value == self.last {
            return None;
        }
        self.last = value.clone();
        Some(value)
    }

    /// Go back to the baseline. Returns the baseline when that is itself a
    /// transition, so the reset can be reported like any other change.
    pub fn reset(&mut self) -> Option<T> {
        let baseline = self.baseline.clone();
        self.update(baseline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transitions_are_reported() {
        let mut trigger = EdgeTrigger::new(false);
        let emitted: Vec<bool> = [false, false, true, true, false]
            .into_iter()
            .filter_map(|v| trigger.update(v))
            .collect();
        assert_eq!(emitted, vec![true, false]);
    }

    #[test]
    fn test_repeated_value_is_idempotent() {
        let mut trigger = EdgeTrigger::new(false);
        assert_eq!(trigger.update(true), Some(true));
        for _ in 0..10 {
            assert_eq!(trigger.update(true), None);
        }
        assert!(*trigger.current());
    }

    #[test]
    fn test_reset_reports_only_when_state_changes() {
        let mut trigger = EdgeTrigger::new(false);
        assert_eq!(trigger.reset(), None);
        trigger.update(true);
        assert_eq!(trigger.reset(), Some(false));
        assert_eq!(trigger.reset(), None);
    }
}
