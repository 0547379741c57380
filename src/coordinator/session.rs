// Coordinator-owned state: monitoring session, scolding counter, tab map

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::messages::{AdStateChanged, TabId};

/// The listening session as the coordinator sees it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoringSession {
    pub active: bool,
    pub sensitivity: f32,
    pub last_event_at: Option<u64>,
    pub cooldown_ms: u64,
}

impl MonitoringSession {
    pub fn new(cooldown_ms: u64) -> Self {
        Self {
            active: false,
            sensitivity: 0.5,
            last_event_at: None,
            cooldown_ms,
        }
    }

    pub fn start(&mut self, sensitivity: f32) {
        self.active = true;
        self.sensitivity = sensitivity.clamp(0.0, 1.0);
        self.last_event_at = None;
    }

    /// Ends the session; the last sensitivity is kept for recovery.
    pub fn stop(&mut self) {
        self.active = false;
        self.last_event_at = None;
    }

    pub fn record_event(&mut self, timestamp_ms: u64) {
        self.last_event_at = Some(timestamp_ms);
    }
}

/// Counts scold events and fires once every `threshold` events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoldingCounter {
    count: u32,
    threshold: u32,
}

impl ScoldingCounter {
    pub fn new(threshold: u32) -> Self {
        Self {
            count: 0,
            threshold: threshold.max(1),
        }
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn reset(&mut self) {
        self.count = 0;
    }

    /// Count one event. Returns the count that triggered escalation, after
    /// which the counter is back at zero.
    pub fn bump(&mut self) -> Option<u32> {
        self.count += 1;
        if self.count >= self.threshold {
            let reached = self.count;
            self.count = 0;
            Some(reached)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TabEntry {
    state: AdStateChanged,
    sequence: u64,
}

/// Latest ad observation per tab. Entries are overwritten, never removed.
#[derive(Debug, Default)]
pub struct TabStates {
    entries: HashMap<TabId, TabEntry>,
    sequence: u64,
}

impl TabStates {
    pub fn record(&mut self, state: AdStateChanged) {
        self.sequence += 1;
        self.entries.insert(
            state.tab_id,
            TabEntry {
                state,
                sequence: self.sequence,
            },
        );
    }

    pub fn get(&self, tab_id: TabId) -> Option<AdStateChanged> {
        self.entries.get(&tab_id).map(|entry| entry.state)
    }

    /// Overwrite a tab's observation with "no ad".
    pub fn clear(&mut self, tab_id: TabId) {
        if self.entries.contains_key(&tab_id) {
            self.record(AdStateChanged {
                tab_id,
                is_ad_active: false,
                skip_control_visible: false,
                ad_content_present: false,
            });
        }
    }

    pub fn any_ad(&self) -> bool {
        self.entries
            .values()
            .any(|entry| entry.state.is_ad_active || entry.state.skip_control_visible)
    }

    /// Tab that most recently reported an active ad.
    pub fn most_recent_ad_tab(&self) -> Option<TabId> {
        self.entries
            .values()
            .filter(|entry| entry.state.is_ad_active || entry.state.skip_control_visible)
            .max_by_key(|entry| entry.sequence)
            .map(|entry| entry.state.tab_id)
    }

    /// All observations ordered by tab id.
    pub fn snapshot(&self) -> Vec<AdStateChanged> {
        let mut states: Vec<AdStateChanged> = self.entries.values().map(|e| e.state).collect();
        states.sort_by_key(|state| state.tab_id);
        states
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn observed(tab_id: TabId, active: bool) -> AdStateChanged {
        AdStateChanged {
            tab_id,
            is_ad_active: active,
            skip_control_visible: active,
            ad_content_present: false,
        }
    }

    #[test]
    fn test_counter_fires_once_per_threshold() {
        let mut counter = ScoldingCounter::new(10);
        let fired: Vec<u32> = (0..10).filter_map(|_| counter.bump()).collect();
        assert_eq!(fired, vec![10]);
        assert_eq!(counter.count(), 0);
    }

    #[test]
    fn test_most_recent_ad_tab_wins() {
        let mut tabs = TabStates::default();
        tabs.record(observed(1, true));
        tabs.record(observed(2, true));
        assert_eq!(tabs.most_recent_ad_tab(), Some(2));

        tabs.record(observed(1, true));
        assert_eq!(tabs.most_recent_ad_tab(), Some(1));

        tabs.record(observed(1, false));
        assert_eq!(tabs.most_recent_ad_tab(), Some(2));
    }

    #[test]
    fn test_clear_keeps_entry_but_drops_ad() {
        let mut tabs = TabStates::default();
        tabs.record(observed(3, true));
        tabs.clear(3);
        tabs.clear(99);
        assert!(!tabs.any_ad());
        assert_eq!(tabs.snapshot().len(), 1);
        assert_eq!(tabs.get(99), None);
    }

    #[test]
    fn test_session_stop_keeps_sensitivity() {
        let mut session = MonitoringSession::new(2000);
        session.start(0.8);
        session.record_event(1234);
        session.stop();
        assert!(!session.active);
        assert_eq!(session.last_event_at, None);
        assert_eq!(session.sensitivity, 0.8);
    }
}
