//! Coordinator telemetry collector.
//!
//! The collector keeps a bounded history of coordinator events plus an async
//! broadcast stream, so the CLI can print a run report and tests can assert
//! on decisions without scraping logs.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use tokio::sync::{broadcast, mpsc};

pub mod events;

pub use events::{ActionKind, CoordinatorEvent};

/// Snapshot of collector state for CLI reporting.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TelemetrySnapshot {
    pub recent: Vec<CoordinatorEvent>,
    pub total_events: u64,
    pub dropped_events: u64,
}

/// Broadcast-based collector retaining a bounded history of events.
pub struct TelemetryCollector {
    tx: broadcast::Sender<CoordinatorEvent>,
    history: Mutex<VecDeque<CoordinatorEvent>>,
    history_capacity: usize,
    total_events: AtomicU64,
    dropped_history: AtomicU64,
}

impl TelemetryCollector {
    pub fn new(buffer: usize, history_capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(buffer.max(1));
        Self {
            tx,
            history: Mutex::new(VecDeque::with_capacity(history_capacity)),
            history_capacity: history_capacity.max(1),
            total_events: AtomicU64::new(0),
            dropped_history: AtomicU64::new(0),
        }
    }

    fn lock_history(&self) -> MutexGuard<'_, VecDeque<CoordinatorEvent>> {
        self.history
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn publish(&self, event: CoordinatorEvent) {
        self.total_events.fetch_add(1, Ordering::Relaxed);
        {
            let mut history = self.lock_history();
            if history.len() == self.history_capacity {
                history.pop_front();
                self.dropped_history.fetch_add(1, Ordering::Relaxed);
            }
            history.push_back(event.clone());
        }

        // No subscribers is fine.
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CoordinatorEvent> {
        self.tx.subscribe()
    }

    pub fn subscribe_unbounded(&self) -> mpsc::UnboundedReceiver<CoordinatorEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut broadcast_rx = self.tx.subscribe();

        tokio::spawn(async move {
            loop {
                match broadcast_rx.recv().await {
                    Ok(event) => {
                        if tx.send(event).is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        log::warn!("[Telemetry] Stream fell behind, skipped {} events", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        rx
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        let history = self.lock_history();
        TelemetrySnapshot {
            recent: history.iter().cloned().collect(),
            total_events: self.total_events.load(Ordering::Relaxed),
            dropped_events: self.dropped_history.load(Ordering::Relaxed),
        }
    }

    /// Number of retained events matching `predicate`.
    pub fn count(&self, predicate: impl Fn(&CoordinatorEvent) -> bool) -> usize {
        self.lock_history().iter().filter(|event| predicate(event)).count()
    }
}

impl Default for TelemetryCollector {
    fn default() -> Self {
        Self::new(256, 256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loud(timestamp_ms: u64) -> CoordinatorEvent {
        CoordinatorEvent::LoudEvent {
            metric: 0.9,
            timestamp_ms,
        }
    }

    #[test]
    fn collector_preserves_order_within_history() {
        let collector = TelemetryCollector::new(8, 3);
        collector.publish(CoordinatorEvent::SessionStarted { sensitivity: 0.5 });
        collector.publish(loud(10));
        collector.publish(CoordinatorEvent::SessionStopped {
            reason: "no ad".to_string(),
        });

        let snapshot = collector.snapshot();
        assert_eq!(snapshot.recent.len(), 3);
        assert!(matches!(
            snapshot.recent[0],
            CoordinatorEvent::SessionStarted { .. }
        ));
        assert!(matches!(
            snapshot.recent[2],
            CoordinatorEvent::SessionStopped { .. }
        ));
    }

    #[test]
    fn collector_drops_history_when_full() {
        let collector = TelemetryCollector::new(8, 2);
        collector.publish(loud(1));
        collector.publish(loud(2));
        collector.publish(loud(3));

        let snapshot = collector.snapshot();
        assert_eq!(snapshot.recent.len(), 2);
        assert_eq!(snapshot.total_events, 3);
        assert_eq!(snapshot.dropped_events, 1);
        assert_eq!(snapshot.recent[0], loud(2));
    }

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let collector = TelemetryCollector::new(8, 8);
        let mut rx = collector.subscribe();
        collector.publish(CoordinatorEvent::ContextRecreated { attempt: 1 });
        assert_eq!(
            rx.recv().await.unwrap(),
            CoordinatorEvent::ContextRecreated { attempt: 1 }
        );
    }

    #[tokio::test]
    async fn unbounded_stream_keeps_forwarding_after_lag() {
        let collector = TelemetryCollector::new(2, 8);
        let mut rx = collector.subscribe_unbounded();
        for t in 0..5 {
            collector.publish(loud(t));
        }

        // The three oldest events fell out of the broadcast buffer.
        assert_eq!(rx.recv().await.unwrap(), loud(3));
        assert_eq!(rx.recv().await.unwrap(), loud(4));

        collector.publish(loud(5));
        assert_eq!(rx.recv().await.unwrap(), loud(5));
    }

    #[test]
    fn event_wire_shape() {
        let json = serde_json::to_value(CoordinatorEvent::Escalation {
            count: 10,
            voice: crate::settings::ScoldingVoice::Dramatic,
        })
        .unwrap();
        assert_eq!(json["type"], "escalation");
        assert_eq!(json["payload"]["count"], 10);
        assert_eq!(json["payload"]["voice"], "dramatic");
    }
}
