//! Sync lifecycle events for presentation code.
//!
//! A broadcast channel decouples publishers from however many UI surfaces
//! care to listen. Publishing never blocks and never fails; an event with no
//! listeners is simply dropped.

use tokio::sync::broadcast;
use tracing::debug;

use tillsync_domain::SyncSummary;

/// Events emitted by the resilience and sync layers.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// The circuit breaker opened; writes should be treated as offline.
    CircuitOpened,
    /// The circuit breaker closed again.
    CircuitClosed,
    /// A queued or direct write hit a version conflict.
    ConflictDetected { entity_id: String, mutation_id: Option<String> },
    /// A queued mutation was permanently rejected.
    MutationFailed { mutation_id: String, error: String },
    /// The offline queue crossed its soft capacity.
    QueueSaturated { pending: usize },
    /// A reconciliation pass finished.
    PassCompleted(SyncSummary),
}

const DEFAULT_CAPACITY: usize = 64;

/// Fan-out bus for [`SyncEvent`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<SyncEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: SyncEvent) {
        if self.sender.send(event).is_err() {
            debug!("sync event dropped; no subscribers");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();

        bus.publish(SyncEvent::CircuitOpened);
        let event = rx.recv().await.unwrap();
        assert!(matches!(event, SyncEvent::CircuitOpened));
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_silent() {
        let bus = EventBus::new(8);
        bus.publish(SyncEvent::QueueSaturated { pending: 1_000 });
    }

    #[tokio::test]
    async fn every_subscriber_gets_its_own_copy() {
        let bus = EventBus::new(8);
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        bus.publish(SyncEvent::ConflictDetected {
            entity_id: "prod-1".into(),
            mutation_id: None,
        });

        assert!(matches!(a.recv().await.unwrap(), SyncEvent::ConflictDetected { .. }));
        assert!(matches!(b.recv().await.unwrap(), SyncEvent::ConflictDetected { .. }));
    }
}
