//! Lifecycle event bus built on tokio broadcast channels

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::types::{Event, EventEnvelope};

const DEFAULT_CAPACITY: usize = 1000;

/// Broadcasts engine lifecycle events with increasing sequence numbers.
///
/// Observers that subscribe late miss earlier events; the bus keeps no history.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EventEnvelope>,
    sequence: Arc<AtomicU64>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            sequence: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Publish an event, returning how many subscribers received it.
    pub fn emit(&self, event: Event) -> usize {
        let mut envelope = EventEnvelope::new(event);
        envelope.sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        self.sender.send(envelope).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Sequence number of the last published event.
    pub fn current_sequence(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .field("sequence", &self.current_sequence())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipeline_core::Status;

    fn finished(plan: &str) -> Event {
        Event::PlanExecutionFinished {
            plan_execution_id: plan.to_string(),
            status: Status::Succeeded,
        }
    }

    #[tokio::test]
    async fn test_emit_subscribe() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        let sent = bus.emit(finished("p-1"));
        assert_eq!(sent, 1);

        let received = rx.recv().await.unwrap();
        assert_eq!(received.sequence, 1);
        assert_eq!(received.event.plan_execution_id(), Some("p-1"));
    }

    #[tokio::test]
    async fn test_multiple_subscribers_see_same_envelope() {
        let bus = EventBus::new();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        assert_eq!(bus.emit(finished("p-1")), 2);

        let received1 = rx1.recv().await.unwrap();
        let received2 = rx2.recv().await.unwrap();
        assert_eq!(received1.id, received2.id);
    }

    #[test]
    fn test_no_subscribers() {
        let bus = EventBus::new();
        assert_eq!(bus.emit(finished("p-1")), 0);
        assert_eq!(bus.current_sequence(), 1);
    }

    #[test]
    fn test_clone_shares_sequence() {
        let bus1 = EventBus::new();
        let bus2 = bus1.clone();

        bus1.emit(finished("a"));
        bus2.emit(finished("b"));
        assert_eq!(bus1.current_sequence(), 2);
        assert_eq!(bus2.current_sequence(), 2);

        let _rx = bus2.subscribe();
        assert_eq!(bus1.subscriber_count(), 1);
    }
}
