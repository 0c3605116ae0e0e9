//! Node execution queue.
//!
//! Events cross the queue as serialized messages so that whatever consumes
//! them never depends on in-process state of the producer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::QueueError;
use crate::types::{NodeExecutionEvent, NodeExecutionEventType};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedMessage {
    pub id: Uuid,
    pub event_type: String,
    pub body: serde_json::Value,
    pub enqueued_at: DateTime<Utc>,
}

impl QueuedMessage {
    pub fn encode(event: &NodeExecutionEvent) -> Result<Self, QueueError> {
        let body = match event {
            NodeExecutionEvent::Start(e) => serde_json::to_value(e)?,
            NodeExecutionEvent::Facilitate(e) => serde_json::to_value(e)?,
            NodeExecutionEvent::Resume(e) => serde_json::to_value(e)?,
        };
        Ok(Self {
            id: Uuid::new_v4(),
            event_type: event.event_type().as_str().to_string(),
            body,
            enqueued_at: Utc::now(),
        })
    }

    pub fn decode(&self) -> Result<NodeExecutionEvent, QueueError> {
        let event_type = NodeExecutionEventType::parse(&self.event_type)
            .ok_or_else(|| QueueError::UnsupportedEventType(self.event_type.clone()))?;
        let body = self.body.clone();
        let event = match event_type {
            NodeExecutionEventType::Start => NodeExecutionEvent::Start(serde_json::from_value(body)?),
            NodeExecutionEventType::Facilitate => {
                NodeExecutionEvent::Facilitate(serde_json::from_value(body)?)
            }
            NodeExecutionEventType::Resume => {
                NodeExecutionEvent::Resume(serde_json::from_value(body)?)
            }
        };
        Ok(event)
    }
}

/// Create a connected producer/consumer pair.
pub fn channel() -> (QueueProducer, QueueConsumer) {
    let (sender, receiver) = mpsc::unbounded_channel();
    let published = Arc::new(AtomicU64::new(0));
    (
        QueueProducer {
            sender,
            published: Arc::clone(&published),
        },
        QueueConsumer {
            receiver,
            published,
        },
    )
}

#[derive(Clone)]
pub struct QueueProducer {
    sender: mpsc::UnboundedSender<QueuedMessage>,
    published: Arc<AtomicU64>,
}

impl QueueProducer {
    pub fn publish(&self, event: &NodeExecutionEvent) -> Result<Uuid, QueueError> {
        let message = QueuedMessage::encode(event)?;
        self.publish_message(message)
    }

    pub fn publish_message(&self, message: QueuedMessage) -> Result<Uuid, QueueError> {
        let id = message.id;
        self.sender.send(message).map_err(|_| QueueError::Closed)?;
        self.published.fetch_add(1, Ordering::Relaxed);
        Ok(id)
    }

    pub fn published_count(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for QueueProducer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueProducer")
            .field("published", &self.published_count())
            .field("closed", &self.sender.is_closed())
            .finish()
    }
}

/// Single consumer side of the queue.
pub struct QueueConsumer {
    receiver: mpsc::UnboundedReceiver<QueuedMessage>,
    published: Arc<AtomicU64>,
}

impl QueueConsumer {
    /// Wait for the next message; `None` once every producer is dropped.
    pub async fn recv(&mut self) -> Option<QueuedMessage> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<QueuedMessage> {
        self.receiver.try_recv().ok()
    }

    pub fn published_count(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FacilitateEvent;
    use pipeline_core::Ambiance;

    fn facilitate_event() -> NodeExecutionEvent {
        NodeExecutionEvent::Facilitate(FacilitateEvent {
            node_execution_id: "n-1".to_string(),
            ambiance: Ambiance::new("plan"),
            notify_id: "notify-1".to_string(),
        })
    }

    #[tokio::test]
    async fn test_publish_and_receive() {
        let (producer, mut consumer) = channel();
        let event = facilitate_event();

        producer.publish(&event).unwrap();
        assert_eq!(consumer.published_count(), 1);

        let message = consumer.recv().await.unwrap();
        assert_eq!(message.event_type, "FACILITATE");
        assert_eq!(message.decode().unwrap(), event);
    }

    #[test]
    fn test_unknown_event_type_is_rejected() {
        let message = QueuedMessage {
            id: Uuid::new_v4(),
            event_type: "ADVISE".to_string(),
            body: serde_json::json!({}),
            enqueued_at: Utc::now(),
        };
        assert!(matches!(
            message.decode(),
            Err(QueueError::UnsupportedEventType(t)) if t == "ADVISE"
        ));
    }

    #[test]
    fn test_malformed_body_is_a_serialization_error() {
        let message = QueuedMessage {
            id: Uuid::new_v4(),
            event_type: "START".to_string(),
            body: serde_json::json!({ "unexpected": true }),
            enqueued_at: Utc::now(),
        };
        assert!(matches!(message.decode(), Err(QueueError::Serialization(_))));
    }

    #[tokio::test]
    async fn test_publish_after_consumer_dropped() {
        let (producer, consumer) = channel();
        drop(consumer);
        assert!(matches!(
            producer.publish(&facilitate_event()),
            Err(QueueError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_recv_none_when_producers_dropped() {
        let (producer, mut consumer) = channel();
        drop(producer);
        assert!(consumer.recv().await.is_none());
    }
}
