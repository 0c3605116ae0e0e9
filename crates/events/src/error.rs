use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Node execution queue is closed")]
    Closed,

    #[error("Unsupported node execution event type: {0}")]
    UnsupportedEventType(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
