use async_trait::async_trait;
use pipeline_core::{Ambiance, TaskRequest};
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::error::{OrchestratorError, Result};

/// Hands task requests to out-of-process workers. Workers report back through
/// `notify(task_id, ResponseData::Task | ResponseData::Failure)`.
#[async_trait]
pub trait TaskDispatcher: Send + Sync {
    /// Returns the task id the result will be notified under.
    async fn dispatch(&self, ambiance: &Ambiance, request: TaskRequest) -> Result<String>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct DispatchedTask {
    pub task_id: String,
    pub ambiance: Ambiance,
    pub request: TaskRequest,
}

/// Dispatcher that pushes requests onto a channel a worker loop drains.
#[derive(Clone)]
pub struct ChannelTaskDispatcher {
    sender: mpsc::UnboundedSender<DispatchedTask>,
}

impl ChannelTaskDispatcher {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<DispatchedTask>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl TaskDispatcher for ChannelTaskDispatcher {
    async fn dispatch(&self, ambiance: &Ambiance, request: TaskRequest) -> Result<String> {
        let task_id = Uuid::new_v4().to_string();
        debug!(
            task_id = %task_id,
            task_type = %request.task_type,
            plan_execution_id = %ambiance.plan_execution_id,
            "Dispatching task"
        );
        self.sender
            .send(DispatchedTask {
                task_id: task_id.clone(),
                ambiance: ambiance.clone(),
                request,
            })
            .map_err(|_| OrchestratorError::TaskDispatch("task worker channel closed".to_string()))?;
        Ok(task_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dispatch_reaches_worker() {
        let (dispatcher, mut receiver) = ChannelTaskDispatcher::new();
        let task_id = dispatcher
            .dispatch(
                &Ambiance::new("plan"),
                TaskRequest::new("shell", serde_json::json!({ "cmd": "true" })),
            )
            .await
            .unwrap();

        let task = receiver.recv().await.unwrap();
        assert_eq!(task.task_id, task_id);
        assert_eq!(task.request.task_type, "shell");
        assert_eq!(task.ambiance.plan_execution_id, "plan");
    }

    #[tokio::test]
    async fn test_dispatch_without_worker_fails() {
        let (dispatcher, receiver) = ChannelTaskDispatcher::new();
        drop(receiver);
        let result = dispatcher
            .dispatch(&Ambiance::new("plan"), TaskRequest::new("shell", serde_json::Value::Null))
            .await;
        assert!(matches!(result, Err(OrchestratorError::TaskDispatch(_))));
    }
}
