use db::{
    ExecutionOutputRepository, NodeExecutionRepository, PlanExecutionRepository, SqlitePool,
    WaitRepository,
};
use events::{Event, EventBus, NodeExecutionEvent, QueueProducer};
use pipeline_core::{NodeExecution, PlanExecution, Status};
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::error::Result;
use crate::processors::ProcessorFactory;
use crate::registry::Registries;
use crate::services::{
    OutcomeService, SweepingOutputService, TaskDispatcher, WaitNotifyEngine,
};
use crate::steps::{StepContext, StepInputPackage};

/// Shared state every engine component works against.
pub struct EngineContext {
    pub config: EngineConfig,
    pub registries: Arc<Registries>,
    pub processors: ProcessorFactory,
    pub plan_executions: PlanExecutionRepository,
    pub node_executions: NodeExecutionRepository,
    pub sweeping_outputs: SweepingOutputService,
    pub outcomes: OutcomeService,
    pub wait_notify: WaitNotifyEngine,
    pub queue: QueueProducer,
    pub task_dispatcher: Option<Arc<dyn TaskDispatcher>>,
    pub event_bus: Option<EventBus>,
}

impl EngineContext {
    pub fn new(
        config: EngineConfig,
        pool: SqlitePool,
        registries: Arc<Registries>,
        queue: QueueProducer,
    ) -> Self {
        let outputs = ExecutionOutputRepository::new(pool.clone());
        Self {
            config,
            registries,
            processors: ProcessorFactory::default(),
            plan_executions: PlanExecutionRepository::new(pool.clone()),
            node_executions: NodeExecutionRepository::new(pool.clone()),
            sweeping_outputs: SweepingOutputService::new(outputs.clone()),
            outcomes: OutcomeService::new(outputs),
            wait_notify: WaitNotifyEngine::new(WaitRepository::new(pool)),
            queue,
            task_dispatcher: None,
            event_bus: None,
        }
    }

    pub fn with_task_dispatcher(mut self, dispatcher: Arc<dyn TaskDispatcher>) -> Self {
        self.task_dispatcher = Some(dispatcher);
        self
    }

    pub fn with_event_bus(mut self, bus: EventBus) -> Self {
        self.event_bus = Some(bus);
        self
    }

    pub fn emit_event(&self, event: Event) {
        if let Some(ref bus) = self.event_bus {
            bus.emit(event);
        }
    }

    pub fn publish(&self, event: NodeExecutionEvent) -> Result<()> {
        let message_id = self.queue.publish(&event)?;
        debug!(
            message_id = %message_id,
            event_type = %event.event_type().as_str(),
            node_execution_id = %event.node_execution_id(),
            "Node execution event queued"
        );
        Ok(())
    }

    pub async fn plan(&self, plan_execution_id: &str) -> Result<PlanExecution> {
        Ok(self.plan_executions.get(plan_execution_id).await?)
    }

    /// Persist a status change and tell observers about it.
    pub async fn transition(&self, node: &mut NodeExecution, to: Status) -> Result<()> {
        let from = node.status;
        info!(
            plan_execution_id = %node.plan_execution_id,
            node_execution_id = %node.id,
            identifier = %node.identifier,
            from = %from,
            to = %to,
            "Node state transition"
        );

        node.set_status(to);
        self.node_executions.update(node).await?;

        self.emit_event(Event::NodeExecutionStatusChanged {
            plan_execution_id: node.plan_execution_id.clone(),
            node_execution_id: node.id.clone(),
            identifier: node.identifier.clone(),
            from_status: from,
            to_status: to,
        });
        Ok(())
    }

    pub fn step_context(&self, node: &NodeExecution, inputs: StepInputPackage) -> StepContext {
        StepContext {
            ambiance: node.ambiance.clone(),
            node_execution_id: node.id.clone(),
            parameters: node.resolved_step_parameters.clone(),
            inputs,
            sweeping_outputs: self.sweeping_outputs.clone(),
        }
    }
}

impl std::fmt::Debug for EngineContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineContext")
            .field("config", &self.config)
            .field("registries", &self.registries)
            .field("queue", &self.queue)
            .field("has_task_dispatcher", &self.task_dispatcher.is_some())
            .finish()
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::test_context;
    use super::*;
    use pipeline_core::{Ambiance, Level};

    #[tokio::test]
    async fn test_transition_persists_and_emits() {
        let (ctx, _consumer) = test_context().await;
        let mut rx = ctx.event_bus.as_ref().unwrap().subscribe();

        let ambiance = Ambiance::new("plan").with_level(Level::new("rt", "a", "NOOP", "a"));
        let mut node = NodeExecution::new("rt", ambiance, "a", "a");
        ctx.node_executions.create(&node).await.unwrap();

        ctx.transition(&mut node, Status::Running).await.unwrap();

        let stored = ctx.node_executions.get("rt").await.unwrap();
        assert_eq!(stored.status, Status::Running);

        let envelope = rx.recv().await.unwrap();
        match envelope.event {
            Event::NodeExecutionStatusChanged {
                from_status,
                to_status,
                ..
            } => {
                assert_eq!(from_status, Status::Queued);
                assert_eq!(to_status, Status::Running);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
}
