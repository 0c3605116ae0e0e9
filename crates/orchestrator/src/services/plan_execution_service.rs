use events::Event;
use pipeline_core::{Ambiance, Plan, PlanExecution, Status, ACCOUNT_ID};
use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::services::{EngineContext, NodeExecutionService, NodeTrigger};

pub struct PlanExecutionService;

impl PlanExecutionService {
    /// Validate and persist a new plan execution, then trigger its start node.
    pub async fn start_plan(
        ctx: &EngineContext,
        plan: Plan,
        setup_abstractions: HashMap<String, String>,
    ) -> Result<PlanExecution> {
        plan.validate()?;

        let ambiance = Ambiance::for_new_plan(setup_abstractions.clone());
        let execution = PlanExecution::new(
            ambiance.plan_execution_id.clone(),
            plan,
            setup_abstractions,
        );
        ctx.plan_executions.create(&execution).await?;

        info!(
            plan_execution_id = %execution.id,
            account_id = %ambiance.account_id(),
            nodes = execution.plan.nodes.len(),
            "Plan execution started"
        );
        ctx.emit_event(Event::PlanExecutionStarted {
            plan_execution_id: execution.id.clone(),
        });

        let start = execution.plan.start_node()?;
        NodeExecutionService::trigger_node(ctx, start, NodeTrigger::root(ambiance)).await?;
        Ok(execution)
    }

    /// Store the final status once. Returns false when the plan had already finished.
    pub async fn finish_plan(
        ctx: &EngineContext,
        plan_execution_id: &str,
        status: Status,
    ) -> Result<bool> {
        let execution = ctx.plan(plan_execution_id).await?;
        if execution.status.is_final() {
            debug!(
                plan_execution_id = %plan_execution_id,
                status = %execution.status,
                "Plan execution already finished"
            );
            return Ok(false);
        }

        if let Err(e) = ctx
            .wait_notify
            .purge(plan_execution_id, ctx.config.held_response_ttl())
            .await
        {
            warn!(plan_execution_id = %plan_execution_id, error = %e, "Failed to purge waits");
        }
        ctx.plan_executions
            .update_status(plan_execution_id, status)
            .await?;
        let account_id = execution
            .setup_abstractions
            .get(ACCOUNT_ID)
            .map(String::as_str)
            .unwrap_or_default();
        info!(
            plan_execution_id = %plan_execution_id,
            account_id = %account_id,
            status = %status,
            "Plan execution finished"
        );
        ctx.emit_event(Event::PlanExecutionFinished {
            plan_execution_id: plan_execution_id.to_string(),
            status,
        });
        Ok(true)
    }

    /// Abort whatever is still running and finish the plan with `status`.
    pub async fn end_plan(
        ctx: &EngineContext,
        plan_execution_id: &str,
        status: Status,
    ) -> Result<()> {
        let nodes = ctx.node_executions.find_by_plan(plan_execution_id).await?;
        for mut node in nodes.into_iter().filter(|node| !node.is_final()) {
            ctx.transition(&mut node, Status::Aborted).await?;
        }

        // Positive statuses (skipped, ignored) finish the plan as succeeded.
        let status = Status::aggregate([&status]);
        Self::finish_plan(ctx, plan_execution_id, status).await?;
        Ok(())
    }

    pub async fn abort_plan(ctx: &EngineContext, plan_execution_id: &str) -> Result<()> {
        info!(plan_execution_id = %plan_execution_id, "Aborting plan execution");
        Self::end_plan(ctx, plan_execution_id, Status::Aborted).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OrchestratorError;
    use crate::services::engine_context::test_support::test_context;
    use events::NodeExecutionEvent;
    use pipeline_core::{CoreError, FacilitatorObtainment, PlanNode};

    fn single_node_plan() -> Plan {
        Plan::new("a").with_node(
            PlanNode::new("a", "a", "NOOP").with_facilitator(FacilitatorObtainment::new("SYNC")),
        )
    }

    #[tokio::test]
    async fn test_start_plan_triggers_start_node() {
        let (ctx, mut consumer) = test_context().await;
        let abstractions = HashMap::from([("accountId".to_string(), "acc".to_string())]);

        let execution = PlanExecutionService::start_plan(&ctx, single_node_plan(), abstractions)
            .await
            .unwrap();

        let stored = ctx.plan(&execution.id).await.unwrap();
        assert_eq!(stored.status, Status::Running);

        let nodes = ctx.node_executions.find_by_plan(&execution.id).await.unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].ambiance.depth(), 1);
        assert_eq!(nodes[0].ambiance.account_id(), "acc");

        let message = consumer.try_recv().unwrap();
        assert!(matches!(message.decode().unwrap(), NodeExecutionEvent::Facilitate(_)));
    }

    #[tokio::test]
    async fn test_start_plan_rejects_invalid_plan() {
        let (ctx, _consumer) = test_context().await;
        let plan = Plan::new("missing");
        let result = PlanExecutionService::start_plan(&ctx, plan, HashMap::new()).await;
        assert!(matches!(
            result,
            Err(OrchestratorError::Plan(CoreError::MissingStartNode(_)))
        ));
    }

    #[tokio::test]
    async fn test_finish_plan_is_idempotent() {
        let (ctx, _consumer) = test_context().await;
        let mut rx = ctx.event_bus.as_ref().unwrap().subscribe();
        let execution =
            PlanExecutionService::start_plan(&ctx, single_node_plan(), HashMap::new())
                .await
                .unwrap();

        assert!(PlanExecutionService::finish_plan(&ctx, &execution.id, Status::Succeeded)
            .await
            .unwrap());
        assert!(!PlanExecutionService::finish_plan(&ctx, &execution.id, Status::Failed)
            .await
            .unwrap());
        assert_eq!(ctx.plan(&execution.id).await.unwrap().status, Status::Succeeded);

        let mut finished = 0;
        while let Ok(envelope) = rx.try_recv() {
            if matches!(envelope.event, Event::PlanExecutionFinished { .. }) {
                finished += 1;
            }
        }
        assert_eq!(finished, 1);
    }

    #[tokio::test]
    async fn test_abort_plan_aborts_running_nodes() {
        let (ctx, _consumer) = test_context().await;
        let execution =
            PlanExecutionService::start_plan(&ctx, single_node_plan(), HashMap::new())
                .await
                .unwrap();

        assert_eq!(ctx.wait_notify.pending_waits().await.unwrap(), 1);

        PlanExecutionService::abort_plan(&ctx, &execution.id).await.unwrap();

        let nodes = ctx.node_executions.find_by_plan(&execution.id).await.unwrap();
        assert!(nodes.iter().all(|node| node.status == Status::Aborted));
        assert_eq!(ctx.plan(&execution.id).await.unwrap().status, Status::Aborted);
        assert!(ctx.wait_notify.stats().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ignored_failure_finishes_as_succeeded() {
        let (ctx, _consumer) = test_context().await;
        let execution =
            PlanExecutionService::start_plan(&ctx, single_node_plan(), HashMap::new())
                .await
                .unwrap();
        let mut nodes = ctx.node_executions.find_by_plan(&execution.id).await.unwrap();
        ctx.transition(&mut nodes[0], Status::IgnoreFailed).await.unwrap();

        PlanExecutionService::end_plan(&ctx, &execution.id, Status::IgnoreFailed)
            .await
            .unwrap();
        assert_eq!(ctx.plan(&execution.id).await.unwrap().status, Status::Succeeded);
    }
}
