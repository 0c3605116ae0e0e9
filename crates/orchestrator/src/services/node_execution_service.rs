//! Orchestration side of a node's life: trigger, facilitation callback,
//! suspension, step responses, advice and completion.

use events::{
    ChainPassThrough, Event, FacilitateEvent, NodeExecutionEvent, ResumeEvent, StartEvent,
};
use pipeline_core::{
    AdviserResponse, Ambiance, ExecutableResponse, FailureInfo, Level, NodeExecution, Plan,
    PlanNode, ResponseData, ResponseMap, Status, StepOutcomeRef, StepResponse,
    StepResponseNotifyData, TaskRequest,
};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::advisers::{advise_in_order, AdvisingEvent};
use crate::error::{OrchestratorError, Result};
use crate::services::{CompletedWait, EngineContext, PlanExecutionService, WaitCallback};

/// Where a new node execution hangs in the tree.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeTrigger {
    /// Ambiance of the parent; the new node's level is appended to it.
    pub parent_ambiance: Ambiance,
    pub parent_id: Option<String>,
    pub notify_id: Option<String>,
    pub previous_id: Option<String>,
    pub retry_ids: Vec<String>,
}

impl NodeTrigger {
    pub fn root(ambiance: Ambiance) -> Self {
        Self {
            parent_ambiance: ambiance,
            parent_id: None,
            notify_id: None,
            previous_id: None,
            retry_ids: Vec::new(),
        }
    }

    pub fn child(parent: &NodeExecution, notify_id: impl Into<String>) -> Self {
        Self {
            parent_ambiance: parent.ambiance.clone_for_child(),
            parent_id: Some(parent.id.clone()),
            notify_id: Some(notify_id.into()),
            previous_id: None,
            retry_ids: Vec::new(),
        }
    }

    /// The sibling that continues `node`'s sequence at the same depth.
    pub fn next_of(node: &NodeExecution) -> Self {
        Self {
            parent_ambiance: node.ambiance.clone_for_finish(),
            parent_id: node.parent_id.clone(),
            notify_id: node.notify_id.clone(),
            previous_id: Some(node.id.clone()),
            retry_ids: Vec::new(),
        }
    }

    /// A fresh attempt that takes `node`'s place in its sequence.
    pub fn retry_of(node: &NodeExecution) -> Self {
        let mut retry_ids = node.retry_ids.clone();
        retry_ids.push(node.id.clone());
        Self {
            parent_ambiance: node.ambiance.clone_for_finish(),
            parent_id: node.parent_id.clone(),
            notify_id: node.notify_id.clone(),
            previous_id: node.previous_id.clone(),
            retry_ids,
        }
    }
}

pub struct NodeExecutionService;

impl NodeExecutionService {
    /// Persist a QUEUED execution of `plan_node` and ask for its facilitation.
    pub async fn trigger_node(
        ctx: &EngineContext,
        plan_node: &PlanNode,
        trigger: NodeTrigger,
    ) -> Result<NodeExecution> {
        Self::schedule_node(ctx, plan_node, trigger, Duration::ZERO).await
    }

    /// Like [`Self::trigger_node`], but the facilitation request is published
    /// after `delay` from a timer task. The node and its facilitation wait are
    /// stored before this returns, so nothing is held on the caller.
    pub async fn schedule_node(
        ctx: &EngineContext,
        plan_node: &PlanNode,
        trigger: NodeTrigger,
        delay: Duration,
    ) -> Result<NodeExecution> {
        let runtime_id = NodeExecution::new_runtime_id();
        let mut level = Level::new(
            runtime_id.clone(),
            plan_node.uuid.clone(),
            plan_node.step_type.clone(),
            plan_node.identifier.clone(),
        );
        if let Some(group) = &plan_node.group {
            level = level.with_group(group.clone());
        }

        let ambiance = trigger.parent_ambiance.with_level(level);
        let mut node = NodeExecution::new(
            runtime_id,
            ambiance,
            plan_node.uuid.clone(),
            plan_node.identifier.clone(),
        );
        node.parent_id = trigger.parent_id;
        node.notify_id = trigger.notify_id;
        node.previous_id = trigger.previous_id;
        node.retry_ids = trigger.retry_ids;
        ctx.node_executions.create(&node).await?;

        info!(
            plan_execution_id = %node.plan_execution_id,
            node_execution_id = %node.id,
            identifier = %node.identifier,
            depth = node.ambiance.depth(),
            "Node triggered"
        );

        let facilitation_id = Uuid::new_v4().to_string();
        ctx.wait_notify
            .wait_for_all(
                &node.plan_execution_id,
                vec![facilitation_id.clone()],
                WaitCallback::Facilitated {
                    node_execution_id: node.id.clone(),
                },
            )
            .await?;
        let event = NodeExecutionEvent::Facilitate(FacilitateEvent {
            node_execution_id: node.id.clone(),
            ambiance: node.ambiance.clone(),
            notify_id: facilitation_id,
        });

        if delay.is_zero() {
            ctx.publish(event)?;
            return Ok(node);
        }

        info!(
            node_execution_id = %node.id,
            delay_ms = delay.as_millis() as u64,
            "Facilitation scheduled"
        );
        let queue = ctx.queue.clone();
        let node_execution_id = node.id.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = queue.publish(&event) {
                warn!(
                    node_execution_id = %node_execution_id,
                    error = %e,
                    "Dropping scheduled facilitation"
                );
            }
        });
        Ok(node)
    }

    /// Deliver the response for one correlation id and run whatever the wait
    /// it completes asked for.
    pub fn notify<'a>(
        ctx: &'a EngineContext,
        correlation_id: &'a str,
        data: ResponseData,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            match ctx.wait_notify.done_with(correlation_id, data).await? {
                Some(completed) => Self::on_wait_completed(ctx, completed).await,
                None => Ok(()),
            }
        })
    }

    async fn on_wait_completed(ctx: &EngineContext, completed: CompletedWait) -> Result<()> {
        match completed.callback {
            WaitCallback::Facilitated { node_execution_id } => {
                Self::on_facilitated(ctx, &node_execution_id, completed.responses).await
            }
            WaitCallback::Resume { node_execution_id } => {
                Self::queue_resume(ctx, &node_execution_id, completed.responses).await
            }
        }
    }

    async fn on_facilitated(
        ctx: &EngineContext,
        node_execution_id: &str,
        responses: ResponseMap,
    ) -> Result<()> {
        let mut node = ctx.node_executions.get(node_execution_id).await?;
        if node.is_final() {
            debug!(node_execution_id = %node.id, status = %node.status, "Facilitated node already finished");
            return Ok(());
        }

        match responses.into_values().next() {
            Some(ResponseData::Facilitation(response)) => {
                let mode = response.execution_mode;
                node.mode = Some(mode);
                ctx.transition(&mut node, Status::Running).await?;
                ctx.publish(NodeExecutionEvent::Start(StartEvent {
                    node_execution_id: node.id.clone(),
                    ambiance: node.ambiance.clone(),
                    mode,
                    facilitator_response: response,
                }))
            }
            Some(ResponseData::Failure(failure)) => {
                let response = StepResponse::errored(failure.into_failure_info());
                Self::handle_step_response(ctx, node, response).await
            }
            other => {
                let message = format!("Unexpected facilitation response: {other:?}");
                Self::handle_step_response(ctx, node, StepResponse::errored(FailureInfo::new(message)))
                    .await
            }
        }
    }

    /// Turn a completed wait into a RESUME event for the suspended node.
    pub async fn queue_resume(
        ctx: &EngineContext,
        node_execution_id: &str,
        responses: ResponseMap,
    ) -> Result<()> {
        let node = ctx.node_executions.get(node_execution_id).await?;
        if node.is_final() {
            debug!(node_execution_id = %node.id, status = %node.status, "Not resuming finished node");
            return Ok(());
        }
        let mode = node
            .mode
            .ok_or_else(|| OrchestratorError::ModeNotSet(node.id.clone()))?;

        let async_error = responses.values().any(ResponseData::is_failure);
        let chain = match node.last_executable_response() {
            Some(ExecutableResponse::ChildChain {
                pass_through,
                last_link,
                ..
            }) => Some(ChainPassThrough {
                pass_through: pass_through.clone(),
                chain_end: *last_link,
            }),
            Some(ExecutableResponse::TaskChain {
                pass_through,
                chain_end,
                ..
            }) => Some(ChainPassThrough {
                pass_through: pass_through.clone(),
                chain_end: *chain_end,
            }),
            _ => None,
        };

        ctx.publish(NodeExecutionEvent::Resume(ResumeEvent {
            node_execution_id: node.id.clone(),
            ambiance: node.ambiance.clone(),
            mode,
            response_data: responses,
            async_error,
            chain,
        }))
    }

    /// Record what the node asked for, move it to `status` and wait on
    /// `correlation_ids`. An empty id list resumes straight away.
    pub async fn suspend(
        ctx: &EngineContext,
        node: &mut NodeExecution,
        response: ExecutableResponse,
        status: Status,
        correlation_ids: Vec<String>,
    ) -> Result<()> {
        node.executable_responses.push(response);
        ctx.transition(node, status).await?;

        if correlation_ids.is_empty() {
            return Self::queue_resume(ctx, &node.id, ResponseMap::new()).await;
        }
        let callback = WaitCallback::Resume {
            node_execution_id: node.id.clone(),
        };
        if let Some(completed) = ctx
            .wait_notify
            .wait_for_all(&node.plan_execution_id, correlation_ids, callback)
            .await?
        {
            Self::on_wait_completed(ctx, completed).await?;
        }
        Ok(())
    }

    /// Park an ASYNC node until every callback id has been notified.
    pub async fn add_async_callbacks(
        ctx: &EngineContext,
        node: &mut NodeExecution,
        callback_ids: Vec<String>,
    ) -> Result<()> {
        debug!(
            node_execution_id = %node.id,
            callbacks = callback_ids.len(),
            "Waiting on async callbacks"
        );
        Self::suspend(
            ctx,
            node,
            ExecutableResponse::Async {
                callback_ids: callback_ids.clone(),
            },
            Status::AsyncWaiting,
            callback_ids,
        )
        .await
    }

    /// Register the join on the children first, then trigger each of them.
    pub async fn spawn_children(
        ctx: &EngineContext,
        parent: &NodeExecution,
        child_node_ids: &[String],
    ) -> Result<()> {
        if child_node_ids.is_empty() {
            return Self::queue_resume(ctx, &parent.id, ResponseMap::new()).await;
        }

        let plan = ctx.plan(&parent.plan_execution_id).await?;
        let children = child_node_ids
            .iter()
            .map(|id| plan.plan.node(id))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let notify_ids: Vec<String> = children
            .iter()
            .map(|_| Uuid::new_v4().to_string())
            .collect();

        ctx.wait_notify
            .wait_for_all(
                &parent.plan_execution_id,
                notify_ids.clone(),
                WaitCallback::Resume {
                    node_execution_id: parent.id.clone(),
                },
            )
            .await?;

        debug!(
            node_execution_id = %parent.id,
            children = children.len(),
            "Spawning children"
        );
        for (child, notify_id) in children.into_iter().zip(notify_ids) {
            Self::trigger_node(ctx, child, NodeTrigger::child(parent, notify_id)).await?;
        }
        Ok(())
    }

    /// Hand a task to the configured dispatcher; returns the id its result arrives under.
    pub async fn queue_task(
        ctx: &EngineContext,
        node: &NodeExecution,
        request: TaskRequest,
    ) -> Result<String> {
        let dispatcher = ctx.task_dispatcher.as_ref().ok_or_else(|| {
            OrchestratorError::TaskDispatch("no task dispatcher configured".to_string())
        })?;
        let task_id = dispatcher.dispatch(&node.ambiance, request).await?;
        debug!(node_execution_id = %node.id, task_id = %task_id, "Task queued");
        Ok(task_id)
    }

    /// Conclude a step: persist outcomes and status, ask the advisers, then
    /// apply their advice or end the node.
    pub async fn handle_step_response(
        ctx: &EngineContext,
        mut node: NodeExecution,
        response: StepResponse,
    ) -> Result<()> {
        if node.is_final() {
            warn!(
                node_execution_id = %node.id,
                status = %node.status,
                "Ignoring step response for finished node"
            );
            return Ok(());
        }

        for outcome in &response.step_outcomes {
            if let Err(e) = ctx
                .outcomes
                .consume(
                    &node.ambiance,
                    &outcome.name,
                    outcome.outcome.clone(),
                    outcome.group.as_deref(),
                )
                .await
            {
                warn!(
                    node_execution_id = %node.id,
                    outcome = %outcome.name,
                    error = %e,
                    "Failed to publish outcome"
                );
            }
        }

        let (status, failure_info) = if response.status.is_final() {
            (response.status, response.failure_info)
        } else {
            (
                Status::Errored,
                Some(FailureInfo::new(format!(
                    "Step finished with non-terminal status {}",
                    response.status
                ))),
            )
        };

        let from = node.status;
        node.failure_info = failure_info.clone();
        ctx.transition(&mut node, status).await?;

        let plan_execution_id = node.plan_execution_id.clone();
        let plan = ctx.plan(&plan_execution_id).await?.plan;
        let plan_node = plan.node(&node.node_id)?;

        let event = AdvisingEvent::new(node.ambiance.clone(), node.id.clone(), status)
            .with_from_status(from)
            .with_failure(failure_info)
            .with_retry_count(node.retry_ids.len());
        let advice = advise_in_order(&ctx.registries, &plan_node.adviser_obtainments, &event).await;

        let result = match advice {
            Some(advice) => Self::apply_advice(ctx, node, advice, &plan).await,
            None => Self::end_node(ctx, &node).await,
        };
        if let Err(e) = result {
            error!(
                plan_execution_id = %plan_execution_id,
                account_id = %event.ambiance.account_id(),
                node_execution_id = %event.node_execution_id,
                error = %e,
                "Failed to continue after node finished, ending plan"
            );
            ctx.emit_event(Event::Error {
                message: e.to_string(),
                context: Some(format!("node_execution {}", event.node_execution_id)),
            });
            PlanExecutionService::end_plan(ctx, &plan_execution_id, Status::Errored).await?;
        }
        Ok(())
    }

    async fn apply_advice(
        ctx: &EngineContext,
        mut node: NodeExecution,
        advice: AdviserResponse,
        plan: &Plan,
    ) -> Result<()> {
        node.adviser_response = Some(advice.clone());
        ctx.node_executions.update(&node).await?;
        info!(
            node_execution_id = %node.id,
            advise_type = ?advice.advise_type(),
            "Applying advice"
        );

        match &advice {
            AdviserResponse::Retry(retry) => {
                let target = if retry.retry_node_execution_id == node.id {
                    node
                } else {
                    ctx.node_executions.get(&retry.retry_node_execution_id).await?
                };
                let delay = ctx.config.retry_wait(retry.wait_interval_secs);
                let plan_node = plan.node(&target.node_id)?;
                Self::schedule_node(ctx, plan_node, NodeTrigger::retry_of(&target), delay).await?;
                Ok(())
            }
            AdviserResponse::EndPlan(end) => {
                let status = if end.is_abort {
                    Status::Aborted
                } else {
                    node.status
                };
                PlanExecutionService::end_plan(ctx, &node.plan_execution_id, status).await
            }
            AdviserResponse::NextStep(_)
            | AdviserResponse::IgnoreFailure(_)
            | AdviserResponse::MarkSuccess(_) => {
                if let Some(status) = advice.status_override() {
                    ctx.transition(&mut node, status).await?;
                }
                match advice.next_node_id() {
                    Some(next) => {
                        let plan_node = plan.node(next)?;
                        Self::trigger_node(ctx, plan_node, NodeTrigger::next_of(&node)).await?;
                        Ok(())
                    }
                    None => Self::end_node(ctx, &node).await,
                }
            }
        }
    }

    /// Status of the sequence ending at `node`: every node reached through
    /// `previous_id` counts, superseded retry attempts do not.
    async fn sequence_outcome(
        ctx: &EngineContext,
        node: &NodeExecution,
    ) -> Result<(Status, Option<FailureInfo>)> {
        let mut statuses = vec![node.status];
        let mut failure_info = node.status.is_broke().then(|| node.failure_info.clone()).flatten();

        let mut previous_id = node.previous_id.clone();
        while let Some(id) = previous_id {
            let previous = ctx.node_executions.get(&id).await?;
            if previous.status.is_broke() && failure_info.is_none() {
                failure_info = previous.failure_info.clone();
            }
            statuses.push(previous.status);
            previous_id = previous.previous_id;
        }

        let status = Status::aggregate(&statuses);
        Ok((status, failure_info.filter(|_| status.is_broke())))
    }

    /// Report the end of `node`'s sequence to whoever waits on it, or finish
    /// the plan when the sequence is the root one.
    pub async fn end_node(ctx: &EngineContext, node: &NodeExecution) -> Result<()> {
        let (status, failure_info) = Self::sequence_outcome(ctx, node).await?;

        let Some(notify_id) = &node.notify_id else {
            return PlanExecutionService::end_plan(ctx, &node.plan_execution_id, status).await;
        };

        let step_outcome_refs = ctx
            .outcomes
            .produced_by(&node.plan_execution_id, &node.id)
            .await?
            .into_iter()
            .map(|output| StepOutcomeRef {
                name: output.name,
                instance_id: output.id,
            })
            .collect();

        let data = ResponseData::StepNotify(StepResponseNotifyData {
            node_uuid: node.node_id.clone(),
            identifier: node.identifier.clone(),
            group: node
                .ambiance
                .obtain_current_level()
                .and_then(|level| level.group.clone()),
            status,
            failure_info,
            step_outcome_refs,
            adviser_response: node.adviser_response.clone(),
        });

        debug!(
            node_execution_id = %node.id,
            notify_id = %notify_id,
            status = %status,
            "Notifying parent"
        );
        Self::notify(ctx, notify_id, data).await
    }
}
