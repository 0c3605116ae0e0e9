//! Single consumer loop over the node execution queue.

use events::{
    ChainPassThrough, FacilitateEvent, NodeExecutionEvent, QueueConsumer, QueueError,
    QueuedMessage, ResumeEvent, StartEvent,
};
use pipeline_core::{
    Ambiance, ChainDetails, Continuation, ExecutionMode, FailureInfo, FailureResponseData,
    FacilitatorResponse, NodeExecution, PlanNode, RefObject, ResponseData, ResponseMap,
    StepResponse,
};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::error::{OrchestratorError, Result};
use crate::facilitators::facilitate_in_order;
use crate::processors::{ResumeInvocation, StartInvocation};
use crate::services::{EngineContext, NodeExecutionService};
use crate::steps::{Executable, StepInputPackage};

/// Failure message delivered when no facilitator answers for a node.
pub const FACILITATOR_RESPONSE_NULL: &str = "FacilitatorResponse is null";

/// A chain ends when the step said so or, for child chains, when any child
/// broke or was aborted.
pub fn calculate_is_end(mode: ExecutionMode, chain_end: bool, responses: &ResponseMap) -> bool {
    chain_end
        || (mode == ExecutionMode::ChildChain
            && responses
                .values()
                .filter_map(ResponseData::step_status)
                .any(|status| status.is_broke_or_aborted()))
}

/// Rebuild the typed chain state from what the node stored when it suspended.
pub fn chain_details(
    mode: ExecutionMode,
    raw: ChainPassThrough,
    responses: &ResponseMap,
) -> Result<ChainDetails> {
    let should_end = calculate_is_end(mode, raw.chain_end, responses);
    let continuation = match mode {
        ExecutionMode::ChildChain => Continuation::ChildChain(raw.pass_through),
        ExecutionMode::TaskChain if raw.pass_through.is_empty() => {
            Continuation::TaskChain(serde_json::Value::Null)
        }
        ExecutionMode::TaskChain => {
            Continuation::TaskChain(serde_json::from_slice(&raw.pass_through)?)
        }
        other => return Err(OrchestratorError::ChainStateMismatch(other)),
    };
    Ok(ChainDetails::new(should_end, continuation))
}

pub struct NodeExecutionEventListener {
    ctx: Arc<EngineContext>,
}

impl NodeExecutionEventListener {
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        Self { ctx }
    }

    /// Drain the queue until shutdown is signalled or every producer is gone.
    /// Returns an error only for messages of an unknown event type.
    pub async fn run(
        self,
        mut consumer: QueueConsumer,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        info!("Node execution listener started");
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                message = consumer.recv() => {
                    let Some(message) = message else {
                        debug!("Node execution queue closed");
                        break;
                    };
                    self.handle_message(message).await?;
                }
            }
        }
        info!("Node execution listener stopped");
        Ok(())
    }

    pub async fn handle_message(&self, message: QueuedMessage) -> Result<()> {
        let event = match message.decode() {
            Ok(event) => event,
            Err(QueueError::UnsupportedEventType(event_type)) => {
                error!(message_id = %message.id, event_type = %event_type, "Unsupported node execution event");
                return Err(OrchestratorError::UnsupportedEventType(event_type));
            }
            Err(e) => {
                error!(message_id = %message.id, error = %e, "Dropping malformed node execution event");
                return Ok(());
            }
        };

        let event_type = event.event_type();
        let node_execution_id = event.node_execution_id().to_string();
        let ambiance = event.ambiance().clone();
        debug!(
            event_type = %event_type.as_str(),
            node_execution_id = %node_execution_id,
            "Handling node execution event"
        );

        let result = match event {
            NodeExecutionEvent::Facilitate(event) => self.on_facilitate(event).await,
            NodeExecutionEvent::Start(event) => self.on_start(event).await,
            NodeExecutionEvent::Resume(event) => self.on_resume(event).await,
        };
        if let Err(e) = result {
            error!(
                plan_execution_id = %ambiance.plan_execution_id,
                account_id = %ambiance.account_id(),
                node_execution_id = %node_execution_id,
                event_type = %event_type.as_str(),
                error = %e,
                "Node execution event failed"
            );
        }
        Ok(())
    }

    async fn on_facilitate(&self, event: FacilitateEvent) -> Result<()> {
        let node = self.ctx.node_executions.get(&event.node_execution_id).await?;
        if node.is_final() {
            debug!(node_execution_id = %node.id, status = %node.status, "Skipping facilitation of finished node");
            return Ok(());
        }

        let data = match self.facilitate(&node).await {
            Ok(Some(response)) => ResponseData::Facilitation(response),
            Ok(None) => {
                warn!(node_execution_id = %event.node_execution_id, "No facilitator answered");
                ResponseData::failure(FACILITATOR_RESPONSE_NULL)
            }
            Err(e) => {
                warn!(
                    plan_execution_id = %event.ambiance.plan_execution_id,
                    account_id = %event.ambiance.account_id(),
                    node_execution_id = %event.node_execution_id,
                    error = %e,
                    "Facilitation failed"
                );
                ResponseData::Failure(FailureResponseData::from(FailureInfo::from_error(&e)))
            }
        };
        NodeExecutionService::notify(&self.ctx, &event.notify_id, data).await
    }

    async fn facilitate(&self, node: &NodeExecution) -> Result<Option<FacilitatorResponse>> {
        let plan_node = self.plan_node(node).await?;
        let inputs = self
            .resolve_inputs(&node.ambiance, &plan_node.refs_to_resolve)
            .await?;
        facilitate_in_order(
            &self.ctx.registries,
            &plan_node.facilitator_obtainments,
            &node.ambiance,
            &plan_node.step_parameters,
            &inputs,
        )
        .await
    }

    async fn on_start(&self, event: StartEvent) -> Result<()> {
        let node = self.ctx.node_executions.get(&event.node_execution_id).await?;
        if node.is_final() {
            debug!(node_execution_id = %node.id, status = %node.status, "Skipping start of finished node");
            return Ok(());
        }
        let node_execution_id = node.id.clone();
        if let Err(e) = self.start(node, event).await {
            self.conclude_errored(&node_execution_id, e).await?;
        }
        Ok(())
    }

    async fn start(&self, mut node: NodeExecution, event: StartEvent) -> Result<()> {
        let plan_node = self.plan_node(&node).await?;
        let step = self.step(&plan_node)?;
        let inputs = self
            .resolve_inputs(&node.ambiance, &plan_node.refs_to_resolve)
            .await?;

        node.resolved_step_parameters = plan_node.step_parameters.clone();
        self.ctx.node_executions.update(&node).await?;

        let step_ctx = self.ctx.step_context(&node, inputs);
        let processor = self.ctx.processors.obtain(event.mode)?;
        debug!(node_execution_id = %node.id, mode = %event.mode, "Starting node");
        processor
            .handle_start(
                &self.ctx,
                StartInvocation {
                    node,
                    step,
                    step_ctx,
                    facilitator_response: event.facilitator_response,
                },
            )
            .await
    }

    async fn on_resume(&self, event: ResumeEvent) -> Result<()> {
        let node = self.ctx.node_executions.get(&event.node_execution_id).await?;
        if node.is_final() {
            debug!(node_execution_id = %node.id, status = %node.status, "Skipping resume of finished node");
            return Ok(());
        }

        if event.async_error {
            let failure = event
                .response_data
                .values()
                .find_map(|data| match data {
                    ResponseData::Failure(failure) => Some(failure.clone().into_failure_info()),
                    _ => None,
                })
                .unwrap_or_else(|| FailureInfo::new("Asynchronous execution failed"));
            return NodeExecutionService::handle_step_response(
                &self.ctx,
                node,
                StepResponse::errored(failure),
            )
            .await;
        }

        let node_execution_id = node.id.clone();
        if let Err(e) = self.resume(node, event).await {
            self.conclude_errored(&node_execution_id, e).await?;
        }
        Ok(())
    }

    async fn resume(&self, node: NodeExecution, event: ResumeEvent) -> Result<()> {
        let chain = event
            .chain
            .map(|raw| chain_details(event.mode, raw, &event.response_data))
            .transpose()?;

        let plan_node = self.plan_node(&node).await?;
        let step = self.step(&plan_node)?;
        let inputs = self
            .resolve_inputs(&node.ambiance, &plan_node.refs_to_resolve)
            .await?;
        let step_ctx = self.ctx.step_context(&node, inputs);
        let processor = self.ctx.processors.obtain(event.mode)?;
        debug!(
            node_execution_id = %node.id,
            mode = %event.mode,
            responses = event.response_data.len(),
            "Resuming node"
        );
        processor
            .handle_resume(
                &self.ctx,
                ResumeInvocation {
                    node,
                    step,
                    step_ctx,
                    responses: event.response_data,
                    chain,
                },
            )
            .await
    }

    /// A failed start or resume always ends the node ERRORED.
    async fn conclude_errored(&self, node_execution_id: &str, error: OrchestratorError) -> Result<()> {
        let node = self.ctx.node_executions.get(node_execution_id).await?;
        error!(
            plan_execution_id = %node.plan_execution_id,
            account_id = %node.ambiance.account_id(),
            node_execution_id = %node.id,
            error = %error,
            "Node execution failed"
        );
        let response = StepResponse::errored(FailureInfo::from_error(&error));
        NodeExecutionService::handle_step_response(&self.ctx, node, response).await
    }

    async fn plan_node(&self, node: &NodeExecution) -> Result<PlanNode> {
        let execution = self.ctx.plan(&node.plan_execution_id).await?;
        Ok(execution.plan.node(&node.node_id)?.clone())
    }

    fn step(&self, plan_node: &PlanNode) -> Result<Executable> {
        Ok(self.ctx.registries.steps.obtain(&plan_node.step_type)?.clone())
    }

    async fn resolve_inputs(
        &self,
        ambiance: &Ambiance,
        refs: &[RefObject],
    ) -> Result<StepInputPackage> {
        let mut inputs = StepInputPackage::default();
        for ref_object in refs {
            let resolver = self
                .ctx
                .registries
                .resolvers
                .obtain(ref_object.ref_type.as_str())?;
            let value = resolver.resolve(ambiance, ref_object).await?;
            inputs = inputs.with_input(ref_object.key.clone(), value);
        }
        Ok(inputs)
    }
}
