use async_trait::async_trait;
use pipeline_core::{
    ChainDetails, Continuation, ExecutableResponse, ExecutionMode, NodeExecution, ResponseMap,
    Status,
};
use std::sync::Arc;

use super::{mode_mismatch, ExecutableProcessor, ResumeInvocation, StartInvocation};
use crate::error::{OrchestratorError, Result};
use crate::services::{EngineContext, NodeExecutionService};
use crate::steps::{ChildChainExecutable, ChildChainResponse, Executable, StepContext};

/// Runs children one at a time, asking the step for the next link after each.
pub struct ChildChainProcessor;

impl ChildChainProcessor {
    async fn continue_chain(
        ctx: &EngineContext,
        mut node: NodeExecution,
        step: &Arc<dyn ChildChainExecutable>,
        step_ctx: &StepContext,
        link: ChildChainResponse,
        responses: &ResponseMap,
    ) -> Result<()> {
        let Some(child_node_id) = link.next_child_id.clone() else {
            let response = step
                .finalize_execution(step_ctx, &link.pass_through, responses)
                .await?;
            return NodeExecutionService::handle_step_response(ctx, node, response).await;
        };

        node.executable_responses.push(ExecutableResponse::ChildChain {
            next_child_id: Some(child_node_id.clone()),
            pass_through: link.pass_through,
            last_link: link.last_link,
        });
        ctx.transition(&mut node, Status::ChildrenWaiting).await?;
        NodeExecutionService::spawn_children(ctx, &node, &[child_node_id]).await
    }
}

#[async_trait]
impl ExecutableProcessor for ChildChainProcessor {
    async fn handle_start(&self, ctx: &EngineContext, invocation: StartInvocation) -> Result<()> {
        let Executable::ChildChain(step) = &invocation.step else {
            return Err(mode_mismatch(&invocation.node, ExecutionMode::ChildChain));
        };
        let link = step.obtain_first_child(&invocation.step_ctx).await?;
        Self::continue_chain(
            ctx,
            invocation.node,
            step,
            &invocation.step_ctx,
            link,
            &ResponseMap::new(),
        )
        .await
    }

    async fn handle_resume(&self, ctx: &EngineContext, invocation: ResumeInvocation) -> Result<()> {
        let Executable::ChildChain(step) = &invocation.step else {
            return Err(mode_mismatch(&invocation.node, ExecutionMode::ChildChain));
        };
        let Some(ChainDetails {
            should_end,
            continuation: Continuation::ChildChain(pass_through),
            ..
        }) = invocation.chain
        else {
            return Err(OrchestratorError::ChainStateMismatch(ExecutionMode::ChildChain));
        };

        if should_end {
            let response = step
                .finalize_execution(&invocation.step_ctx, &pass_through, &invocation.responses)
                .await?;
            return NodeExecutionService::handle_step_response(ctx, invocation.node, response)
                .await;
        }

        let link = step
            .execute_next_child(&invocation.step_ctx, &pass_through, &invocation.responses)
            .await?;
        Self::continue_chain(
            ctx,
            invocation.node,
            step,
            &invocation.step_ctx,
            link,
            &invocation.responses,
        )
        .await
    }
}
