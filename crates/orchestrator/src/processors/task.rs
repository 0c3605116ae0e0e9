use async_trait::async_trait;
use pipeline_core::{
    ChainDetails, Continuation, ExecutableResponse, ExecutionMode, NodeExecution, Status,
};

use super::{mode_mismatch, ExecutableProcessor, ResumeInvocation, StartInvocation};
use crate::error::{OrchestratorError, Result};
use crate::services::{EngineContext, NodeExecutionService};
use crate::steps::{Executable, TaskChainResponse};

pub struct TaskProcessor;

#[async_trait]
impl ExecutableProcessor for TaskProcessor {
    async fn handle_start(&self, ctx: &EngineContext, invocation: StartInvocation) -> Result<()> {
        let Executable::Task(step) = &invocation.step else {
            return Err(mode_mismatch(&invocation.node, ExecutionMode::Task));
        };
        let request = step.obtain_task(&invocation.step_ctx).await?;

        let mut node = invocation.node;
        let task_id = NodeExecutionService::queue_task(ctx, &node, request).await?;
        NodeExecutionService::suspend(
            ctx,
            &mut node,
            ExecutableResponse::Task {
                task_id: task_id.clone(),
            },
            Status::TaskWaiting,
            vec![task_id],
        )
        .await
    }

    async fn handle_resume(&self, ctx: &EngineContext, invocation: ResumeInvocation) -> Result<()> {
        let Executable::Task(step) = &invocation.step else {
            return Err(mode_mismatch(&invocation.node, ExecutionMode::Task));
        };
        let response = step
            .handle_task_result(&invocation.step_ctx, &invocation.responses)
            .await?;
        NodeExecutionService::handle_step_response(ctx, invocation.node, response).await
    }
}

/// Dispatches one task per link; the pass-through travels with the node as JSON bytes.
pub struct TaskChainProcessor;

impl TaskChainProcessor {
    async fn dispatch_link(
        ctx: &EngineContext,
        mut node: NodeExecution,
        link: TaskChainResponse,
    ) -> Result<()> {
        let task_id = NodeExecutionService::queue_task(ctx, &node, link.task).await?;
        let pass_through = serde_json::to_vec(&link.pass_through)?;
        NodeExecutionService::suspend(
            ctx,
            &mut node,
            ExecutableResponse::TaskChain {
                task_id: task_id.clone(),
                pass_through,
                chain_end: link.chain_end,
            },
            Status::TaskWaiting,
            vec![task_id],
        )
        .await
    }
}

#[async_trait]
impl ExecutableProcessor for TaskChainProcessor {
    async fn handle_start(&self, ctx: &EngineContext, invocation: StartInvocation) -> Result<()> {
        let Executable::TaskChain(step) = &invocation.step else {
            return Err(mode_mismatch(&invocation.node, ExecutionMode::TaskChain));
        };
        let link = step.start_chain_link(&invocation.step_ctx).await?;
        Self::dispatch_link(ctx, invocation.node, link).await
    }

    async fn handle_resume(&self, ctx: &EngineContext, invocation: ResumeInvocation) -> Result<()> {
        let Executable::TaskChain(step) = &invocation.step else {
            return Err(mode_mismatch(&invocation.node, ExecutionMode::TaskChain));
        };
        let Some(ChainDetails {
            should_end,
            continuation: Continuation::TaskChain(pass_through),
            ..
        }) = invocation.chain
        else {
            return Err(OrchestratorError::ChainStateMismatch(ExecutionMode::TaskChain));
        };

        if should_end {
            let response = step
                .finalize_execution(&invocation.step_ctx, &pass_through, &invocation.responses)
                .await?;
            return NodeExecutionService::handle_step_response(ctx, invocation.node, response)
                .await;
        }

        let link = step
            .execute_next_link(&invocation.step_ctx, &pass_through, &invocation.responses)
            .await?;
        Self::dispatch_link(ctx, invocation.node, link).await
    }
}
