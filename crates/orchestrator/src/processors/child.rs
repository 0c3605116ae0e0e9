use async_trait::async_trait;
use pipeline_core::{ExecutableResponse, ExecutionMode, NodeExecution, Status};

use super::{mode_mismatch, ExecutableProcessor, ResumeInvocation, StartInvocation};
use crate::error::Result;
use crate::services::{EngineContext, NodeExecutionService};
use crate::steps::Executable;

async fn wait_on_children(
    ctx: &EngineContext,
    mut node: NodeExecution,
    response: ExecutableResponse,
    child_node_ids: &[String],
) -> Result<()> {
    node.executable_responses.push(response);
    ctx.transition(&mut node, Status::ChildrenWaiting).await?;
    NodeExecutionService::spawn_children(ctx, &node, child_node_ids).await
}

pub struct ChildProcessor;

#[async_trait]
impl ExecutableProcessor for ChildProcessor {
    async fn handle_start(&self, ctx: &EngineContext, invocation: StartInvocation) -> Result<()> {
        let Executable::Child(step) = &invocation.step else {
            return Err(mode_mismatch(&invocation.node, ExecutionMode::Child));
        };
        let child_node_id = step.obtain_child(&invocation.step_ctx).await?;
        let children = [child_node_id.clone()];
        wait_on_children(
            ctx,
            invocation.node,
            ExecutableResponse::Child { child_node_id },
            &children,
        )
        .await
    }

    async fn handle_resume(&self, ctx: &EngineContext, invocation: ResumeInvocation) -> Result<()> {
        let Executable::Child(step) = &invocation.step else {
            return Err(mode_mismatch(&invocation.node, ExecutionMode::Child));
        };
        let response = step
            .handle_child_response(&invocation.step_ctx, &invocation.responses)
            .await?;
        NodeExecutionService::handle_step_response(ctx, invocation.node, response).await
    }
}

pub struct ChildrenProcessor;

#[async_trait]
impl ExecutableProcessor for ChildrenProcessor {
    async fn handle_start(&self, ctx: &EngineContext, invocation: StartInvocation) -> Result<()> {
        let Executable::Children(step) = &invocation.step else {
            return Err(mode_mismatch(&invocation.node, ExecutionMode::Children));
        };
        let child_node_ids = step.obtain_children(&invocation.step_ctx).await?;
        wait_on_children(
            ctx,
            invocation.node,
            ExecutableResponse::Children {
                child_node_ids: child_node_ids.clone(),
            },
            &child_node_ids,
        )
        .await
    }

    async fn handle_resume(&self, ctx: &EngineContext, invocation: ResumeInvocation) -> Result<()> {
        let Executable::Children(step) = &invocation.step else {
            return Err(mode_mismatch(&invocation.node, ExecutionMode::Children));
        };
        let response = step
            .handle_children_response(&invocation.step_ctx, &invocation.responses)
            .await?;
        NodeExecutionService::handle_step_response(ctx, invocation.node, response).await
    }
}
