use async_trait::async_trait;
use pipeline_core::{ExecutableResponse, ExecutionMode};

use super::{mode_mismatch, never_suspends, ExecutableProcessor, ResumeInvocation, StartInvocation};
use crate::error::Result;
use crate::services::{EngineContext, NodeExecutionService};
use crate::steps::Executable;

pub struct SyncProcessor;

#[async_trait]
impl ExecutableProcessor for SyncProcessor {
    async fn handle_start(&self, ctx: &EngineContext, invocation: StartInvocation) -> Result<()> {
        let Executable::Sync(step) = &invocation.step else {
            return Err(mode_mismatch(&invocation.node, ExecutionMode::Sync));
        };
        let response = step.execute_sync(&invocation.step_ctx).await?;

        let mut node = invocation.node;
        node.executable_responses.push(ExecutableResponse::Sync);
        NodeExecutionService::handle_step_response(ctx, node, response).await
    }

    async fn handle_resume(&self, _ctx: &EngineContext, _invocation: ResumeInvocation) -> Result<()> {
        Err(never_suspends(ExecutionMode::Sync))
    }
}
