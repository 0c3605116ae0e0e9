use async_trait::async_trait;
use pipeline_core::ExecutionMode;

use super::{mode_mismatch, ExecutableProcessor, ResumeInvocation, StartInvocation};
use crate::error::Result;
use crate::services::{EngineContext, NodeExecutionService};
use crate::steps::Executable;

/// Suspends on step-supplied callback ids until every one is notified.
pub struct AsyncProcessor;

#[async_trait]
impl ExecutableProcessor for AsyncProcessor {
    async fn handle_start(&self, ctx: &EngineContext, invocation: StartInvocation) -> Result<()> {
        let Executable::Async(step) = &invocation.step else {
            return Err(mode_mismatch(&invocation.node, ExecutionMode::Async));
        };
        let callback_ids = step.execute_async(&invocation.step_ctx).await?;

        let mut node = invocation.node;
        NodeExecutionService::add_async_callbacks(ctx, &mut node, callback_ids).await
    }

    async fn handle_resume(&self, ctx: &EngineContext, invocation: ResumeInvocation) -> Result<()> {
        let Executable::Async(step) = &invocation.step else {
            return Err(mode_mismatch(&invocation.node, ExecutionMode::Async));
        };
        let response = step
            .handle_async_response(&invocation.step_ctx, &invocation.responses)
            .await?;
        NodeExecutionService::handle_step_response(ctx, invocation.node, response).await
    }
}
