//! Per-mode handling of START and RESUME for a node.

mod callback;
mod child;
mod child_chain;
mod sync;
mod task;

pub use callback::AsyncProcessor;
pub use child::{ChildProcessor, ChildrenProcessor};
pub use child_chain::ChildChainProcessor;
pub use sync::SyncProcessor;
pub use task::{TaskChainProcessor, TaskProcessor};

use async_trait::async_trait;
use pipeline_core::{ChainDetails, ExecutionMode, FacilitatorResponse, NodeExecution, ResponseMap};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{OrchestratorError, Result};
use crate::services::EngineContext;
use crate::steps::{Executable, StepContext};

pub struct StartInvocation {
    pub node: NodeExecution,
    pub step: Executable,
    pub step_ctx: StepContext,
    pub facilitator_response: FacilitatorResponse,
}

pub struct ResumeInvocation {
    pub node: NodeExecution,
    pub step: Executable,
    pub step_ctx: StepContext,
    pub responses: ResponseMap,
    pub chain: Option<ChainDetails>,
}

#[async_trait]
pub trait ExecutableProcessor: Send + Sync {
    async fn handle_start(&self, ctx: &EngineContext, invocation: StartInvocation) -> Result<()>;

    async fn handle_resume(&self, ctx: &EngineContext, invocation: ResumeInvocation) -> Result<()>;
}

/// Maps each execution mode to the processor that drives it.
pub struct ProcessorFactory {
    processors: HashMap<ExecutionMode, Arc<dyn ExecutableProcessor>>,
}

impl ProcessorFactory {
    pub fn obtain(&self, mode: ExecutionMode) -> Result<Arc<dyn ExecutableProcessor>> {
        self.processors
            .get(&mode)
            .cloned()
            .ok_or(OrchestratorError::ProcessorNotFound(mode))
    }
}

impl Default for ProcessorFactory {
    fn default() -> Self {
        let mut processors: HashMap<ExecutionMode, Arc<dyn ExecutableProcessor>> = HashMap::new();
        processors.insert(ExecutionMode::Sync, Arc::new(SyncProcessor));
        processors.insert(ExecutionMode::Async, Arc::new(AsyncProcessor));
        processors.insert(ExecutionMode::Child, Arc::new(ChildProcessor));
        processors.insert(ExecutionMode::Children, Arc::new(ChildrenProcessor));
        processors.insert(ExecutionMode::ChildChain, Arc::new(ChildChainProcessor));
        processors.insert(ExecutionMode::Task, Arc::new(TaskProcessor));
        processors.insert(ExecutionMode::TaskChain, Arc::new(TaskChainProcessor));
        Self { processors }
    }
}

/// The node was facilitated into `mode` but its step implements another one.
fn mode_mismatch(node: &NodeExecution, mode: ExecutionMode) -> OrchestratorError {
    OrchestratorError::StepModeMismatch {
        step_type: node
            .ambiance
            .obtain_current_level()
            .map(|level| level.step_type.clone())
            .unwrap_or_else(|| node.identifier.clone()),
        mode,
    }
}

fn never_suspends(mode: ExecutionMode) -> OrchestratorError {
    OrchestratorError::step(format!("{mode} nodes never suspend"))
}
