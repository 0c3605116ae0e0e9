//! Step contracts, one trait per execution mode.
//!
//! A step implements the trait matching the mode its facilitator picks and is
//! registered as the corresponding [`Executable`] variant.

mod builtin;

pub use builtin::*;

use async_trait::async_trait;
use pipeline_core::{Ambiance, ExecutionMode, ResponseMap, StepResponse, TaskRequest};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::Result;
use crate::services::SweepingOutputService;

/// Values resolved from a node's refs before it starts, keyed by ref key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepInputPackage {
    pub inputs: BTreeMap<String, serde_json::Value>,
}

impl StepInputPackage {
    pub fn with_input(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.inputs.insert(key.into(), value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.inputs.get(key)
    }
}

/// Everything a step sees while it runs.
#[derive(Clone)]
pub struct StepContext {
    pub ambiance: Ambiance,
    pub node_execution_id: String,
    pub parameters: serde_json::Value,
    pub inputs: StepInputPackage,
    pub sweeping_outputs: SweepingOutputService,
}

#[async_trait]
pub trait SyncExecutable: Send + Sync {
    async fn execute_sync(&self, ctx: &StepContext) -> Result<StepResponse>;
}

#[async_trait]
pub trait AsyncExecutable: Send + Sync {
    /// Correlation ids the node waits on before it resumes.
    async fn execute_async(&self, ctx: &StepContext) -> Result<Vec<String>>;

    async fn handle_async_response(
        &self,
        ctx: &StepContext,
        responses: &ResponseMap,
    ) -> Result<StepResponse>;
}

#[async_trait]
pub trait ChildExecutable: Send + Sync {
    /// Plan node id of the single child to run.
    async fn obtain_child(&self, ctx: &StepContext) -> Result<String>;

    async fn handle_child_response(
        &self,
        ctx: &StepContext,
        responses: &ResponseMap,
    ) -> Result<StepResponse>;
}

#[async_trait]
pub trait ChildrenExecutable: Send + Sync {
    async fn obtain_children(&self, ctx: &StepContext) -> Result<Vec<String>>;

    async fn handle_children_response(
        &self,
        ctx: &StepContext,
        responses: &ResponseMap,
    ) -> Result<StepResponse>;
}

/// One link of a child chain.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ChildChainResponse {
    /// `None` when there is nothing left to run.
    pub next_child_id: Option<String>,
    pub pass_through: Vec<u8>,
    pub last_link: bool,
}

impl ChildChainResponse {
    pub fn next(child_id: impl Into<String>, pass_through: Vec<u8>) -> Self {
        Self {
            next_child_id: Some(child_id.into()),
            pass_through,
            last_link: false,
        }
    }

    pub fn last(child_id: impl Into<String>, pass_through: Vec<u8>) -> Self {
        Self {
            next_child_id: Some(child_id.into()),
            pass_through,
            last_link: true,
        }
    }

    pub fn finished(pass_through: Vec<u8>) -> Self {
        Self {
            next_child_id: None,
            pass_through,
            last_link: true,
        }
    }
}

#[async_trait]
pub trait ChildChainExecutable: Send + Sync {
    async fn obtain_first_child(&self, ctx: &StepContext) -> Result<ChildChainResponse>;

    async fn execute_next_child(
        &self,
        ctx: &StepContext,
        pass_through: &[u8],
        responses: &ResponseMap,
    ) -> Result<ChildChainResponse>;

    async fn finalize_execution(
        &self,
        ctx: &StepContext,
        pass_through: &[u8],
        responses: &ResponseMap,
    ) -> Result<StepResponse>;
}

#[async_trait]
pub trait TaskExecutable: Send + Sync {
    async fn obtain_task(&self, ctx: &StepContext) -> Result<TaskRequest>;

    async fn handle_task_result(
        &self,
        ctx: &StepContext,
        responses: &ResponseMap,
    ) -> Result<StepResponse>;
}

/// One link of a task chain with the state threaded to the next link.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskChainResponse {
    pub task: TaskRequest,
    pub pass_through: serde_json::Value,
    pub chain_end: bool,
}

#[async_trait]
pub trait TaskChainExecutable: Send + Sync {
    async fn start_chain_link(&self, ctx: &StepContext) -> Result<TaskChainResponse>;

    async fn execute_next_link(
        &self,
        ctx: &StepContext,
        pass_through: &serde_json::Value,
        responses: &ResponseMap,
    ) -> Result<TaskChainResponse>;

    async fn finalize_execution(
        &self,
        ctx: &StepContext,
        pass_through: &serde_json::Value,
        responses: &ResponseMap,
    ) -> Result<StepResponse>;
}

/// A registered step, tagged with the mode it implements.
#[derive(Clone)]
pub enum Executable {
    Sync(Arc<dyn SyncExecutable>),
    Async(Arc<dyn AsyncExecutable>),
    Child(Arc<dyn ChildExecutable>),
    Children(Arc<dyn ChildrenExecutable>),
    ChildChain(Arc<dyn ChildChainExecutable>),
    Task(Arc<dyn TaskExecutable>),
    TaskChain(Arc<dyn TaskChainExecutable>),
}

impl Executable {
    pub fn mode(&self) -> ExecutionMode {
        match self {
            Self::Sync(_) => ExecutionMode::Sync,
            Self::Async(_) => ExecutionMode::Async,
            Self::Child(_) => ExecutionMode::Child,
            Self::Children(_) => ExecutionMode::Children,
            Self::ChildChain(_) => ExecutionMode::ChildChain,
            Self::Task(_) => ExecutionMode::Task,
            Self::TaskChain(_) => ExecutionMode::TaskChain,
        }
    }
}

impl std::fmt::Debug for Executable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Executable").field(&self.mode()).finish()
    }
}
