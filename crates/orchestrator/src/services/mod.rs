pub mod engine_context;
pub mod node_execution_service;
pub mod outputs;
pub mod plan_execution_service;
pub mod task_dispatcher;
pub mod wait_notify;

pub use engine_context::EngineContext;
pub use node_execution_service::{NodeExecutionService, NodeTrigger};
pub use outputs::{
    BuiltinResolverRegistrar, OptionalOutput, OutcomeService, Resolver, SweepingOutputService,
    PLAN_GROUP,
};
pub use plan_execution_service::PlanExecutionService;
pub use task_dispatcher::{ChannelTaskDispatcher, DispatchedTask, TaskDispatcher};
pub use wait_notify::{CompletedWait, WaitCallback, WaitNotifyEngine};
