pub mod advisers;
pub mod config;
pub mod engine;
pub mod error;
pub mod facilitators;
pub mod listener;
pub mod processors;
pub mod registry;
pub mod services;
pub mod steps;

pub use config::EngineConfig;
pub use engine::{EngineHandle, PipelineEngine, PipelineEngineBuilder};
pub use error::{OrchestratorError, RegistryError, Result};
pub use registry::{
    AdviserRegistrar, FacilitatorRegistrar, Registries, ResolverRegistrar, StepRegistrar,
};
pub use services::{ChannelTaskDispatcher, DispatchedTask, TaskDispatcher};
