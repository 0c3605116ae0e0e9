//! Composition root: builds the registries, wires the context and runs the
//! listener loop in the background.

use db::{create_pool, run_migrations, DbError, ExecutionOutputRepository, SqlitePool};
use events::{Event, EventBus, EventEnvelope};
use pipeline_core::{NodeExecution, Plan, PlanExecution, ResponseData, Status};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::advisers::BuiltinAdviserRegistrar;
use crate::config::EngineConfig;
use crate::error::{OrchestratorError, Result};
use crate::facilitators::BuiltinFacilitatorRegistrar;
use crate::listener::NodeExecutionEventListener;
use crate::registry::{
    AdviserRegistrar, FacilitatorRegistrar, Registries, ResolverRegistrar, StepRegistrar,
};
use crate::services::{
    BuiltinResolverRegistrar, EngineContext, NodeExecutionService, OutcomeService,
    PlanExecutionService, SweepingOutputService, TaskDispatcher,
};

pub struct PipelineEngineBuilder {
    config: EngineConfig,
    pool: Option<SqlitePool>,
    event_bus: Option<EventBus>,
    task_dispatcher: Option<Arc<dyn TaskDispatcher>>,
    facilitator_registrars: Vec<Arc<dyn FacilitatorRegistrar>>,
    adviser_registrars: Vec<Arc<dyn AdviserRegistrar>>,
    step_registrars: Vec<Arc<dyn StepRegistrar>>,
    resolver_registrars: Vec<Arc<dyn ResolverRegistrar>>,
}

impl PipelineEngineBuilder {
    /// Use an existing pool instead of connecting to `config.database_url`.
    pub fn with_pool(mut self, pool: SqlitePool) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn with_event_bus(mut self, bus: EventBus) -> Self {
        self.event_bus = Some(bus);
        self
    }

    pub fn with_task_dispatcher(mut self, dispatcher: Arc<dyn TaskDispatcher>) -> Self {
        self.task_dispatcher = Some(dispatcher);
        self
    }

    pub fn with_facilitator_registrar(mut self, registrar: Arc<dyn FacilitatorRegistrar>) -> Self {
        self.facilitator_registrars.push(registrar);
        self
    }

    pub fn with_adviser_registrar(mut self, registrar: Arc<dyn AdviserRegistrar>) -> Self {
        self.adviser_registrars.push(registrar);
        self
    }

    pub fn with_step_registrar(mut self, registrar: Arc<dyn StepRegistrar>) -> Self {
        self.step_registrars.push(registrar);
        self
    }

    pub fn with_resolver_registrar(mut self, registrar: Arc<dyn ResolverRegistrar>) -> Self {
        self.resolver_registrars.push(registrar);
        self
    }

    pub async fn build(self) -> Result<PipelineEngine> {
        let config = self.config;
        let pool = match self.pool {
            Some(pool) => pool,
            None => create_pool(&config.database_url)
                .await
                .map_err(DbError::from)?,
        };
        if config.auto_migrate {
            run_migrations(&pool).await.map_err(DbError::from)?;
        }

        let outputs = ExecutionOutputRepository::new(pool.clone());
        let sweeping_outputs = SweepingOutputService::new(outputs.clone());
        let outcomes = OutcomeService::new(outputs);

        let mut builder = Registries::builder()
            .facilitator_registrar(&BuiltinFacilitatorRegistrar)?
            .adviser_registrar(&BuiltinAdviserRegistrar::new(sweeping_outputs.clone()))?
            .resolver_registrar(&BuiltinResolverRegistrar::new(sweeping_outputs, outcomes))?;
        for registrar in &self.facilitator_registrars {
            builder = builder.facilitator_registrar(registrar.as_ref())?;
        }
        for registrar in &self.adviser_registrars {
            builder = builder.adviser_registrar(registrar.as_ref())?;
        }
        for registrar in &self.step_registrars {
            builder = builder.step_registrar(registrar.as_ref())?;
        }
        for registrar in &self.resolver_registrars {
            builder = builder.resolver_registrar(registrar.as_ref())?;
        }
        let registries = Arc::new(builder.build());
        debug!(registries = ?registries, "Registries built");

        let event_bus = self
            .event_bus
            .unwrap_or_else(|| EventBus::with_capacity(config.event_bus_capacity));
        let (producer, consumer) = events::channel();
        let mut ctx = EngineContext::new(config, pool, registries, producer)
            .with_event_bus(event_bus.clone());
        if let Some(dispatcher) = self.task_dispatcher {
            ctx = ctx.with_task_dispatcher(dispatcher);
        }
        let ctx = Arc::new(ctx);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let listener = NodeExecutionEventListener::new(Arc::clone(&ctx));
        let listener_task = tokio::spawn(async move {
            if let Err(e) = listener.run(consumer, shutdown_rx).await {
                error!(error = %e, "Node execution listener stopped on a fatal error");
            }
        });

        info!("Pipeline engine started");
        Ok(PipelineEngine {
            handle: EngineHandle { ctx, event_bus },
            shutdown_tx,
            listener_task,
        })
    }
}

/// Cheap, cloneable entry point for starting plans and delivering results.
#[derive(Clone)]
pub struct EngineHandle {
    ctx: Arc<EngineContext>,
    event_bus: EventBus,
}

impl EngineHandle {
    /// Start a plan and return its plan execution id.
    pub async fn start_plan(
        &self,
        plan: Plan,
        setup_abstractions: HashMap<String, String>,
    ) -> Result<String> {
        let execution = PlanExecutionService::start_plan(&self.ctx, plan, setup_abstractions).await?;
        Ok(execution.id)
    }

    /// Deliver a task result or other callback data under its correlation id.
    pub async fn notify(&self, correlation_id: &str, data: ResponseData) -> Result<()> {
        NodeExecutionService::notify(&self.ctx, correlation_id, data).await
    }

    pub async fn abort_plan(&self, plan_execution_id: &str) -> Result<()> {
        PlanExecutionService::abort_plan(&self.ctx, plan_execution_id).await
    }

    pub async fn plan_execution(&self, plan_execution_id: &str) -> Result<PlanExecution> {
        self.ctx.plan(plan_execution_id).await
    }

    pub async fn node_executions(&self, plan_execution_id: &str) -> Result<Vec<NodeExecution>> {
        Ok(self
            .ctx
            .node_executions
            .find_by_plan(plan_execution_id)
            .await?)
    }

    /// Wait until the plan execution reaches a final status.
    pub async fn wait_for_completion(
        &self,
        plan_execution_id: &str,
        timeout: Duration,
    ) -> Result<Status> {
        // Subscribe before reading so a finish in between is not missed.
        let mut rx = self.event_bus.subscribe();
        let execution = self.plan_execution(plan_execution_id).await?;
        if execution.status.is_final() {
            return Ok(execution.status);
        }

        tokio::time::timeout(timeout, self.next_finish(&mut rx, plan_execution_id))
            .await
            .map_err(|_| OrchestratorError::Timeout(plan_execution_id.to_string()))?
    }

    async fn next_finish(
        &self,
        rx: &mut broadcast::Receiver<EventEnvelope>,
        plan_execution_id: &str,
    ) -> Result<Status> {
        loop {
            match rx.recv().await {
                Ok(envelope) => {
                    if let Event::PlanExecutionFinished {
                        plan_execution_id: id,
                        status,
                    } = envelope.event
                    {
                        if id == plan_execution_id {
                            return Ok(status);
                        }
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "Lifecycle subscriber lagged, checking plan status");
                    let execution = self.plan_execution(plan_execution_id).await?;
                    if execution.status.is_final() {
                        return Ok(execution.status);
                    }
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(OrchestratorError::Timeout(plan_execution_id.to_string()));
                }
            }
        }
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn context(&self) -> &Arc<EngineContext> {
        &self.ctx
    }
}

pub struct PipelineEngine {
    handle: EngineHandle,
    shutdown_tx: watch::Sender<bool>,
    listener_task: JoinHandle<()>,
}

impl PipelineEngine {
    pub fn builder(config: EngineConfig) -> PipelineEngineBuilder {
        PipelineEngineBuilder {
            config,
            pool: None,
            event_bus: None,
            task_dispatcher: None,
            facilitator_registrars: Vec::new(),
            adviser_registrars: Vec::new(),
            step_registrars: Vec::new(),
            resolver_registrars: Vec::new(),
        }
    }

    pub fn handle(&self) -> EngineHandle {
        self.handle.clone()
    }

    pub fn event_bus(&self) -> &EventBus {
        self.handle.event_bus()
    }

    pub async fn start_plan(
        &self,
        plan: Plan,
        setup_abstractions: HashMap<String, String>,
    ) -> Result<String> {
        self.handle.start_plan(plan, setup_abstractions).await
    }

    pub async fn notify(&self, correlation_id: &str, data: ResponseData) -> Result<()> {
        self.handle.notify(correlation_id, data).await
    }

    pub async fn abort_plan(&self, plan_execution_id: &str) -> Result<()> {
        self.handle.abort_plan(plan_execution_id).await
    }

    pub async fn plan_execution(&self, plan_execution_id: &str) -> Result<PlanExecution> {
        self.handle.plan_execution(plan_execution_id).await
    }

    pub async fn node_executions(&self, plan_execution_id: &str) -> Result<Vec<NodeExecution>> {
        self.handle.node_executions(plan_execution_id).await
    }

    pub async fn wait_for_completion(
        &self,
        plan_execution_id: &str,
        timeout: Duration,
    ) -> Result<Status> {
        self.handle
            .wait_for_completion(plan_execution_id, timeout)
            .await
    }

    /// Stop the listener after the message it is processing.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.listener_task.await {
            error!(error = %e, "Node execution listener task panicked");
        }
        info!("Pipeline engine stopped");
    }
}
