//! Scoped key-value outputs shared between plan nodes.
//!
//! A value is stored against one level of the producer's ambiance (or the whole
//! plan). Lookups walk the reader's levels from the current one up to the root
//! and return the nearest match, then fall back to plan scope.

use async_trait::async_trait;
use db::{ExecutionOutput, ExecutionOutputRepository, OutputKind, PLAN_SCOPE};
use pipeline_core::{Ambiance, RefObject, RefType};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::debug;

use crate::error::{OrchestratorError, RegistryError, Result};
use crate::registry::{ResolverRegistrar, ResolverRegistry};

/// Group name that addresses the plan-wide scope.
pub const PLAN_GROUP: &str = "PLAN";

#[derive(Debug, Clone, PartialEq, Default)]
pub struct OptionalOutput {
    pub found: bool,
    pub output: Option<serde_json::Value>,
}

impl OptionalOutput {
    pub fn found(output: serde_json::Value) -> Self {
        Self {
            found: true,
            output: Some(output),
        }
    }

    pub fn not_found() -> Self {
        Self::default()
    }

    pub fn parse<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        match &self.output {
            Some(value) if self.found => Ok(Some(serde_json::from_value(value.clone())?)),
            _ => Ok(None),
        }
    }
}

/// Resolves refs of one kind and accepts new values of that kind.
#[async_trait]
pub trait Resolver: Send + Sync {
    /// Store `value` and return the new instance id.
    async fn consume(
        &self,
        ambiance: &Ambiance,
        name: &str,
        value: serde_json::Value,
        group: Option<&str>,
    ) -> Result<String>;

    async fn resolve(&self, ambiance: &Ambiance, ref_object: &RefObject) -> Result<serde_json::Value>;

    async fn resolve_optional(
        &self,
        ambiance: &Ambiance,
        ref_object: &RefObject,
    ) -> Result<OptionalOutput>;
}

#[derive(Clone)]
struct OutputStore {
    repo: ExecutionOutputRepository,
    kind: OutputKind,
}

impl OutputStore {
    fn scope_for(ambiance: &Ambiance, group: Option<&str>) -> Result<String> {
        match group {
            None => Ok(ambiance
                .obtain_current_runtime_id()
                .unwrap_or(PLAN_SCOPE)
                .to_string()),
            Some(group) if group.eq_ignore_ascii_case(PLAN_GROUP) => Ok(PLAN_SCOPE.to_string()),
            Some(group) => ambiance
                .levels
                .iter()
                .rev()
                .find(|level| {
                    level
                        .group
                        .as_deref()
                        .is_some_and(|g| g.eq_ignore_ascii_case(group))
                })
                .map(|level| level.runtime_id.clone())
                .ok_or_else(|| OrchestratorError::OutputScopeNotFound(group.to_string())),
        }
    }

    async fn consume(
        &self,
        ambiance: &Ambiance,
        name: &str,
        value: serde_json::Value,
        group: Option<&str>,
    ) -> Result<String> {
        let scope = Self::scope_for(ambiance, group)?;
        let mut output = ExecutionOutput::new(
            ambiance.plan_execution_id.clone(),
            self.kind,
            name,
            scope.clone(),
            value,
        )
        .with_group(group.map(str::to_string));
        if let Some(runtime_id) = ambiance.obtain_current_runtime_id() {
            output = output.with_producer(runtime_id);
        }

        let saved = self.repo.save(&output).await?;
        debug!(
            plan_execution_id = %ambiance.plan_execution_id,
            kind = %self.kind.as_str(),
            name = %name,
            scope = %scope,
            "Output published"
        );
        Ok(saved.id)
    }

    async fn find(&self, ambiance: &Ambiance, name: &str) -> Result<Option<ExecutionOutput>> {
        let plan_execution_id = &ambiance.plan_execution_id;
        for level in ambiance.levels.iter().rev() {
            let found = self
                .repo
                .find(plan_execution_id, self.kind, name, &level.runtime_id)
                .await?;
            if found.is_some() {
                return Ok(found);
            }
        }
        Ok(self
            .repo
            .find(plan_execution_id, self.kind, name, PLAN_SCOPE)
            .await?)
    }

    async fn resolve_optional(&self, ambiance: &Ambiance, name: &str) -> Result<OptionalOutput> {
        Ok(self
            .find(ambiance, name)
            .await?
            .map(|output| OptionalOutput::found(output.value))
            .unwrap_or_default())
    }

    async fn resolve(&self, ambiance: &Ambiance, name: &str) -> Result<serde_json::Value> {
        self.find(ambiance, name)
            .await?
            .map(|output| output.value)
            .ok_or_else(|| OrchestratorError::OutputNotFound(name.to_string()))
    }
}

/// Forward-propagating signals such as rollback markers.
#[derive(Clone)]
pub struct SweepingOutputService {
    store: OutputStore,
}

impl SweepingOutputService {
    pub fn new(repo: ExecutionOutputRepository) -> Self {
        Self {
            store: OutputStore {
                repo,
                kind: OutputKind::SweepingOutput,
            },
        }
    }

    pub async fn consume(
        &self,
        ambiance: &Ambiance,
        name: &str,
        value: serde_json::Value,
        group: Option<&str>,
    ) -> Result<String> {
        self.store.consume(ambiance, name, value, group).await
    }

    pub async fn resolve(&self, ambiance: &Ambiance, name: &str) -> Result<serde_json::Value> {
        self.store.resolve(ambiance, name).await
    }

    pub async fn resolve_optional(&self, ambiance: &Ambiance, name: &str) -> Result<OptionalOutput> {
        self.store.resolve_optional(ambiance, name).await
    }
}

#[async_trait]
impl Resolver for SweepingOutputService {
    async fn consume(
        &self,
        ambiance: &Ambiance,
        name: &str,
        value: serde_json::Value,
        group: Option<&str>,
    ) -> Result<String> {
        self.store.consume(ambiance, name, value, group).await
    }

    async fn resolve(&self, ambiance: &Ambiance, ref_object: &RefObject) -> Result<serde_json::Value> {
        self.store.resolve(ambiance, &ref_object.name).await
    }

    async fn resolve_optional(
        &self,
        ambiance: &Ambiance,
        ref_object: &RefObject,
    ) -> Result<OptionalOutput> {
        self.store.resolve_optional(ambiance, &ref_object.name).await
    }
}

/// Result values published by finished steps.
#[derive(Clone)]
pub struct OutcomeService {
    store: OutputStore,
}

impl OutcomeService {
    pub fn new(repo: ExecutionOutputRepository) -> Self {
        Self {
            store: OutputStore {
                repo,
                kind: OutputKind::Outcome,
            },
        }
    }

    pub async fn consume(
        &self,
        ambiance: &Ambiance,
        name: &str,
        value: serde_json::Value,
        group: Option<&str>,
    ) -> Result<String> {
        self.store.consume(ambiance, name, value, group).await
    }

    /// Look an outcome up by the instance id carried in a child notification.
    pub async fn fetch(&self, instance_id: &str) -> Result<Option<serde_json::Value>> {
        Ok(self
            .store
            .repo
            .find_by_id(instance_id)
            .await?
            .filter(|output| output.kind == OutputKind::Outcome)
            .map(|output| output.value))
    }

    /// Outcomes the given node published, oldest first.
    pub async fn produced_by(
        &self,
        plan_execution_id: &str,
        runtime_id: &str,
    ) -> Result<Vec<ExecutionOutput>> {
        Ok(self
            .store
            .repo
            .find_by_producer(plan_execution_id, OutputKind::Outcome, runtime_id)
            .await?)
    }
}

#[async_trait]
impl Resolver for OutcomeService {
    async fn consume(
        &self,
        ambiance: &Ambiance,
        name: &str,
        value: serde_json::Value,
        group: Option<&str>,
    ) -> Result<String> {
        self.store.consume(ambiance, name, value, group).await
    }

    async fn resolve(&self, ambiance: &Ambiance, ref_object: &RefObject) -> Result<serde_json::Value> {
        self.store.resolve(ambiance, &ref_object.name).await
    }

    async fn resolve_optional(
        &self,
        ambiance: &Ambiance,
        ref_object: &RefObject,
    ) -> Result<OptionalOutput> {
        self.store.resolve_optional(ambiance, &ref_object.name).await
    }
}

/// Registers the output services under their ref type names.
pub struct BuiltinResolverRegistrar {
    sweeping_outputs: SweepingOutputService,
    outcomes: OutcomeService,
}

impl BuiltinResolverRegistrar {
    pub fn new(sweeping_outputs: SweepingOutputService, outcomes: OutcomeService) -> Self {
        Self {
            sweeping_outputs,
            outcomes,
        }
    }
}

impl ResolverRegistrar for BuiltinResolverRegistrar {
    fn register_resolvers(
        &self,
        registry: &mut ResolverRegistry,
    ) -> std::result::Result<(), RegistryError> {
        registry.register(
            RefType::SweepingOutput.as_str(),
            Arc::new(self.sweeping_outputs.clone()),
        )?;
        registry.register(RefType::Outcome.as_str(), Arc::new(self.outcomes.clone()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use db::{create_pool, run_migrations, DbError};
    use pipeline_core::Level;
    use serde_json::json;

    async fn services() -> (SweepingOutputService, OutcomeService) {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        let repo = ExecutionOutputRepository::new(pool);
        (
            SweepingOutputService::new(repo.clone()),
            OutcomeService::new(repo),
        )
    }

    fn stage_ambiance() -> Ambiance {
        Ambiance::new("plan-1")
            .with_level(Level::new("stage-rt", "stage", "SECTION", "deploy").with_group("STAGE"))
            .with_level(Level::new("step-rt", "step", "NOOP", "shell").with_group("STEP"))
    }

    fn sibling_ambiance() -> Ambiance {
        Ambiance::new("plan-1")
            .with_level(Level::new("stage-rt", "stage", "SECTION", "deploy").with_group("STAGE"))
            .with_level(Level::new("other-rt", "other", "NOOP", "verify").with_group("STEP"))
    }

    #[tokio::test]
    async fn test_current_level_scope_is_private_to_the_producer() {
        let (outputs, _) = services().await;
        outputs
            .consume(&stage_ambiance(), "artifact", json!("a"), None)
            .await
            .unwrap();

        let own = outputs.resolve_optional(&stage_ambiance(), "artifact").await.unwrap();
        assert!(own.found);
        assert_eq!(own.output, Some(json!("a")));

        let sibling = outputs.resolve_optional(&sibling_ambiance(), "artifact").await.unwrap();
        assert!(!sibling.found);
        assert!(sibling.output.is_none());
    }

    #[tokio::test]
    async fn test_group_scope_is_visible_to_siblings() {
        let (outputs, _) = services().await;
        outputs
            .consume(&stage_ambiance(), "artifact", json!("a"), Some("STAGE"))
            .await
            .unwrap();

        let value = outputs.resolve(&sibling_ambiance(), "artifact").await.unwrap();
        assert_eq!(value, json!("a"));
    }

    #[tokio::test]
    async fn test_nearest_scope_wins() {
        let (outputs, _) = services().await;
        outputs
            .consume(&stage_ambiance(), "image", json!("outer"), Some(PLAN_GROUP))
            .await
            .unwrap();
        outputs
            .consume(&stage_ambiance(), "image", json!("inner"), Some("STAGE"))
            .await
            .unwrap();

        assert_eq!(
            outputs.resolve(&sibling_ambiance(), "image").await.unwrap(),
            json!("inner")
        );
        assert_eq!(
            outputs.resolve(&Ambiance::new("plan-1"), "image").await.unwrap(),
            json!("outer")
        );
    }

    #[tokio::test]
    async fn test_resolve_missing_is_an_error() {
        let (outputs, _) = services().await;
        assert!(matches!(
            outputs.resolve(&stage_ambiance(), "ghost").await,
            Err(OrchestratorError::OutputNotFound(name)) if name == "ghost"
        ));
    }

    #[tokio::test]
    async fn test_unknown_group_is_an_error() {
        let (outputs, _) = services().await;
        assert!(matches!(
            outputs.consume(&stage_ambiance(), "x", json!(1), Some("STEP_GROUP")).await,
            Err(OrchestratorError::OutputScopeNotFound(group)) if group == "STEP_GROUP"
        ));
    }

    #[tokio::test]
    async fn test_duplicate_at_same_scope_is_rejected() {
        let (outputs, _) = services().await;
        outputs
            .consume(&stage_ambiance(), "x", json!(1), Some("STAGE"))
            .await
            .unwrap();
        assert!(matches!(
            outputs.consume(&sibling_ambiance(), "x", json!(2), Some("STAGE")).await,
            Err(OrchestratorError::Database(DbError::DuplicateOutput { .. }))
        ));
    }

    #[tokio::test]
    async fn test_outcomes_are_separate_and_fetchable() {
        let (outputs, outcomes) = services().await;
        let instance_id = outcomes
            .consume(&stage_ambiance(), "build", json!({ "tag": "v1" }), None)
            .await
            .unwrap();

        assert!(!outputs
            .resolve_optional(&stage_ambiance(), "build")
            .await
            .unwrap()
            .found);
        assert_eq!(
            outcomes.fetch(&instance_id).await.unwrap(),
            Some(json!({ "tag": "v1" }))
        );

        let produced = outcomes.produced_by("plan-1", "step-rt").await.unwrap();
        assert_eq!(produced.len(), 1);
        assert_eq!(produced[0].name, "build");

        let resolver: &dyn Resolver = &outcomes;
        let value = resolver
            .resolve(&stage_ambiance(), &RefObject::outcome("build"))
            .await
            .unwrap();
        assert_eq!(value["tag"], "v1");
    }

    #[test]
    fn test_optional_output_parse() {
        #[derive(serde::Deserialize)]
        struct Marker {
            next_node_id: String,
        }

        let output = OptionalOutput::found(json!({ "next_node_id": "rb" }));
        let marker: Marker = output.parse().unwrap().unwrap();
        assert_eq!(marker.next_node_id, "rb");

        let missing: Option<Marker> = OptionalOutput::not_found().parse().unwrap();
        assert!(missing.is_none());
    }
}
