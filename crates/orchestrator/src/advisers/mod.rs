//! Advisers decide what happens after a node reaches a terminal status.
//!
//! Obtainments are tried in declared order and the first adviser whose
//! `can_advise` accepts the event decides. Adviser failures never stop the
//! node from finishing; the failing adviser is skipped.

mod failure;
mod next_step;
mod rollback;

pub use failure::*;
pub use next_step::*;
pub use rollback::*;

use async_trait::async_trait;
use pipeline_core::{
    AdviserObtainment, AdviserResponse, Ambiance, FailureInfo, FailureType, Status,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{RegistryError, Result};
use crate::registry::{AdviserRegistrar, AdviserRegistry, Registries};
use crate::services::SweepingOutputService;

pub const NEXT_STEP: &str = "NEXT_STEP";
pub const ON_SUCCESS: &str = "ON_SUCCESS";
pub const ON_FAIL: &str = "ON_FAIL";
pub const IGNORE: &str = "IGNORE";
pub const RETRY: &str = "RETRY";
pub const END_PLAN: &str = "END_PLAN";
pub const ROLLBACK_MODE: &str = "ROLLBACK_MODE";
pub const ROLLBACK_CUSTOM: &str = "ROLLBACK_CUSTOM";

/// A node finished; should anything special happen next?
#[derive(Debug, Clone, PartialEq)]
pub struct AdvisingEvent {
    pub ambiance: Ambiance,
    pub node_execution_id: String,
    pub from_status: Status,
    pub to_status: Status,
    pub failure_info: Option<FailureInfo>,
    /// Parameters of the obtainment being evaluated.
    pub parameters: serde_json::Value,
    /// How many times this plan node has already been retried.
    pub retry_count: usize,
}

impl AdvisingEvent {
    pub fn new(ambiance: Ambiance, node_execution_id: impl Into<String>, to_status: Status) -> Self {
        Self {
            ambiance,
            node_execution_id: node_execution_id.into(),
            from_status: Status::Running,
            to_status,
            failure_info: None,
            parameters: serde_json::Value::Null,
            retry_count: 0,
        }
    }

    pub fn with_from_status(mut self, from_status: Status) -> Self {
        self.from_status = from_status;
        self
    }

    pub fn with_failure(mut self, failure_info: Option<FailureInfo>) -> Self {
        self.failure_info = failure_info;
        self
    }

    pub fn with_parameters(mut self, parameters: serde_json::Value) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_retry_count(mut self, retry_count: usize) -> Self {
        self.retry_count = retry_count;
        self
    }

    /// True when the failure carries one of `types`; an empty filter matches any failure.
    pub fn failure_matches(&self, types: &BTreeSet<FailureType>) -> bool {
        match &self.failure_info {
            Some(info) => info.has_any_type(types),
            None => types.is_empty(),
        }
    }
}

#[async_trait]
pub trait Adviser: Send + Sync {
    async fn can_advise(&self, event: &AdvisingEvent) -> bool;

    async fn on_advise_event(&self, event: &AdvisingEvent) -> Result<AdviserResponse>;
}

pub async fn advise_in_order(
    registries: &Registries,
    obtainments: &[AdviserObtainment],
    event: &AdvisingEvent,
) -> Option<AdviserResponse> {
    for obtainment in obtainments {
        let adviser = match registries.advisers.obtain(&obtainment.adviser_type) {
            Ok(adviser) => adviser,
            Err(e) => {
                warn!(
                    plan_execution_id = %event.ambiance.plan_execution_id,
                    node_execution_id = %event.node_execution_id,
                    error = %e,
                    "Skipping unknown adviser"
                );
                continue;
            }
        };

        let event = event.clone().with_parameters(obtainment.parameters.clone());
        if !adviser.can_advise(&event).await {
            continue;
        }

        match adviser.on_advise_event(&event).await {
            Ok(response) => {
                debug!(
                    node_execution_id = %event.node_execution_id,
                    adviser = %obtainment.adviser_type,
                    advise_type = ?response.advise_type(),
                    "Adviser decided"
                );
                return Some(response);
            }
            Err(e) => {
                warn!(
                    plan_execution_id = %event.ambiance.plan_execution_id,
                    account_id = %event.ambiance.account_id(),
                    node_execution_id = %event.node_execution_id,
                    adviser = %obtainment.adviser_type,
                    error = %e,
                    "Adviser failed"
                );
            }
        }
    }
    None
}

pub struct BuiltinAdviserRegistrar {
    sweeping_outputs: SweepingOutputService,
}

impl BuiltinAdviserRegistrar {
    pub fn new(sweeping_outputs: SweepingOutputService) -> Self {
        Self { sweeping_outputs }
    }
}

impl AdviserRegistrar for BuiltinAdviserRegistrar {
    fn register_advisers(
        &self,
        registry: &mut AdviserRegistry,
    ) -> std::result::Result<(), RegistryError> {
        registry.register(NEXT_STEP, Arc::new(NextStepAdviser))?;
        registry.register(ON_SUCCESS, Arc::new(OnSuccessAdviser))?;
        registry.register(ON_FAIL, Arc::new(OnFailAdviser))?;
        registry.register(IGNORE, Arc::new(IgnoreAdviser))?;
        registry.register(RETRY, Arc::new(RetryAdviser))?;
        registry.register(END_PLAN, Arc::new(EndPlanAdviser))?;
        registry.register(
            ROLLBACK_MODE,
            Arc::new(RollbackModeAdviser::new(self.sweeping_outputs.clone())),
        )?;
        registry.register(
            ROLLBACK_CUSTOM,
            Arc::new(RollbackCustomAdviser::new(self.sweeping_outputs.clone())),
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OrchestratorError;
    use pipeline_core::Level;

    struct FailingAdviser;

    #[async_trait]
    impl Adviser for FailingAdviser {
        async fn can_advise(&self, _event: &AdvisingEvent) -> bool {
            true
        }

        async fn on_advise_event(&self, _event: &AdvisingEvent) -> Result<AdviserResponse> {
            Err(OrchestratorError::step("adviser blew up"))
        }
    }

    fn event(status: Status) -> AdvisingEvent {
        let ambiance = Ambiance::new("plan").with_level(Level::new("rt", "n", "NOOP", "n"));
        AdvisingEvent::new(ambiance, "rt", status)
    }

    fn registries() -> Registries {
        Registries::builder()
            .adviser("FAILING", Arc::new(FailingAdviser))
            .unwrap()
            .adviser(NEXT_STEP, Arc::new(NextStepAdviser))
            .unwrap()
            .adviser(ON_FAIL, Arc::new(OnFailAdviser))
            .unwrap()
            .build()
    }

    #[tokio::test]
    async fn test_first_accepting_adviser_decides() {
        let obtainments = vec![
            AdviserObtainment::new(ON_FAIL)
                .with_parameters(serde_json::json!({ "next_node_id": "cleanup" })),
            AdviserObtainment::new(NEXT_STEP)
                .with_parameters(serde_json::json!({ "next_node_id": "deploy" })),
        ];

        let success = advise_in_order(&registries(), &obtainments, &event(Status::Succeeded)).await;
        assert_eq!(success.unwrap().next_node_id(), Some("deploy"));

        let failure = advise_in_order(&registries(), &obtainments, &event(Status::Failed)).await;
        assert_eq!(failure.unwrap().next_node_id(), Some("cleanup"));
    }

    #[tokio::test]
    async fn test_failing_and_unknown_advisers_are_skipped() {
        let obtainments = vec![
            AdviserObtainment::new("MISSING"),
            AdviserObtainment::new("FAILING"),
            AdviserObtainment::new(NEXT_STEP),
        ];
        let response = advise_in_order(&registries(), &obtainments, &event(Status::Succeeded)).await;
        assert_eq!(response, Some(AdviserResponse::next_step("")));
    }

    #[tokio::test]
    async fn test_no_adviser_accepts() {
        let obtainments = vec![AdviserObtainment::new(NEXT_STEP)];
        assert!(advise_in_order(&registries(), &obtainments, &event(Status::Failed))
            .await
            .is_none());
    }

    #[test]
    fn test_failure_matches() {
        let types = BTreeSet::from([FailureType::Timeout]);
        let timeout = event(Status::Failed)
            .with_failure(Some(FailureInfo::new("slow").with_type(FailureType::Timeout)));
        let other = event(Status::Failed).with_failure(Some(FailureInfo::new("bad")));

        assert!(timeout.failure_matches(&types));
        assert!(!other.failure_matches(&types));
        assert!(other.failure_matches(&BTreeSet::new()));
        assert!(!event(Status::Failed).failure_matches(&types));
    }
}
