//! Advisers that re-route flow while a stage is being rolled back.

use async_trait::async_trait;
use pipeline_core::{levels_contain_identifier, AdviserResponse, Ambiance, Level, Status};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, warn};

use super::next_step::NextStepParameters;
use super::{Adviser, AdvisingEvent, ROLLBACK_MODE};
use crate::error::{parse_parameters, Result};
use crate::services::SweepingOutputService;

/// Published when the remaining steps of a sequence must not run.
pub const STOP_STEPS_SEQUENCE: &str = "stopStepsSequence";
/// Published by the pipeline when a failure started a pipeline-level rollback.
pub const PIPELINE_ROLLBACK_FAILURE_INFO: &str = "pipelineRollbackFailureInfo";
/// Published by a step that picks its own rollback target.
pub const USE_ROLLBACK_STRATEGY: &str = "useRollbackStrategy";

/// Identifier of the plan node that wraps a stage's steps.
const EXECUTION_IDENTIFIER: &str = "execution";

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PipelineRollbackFailureInfo {
    #[serde(default)]
    pub levels_at_failure_point: Vec<Level>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OnFailRollbackOutput {
    #[serde(default)]
    pub next_node_id: String,
}

/// Optional lookup that reports a missing or unreadable output as absent.
async fn optional_output<T: DeserializeOwned>(
    outputs: &SweepingOutputService,
    ambiance: &Ambiance,
    name: &str,
) -> Option<T> {
    let found = match outputs.resolve_optional(ambiance, name).await {
        Ok(found) => found,
        Err(e) => {
            warn!(
                plan_execution_id = %ambiance.plan_execution_id,
                output = %name,
                error = %e,
                "Output lookup failed, treating as absent"
            );
            return None;
        }
    };
    match found.parse::<T>() {
        Ok(value) => value,
        Err(e) => {
            warn!(
                plan_execution_id = %ambiance.plan_execution_id,
                output = %name,
                error = %e,
                "Output has an unexpected shape, treating as absent"
            );
            None
        }
    }
}

/// Decides whether the next step runs while the stage is in rollback mode.
pub struct RollbackModeAdviser {
    sweeping_outputs: SweepingOutputService,
}

impl RollbackModeAdviser {
    pub fn new(sweeping_outputs: SweepingOutputService) -> Self {
        Self { sweeping_outputs }
    }
}

#[async_trait]
impl Adviser for RollbackModeAdviser {
    async fn can_advise(&self, event: &AdvisingEvent) -> bool {
        if event.to_status == Status::Aborted {
            return false;
        }

        let ambiance = &event.ambiance;
        let stop = optional_output::<serde_json::Value>(&self.sweeping_outputs, ambiance, STOP_STEPS_SEQUENCE)
            .await;
        if stop.is_some() {
            debug!(node_execution_id = %event.node_execution_id, "Step sequence stopped");
            return false;
        }

        let under_execution = ambiance.has_level_identifier(EXECUTION_IDENTIFIER);
        match optional_output::<PipelineRollbackFailureInfo>(
            &self.sweeping_outputs,
            ambiance,
            PIPELINE_ROLLBACK_FAILURE_INFO,
        )
        .await
        {
            // Pipeline-level rollback of a stage that itself succeeded.
            None => under_execution,
            Some(info) => {
                levels_contain_identifier(&info.levels_at_failure_point, EXECUTION_IDENTIFIER)
                    == under_execution
            }
        }
    }

    async fn on_advise_event(&self, event: &AdvisingEvent) -> Result<AdviserResponse> {
        let params: NextStepParameters = parse_parameters(ROLLBACK_MODE, &event.parameters)?;
        Ok(params.into_response())
    }
}

/// Sends a broke step to the rollback target chosen by an upstream step.
pub struct RollbackCustomAdviser {
    sweeping_outputs: SweepingOutputService,
}

impl RollbackCustomAdviser {
    pub fn new(sweeping_outputs: SweepingOutputService) -> Self {
        Self { sweeping_outputs }
    }

    async fn strategy(&self, ambiance: &Ambiance) -> Option<OnFailRollbackOutput> {
        optional_output(&self.sweeping_outputs, ambiance, USE_ROLLBACK_STRATEGY).await
    }
}

#[async_trait]
impl Adviser for RollbackCustomAdviser {
    async fn can_advise(&self, event: &AdvisingEvent) -> bool {
        event.to_status.is_broke() && self.strategy(&event.ambiance).await.is_some()
    }

    async fn on_advise_event(&self, event: &AdvisingEvent) -> Result<AdviserResponse> {
        let next_node_id = self
            .strategy(&event.ambiance)
            .await
            .map(|output| output.next_node_id)
            .unwrap_or_default();
        Ok(AdviserResponse::next_step(next_node_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::PLAN_GROUP;
    use db::{create_pool, run_migrations, ExecutionOutputRepository};
    use serde_json::json;

    async fn outputs() -> SweepingOutputService {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        SweepingOutputService::new(ExecutionOutputRepository::new(pool))
    }

    fn stage_level() -> Level {
        Level::new("stage-rt", "S1", "STAGE", "deploy").with_group("STAGE")
    }

    fn execution_ambiance() -> Ambiance {
        Ambiance::new("plan-1")
            .with_level(stage_level())
            .with_level(Level::new("exec-rt", "S2", "SECTION", "EXECUTION"))
    }

    fn stage_ambiance() -> Ambiance {
        Ambiance::new("plan-1").with_level(stage_level())
    }

    #[tokio::test]
    async fn test_rollback_mode_under_execution_without_outputs() {
        let adviser = RollbackModeAdviser::new(outputs().await);
        let event = AdvisingEvent::new(execution_ambiance(), "exec-rt", Status::Succeeded);
        assert!(adviser.can_advise(&event).await);

        let outside = AdvisingEvent::new(stage_ambiance(), "stage-rt", Status::Succeeded);
        assert!(!adviser.can_advise(&outside).await);
    }

    #[tokio::test]
    async fn test_rollback_mode_never_advises_aborted() {
        let adviser = RollbackModeAdviser::new(outputs().await);
        let event = AdvisingEvent::new(execution_ambiance(), "exec-rt", Status::Aborted);
        assert!(!adviser.can_advise(&event).await);
    }

    #[tokio::test]
    async fn test_rollback_mode_stop_steps_sequence() {
        let outputs = outputs().await;
        outputs
            .consume(&execution_ambiance(), STOP_STEPS_SEQUENCE, json!(true), Some("STAGE"))
            .await
            .unwrap();

        let adviser = RollbackModeAdviser::new(outputs);
        let event = AdvisingEvent::new(execution_ambiance(), "exec-rt", Status::Succeeded);
        assert!(!adviser.can_advise(&event).await);
    }

    #[tokio::test]
    async fn test_rollback_mode_failure_point_under_execution() {
        let outputs = outputs().await;
        let info = PipelineRollbackFailureInfo {
            levels_at_failure_point: execution_ambiance().levels,
        };
        outputs
            .consume(
                &stage_ambiance(),
                PIPELINE_ROLLBACK_FAILURE_INFO,
                serde_json::to_value(&info).unwrap(),
                Some(PLAN_GROUP),
            )
            .await
            .unwrap();

        let adviser = RollbackModeAdviser::new(outputs);
        let inside = AdvisingEvent::new(execution_ambiance(), "exec-rt", Status::Failed);
        assert!(adviser.can_advise(&inside).await);

        let outside = AdvisingEvent::new(stage_ambiance(), "stage-rt", Status::Failed);
        assert!(!adviser.can_advise(&outside).await);
    }

    #[tokio::test]
    async fn test_rollback_mode_failure_point_outside_execution() {
        let outputs = outputs().await;
        let info = PipelineRollbackFailureInfo {
            levels_at_failure_point: stage_ambiance().levels,
        };
        outputs
            .consume(
                &stage_ambiance(),
                PIPELINE_ROLLBACK_FAILURE_INFO,
                serde_json::to_value(&info).unwrap(),
                Some(PLAN_GROUP),
            )
            .await
            .unwrap();

        let adviser = RollbackModeAdviser::new(outputs);
        let outside = AdvisingEvent::new(stage_ambiance(), "stage-rt", Status::Succeeded);
        assert!(adviser.can_advise(&outside).await);
    }

    #[tokio::test]
    async fn test_rollback_custom_without_output() {
        let adviser = RollbackCustomAdviser::new(outputs().await);
        let event = AdvisingEvent::new(execution_ambiance(), "exec-rt", Status::Failed);
        assert!(!adviser.can_advise(&event).await);
    }

    #[tokio::test]
    async fn test_rollback_custom_reroutes_broke_status() {
        let outputs = outputs().await;
        outputs
            .consume(
                &execution_ambiance(),
                USE_ROLLBACK_STRATEGY,
                json!({ "next_node_id": "rollback-steps" }),
                Some("STAGE"),
            )
            .await
            .unwrap();
        let adviser = RollbackCustomAdviser::new(outputs);

        let failed = AdvisingEvent::new(execution_ambiance(), "exec-rt", Status::Failed);
        assert!(adviser.can_advise(&failed).await);
        assert_eq!(
            adviser.on_advise_event(&failed).await.unwrap(),
            AdviserResponse::next_step("rollback-steps")
        );

        let succeeded = AdvisingEvent::new(execution_ambiance(), "exec-rt", Status::Succeeded);
        assert!(!adviser.can_advise(&succeeded).await);
    }

    #[tokio::test]
    async fn test_rollback_custom_empty_next_node_is_omitted() {
        let outputs = outputs().await;
        outputs
            .consume(&execution_ambiance(), USE_ROLLBACK_STRATEGY, json!({}), Some("STAGE"))
            .await
            .unwrap();
        let adviser = RollbackCustomAdviser::new(outputs);

        let event = AdvisingEvent::new(execution_ambiance(), "exec-rt", Status::Errored);
        let response = adviser.on_advise_event(&event).await.unwrap();
        assert_eq!(response.next_node_id(), None);
        let json = serde_json::to_string(&response).unwrap();
        assert!(!json.contains("next_node_id"));
    }
}
