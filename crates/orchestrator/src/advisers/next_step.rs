use async_trait::async_trait;
use pipeline_core::{AdviserResponse, FailureType, NextStepAdvise, Status};
use serde::Deserialize;
use std::collections::BTreeSet;
use tracing::warn;

use super::{Adviser, AdvisingEvent, NEXT_STEP, ON_FAIL, ON_SUCCESS};
use crate::error::{parse_parameters, Result};

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct NextStepParameters {
    pub next_node_id: Option<String>,
}

impl NextStepParameters {
    pub(crate) fn into_response(self) -> AdviserResponse {
        AdviserResponse::NextStep(NextStepAdvise::to(self.next_node_id.unwrap_or_default()))
    }
}

/// Continue with the configured sibling unless the node broke or was aborted.
pub struct NextStepAdviser;

#[async_trait]
impl Adviser for NextStepAdviser {
    async fn can_advise(&self, event: &AdvisingEvent) -> bool {
        event.to_status.is_final() && !event.to_status.is_broke_or_aborted()
    }

    async fn on_advise_event(&self, event: &AdvisingEvent) -> Result<AdviserResponse> {
        let params: NextStepParameters = parse_parameters(NEXT_STEP, &event.parameters)?;
        Ok(params.into_response())
    }
}

/// Like [`NextStepAdviser`] but only for a plain `SUCCEEDED`.
pub struct OnSuccessAdviser;

#[async_trait]
impl Adviser for OnSuccessAdviser {
    async fn can_advise(&self, event: &AdvisingEvent) -> bool {
        event.to_status == Status::Succeeded
    }

    async fn on_advise_event(&self, event: &AdvisingEvent) -> Result<AdviserResponse> {
        let params: NextStepParameters = parse_parameters(ON_SUCCESS, &event.parameters)?;
        Ok(params.into_response())
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct OnFailParameters {
    next_node_id: Option<String>,
    failure_types: BTreeSet<FailureType>,
}

/// Route a broke node to a recovery sibling, optionally only for some failure types.
pub struct OnFailAdviser;

#[async_trait]
impl Adviser for OnFailAdviser {
    async fn can_advise(&self, event: &AdvisingEvent) -> bool {
        if !event.to_status.is_broke() {
            return false;
        }
        match parse_parameters::<OnFailParameters>(ON_FAIL, &event.parameters) {
            Ok(params) => event.failure_matches(&params.failure_types),
            Err(e) => {
                warn!(node_execution_id = %event.node_execution_id, error = %e, "Invalid ON_FAIL parameters");
                false
            }
        }
    }

    async fn on_advise_event(&self, event: &AdvisingEvent) -> Result<AdviserResponse> {
        let params: OnFailParameters = parse_parameters(ON_FAIL, &event.parameters)?;
        Ok(AdviserResponse::NextStep(NextStepAdvise::to(
            params.next_node_id.unwrap_or_default(),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipeline_core::{Ambiance, FailureInfo};
    use serde_json::json;

    fn event(status: Status) -> AdvisingEvent {
        AdvisingEvent::new(Ambiance::new("plan"), "rt", status)
    }

    #[tokio::test]
    async fn test_next_step_statuses() {
        let adviser = NextStepAdviser;
        assert!(adviser.can_advise(&event(Status::Succeeded)).await);
        assert!(adviser.can_advise(&event(Status::Skipped)).await);
        assert!(adviser.can_advise(&event(Status::IgnoreFailed)).await);
        assert!(!adviser.can_advise(&event(Status::Failed)).await);
        assert!(!adviser.can_advise(&event(Status::Aborted)).await);
        assert!(!adviser.can_advise(&event(Status::Running)).await);
    }

    #[tokio::test]
    async fn test_next_step_response() {
        let adviser = NextStepAdviser;
        let response = adviser
            .on_advise_event(&event(Status::Succeeded).with_parameters(json!({ "next_node_id": "b" })))
            .await
            .unwrap();
        assert_eq!(response, AdviserResponse::next_step("b"));

        let end = adviser.on_advise_event(&event(Status::Succeeded)).await.unwrap();
        assert_eq!(end.next_node_id(), None);
    }

    #[tokio::test]
    async fn test_on_success_only_for_succeeded() {
        let adviser = OnSuccessAdviser;
        assert!(adviser.can_advise(&event(Status::Succeeded)).await);
        assert!(!adviser.can_advise(&event(Status::IgnoreFailed)).await);
    }

    #[tokio::test]
    async fn test_on_fail_filters_failure_types() {
        let adviser = OnFailAdviser;
        let params = json!({ "next_node_id": "cleanup", "failure_types": ["CONNECTIVITY"] });

        let matching = event(Status::Failed)
            .with_failure(Some(FailureInfo::new("down").with_type(FailureType::Connectivity)))
            .with_parameters(params.clone());
        let other = event(Status::Failed)
            .with_failure(Some(FailureInfo::new("bad")))
            .with_parameters(params);

        assert!(adviser.can_advise(&matching).await);
        assert!(!adviser.can_advise(&other).await);
        assert!(!adviser.can_advise(&event(Status::Succeeded)).await);
        assert_eq!(
            adviser.on_advise_event(&matching).await.unwrap().next_node_id(),
            Some("cleanup")
        );
    }
}
