use async_trait::async_trait;
use pipeline_core::{
    AdviserResponse, EndPlanAdvise, FailureType, IgnoreFailureAdvise, MarkSuccessAdvise,
    NextStepAdvise, RetryAdvise,
};
use serde::Deserialize;
use std::collections::BTreeSet;
use tracing::{info, warn};

use super::{Adviser, AdvisingEvent, END_PLAN, IGNORE, RETRY};
use crate::error::{parse_parameters, Result};

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct IgnoreParameters {
    next_node_id: Option<String>,
    failure_types: BTreeSet<FailureType>,
}

/// Turn matching failures into `IGNORE_FAILED` and keep going.
pub struct IgnoreAdviser;

#[async_trait]
impl Adviser for IgnoreAdviser {
    async fn can_advise(&self, event: &AdvisingEvent) -> bool {
        if !event.to_status.is_broke() {
            return false;
        }
        parse_parameters::<IgnoreParameters>(IGNORE, &event.parameters)
            .map(|params| event.failure_matches(&params.failure_types))
            .unwrap_or(false)
    }

    async fn on_advise_event(&self, event: &AdvisingEvent) -> Result<AdviserResponse> {
        let params: IgnoreParameters = parse_parameters(IGNORE, &event.parameters)?;
        Ok(AdviserResponse::IgnoreFailure(IgnoreFailureAdvise {
            next_node_id: params.next_node_id.filter(|id| !id.is_empty()),
        }))
    }
}

/// What to do once every retry is spent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RepairAction {
    EndPlan,
    Ignore,
    #[default]
    MarkAsFailure,
    OnFail,
    MarkAsSuccess,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RetryParameters {
    retry_count: usize,
    wait_intervals_secs: Vec<u64>,
    failure_types: BTreeSet<FailureType>,
    repair_action: RepairAction,
    next_node_id: Option<String>,
}

impl RetryParameters {
    fn wait_interval(&self, attempt: usize) -> u64 {
        self.wait_intervals_secs
            .get(attempt)
            .or(self.wait_intervals_secs.last())
            .copied()
            .unwrap_or(0)
    }

    fn repair(self) -> AdviserResponse {
        let next_node_id = self.next_node_id.unwrap_or_default();
        match self.repair_action {
            RepairAction::EndPlan => AdviserResponse::EndPlan(EndPlanAdvise::default()),
            RepairAction::Ignore => AdviserResponse::IgnoreFailure(IgnoreFailureAdvise {
                next_node_id: NextStepAdvise::to(next_node_id).next_node_id,
            }),
            RepairAction::MarkAsSuccess => AdviserResponse::MarkSuccess(MarkSuccessAdvise {
                next_node_id: NextStepAdvise::to(next_node_id).next_node_id,
            }),
            RepairAction::OnFail => AdviserResponse::next_step(next_node_id),
            // Keep the failure and end the sequence.
            RepairAction::MarkAsFailure => AdviserResponse::next_step(""),
        }
    }
}

/// Re-run a broke node up to `retry_count` times, then fall back to a repair action.
pub struct RetryAdviser;

#[async_trait]
impl Adviser for RetryAdviser {
    async fn can_advise(&self, event: &AdvisingEvent) -> bool {
        if !event.to_status.is_broke() {
            return false;
        }
        match parse_parameters::<RetryParameters>(RETRY, &event.parameters) {
            Ok(params) => event.failure_matches(&params.failure_types),
            Err(e) => {
                warn!(node_execution_id = %event.node_execution_id, error = %e, "Invalid RETRY parameters");
                false
            }
        }
    }

    async fn on_advise_event(&self, event: &AdvisingEvent) -> Result<AdviserResponse> {
        let params: RetryParameters = parse_parameters(RETRY, &event.parameters)?;
        if event.retry_count < params.retry_count {
            let wait_interval_secs = params.wait_interval(event.retry_count);
            info!(
                node_execution_id = %event.node_execution_id,
                attempt = event.retry_count + 1,
                max_attempts = params.retry_count,
                wait_interval_secs,
                "Retrying node"
            );
            return Ok(AdviserResponse::Retry(RetryAdvise {
                retry_node_execution_id: event.node_execution_id.clone(),
                wait_interval_secs,
            }));
        }

        info!(
            node_execution_id = %event.node_execution_id,
            repair_action = ?params.repair_action,
            "Retries exhausted"
        );
        Ok(params.repair())
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct EndPlanParameters {
    is_abort: bool,
}

pub struct EndPlanAdviser;

#[async_trait]
impl Adviser for EndPlanAdviser {
    async fn can_advise(&self, event: &AdvisingEvent) -> bool {
        event.to_status.is_broke()
    }

    async fn on_advise_event(&self, event: &AdvisingEvent) -> Result<AdviserResponse> {
        let params: EndPlanParameters = parse_parameters(END_PLAN, &event.parameters)?;
        Ok(AdviserResponse::EndPlan(EndPlanAdvise {
            is_abort: params.is_abort,
        }))
    }
}
