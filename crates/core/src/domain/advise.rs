use serde::{Deserialize, Serialize};

use super::Status;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AdviseType {
    NextStep,
    Retry,
    EndPlan,
    IgnoreFailure,
    MarkSuccess,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct NextStepAdvise {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_node_id: Option<String>,
}

impl NextStepAdvise {
    /// Empty ids mean "no next node" and are never carried as a value.
    pub fn to(next_node_id: impl Into<String>) -> Self {
        let id = next_node_id.into();
        Self {
            next_node_id: (!id.is_empty()).then_some(id),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetryAdvise {
    pub retry_node_execution_id: String,
    #[serde(default)]
    pub wait_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct EndPlanAdvise {
    #[serde(default)]
    pub is_abort: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct IgnoreFailureAdvise {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_node_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct MarkSuccessAdvise {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_node_id: Option<String>,
}

/// What happens after a node reaches a terminal status.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AdviserResponse {
    NextStep(NextStepAdvise),
    Retry(RetryAdvise),
    EndPlan(EndPlanAdvise),
    IgnoreFailure(IgnoreFailureAdvise),
    MarkSuccess(MarkSuccessAdvise),
}

impl AdviserResponse {
    pub fn next_step(next_node_id: impl Into<String>) -> Self {
        Self::NextStep(NextStepAdvise::to(next_node_id))
    }

    pub fn advise_type(&self) -> AdviseType {
        match self {
            Self::NextStep(_) => AdviseType::NextStep,
            Self::Retry(_) => AdviseType::Retry,
            Self::EndPlan(_) => AdviseType::EndPlan,
            Self::IgnoreFailure(_) => AdviseType::IgnoreFailure,
            Self::MarkSuccess(_) => AdviseType::MarkSuccess,
        }
    }

    /// Node to continue with, for the advise types that continue the sequence.
    pub fn next_node_id(&self) -> Option<&str> {
        match self {
            Self::NextStep(advise) => advise.next_node_id.as_deref(),
            Self::IgnoreFailure(advise) => advise.next_node_id.as_deref(),
            Self::MarkSuccess(advise) => advise.next_node_id.as_deref(),
            Self::Retry(_) | Self::EndPlan(_) => None,
        }
    }

    /// Status override applied to the advised node before continuing.
    pub fn status_override(&self) -> Option<Status> {
        match self {
            Self::IgnoreFailure(_) => Some(Status::IgnoreFailed),
            Self::MarkSuccess(_) => Some(Status::Succeeded),
            _ => None,
        }
    }
}
