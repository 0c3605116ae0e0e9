use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use super::{AdviserResponse, FacilitatorResponse, FailureInfo, FailureType, Status};

/// A value a step publishes as its outcome when it finishes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepOutcome {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    pub outcome: serde_json::Value,
}

/// Result a step hands back to the engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepResponse {
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_info: Option<FailureInfo>,
    #[serde(default)]
    pub step_outcomes: Vec<StepOutcome>,
}

impl StepResponse {
    pub fn with_status(status: Status) -> Self {
        Self {
            status,
            failure_info: None,
            step_outcomes: Vec::new(),
        }
    }

    pub fn succeeded() -> Self {
        Self::with_status(Status::Succeeded)
    }

    pub fn failed(failure_info: FailureInfo) -> Self {
        Self {
            status: Status::Failed,
            failure_info: Some(failure_info),
            step_outcomes: Vec::new(),
        }
    }

    pub fn errored(failure_info: FailureInfo) -> Self {
        Self {
            status: Status::Errored,
            failure_info: Some(failure_info),
            step_outcomes: Vec::new(),
        }
    }

    pub fn with_outcome(mut self, name: impl Into<String>, outcome: serde_json::Value) -> Self {
        self.step_outcomes.push(StepOutcome {
            name: name.into(),
            group: None,
            outcome,
        });
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StepOutcomeRef {
    pub name: String,
    pub instance_id: String,
}

/// Envelope a finished child (or sequence) reports to whoever waits on it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepResponseNotifyData {
    pub node_uuid: String,
    pub identifier: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_info: Option<FailureInfo>,
    #[serde(default)]
    pub step_outcome_refs: Vec<StepOutcomeRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adviser_response: Option<AdviserResponse>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FailureResponseData {
    pub error_message: String,
    #[serde(default)]
    pub failure_types: BTreeSet<FailureType>,
}

impl FailureResponseData {
    pub fn new(error_message: impl Into<String>) -> Self {
        Self {
            error_message: error_message.into(),
            failure_types: BTreeSet::new(),
        }
    }

    pub fn into_failure_info(self) -> FailureInfo {
        FailureInfo {
            error_message: self.error_message,
            failure_types: self.failure_types,
        }
    }
}

impl From<FailureInfo> for FailureResponseData {
    fn from(info: FailureInfo) -> Self {
        Self {
            error_message: info.error_message,
            failure_types: info.failure_types,
        }
    }
}

/// Work handed to an out-of-process worker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskRequest {
    pub task_type: String,
    #[serde(default)]
    pub parameters: serde_json::Value,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl TaskRequest {
    pub fn new(task_type: impl Into<String>, parameters: serde_json::Value) -> Self {
        Self {
            task_type: task_type.into(),
            parameters,
            timeout_secs: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskResult {
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Data delivered to a waiting correlation id. Failures travel as values.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResponseData {
    StepNotify(StepResponseNotifyData),
    Task(TaskResult),
    Facilitation(FacilitatorResponse),
    Failure(FailureResponseData),
}

impl ResponseData {
    pub fn failure(error_message: impl Into<String>) -> Self {
        Self::Failure(FailureResponseData::new(error_message))
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure(_))
    }

    /// Status carried by a child notification, if this is one.
    pub fn step_status(&self) -> Option<Status> {
        match self {
            Self::StepNotify(data) => Some(data.status),
            _ => None,
        }
    }
}

pub type ResponseMap = BTreeMap<String, ResponseData>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ExecutionMode;

    #[test]
    fn test_step_response_builders() {
        let response = StepResponse::succeeded().with_outcome("artifact", serde_json::json!(1));
        assert_eq!(response.status, Status::Succeeded);
        assert_eq!(response.step_outcomes.len(), 1);

        let failed = StepResponse::failed(FailureInfo::new("bad"));
        assert_eq!(failed.status, Status::Failed);
        assert_eq!(failed.failure_info.unwrap().error_message, "bad");
    }

    #[test]
    fn test_response_data_tagging() {
        let data = ResponseData::Facilitation(FacilitatorResponse::new(ExecutionMode::Sync));
        let json = serde_json::to_value(&data).unwrap();
        assert_eq!(json["kind"], "FACILITATION");
        assert_eq!(json["data"]["execution_mode"], "SYNC");

        let failure = ResponseData::failure("FacilitatorResponse is null");
        assert!(failure.is_failure());
        assert_eq!(failure.step_status(), None);
    }

    #[test]
    fn test_failure_response_conversion() {
        let info = FailureInfo::new("timeout").with_type(FailureType::Timeout);
        let data = FailureResponseData::from(info.clone());
        assert_eq!(data.into_failure_info(), info);
    }
}
