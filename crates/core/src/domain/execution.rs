use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{AdviserResponse, Ambiance, FailureInfo, Status};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionMode {
    Sync,
    Async,
    Child,
    Children,
    ChildChain,
    Task,
    TaskChain,
}

impl ExecutionMode {
    pub const ALL: [ExecutionMode; 7] = [
        Self::Sync,
        Self::Async,
        Self::Child,
        Self::Children,
        Self::ChildChain,
        Self::Task,
        Self::TaskChain,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sync => "SYNC",
            Self::Async => "ASYNC",
            Self::Child => "CHILD",
            Self::Children => "CHILDREN",
            Self::ChildChain => "CHILD_CHAIN",
            Self::Task => "TASK",
            Self::TaskChain => "TASK_CHAIN",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|mode| mode.as_str() == s)
    }

    pub fn is_chain(&self) -> bool {
        matches!(self, Self::ChildChain | Self::TaskChain)
    }
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a node should execute, decided before it starts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FacilitatorResponse {
    pub execution_mode: ExecutionMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pass_through_data: Option<String>,
}

impl FacilitatorResponse {
    pub fn new(execution_mode: ExecutionMode) -> Self {
        Self {
            execution_mode,
            pass_through_data: None,
        }
    }

    pub fn with_pass_through(mut self, data: impl Into<String>) -> Self {
        self.pass_through_data = Some(data.into());
        self
    }
}

/// Per-mode record of what a node asked for when it started or continued.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "mode", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutableResponse {
    Sync,
    Async {
        callback_ids: Vec<String>,
    },
    Child {
        child_node_id: String,
    },
    Children {
        child_node_ids: Vec<String>,
    },
    ChildChain {
        next_child_id: Option<String>,
        #[serde(default)]
        pass_through: Vec<u8>,
        last_link: bool,
    },
    Task {
        task_id: String,
    },
    TaskChain {
        task_id: String,
        #[serde(default)]
        pass_through: Vec<u8>,
        chain_end: bool,
    },
}

pub const CONTINUATION_VERSION: u32 = 1;

/// Typed resume-time state for chained executables.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Continuation {
    /// Raw bytes handed back to the child-chain step untouched.
    ChildChain(Vec<u8>),
    /// Decoded pass-through value of a task-chain link.
    TaskChain(serde_json::Value),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChainDetails {
    pub version: u32,
    pub should_end: bool,
    pub continuation: Continuation,
}

impl ChainDetails {
    pub fn new(should_end: bool, continuation: Continuation) -> Self {
        Self {
            version: CONTINUATION_VERSION,
            should_end,
            continuation,
        }
    }
}

/// Persisted record of one plan-node execution instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeExecution {
    /// Also the runtime id of this node's level in the ambiance.
    pub id: String,
    pub plan_execution_id: String,
    pub node_id: String,
    pub identifier: String,
    pub ambiance: Ambiance,
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<ExecutionMode>,
    #[serde(default)]
    pub resolved_step_parameters: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_id: Option<String>,
    /// Correlation id someone waits on for this node's (or its sequence's) end.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notify_id: Option<String>,
    #[serde(default)]
    pub executable_responses: Vec<ExecutableResponse>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_info: Option<FailureInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adviser_response: Option<AdviserResponse>,
    #[serde(default)]
    pub retry_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_ts: Option<DateTime<Utc>>,
}

impl NodeExecution {
    pub fn new(
        id: impl Into<String>,
        ambiance: Ambiance,
        node_id: impl Into<String>,
        identifier: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            plan_execution_id: ambiance.plan_execution_id.clone(),
            node_id: node_id.into(),
            identifier: identifier.into(),
            ambiance,
            status: Status::Queued,
            mode: None,
            resolved_step_parameters: serde_json::Value::Null,
            parent_id: None,
            previous_id: None,
            notify_id: None,
            executable_responses: Vec::new(),
            failure_info: None,
            adviser_response: None,
            retry_ids: Vec::new(),
            created_at: now,
            updated_at: now,
            end_ts: None,
        }
    }

    pub fn new_runtime_id() -> String {
        Uuid::new_v4().to_string()
    }

    pub fn set_status(&mut self, status: Status) {
        self.status = status;
        self.updated_at = Utc::now();
        if status.is_final() && self.end_ts.is_none() {
            self.end_ts = Some(self.updated_at);
        }
    }

    pub fn last_executable_response(&self) -> Option<&ExecutableResponse> {
        self.executable_responses.last()
    }

    pub fn is_final(&self) -> bool {
        self.status.is_final()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Level;

    #[test]
    fn test_mode_strings() {
        for mode in ExecutionMode::ALL {
            assert_eq!(ExecutionMode::parse(mode.as_str()), Some(mode));
        }
        assert_eq!(ExecutionMode::parse("LATER"), None);
        assert!(ExecutionMode::TaskChain.is_chain());
        assert!(!ExecutionMode::Children.is_chain());
    }

    #[test]
    fn test_node_execution_status_sets_end_ts() {
        let ambiance = Ambiance::new("plan").with_level(Level::new("r", "s", "NOOP", "a"));
        let mut node = NodeExecution::new("r", ambiance, "s", "a");
        assert_eq!(node.plan_execution_id, "plan");
        assert_eq!(node.status, Status::Queued);

        node.set_status(Status::Running);
        assert!(node.end_ts.is_none());

        node.set_status(Status::Succeeded);
        assert!(node.end_ts.is_some());
        assert!(node.is_final());
    }

    #[test]
    fn test_executable_response_tagging() {
        let response = ExecutableResponse::TaskChain {
            task_id: "t-1".to_string(),
            pass_through: b"{}".to_vec(),
            chain_end: false,
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["mode"], "TASK_CHAIN");

        let back: ExecutableResponse = serde_json::from_value(json).unwrap();
        assert_eq!(back, response);
    }

    #[test]
    fn test_chain_details_carry_version() {
        let details = ChainDetails::new(true, Continuation::ChildChain(vec![1, 2]));
        assert_eq!(details.version, CONTINUATION_VERSION);
        let json = serde_json::to_value(&details).unwrap();
        assert_eq!(json["continuation"]["kind"], "CHILD_CHAIN");
    }
}
