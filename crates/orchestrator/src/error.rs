use db::DbError;
use events::QueueError;
use pipeline_core::{CoreError, ExecutionMode};
use thiserror::Error;

/// Raised while building the registries. Always fatal at startup.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("{kind} type {type_name} is registered more than once")]
    Duplicate {
        kind: &'static str,
        type_name: String,
    },

    #[error("{kind} type must not be empty")]
    EmptyType { kind: &'static str },
}

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("No {kind} registered for type {type_name}")]
    NotRegistered {
        kind: &'static str,
        type_name: String,
    },

    #[error("Plan error: {0}")]
    Plan(#[from] CoreError),

    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Step {step_type} cannot run in {mode} mode")]
    StepModeMismatch {
        step_type: String,
        mode: ExecutionMode,
    },

    #[error("No processor for execution mode {0}")]
    ProcessorNotFound(ExecutionMode),

    #[error("Node execution {0} has no execution mode")]
    ModeNotSet(String),

    #[error("Chain state delivered to a {0} node")]
    ChainStateMismatch(ExecutionMode),

    #[error("Output not found: {0}")]
    OutputNotFound(String),

    #[error("No level with group {0} in the current ambiance")]
    OutputScopeNotFound(String),

    #[error("Unsupported event type: {0}")]
    UnsupportedEventType(String),

    #[error("Wait/notify error: {0}")]
    WaitNotify(String),

    #[error("Task dispatch failed: {0}")]
    TaskDispatch(String),

    #[error("Invalid parameters for {context}: {reason}")]
    InvalidParameters { context: String, reason: String },

    #[error("Step failed: {0}")]
    Step(String),

    #[error("Timed out waiting for plan execution {0}")]
    Timeout(String),
}

impl OrchestratorError {
    pub fn not_registered(kind: &'static str, type_name: impl Into<String>) -> Self {
        Self::NotRegistered {
            kind,
            type_name: type_name.into(),
        }
    }

    pub fn invalid_parameters(context: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidParameters {
            context: context.into(),
            reason: reason.into(),
        }
    }

    pub fn step(message: impl Into<String>) -> Self {
        Self::Step(message.into())
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Deserialize a parameters blob, treating `null` as an empty object.
pub fn parse_parameters<T: serde::de::DeserializeOwned>(
    context: &str,
    parameters: &serde_json::Value,
) -> Result<T> {
    let value = if parameters.is_null() {
        serde_json::Value::Object(Default::default())
    } else {
        parameters.clone()
    };
    serde_json::from_value(value)
        .map_err(|e| OrchestratorError::invalid_parameters(context, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, Default)]
    struct Params {
        #[serde(default)]
        next_node_id: Option<String>,
    }

    #[test]
    fn test_parse_null_parameters() {
        let params: Params = parse_parameters("NEXT_STEP", &serde_json::Value::Null).unwrap();
        assert!(params.next_node_id.is_none());
    }

    #[test]
    fn test_parse_invalid_parameters() {
        let result: Result<Params> =
            parse_parameters("NEXT_STEP", &serde_json::json!({ "next_node_id": 3 }));
        assert!(matches!(
            result,
            Err(OrchestratorError::InvalidParameters { context, .. }) if context == "NEXT_STEP"
        ));
    }

    #[test]
    fn test_error_display() {
        let error = OrchestratorError::StepModeMismatch {
            step_type: "NOOP".to_string(),
            mode: ExecutionMode::Child,
        };
        assert_eq!(error.to_string(), "Step NOOP cannot run in CHILD mode");

        let error = RegistryError::Duplicate {
            kind: "adviser",
            type_name: "NEXT_STEP".to_string(),
        };
        assert!(error.to_string().contains("NEXT_STEP"));
    }
}
