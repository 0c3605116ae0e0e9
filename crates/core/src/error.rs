use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Plan node not found: {0}")]
    PlanNodeNotFound(String),

    #[error("Start node {0} is not part of the plan")]
    MissingStartNode(String),

    #[error("Plan node key {key} does not match node uuid {uuid}")]
    NodeKeyMismatch { key: String, uuid: String },

    #[error("Validation error: {0}")]
    Validation(String),
}
