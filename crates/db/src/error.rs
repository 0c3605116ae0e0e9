use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Plan execution not found: {0}")]
    PlanExecutionNotFound(String),

    #[error("Node execution not found: {0}")]
    NodeExecutionNotFound(String),

    #[error("Wait {0} has no correlation ids")]
    EmptyWait(String),

    #[error("Correlation id {0} is already waited on")]
    AlreadyWaitedOn(String),

    #[error("Correlation id {0} was already notified")]
    AlreadyNotified(String),

    #[error("Output {name} already published at scope {scope}")]
    DuplicateOutput { name: String, scope: String },
}
