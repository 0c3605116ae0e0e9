use pipeline_core::{PlanExecution, Status};

use super::{datetime_to_timestamp, timestamp_to_datetime};
use crate::error::DbError;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PlanExecutionRow {
    pub id: String,
    pub plan: String,
    pub setup_abstractions: String,
    pub status: String,
    pub created_at: i64,
    pub updated_at: i64,
    pub end_ts: Option<i64>,
}

impl PlanExecutionRow {
    pub fn into_domain(self) -> Result<PlanExecution, DbError> {
        Ok(PlanExecution {
            id: self.id,
            plan: serde_json::from_str(&self.plan)?,
            setup_abstractions: serde_json::from_str(&self.setup_abstractions)?,
            status: Status::parse(&self.status).unwrap_or_default(),
            created_at: timestamp_to_datetime(self.created_at),
            updated_at: timestamp_to_datetime(self.updated_at),
            end_ts: self.end_ts.map(timestamp_to_datetime),
        })
    }

    pub fn try_from_domain(execution: &PlanExecution) -> Result<Self, DbError> {
        Ok(Self {
            id: execution.id.clone(),
            plan: serde_json::to_string(&execution.plan)?,
            setup_abstractions: serde_json::to_string(&execution.setup_abstractions)?,
            status: execution.status.as_str().to_string(),
            created_at: datetime_to_timestamp(execution.created_at),
            updated_at: datetime_to_timestamp(execution.updated_at),
            end_ts: execution.end_ts.map(datetime_to_timestamp),
        })
    }
}
