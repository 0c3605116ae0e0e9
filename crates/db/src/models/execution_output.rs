use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{datetime_to_timestamp, timestamp_to_datetime};
use crate::error::DbError;

/// Scope key used for values published at plan scope.
pub const PLAN_SCOPE: &str = "";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputKind {
    SweepingOutput,
    Outcome,
}

impl OutputKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SweepingOutput => "sweeping_output",
            Self::Outcome => "outcome",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sweeping_output" => Some(Self::SweepingOutput),
            "outcome" => Some(Self::Outcome),
            _ => None,
        }
    }
}

/// A named value published by a node, visible to everything under its scope.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionOutput {
    pub id: String,
    pub plan_execution_id: String,
    pub kind: OutputKind,
    pub name: String,
    /// Runtime id of the level the value is scoped to, [`PLAN_SCOPE`] for the plan.
    pub level_runtime_id_idx: String,
    pub producer_runtime_id: Option<String>,
    pub group_name: Option<String>,
    pub value: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl ExecutionOutput {
    pub fn new(
        plan_execution_id: impl Into<String>,
        kind: OutputKind,
        name: impl Into<String>,
        level_runtime_id_idx: impl Into<String>,
        value: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            plan_execution_id: plan_execution_id.into(),
            kind,
            name: name.into(),
            level_runtime_id_idx: level_runtime_id_idx.into(),
            producer_runtime_id: None,
            group_name: None,
            value,
            created_at: Utc::now(),
        }
    }

    pub fn with_producer(mut self, runtime_id: impl Into<String>) -> Self {
        self.producer_runtime_id = Some(runtime_id.into());
        self
    }

    pub fn with_group(mut self, group_name: Option<String>) -> Self {
        self.group_name = group_name;
        self
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ExecutionOutputRow {
    pub id: String,
    pub plan_execution_id: String,
    pub kind: String,
    pub name: String,
    pub level_runtime_id_idx: String,
    pub producer_runtime_id: Option<String>,
    pub group_name: Option<String>,
    pub value: String,
    pub created_at: i64,
}

impl ExecutionOutputRow {
    pub fn into_domain(self) -> Result<ExecutionOutput, DbError> {
        Ok(ExecutionOutput {
            id: self.id,
            plan_execution_id: self.plan_execution_id,
            kind: OutputKind::parse(&self.kind).unwrap_or(OutputKind::SweepingOutput),
            name: self.name,
            level_runtime_id_idx: self.level_runtime_id_idx,
            producer_runtime_id: self.producer_runtime_id,
            group_name: self.group_name,
            value: serde_json::from_str(&self.value)?,
            created_at: timestamp_to_datetime(self.created_at),
        })
    }

    pub fn try_from_domain(output: &ExecutionOutput) -> Result<Self, DbError> {
        Ok(Self {
            id: output.id.clone(),
            plan_execution_id: output.plan_execution_id.clone(),
            kind: output.kind.as_str().to_string(),
            name: output.name.clone(),
            level_runtime_id_idx: output.level_runtime_id_idx.clone(),
            producer_runtime_id: output.producer_runtime_id.clone(),
            group_name: output.group_name.clone(),
            value: serde_json::to_string(&output.value)?,
            created_at: datetime_to_timestamp(output.created_at),
        })
    }
}
