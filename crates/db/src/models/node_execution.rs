use pipeline_core::NodeExecution;

use super::datetime_to_timestamp;
use crate::error::DbError;

/// Indexed columns plus the full record as a JSON document.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct NodeExecutionRow {
    pub id: String,
    pub plan_execution_id: String,
    pub node_id: String,
    pub parent_id: Option<String>,
    pub status: String,
    pub document: String,
    pub created_at: i64,
    pub updated_at: i64,
}

impl NodeExecutionRow {
    pub fn into_domain(self) -> Result<NodeExecution, DbError> {
        Ok(serde_json::from_str(&self.document)?)
    }

    pub fn try_from_domain(node: &NodeExecution) -> Result<Self, DbError> {
        Ok(Self {
            id: node.id.clone(),
            plan_execution_id: node.plan_execution_id.clone(),
            node_id: node.node_id.clone(),
            parent_id: node.parent_id.clone(),
            status: node.status.as_str().to_string(),
            document: serde_json::to_string(node)?,
            created_at: datetime_to_timestamp(node.created_at),
            updated_at: datetime_to_timestamp(node.updated_at),
        })
    }
}
