use crate::error::DbError;
use crate::models::NodeExecutionRow;
use pipeline_core::NodeExecution;
use sqlx::SqlitePool;

const SELECT_COLUMNS: &str =
    "SELECT id, plan_execution_id, node_id, parent_id, status, document, created_at, updated_at FROM node_executions";

#[derive(Clone)]
pub struct NodeExecutionRepository {
    pool: SqlitePool,
}

impl NodeExecutionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, node: &NodeExecution) -> Result<NodeExecution, DbError> {
        let row = NodeExecutionRow::try_from_domain(node)?;

        sqlx::query(
            r#"
            INSERT INTO node_executions (id, plan_execution_id, node_id, parent_id, status, document, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&row.id)
        .bind(&row.plan_execution_id)
        .bind(&row.node_id)
        .bind(&row.parent_id)
        .bind(&row.status)
        .bind(&row.document)
        .bind(row.created_at)
        .bind(row.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(node.clone())
    }

    pub async fn find_by_id(&self, id: &str) -> Result<Option<NodeExecution>, DbError> {
        let row: Option<NodeExecutionRow> =
            sqlx::query_as(&format!("{SELECT_COLUMNS} WHERE id = ?"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        row.map(|r| r.into_domain()).transpose()
    }

    pub async fn get(&self, id: &str) -> Result<NodeExecution, DbError> {
        self.find_by_id(id)
            .await?
            .ok_or_else(|| DbError::NodeExecutionNotFound(id.to_string()))
    }

    pub async fn find_by_plan(&self, plan_execution_id: &str) -> Result<Vec<NodeExecution>, DbError> {
        let rows: Vec<NodeExecutionRow> = sqlx::query_as(&format!(
            "{SELECT_COLUMNS} WHERE plan_execution_id = ? ORDER BY created_at ASC, rowid ASC"
        ))
        .bind(plan_execution_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| r.into_domain()).collect()
    }

    pub async fn find_children(&self, parent_id: &str) -> Result<Vec<NodeExecution>, DbError> {
        let rows: Vec<NodeExecutionRow> = sqlx::query_as(&format!(
            "{SELECT_COLUMNS} WHERE parent_id = ? ORDER BY created_at ASC, rowid ASC"
        ))
        .bind(parent_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| r.into_domain()).collect()
    }

    /// Replace the stored record. Fails if it was never created.
    pub async fn update(&self, node: &NodeExecution) -> Result<NodeExecution, DbError> {
        let row = NodeExecutionRow::try_from_domain(node)?;

        let result = sqlx::query(
            r#"
            UPDATE node_executions
            SET status = ?, document = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&row.status)
        .bind(&row.document)
        .bind(row.updated_at)
        .bind(&row.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::NodeExecutionNotFound(node.id.clone()));
        }
        Ok(node.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{create_pool, run_migrations, PlanExecutionRepository};
    use pipeline_core::{Ambiance, Level, Plan, PlanExecution, PlanNode, Status};
    use std::collections::HashMap;

    async fn setup_test_db() -> SqlitePool {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        let plan = Plan::new("a").with_node(PlanNode::new("a", "a", "NOOP"));
        PlanExecutionRepository::new(pool.clone())
            .create(&PlanExecution::new("plan-1", plan, HashMap::new()))
            .await
            .unwrap();
        pool
    }

    fn test_node(runtime_id: &str, parent: Option<&str>) -> NodeExecution {
        let ambiance = Ambiance::new("plan-1").with_level(Level::new(runtime_id, "a", "NOOP", "a"));
        let mut node = NodeExecution::new(runtime_id, ambiance, "a", "a");
        node.parent_id = parent.map(str::to_string);
        node
    }

    #[tokio::test]
    async fn test_create_and_find() {
        let repo = NodeExecutionRepository::new(setup_test_db().await);
        let node = test_node("n-1", None);
        repo.create(&node).await.unwrap();

        let found = repo.get("n-1").await.unwrap();
        assert_eq!(found, node);
        assert!(repo.find_by_id("n-2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_round_trips_document() {
        let repo = NodeExecutionRepository::new(setup_test_db().await);
        let mut node = test_node("n-1", None);
        repo.create(&node).await.unwrap();

        node.set_status(Status::Succeeded);
        node.resolved_step_parameters = serde_json::json!({ "k": "v" });
        repo.update(&node).await.unwrap();

        let found = repo.get("n-1").await.unwrap();
        assert_eq!(found.status, Status::Succeeded);
        assert_eq!(found.resolved_step_parameters["k"], "v");
        assert!(found.end_ts.is_some());
    }

    #[tokio::test]
    async fn test_update_missing_node() {
        let repo = NodeExecutionRepository::new(setup_test_db().await);
        assert!(matches!(
            repo.update(&test_node("ghost", None)).await,
            Err(DbError::NodeExecutionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_find_children_and_by_plan() {
        let repo = NodeExecutionRepository::new(setup_test_db().await);
        repo.create(&test_node("parent", None)).await.unwrap();
        repo.create(&test_node("c-1", Some("parent"))).await.unwrap();
        repo.create(&test_node("c-2", Some("parent"))).await.unwrap();

        let children = repo.find_children("parent").await.unwrap();
        let ids: Vec<_> = children.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["c-1", "c-2"]);

        assert_eq!(repo.find_by_plan("plan-1").await.unwrap().len(), 3);
        assert!(repo.find_by_plan("other").await.unwrap().is_empty());
    }
}
