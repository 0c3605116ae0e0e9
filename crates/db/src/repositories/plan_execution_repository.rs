use crate::error::DbError;
use crate::models::{datetime_to_timestamp, PlanExecutionRow};
use chrono::Utc;
use pipeline_core::{PlanExecution, Status};
use sqlx::SqlitePool;

#[derive(Clone)]
pub struct PlanExecutionRepository {
    pool: SqlitePool,
}

impl PlanExecutionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, execution: &PlanExecution) -> Result<PlanExecution, DbError> {
        let row = PlanExecutionRow::try_from_domain(execution)?;

        sqlx::query(
            r#"
            INSERT INTO plan_executions (id, plan, setup_abstractions, status, created_at, updated_at, end_ts)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&row.id)
        .bind(&row.plan)
        .bind(&row.setup_abstractions)
        .bind(&row.status)
        .bind(row.created_at)
        .bind(row.updated_at)
        .bind(row.end_ts)
        .execute(&self.pool)
        .await?;

        Ok(execution.clone())
    }

    pub async fn find_by_id(&self, id: &str) -> Result<Option<PlanExecution>, DbError> {
        let row: Option<PlanExecutionRow> = sqlx::query_as(
            r#"
            SELECT id, plan, setup_abstractions, status, created_at, updated_at, end_ts
            FROM plan_executions
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| r.into_domain()).transpose()
    }

    /// Like [`find_by_id`](Self::find_by_id) but a missing record is an error.
    pub async fn get(&self, id: &str) -> Result<PlanExecution, DbError> {
        self.find_by_id(id)
            .await?
            .ok_or_else(|| DbError::PlanExecutionNotFound(id.to_string()))
    }

    /// Store a new status; final statuses also stamp `end_ts`.
    pub async fn update_status(&self, id: &str, status: Status) -> Result<bool, DbError> {
        let now = datetime_to_timestamp(Utc::now());
        let end_ts = status.is_final().then_some(now);

        let result = sqlx::query(
            r#"
            UPDATE plan_executions
            SET status = ?, updated_at = ?, end_ts = COALESCE(end_ts, ?)
            WHERE id = ?
            "#,
        )
        .bind(status.as_str())
        .bind(now)
        .bind(end_ts)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{create_pool, run_migrations};
    use pipeline_core::{Plan, PlanNode};
    use std::collections::HashMap;

    async fn setup_test_db() -> SqlitePool {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        pool
    }

    fn test_execution(id: &str) -> PlanExecution {
        let plan = Plan::new("a").with_node(PlanNode::new("a", "a", "NOOP"));
        let abstractions = HashMap::from([("accountId".to_string(), "acc".to_string())]);
        PlanExecution::new(id, plan, abstractions)
    }

    #[tokio::test]
    async fn test_create_and_find() {
        let repo = PlanExecutionRepository::new(setup_test_db().await);
        let execution = test_execution("plan-1");
        repo.create(&execution).await.unwrap();

        let found = repo.find_by_id("plan-1").await.unwrap().unwrap();
        assert_eq!(found.plan, execution.plan);
        assert_eq!(found.status, Status::Running);
        assert_eq!(found.setup_abstractions["accountId"], "acc");
        assert!(found.end_ts.is_none());
    }

    #[tokio::test]
    async fn test_get_missing() {
        let repo = PlanExecutionRepository::new(setup_test_db().await);
        assert!(repo.find_by_id("nope").await.unwrap().is_none());
        assert!(matches!(
            repo.get("nope").await,
            Err(DbError::PlanExecutionNotFound(id)) if id == "nope"
        ));
    }

    #[tokio::test]
    async fn test_update_status_sets_end_ts_when_final() {
        let repo = PlanExecutionRepository::new(setup_test_db().await);
        repo.create(&test_execution("plan-1")).await.unwrap();

        assert!(repo.update_status("plan-1", Status::Succeeded).await.unwrap());
        let found = repo.get("plan-1").await.unwrap();
        assert_eq!(found.status, Status::Succeeded);
        assert!(found.end_ts.is_some());

        assert!(!repo.update_status("ghost", Status::Failed).await.unwrap());
    }
}
