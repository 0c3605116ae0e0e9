use crate::error::DbError;
use crate::models::{ExecutionOutput, ExecutionOutputRow, OutputKind};
use sqlx::SqlitePool;
use tracing::warn;

const SELECT_COLUMNS: &str = "SELECT id, plan_execution_id, kind, name, level_runtime_id_idx, producer_runtime_id, group_name, value, created_at FROM execution_outputs";

#[derive(Clone)]
pub struct ExecutionOutputRepository {
    pool: SqlitePool,
}

impl ExecutionOutputRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Publish a value. A second value with the same name at the same scope is rejected.
    pub async fn save(&self, output: &ExecutionOutput) -> Result<ExecutionOutput, DbError> {
        let row = ExecutionOutputRow::try_from_domain(output)?;

        let result = sqlx::query(
            r#"
            INSERT INTO execution_outputs (id, plan_execution_id, kind, name, level_runtime_id_idx, producer_runtime_id, group_name, value, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&row.id)
        .bind(&row.plan_execution_id)
        .bind(&row.kind)
        .bind(&row.name)
        .bind(&row.level_runtime_id_idx)
        .bind(&row.producer_runtime_id)
        .bind(&row.group_name)
        .bind(&row.value)
        .bind(row.created_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(output.clone()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                warn!(
                    plan_execution_id = %output.plan_execution_id,
                    name = %output.name,
                    scope = %output.level_runtime_id_idx,
                    "Output already published at this scope"
                );
                Err(DbError::DuplicateOutput {
                    name: output.name.clone(),
                    scope: output.level_runtime_id_idx.clone(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn find(
        &self,
        plan_execution_id: &str,
        kind: OutputKind,
        name: &str,
        scope: &str,
    ) -> Result<Option<ExecutionOutput>, DbError> {
        let row: Option<ExecutionOutputRow> = sqlx::query_as(&format!(
            "{SELECT_COLUMNS} WHERE plan_execution_id = ? AND kind = ? AND name = ? AND level_runtime_id_idx = ?"
        ))
        .bind(plan_execution_id)
        .bind(kind.as_str())
        .bind(name)
        .bind(scope)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| r.into_domain()).transpose()
    }

    pub async fn find_by_id(&self, id: &str) -> Result<Option<ExecutionOutput>, DbError> {
        let row: Option<ExecutionOutputRow> =
            sqlx::query_as(&format!("{SELECT_COLUMNS} WHERE id = ?"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        row.map(|r| r.into_domain()).transpose()
    }

    /// Every value of one kind a given node produced, oldest first.
    pub async fn find_by_producer(
        &self,
        plan_execution_id: &str,
        kind: OutputKind,
        producer_runtime_id: &str,
    ) -> Result<Vec<ExecutionOutput>, DbError> {
        let rows: Vec<ExecutionOutputRow> = sqlx::query_as(&format!(
            "{SELECT_COLUMNS} WHERE plan_execution_id = ? AND kind = ? AND producer_runtime_id = ? ORDER BY created_at ASC, rowid ASC"
        ))
        .bind(plan_execution_id)
        .bind(kind.as_str())
        .bind(producer_runtime_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| r.into_domain()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{create_pool, run_migrations, PLAN_SCOPE};
    use serde_json::json;

    async fn setup_test_db() -> SqlitePool {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        pool
    }

    fn output(name: &str, scope: &str) -> ExecutionOutput {
        ExecutionOutput::new("plan-1", OutputKind::SweepingOutput, name, scope, json!({ "v": 1 }))
    }

    #[tokio::test]
    async fn test_save_and_find() {
        let repo = ExecutionOutputRepository::new(setup_test_db().await);
        let saved = repo.save(&output("artifact", "level-1")).await.unwrap();

        let found = repo
            .find("plan-1", OutputKind::SweepingOutput, "artifact", "level-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, saved.id);
        assert_eq!(found.value["v"], 1);

        let by_id = repo.find_by_id(&saved.id).await.unwrap();
        assert!(by_id.is_some());
    }

    #[tokio::test]
    async fn test_scopes_and_kinds_are_separate() {
        let repo = ExecutionOutputRepository::new(setup_test_db().await);
        repo.save(&output("artifact", "level-1")).await.unwrap();

        assert!(repo
            .find("plan-1", OutputKind::SweepingOutput, "artifact", PLAN_SCOPE)
            .await
            .unwrap()
            .is_none());
        assert!(repo
            .find("plan-1", OutputKind::Outcome, "artifact", "level-1")
            .await
            .unwrap()
            .is_none());

        repo.save(&output("artifact", PLAN_SCOPE)).await.unwrap();
    }

    #[tokio::test]
    async fn test_duplicate_at_same_scope_rejected() {
        let repo = ExecutionOutputRepository::new(setup_test_db().await);
        repo.save(&output("artifact", "level-1")).await.unwrap();

        let result = repo.save(&output("artifact", "level-1")).await;
        assert!(matches!(
            result,
            Err(DbError::DuplicateOutput { name, scope }) if name == "artifact" && scope == "level-1"
        ));
    }

    #[tokio::test]
    async fn test_find_by_producer() {
        let repo = ExecutionOutputRepository::new(setup_test_db().await);
        repo.save(&output("a", "s-1").with_producer("node-1")).await.unwrap();
        repo.save(&output("b", "s-1").with_producer("node-1")).await.unwrap();
        repo.save(&output("c", "s-1").with_producer("node-2")).await.unwrap();

        let produced = repo
            .find_by_producer("plan-1", OutputKind::SweepingOutput, "node-1")
            .await
            .unwrap();
        let names: Vec<_> = produced.iter().map(|o| o.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }
}
