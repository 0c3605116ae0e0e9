use chrono::Utc;
use pipeline_core::{ResponseData, ResponseMap};
use sqlx::{SqliteConnection, SqlitePool};
use std::time::Duration;
use tracing::debug;

use crate::error::DbError;
use crate::models::{datetime_to_timestamp, CompletedWaitRecord, NotifyOutcome, WaitStats};

/// Correlation-id waits, kept in the database so a suspended node can be
/// resumed by whichever process receives its responses.
#[derive(Clone)]
pub struct WaitRepository {
    pool: SqlitePool,
}

impl WaitRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Register a wait on `correlation_ids`, claiming responses already held
    /// for them. Returns the completed wait when nothing is left to arrive.
    pub async fn register(
        &self,
        wait_id: &str,
        plan_execution_id: &str,
        callback: &serde_json::Value,
        correlation_ids: &[String],
    ) -> Result<Option<CompletedWaitRecord>, DbError> {
        if correlation_ids.is_empty() {
            return Err(DbError::EmptyWait(wait_id.to_string()));
        }
        let now = datetime_to_timestamp(Utc::now());
        let mut tx = self.pool.begin().await?;

        for id in correlation_ids {
            let existing: Option<(Option<String>,)> =
                sqlx::query_as("SELECT wait_id FROM wait_correlations WHERE correlation_id = ?")
                    .bind(id)
                    .fetch_optional(&mut *tx)
                    .await?;
            if matches!(existing, Some((Some(_),))) {
                return Err(DbError::AlreadyWaitedOn(id.clone()));
            }
        }

        sqlx::query(
            "INSERT INTO waits (id, plan_execution_id, callback, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(wait_id)
        .bind(plan_execution_id)
        .bind(serde_json::to_string(callback)?)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        for id in correlation_ids {
            sqlx::query(
                r#"
                INSERT INTO wait_correlations (correlation_id, wait_id, plan_execution_id, created_at)
                VALUES (?, ?, ?, ?)
                ON CONFLICT(correlation_id) DO UPDATE
                SET wait_id = excluded.wait_id, plan_execution_id = excluded.plan_execution_id
                "#,
            )
            .bind(id)
            .bind(wait_id)
            .bind(plan_execution_id)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        let completed = take_if_complete(&mut tx, wait_id, now).await?;
        tx.commit().await?;
        Ok(completed)
    }

    /// Store the response for one correlation id. Each id is answered at most once.
    pub async fn notify(
        &self,
        correlation_id: &str,
        response: &ResponseData,
    ) -> Result<NotifyOutcome, DbError> {
        let now = datetime_to_timestamp(Utc::now());
        let encoded = serde_json::to_string(response)?;
        let mut tx = self.pool.begin().await?;

        let existing: Option<(Option<String>, Option<String>)> = sqlx::query_as(
            "SELECT wait_id, response FROM wait_correlations WHERE correlation_id = ?",
        )
        .bind(correlation_id)
        .fetch_optional(&mut *tx)
        .await?;

        let wait_id = match existing {
            Some((_, Some(_))) => {
                return Err(DbError::AlreadyNotified(correlation_id.to_string()));
            }
            Some((wait_id, None)) => {
                sqlx::query(
                    "UPDATE wait_correlations SET response = ?, notified_at = ? WHERE correlation_id = ?",
                )
                .bind(&encoded)
                .bind(now)
                .bind(correlation_id)
                .execute(&mut *tx)
                .await?;
                wait_id
            }
            None => {
                sqlx::query(
                    r#"
                    INSERT INTO wait_correlations (correlation_id, response, notified_at, created_at)
                    VALUES (?, ?, ?, ?)
                    "#,
                )
                .bind(correlation_id)
                .bind(&encoded)
                .bind(now)
                .bind(now)
                .execute(&mut *tx)
                .await?;
                None
            }
        };

        let outcome = match wait_id {
            Some(wait_id) => match take_if_complete(&mut tx, &wait_id, now).await? {
                Some(completed) => NotifyOutcome::Completed(completed),
                None => NotifyOutcome::Pending,
            },
            None => NotifyOutcome::Held,
        };
        tx.commit().await?;
        Ok(outcome)
    }

    /// Drop every wait and correlation id of a plan execution.
    pub async fn purge_plan(&self, plan_execution_id: &str) -> Result<(), DbError> {
        let mut tx = self.pool.begin().await?;
        let correlations = sqlx::query("DELETE FROM wait_correlations WHERE plan_execution_id = ?")
            .bind(plan_execution_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        let waits = sqlx::query("DELETE FROM waits WHERE plan_execution_id = ?")
            .bind(plan_execution_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;

        debug!(
            plan_execution_id = %plan_execution_id,
            waits,
            correlations,
            "Purged waits"
        );
        Ok(())
    }

    /// Drop held responses no wait claimed within `older_than`. Returns how many went.
    pub async fn purge_held(&self, older_than: Duration) -> Result<u64, DbError> {
        let cutoff = chrono::Duration::from_std(older_than)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age))
            .unwrap_or_default();
        let result = sqlx::query(
            "DELETE FROM wait_correlations WHERE wait_id IS NULL AND created_at <= ?",
        )
        .bind(datetime_to_timestamp(cutoff))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn stats(&self) -> Result<WaitStats, DbError> {
        let (open_waits, completed_waits, correlations, held_responses): (i64, i64, i64, i64) =
            sqlx::query_as(
                r#"
                SELECT
                    (SELECT COUNT(*) FROM waits WHERE completed_at IS NULL),
                    (SELECT COUNT(*) FROM waits WHERE completed_at IS NOT NULL),
                    (SELECT COUNT(*) FROM wait_correlations WHERE wait_id IS NOT NULL),
                    (SELECT COUNT(*) FROM wait_correlations WHERE wait_id IS NULL)
                "#,
            )
            .fetch_one(&self.pool)
            .await?;

        Ok(WaitStats {
            open_waits,
            completed_waits,
            correlations,
            held_responses,
        })
    }
}

/// Close the wait once every id is answered, collecting its responses.
async fn take_if_complete(
    conn: &mut SqliteConnection,
    wait_id: &str,
    now: i64,
) -> Result<Option<CompletedWaitRecord>, DbError> {
    let (unanswered,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM wait_correlations WHERE wait_id = ? AND response IS NULL",
    )
    .bind(wait_id)
    .fetch_one(&mut *conn)
    .await?;
    if unanswered > 0 {
        return Ok(None);
    }

    let wait: Option<(String, String)> = sqlx::query_as(
        "SELECT plan_execution_id, callback FROM waits WHERE id = ? AND completed_at IS NULL",
    )
    .bind(wait_id)
    .fetch_optional(&mut *conn)
    .await?;
    let Some((plan_execution_id, callback)) = wait else {
        return Ok(None);
    };

    let rows: Vec<(String, Option<String>)> = sqlx::query_as(
        "SELECT correlation_id, response FROM wait_correlations WHERE wait_id = ?",
    )
    .bind(wait_id)
    .fetch_all(&mut *conn)
    .await?;
    let mut responses = ResponseMap::new();
    for (correlation_id, response) in rows {
        if let Some(response) = response {
            responses.insert(correlation_id, serde_json::from_str(&response)?);
        }
    }

    sqlx::query("UPDATE waits SET completed_at = ? WHERE id = ?")
        .bind(now)
        .bind(wait_id)
        .execute(&mut *conn)
        .await?;

    Ok(Some(CompletedWaitRecord {
        wait_id: wait_id.to_string(),
        plan_execution_id,
        callback: serde_json::from_str(&callback)?,
        responses,
    }))
}
