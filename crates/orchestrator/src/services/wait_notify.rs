//! Correlation-id join barrier.
//!
//! A wait is registered on a set of correlation ids and completes once every id
//! has been notified. Responses that arrive before their wait is registered are
//! held until it is. Every id is notified at most once. Waits live in the
//! database, so a response can complete a wait registered by another process.

use db::{CompletedWaitRecord, DbError, NotifyOutcome, WaitRepository, WaitStats};
use pipeline_core::{ResponseData, ResponseMap};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::error::{OrchestratorError, Result};

/// What to do once a wait completes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WaitCallback {
    /// The node's facilitation decision arrived.
    Facilitated { node_execution_id: String },
    /// Everything the suspended node waits on has arrived.
    Resume { node_execution_id: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompletedWait {
    pub callback: WaitCallback,
    pub responses: ResponseMap,
}

impl CompletedWait {
    fn from_record(record: CompletedWaitRecord) -> Result<Self> {
        Ok(Self {
            callback: serde_json::from_value(record.callback)?,
            responses: record.responses,
        })
    }
}

pub struct WaitNotifyEngine {
    waits: WaitRepository,
    // Registration and notification each read then write; one at a time per process.
    lock: Mutex<()>,
}

impl WaitNotifyEngine {
    pub fn new(waits: WaitRepository) -> Self {
        Self {
            waits,
            lock: Mutex::new(()),
        }
    }

    /// Register a wait. Returns the completed wait straight away when every id
    /// was already notified.
    pub async fn wait_for_all(
        &self,
        plan_execution_id: &str,
        correlation_ids: Vec<String>,
        callback: WaitCallback,
    ) -> Result<Option<CompletedWait>> {
        let wait_id = Uuid::new_v4().to_string();
        let encoded = serde_json::to_value(&callback)?;

        let _guard = self.lock.lock().await;
        let completed = self
            .waits
            .register(&wait_id, plan_execution_id, &encoded, &correlation_ids)
            .await
            .map_err(wait_error)?;
        debug!(
            wait_id = %wait_id,
            pending = correlation_ids.len(),
            callback = ?callback,
            completed = completed.is_some(),
            "Wait registered"
        );
        completed.map(CompletedWait::from_record).transpose()
    }

    /// Deliver the response for one correlation id. Returns the wait it
    /// completed, if any.
    pub async fn done_with(
        &self,
        correlation_id: &str,
        data: ResponseData,
    ) -> Result<Option<CompletedWait>> {
        let _guard = self.lock.lock().await;
        match self
            .waits
            .notify(correlation_id, &data)
            .await
            .map_err(wait_error)?
        {
            NotifyOutcome::Held => {
                debug!(correlation_id = %correlation_id, "Holding response until a wait registers");
                Ok(None)
            }
            NotifyOutcome::Pending => Ok(None),
            NotifyOutcome::Completed(record) => CompletedWait::from_record(record).map(Some),
        }
    }

    /// Forget the waits of a finished plan, along with held responses older
    /// than `held_ttl` that no wait ever claimed.
    pub async fn purge(&self, plan_execution_id: &str, held_ttl: Duration) -> Result<()> {
        let _guard = self.lock.lock().await;
        self.waits.purge_plan(plan_execution_id).await?;

        let dropped = self.waits.purge_held(held_ttl).await?;
        if dropped > 0 {
            debug!(dropped, "Dropped unclaimed responses");
        }
        Ok(())
    }

    pub async fn pending_waits(&self) -> Result<i64> {
        Ok(self.stats().await?.open_waits)
    }

    pub async fn stats(&self) -> Result<WaitStats> {
        Ok(self.waits.stats().await?)
    }
}

fn wait_error(error: DbError) -> OrchestratorError {
    match error {
        DbError::EmptyWait(_) | DbError::AlreadyWaitedOn(_) | DbError::AlreadyNotified(_) => {
            OrchestratorError::WaitNotify(error.to_string())
        }
        other => other.into(),
    }
}
