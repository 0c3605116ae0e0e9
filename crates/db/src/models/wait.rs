use pipeline_core::ResponseMap;

/// A wait whose correlation ids have all been answered.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedWaitRecord {
    pub wait_id: String,
    pub plan_execution_id: String,
    /// Stored as the caller registered it.
    pub callback: serde_json::Value,
    pub responses: ResponseMap,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NotifyOutcome {
    /// Nothing waits on the id yet. The response is kept for the wait that claims it.
    Held,
    /// The wait still has unanswered ids.
    Pending,
    Completed(CompletedWaitRecord),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WaitStats {
    pub open_waits: i64,
    pub completed_waits: i64,
    /// Correlation ids claimed by a wait, answered or not.
    pub correlations: i64,
    pub held_responses: i64,
}

impl WaitStats {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}
