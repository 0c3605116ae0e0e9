mod error;
pub mod models;
mod pool;
pub mod repositories;

pub use error::*;
pub use models::{
    CompletedWaitRecord, ExecutionOutput, NotifyOutcome, OutputKind, WaitStats, PLAN_SCOPE,
};
pub use pool::*;
pub use repositories::*;

pub use sqlx::SqlitePool;
