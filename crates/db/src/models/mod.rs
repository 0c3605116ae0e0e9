mod execution_output;
mod node_execution;
mod plan_execution;
mod wait;

pub use execution_output::*;
pub use node_execution::*;
pub use plan_execution::*;
pub use wait::*;

use chrono::{DateTime, TimeZone, Utc};

pub(crate) fn timestamp_to_datetime(ts: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ts).single().unwrap_or_default()
}

pub(crate) fn datetime_to_timestamp(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}
