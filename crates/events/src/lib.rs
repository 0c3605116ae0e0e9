//! Event plumbing for the execution engine.
//!
//! Two channels live here: the node execution queue that drives the listener,
//! and the broadcast bus that reports engine lifecycle changes to observers.

mod bus;
mod error;
mod queue;
mod types;

pub use bus::EventBus;
pub use error::QueueError;
pub use queue::{channel, QueueConsumer, QueueProducer, QueuedMessage};
pub use types::*;
