//! Domain model for the pipeline execution engine.
//!
//! Everything in this crate is plain serializable data: the engine persists
//! these values between events, so a suspended node is just a record.

pub mod domain;
mod error;

pub use domain::*;
pub use error::CoreError;
