mod execution_output_repository;
mod node_execution_repository;
mod plan_execution_repository;
mod wait_repository;

pub use execution_output_repository::*;
pub use node_execution_repository::*;
pub use plan_execution_repository::*;
pub use wait_repository::*;
