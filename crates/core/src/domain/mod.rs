mod advise;
mod ambiance;
mod execution;
mod failure;
mod plan;
mod refs;
mod response;
mod status;

pub use advise::*;
pub use ambiance::*;
pub use execution::*;
pub use failure::*;
pub use plan::*;
pub use refs::*;
pub use response::*;
pub use status::*;
