pub mod errors;
pub mod executor;
pub mod types;

pub use errors::{EngineError, StageError};
pub use executor::WorkflowEngine;
