use thiserror::Error;

use crate::engine::types::{ErrorKind, Stage};
use crate::storage::StorageError;

/// Failure raised by a stage handler, tagged with the stage it came from.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{stage} stage failed: {message}")]
pub struct StageError {
    pub stage: Stage,
    pub message: String,
}

impl StageError {
    pub fn new(stage: Stage, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
        }
    }
}

/// Anything that can stop a `run` call.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Stage(#[from] StageError),

    #[error("storage failure: {0}")]
    Storage(#[from] StorageError),

    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Stage(_) => ErrorKind::Stage,
            EngineError::Storage(_) => ErrorKind::Storage,
            EngineError::Unexpected(_) => ErrorKind::Unexpected,
        }
    }
}
