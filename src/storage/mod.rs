pub mod json_store;
pub mod memory_store;
pub mod sqlite_store;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::engine::types::WorkflowState;

/// Failures surfaced by a [`StateStore`].
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode or decode workflow '{workflow_id}': {source}")]
    Serialization {
        workflow_id: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("corrupt record for workflow '{workflow_id}': {reason}")]
    Corrupt { workflow_id: String, reason: String },

    #[error("invalid workflow id '{0}'")]
    InvalidId(String),
}

/// Durable keyed persistence for workflow records.
///
/// `put` replaces the whole record; readers never see a partial write.
/// Concurrent puts to the same id are last-write-wins.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Insert or replace the record for `state.workflow_id`.
    async fn put(&self, state: &WorkflowState) -> Result<(), StorageError>;

    /// Latest record for `workflow_id`, or `None` if it was never stored.
    async fn get(&self, workflow_id: &str) -> Result<Option<WorkflowState>, StorageError>;

    /// All known workflow ids, in no particular order.
    async fn list(&self) -> Result<Vec<String>, StorageError>;

    /// Remove a record. Removing an unknown id is not an error.
    async fn delete(&self, workflow_id: &str) -> Result<(), StorageError>;
}

/// Available store backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Sqlite,
    Json,
    Memory,
}

impl Backend {
    /// Default location for the backend's data.
    pub fn default_path(self) -> &'static str {
        match self {
            Backend::Sqlite => "data/workflow_states.db",
            Backend::Json => "data/workflows",
            Backend::Memory => "",
        }
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Backend::Sqlite => write!(f, "sqlite"),
            Backend::Json => write!(f, "json"),
            Backend::Memory => write!(f, "memory"),
        }
    }
}

impl std::str::FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sqlite" => Ok(Backend::Sqlite),
            "json" => Ok(Backend::Json),
            "memory" => Ok(Backend::Memory),
            other => Err(format!(
                "unknown store backend '{}' (expected sqlite, json or memory)",
                other
            )),
        }
    }
}

/// Open a store of the given kind at `path`.
pub async fn open(backend: Backend, path: &Path) -> Result<Arc<dyn StateStore>, StorageError> {
    let store: Arc<dyn StateStore> = match backend {
        Backend::Sqlite => Arc::new(sqlite_store::SqliteStateStore::open(path).await?),
        Backend::Json => Arc::new(json_store::JsonStateStore::new(path)),
        Backend::Memory => Arc::new(memory_store::MemoryStateStore::new()),
    };
    Ok(store)
}

/// Reject a decoded record that breaks the state invariants.
pub(crate) fn check_record(state: WorkflowState) -> Result<WorkflowState, StorageError> {
    state.validate().map_err(|reason| StorageError::Corrupt {
        workflow_id: state.workflow_id.clone(),
        reason,
    })?;
    Ok(state)
}
