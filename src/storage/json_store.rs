use std::path::{Path, PathBuf};

use async_trait::async_trait;
use uuid::Uuid;

use crate::engine::types::WorkflowState;
use crate::storage::{StateStore, StorageError, check_record};

/// File-based JSON state store. Each workflow is stored as a separate JSON file.
pub struct JsonStateStore {
    base_dir: PathBuf,
}

impl JsonStateStore {
    pub fn new(base_dir: impl AsRef<Path>) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
        }
    }

    fn state_path(&self, workflow_id: &str) -> Result<PathBuf, StorageError> {
        let valid = !workflow_id.is_empty()
            && !workflow_id.starts_with('.')
            && !workflow_id.contains(['/', '\\'])
            && !workflow_id.contains("..");
        if !valid {
            return Err(StorageError::InvalidId(workflow_id.to_string()));
        }
        Ok(self.base_dir.join(format!("{}.json", workflow_id)))
    }

    fn io_error(path: &Path, source: std::io::Error) -> StorageError {
        StorageError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

#[async_trait]
impl StateStore for JsonStateStore {
    async fn put(&self, state: &WorkflowState) -> Result<(), StorageError> {
        let path = self.state_path(&state.workflow_id)?;

        tokio::fs::create_dir_all(&self.base_dir)
            .await
            .map_err(|e| Self::io_error(&self.base_dir, e))?;

        let data = serde_json::to_string_pretty(state).map_err(|source| {
            StorageError::Serialization {
                workflow_id: state.workflow_id.clone(),
                source,
            }
        })?;

        // Unique temp name per writer, then an atomic rename over the target.
        let tmp_path = path.with_extension(format!("json.{}.tmp", Uuid::new_v4().simple()));
        tokio::fs::write(&tmp_path, &data)
            .await
            .map_err(|e| Self::io_error(&tmp_path, e))?;
        if let Err(e) = tokio::fs::rename(&tmp_path, &path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(Self::io_error(&path, e));
        }

        Ok(())
    }

    async fn get(&self, workflow_id: &str) -> Result<Option<WorkflowState>, StorageError> {
        let path = self.state_path(workflow_id)?;

        let data = match tokio::fs::read_to_string(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Self::io_error(&path, e)),
        };

        let state: WorkflowState =
            serde_json::from_str(&data).map_err(|source| StorageError::Serialization {
                workflow_id: workflow_id.to_string(),
                source,
            })?;

        if state.workflow_id != workflow_id {
            return Err(StorageError::Corrupt {
                workflow_id: workflow_id.to_string(),
                reason: format!("file holds workflow '{}'", state.workflow_id),
            });
        }

        check_record(state).map(Some)
    }

    async fn list(&self) -> Result<Vec<String>, StorageError> {
        if !self.base_dir.exists() {
            return Ok(Vec::new());
        }

        let mut ids = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.base_dir)
            .await
            .map_err(|e| Self::io_error(&self.base_dir, e))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| Self::io_error(&self.base_dir, e))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json")
                && let Some(stem) = path.file_stem().and_then(|s| s.to_str())
            {
                ids.push(stem.to_string());
            }
        }

        Ok(ids)
    }

    async fn delete(&self, workflow_id: &str) -> Result<(), StorageError> {
        let path = self.state_path(workflow_id)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Self::io_error(&path, e)),
        }
    }
}
