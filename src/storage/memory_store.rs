use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::engine::types::WorkflowState;
use crate::storage::{StateStore, StorageError};

/// In-memory state store.
/// Holds records only for the lifetime of the store instance.
pub struct MemoryStateStore {
    states: RwLock<HashMap<String, WorkflowState>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self {
            states: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryStateStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn put(&self, state: &WorkflowState) -> Result<(), StorageError> {
        self.states
            .write()
            .await
            .insert(state.workflow_id.clone(), state.clone());
        Ok(())
    }

    async fn get(&self, workflow_id: &str) -> Result<Option<WorkflowState>, StorageError> {
        Ok(self.states.read().await.get(workflow_id).cloned())
    }

    async fn list(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.states.read().await.keys().cloned().collect())
    }

    async fn delete(&self, workflow_id: &str) -> Result<(), StorageError> {
        self.states.write().await.remove(workflow_id);
        Ok(())
    }
}
