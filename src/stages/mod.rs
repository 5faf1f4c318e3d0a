pub mod builtin;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::engine::errors::StageError;
use crate::engine::types::{Stage, StagePayload, WorkflowInput, WorkflowState};
use crate::textgen::TextGenerator;

/// Trait that all stage implementations must implement.
#[async_trait]
pub trait StageHandler: Send + Sync {
    /// The pipeline slot this handler fills.
    fn stage(&self) -> Stage;

    /// Human-readable description.
    fn description(&self) -> &str;

    /// Execute the stage against the workflow input and the record as it
    /// stood before this attempt.
    async fn execute(
        &self,
        input: &WorkflowInput,
        state: &WorkflowState,
    ) -> Result<StagePayload, StageError>;
}

/// Registry mapping each stage to its handler.
pub struct StageRegistry {
    handlers: HashMap<Stage, Arc<dyn StageHandler>>,
}

impl Default for StageRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl StageRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Create a registry with all five built-in stages, sharing one generator.
    pub fn with_builtins(generator: Arc<dyn TextGenerator>) -> Self {
        let mut registry = Self::new();
        builtin::register_all(&mut registry, generator);
        registry
    }

    /// Register a handler, replacing any previous one for the same stage.
    pub fn register(&mut self, handler: Arc<dyn StageHandler>) {
        self.handlers.insert(handler.stage(), handler);
    }

    pub fn get(&self, stage: Stage) -> Option<Arc<dyn StageHandler>> {
        self.handlers.get(&stage).cloned()
    }

    /// Registered stages with descriptions, in pipeline order.
    pub fn list(&self) -> Vec<(Stage, &str)> {
        let mut entries: Vec<(Stage, &str)> = self
            .handlers
            .values()
            .map(|h| (h.stage(), h.description()))
            .collect();
        entries.sort_by_key(|(stage, _)| *stage);
        entries
    }
}
