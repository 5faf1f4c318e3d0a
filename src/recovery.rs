//! Recovery directives and their optional execution.
//!
//! [`directives`] is advisory: it only describes what a caller may do next.
//! [`RecoveryExecutor`] is the separate component that applies a chosen
//! directive to a stored record.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::info;

use crate::engine::errors::EngineError;
use crate::engine::types::{Stage, WorkflowState, WorkflowStatus};
use crate::storage::{StateStore, StorageError};

/// One possible next action after a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecoveryDirective {
    Retry,
    Skip,
    Pause,
    Rollback,
}

impl std::fmt::Display for RecoveryDirective {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecoveryDirective::Retry => write!(f, "retry"),
            RecoveryDirective::Skip => write!(f, "skip"),
            RecoveryDirective::Pause => write!(f, "pause"),
            RecoveryDirective::Rollback => write!(f, "rollback"),
        }
    }
}

impl std::str::FromStr for RecoveryDirective {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "retry" => Ok(RecoveryDirective::Retry),
            "skip" => Ok(RecoveryDirective::Skip),
            "pause" => Ok(RecoveryDirective::Pause),
            "rollback" => Ok(RecoveryDirective::Rollback),
            other => Err(format!("unknown recovery directive '{}'", other)),
        }
    }
}

pub const STANDARD_DIRECTIVES: [RecoveryDirective; 4] = [
    RecoveryDirective::Retry,
    RecoveryDirective::Skip,
    RecoveryDirective::Pause,
    RecoveryDirective::Rollback,
];

/// Directives offered for a failure. Currently the same four for every stage and error.
pub fn directives(_failed_stage: Stage, _error: &EngineError) -> Vec<RecoveryDirective> {
    STANDARD_DIRECTIVES.to_vec()
}

#[derive(Debug, Error)]
pub enum RecoveryError {
    #[error("workflow '{0}' not found")]
    NotFound(String),

    #[error("cannot {directive} workflow '{workflow_id}': {reason}")]
    InvalidTransition {
        workflow_id: String,
        directive: RecoveryDirective,
        reason: String,
    },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Pure transition for one directive.
pub fn apply_directive(
    state: &WorkflowState,
    directive: RecoveryDirective,
) -> Result<WorkflowState, RecoveryError> {
    let invalid = |reason: &str| RecoveryError::InvalidTransition {
        workflow_id: state.workflow_id.clone(),
        directive,
        reason: reason.to_string(),
    };

    match directive {
        RecoveryDirective::Retry => {
            if state.status == WorkflowStatus::Completed {
                return Err(invalid("workflow already completed"));
            }
            Ok(state.with_status(WorkflowStatus::Running))
        }
        RecoveryDirective::Pause => {
            if state.status == WorkflowStatus::Completed {
                return Err(invalid("workflow already completed"));
            }
            Ok(state.with_status(WorkflowStatus::Paused))
        }
        RecoveryDirective::Skip => {
            let stage = state.current_stage;
            if state.status != WorkflowStatus::Failed || !stage.is_executable() {
                return Err(invalid("only a failed stage can be skipped"));
            }
            if state.completed_stages.contains(&stage) {
                return Err(invalid("stage already completed"));
            }
            // Finalization produces the final result; without it there is nothing to report.
            if stage == Stage::Finalization {
                return Err(invalid("the finalization stage cannot be skipped"));
            }

            let mut next = state.with_status(WorkflowStatus::Running);
            next.completed_stages.push(stage);
            next.completed_stages.sort();
            append_to_list(&mut next, "skipped_stages", stage);
            next.stage_data.clear();
            Ok(next)
        }
        RecoveryDirective::Rollback => {
            let mut next = state.with_status(WorkflowStatus::Running);
            let Some(undone) = next.completed_stages.pop() else {
                return Err(invalid("no completed stage to roll back"));
            };

            next.workflow_data.remove(undone.as_str());
            append_to_list(&mut next, "rolled_back_stages", undone);

            match next.completed_stages.last().copied() {
                Some(previous) => {
                    next.current_stage = previous;
                    next.stage_data = next
                        .workflow_data
                        .get(previous.as_str())
                        .and_then(Value::as_object)
                        .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
                        .unwrap_or_default();
                }
                None => {
                    next.current_stage = Stage::Initialization;
                    next.stage_data.clear();
                }
            }
            Ok(next)
        }
    }
}

fn append_to_list(state: &mut WorkflowState, key: &str, stage: Stage) {
    let entry = state
        .workflow_data
        .entry(key.to_string())
        .or_insert_with(|| Value::Array(Vec::new()));
    match entry {
        Value::Array(items) => items.push(Value::from(stage.as_str())),
        other => *other = Value::Array(vec![Value::from(stage.as_str())]),
    }
}

/// Applies recovery directives to stored records.
pub struct RecoveryExecutor {
    store: Arc<dyn StateStore>,
}

impl RecoveryExecutor {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    /// Load, transform and persist. Returns the new record.
    ///
    /// `retry` only re-arms the record; the next engine `run` resumes at the failed stage.
    pub async fn apply(
        &self,
        workflow_id: &str,
        directive: RecoveryDirective,
    ) -> Result<WorkflowState, RecoveryError> {
        let state = self
            .store
            .get(workflow_id)
            .await?
            .ok_or_else(|| RecoveryError::NotFound(workflow_id.to_string()))?;

        let next = apply_directive(&state, directive)?;
        self.store.put(&next).await?;

        info!(
            workflow_id = %workflow_id,
            directive = %directive,
            stage = %next.current_stage,
            status = %next.status,
            "Applied recovery directive"
        );
        Ok(next)
    }
}
