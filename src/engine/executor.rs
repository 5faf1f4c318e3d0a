use std::sync::Arc;

use tracing::{error, info};

use crate::engine::errors::{EngineError, StageError};
use crate::engine::types::*;
use crate::recovery;
use crate::stages::StageRegistry;
use crate::storage::StateStore;

/// Drives a workflow record through the fixed stage pipeline.
pub struct WorkflowEngine {
    registry: Arc<StageRegistry>,
    store: Arc<dyn StateStore>,
    config: EngineConfig,
}

impl WorkflowEngine {
    pub fn new(registry: Arc<StageRegistry>, store: Arc<dyn StateStore>) -> Self {
        Self {
            registry,
            store,
            config: EngineConfig::default(),
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    /// Run (or resume) the workflow identified by `workflow_id`.
    ///
    /// Never returns an error: every failure, including storage failures, is
    /// folded into a failed [`Outcome`] carrying the recovery directives.
    pub async fn run(&self, workflow_id: &str, input: &WorkflowInput) -> Outcome {
        info!(workflow_id = %workflow_id, "Starting workflow");

        let mut state = match self.load_or_create(workflow_id).await {
            Ok(state) => state,
            Err(e) => return self.aborted(workflow_id, &[], None, e),
        };

        if self.config.resume_mode == ResumeMode::Restart && state.has_progress() {
            let fresh = state.restarted();
            if let Err(e) = self.store.put(&fresh).await {
                return self.aborted(workflow_id, &state.completed_stages, None, e.into());
            }
            info!(workflow_id = %workflow_id, "Restarting workflow from the first stage");
            state = fresh;
        }

        for stage in state.pending_stages() {
            let (result, fault) = match self.run_stage(stage, input, &state).await {
                Ok(result) => (result, None),
                Err(e) => (Err(StageError::new(stage, e.to_string())), Some(e)),
            };

            let next = state.advance(stage, &result);
            if let Err(e) = self.store.put(&next).await {
                return self.aborted(workflow_id, &state.completed_stages, Some(stage), e.into());
            }

            if let Err(stage_err) = result {
                error!(workflow_id = %workflow_id, stage = %stage, error = %stage_err, "Stage failed");
                let err = fault.unwrap_or_else(|| EngineError::from(stage_err));
                let options = recovery::directives(stage, &err);
                return Outcome::failed(
                    workflow_id,
                    &next.completed_stages,
                    Some(stage),
                    &err,
                    options,
                );
            }

            info!(workflow_id = %workflow_id, stage = %stage, "Stage completed");
            state = next;
        }

        // Every stage may already have been done by an earlier call.
        if state.status != WorkflowStatus::Completed {
            let done = state.completed();
            if let Err(e) = self.store.put(&done).await {
                return self.aborted(workflow_id, &state.completed_stages, None, e.into());
            }
            state = done;
        }

        info!(workflow_id = %workflow_id, status = %state.status, "Workflow complete");

        let final_result = state
            .workflow_data
            .get(Stage::Finalization.as_str())
            .and_then(|v| v.as_object())
            .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_else(|| state.stage_data.clone());
        let summary = render_summary(&state);
        Outcome::completed(&state, final_result, summary)
    }

    async fn load_or_create(&self, workflow_id: &str) -> Result<WorkflowState, EngineError> {
        if workflow_id.trim().is_empty() {
            return Err(EngineError::Unexpected(
                "workflow id must not be empty".to_string(),
            ));
        }

        if let Some(existing) = self.store.get(workflow_id).await? {
            info!(
                workflow_id = %workflow_id,
                stage = %existing.current_stage,
                status = %existing.status,
                "Resuming existing workflow"
            );
            return Ok(existing);
        }

        let state = WorkflowState::new(workflow_id);
        self.store.put(&state).await?;
        info!(workflow_id = %workflow_id, "Created new workflow");
        Ok(state)
    }

    /// Run one stage handler, with the optional timeout applied.
    ///
    /// The outer error is reserved for engine faults such as a missing handler.
    async fn run_stage(
        &self,
        stage: Stage,
        input: &WorkflowInput,
        state: &WorkflowState,
    ) -> Result<Result<StagePayload, StageError>, EngineError> {
        let handler = self.registry.get(stage).ok_or_else(|| {
            EngineError::Unexpected(format!("no handler registered for stage '{}'", stage))
        })?;

        info!(workflow_id = %state.workflow_id, stage = %stage, "Running stage");

        let result = match self.config.stage_timeout {
            Some(limit) => {
                match tokio::time::timeout(limit, handler.execute(input, state)).await {
                    Ok(r) => r,
                    Err(_) => Err(StageError::new(
                        stage,
                        format!("timed out after {}s", limit.as_secs_f64()),
                    )),
                }
            }
            None => handler.execute(input, state).await,
        };

        Ok(result)
    }

    /// Outcome for a run cut short outside a stage handler.
    ///
    /// No `failed_stage` is reported: the stored record may not reflect
    /// `stage` at all, so its status is unknown to the caller.
    fn aborted(
        &self,
        workflow_id: &str,
        completed_stages: &[Stage],
        stage: Option<Stage>,
        err: EngineError,
    ) -> Outcome {
        let at = stage.unwrap_or(Stage::Initialization);
        error!(workflow_id = %workflow_id, stage = %at, error = %err, "Workflow aborted");
        let options = recovery::directives(at, &err);
        Outcome::failed(workflow_id, completed_stages, None, &err, options)
    }
}

/// Markdown summary for a completed workflow.
pub fn render_summary(state: &WorkflowState) -> String {
    let stages: Vec<&str> = state.completed_stages.iter().map(|s| s.as_str()).collect();
    format!(
        "# Workflow Summary\n\n\
         **Workflow ID**: {}\n\
         **Status**: {}\n\
         **Created**: {}\n\
         **Completed**: {}\n\n\
         **Stages Completed**: {}\n\
         - {}\n\n\
         **Total Duration**: {}\n",
        state.workflow_id,
        state.status,
        state.created_at.to_rfc3339(),
        state.updated_at.to_rfc3339(),
        state.completed_stages.len(),
        stages.join(", "),
        format_elapsed(state.elapsed()),
    )
}
