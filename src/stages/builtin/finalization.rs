use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::engine::errors::StageError;
use crate::engine::types::{Stage, StagePayload, WorkflowInput, WorkflowState, format_elapsed};
use crate::stages::StageHandler;

use super::to_payload;

#[derive(Serialize)]
struct PerformanceMetrics {
    total_duration: String,
    stages_completed: usize,
    success_rate: String,
}

#[derive(Serialize)]
struct FinalizationPayload {
    workflow_summary: String,
    total_stages: usize,
    completion_timestamp: DateTime<Utc>,
    performance_metrics: PerformanceMetrics,
}

/// Final report. Makes no external calls.
pub struct FinalizationStage;

#[async_trait]
impl StageHandler for FinalizationStage {
    fn stage(&self) -> Stage {
        Stage::Finalization
    }

    fn description(&self) -> &str {
        "Produce the final workflow report and metrics"
    }

    async fn execute(
        &self,
        _input: &WorkflowInput,
        state: &WorkflowState,
    ) -> Result<StagePayload, StageError> {
        let now = Utc::now();
        let done = state.completed_stages.len();
        let before_final = Stage::PIPELINE.len() - 1;

        to_payload(
            Stage::Finalization,
            &FinalizationPayload {
                workflow_summary: format!("Workflow {} completed successfully", state.workflow_id),
                total_stages: done,
                completion_timestamp: now,
                performance_metrics: PerformanceMetrics {
                    total_duration: format_elapsed(now - state.created_at),
                    stages_completed: done,
                    success_rate: format!("{}%", done.min(before_final) * 100 / before_final),
                },
            },
        )
    }
}
