use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::engine::errors::StageError;
use crate::engine::types::{Stage, StagePayload, WorkflowInput, WorkflowState};
use crate::stages::StageHandler;
use crate::textgen::{ORCHESTRATOR, TextGenerator};

use super::{build_prompt, narrate, to_payload};

#[derive(Serialize)]
struct PlanningPayload<'a> {
    plan: String,
    input_analysis: &'a WorkflowInput,
    planning_timestamp: DateTime<Utc>,
}

pub struct PlanningStage {
    generator: Arc<dyn TextGenerator>,
}

impl PlanningStage {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self { generator }
    }
}

#[async_trait]
impl StageHandler for PlanningStage {
    fn stage(&self) -> Stage {
        Stage::Planning
    }

    fn description(&self) -> &str {
        "Analyze the workflow input and draft an execution plan"
    }

    async fn execute(
        &self,
        input: &WorkflowInput,
        _state: &WorkflowState,
    ) -> Result<StagePayload, StageError> {
        let prompt = build_prompt(
            "Analyze the following workflow requirements and create a detailed execution plan:",
            input,
            &[
                "Workflow stage breakdown",
                "Dependencies between stages",
                "Resource requirements",
                "Risk assessment",
                "Success criteria",
            ],
        );

        let plan = narrate(self.generator.as_ref(), Stage::Planning, &ORCHESTRATOR, &prompt).await?;

        to_payload(
            Stage::Planning,
            &PlanningPayload {
                plan,
                input_analysis: input,
                planning_timestamp: Utc::now(),
            },
        )
    }
}
