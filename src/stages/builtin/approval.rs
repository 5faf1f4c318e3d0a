use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::engine::errors::StageError;
use crate::engine::types::{Stage, StagePayload, WorkflowInput, WorkflowState};
use crate::stages::StageHandler;
use crate::textgen::{APPROVAL_MANAGER, TextGenerator};

use super::{build_prompt, narrate, to_payload};

pub const APPROVAL_LEVELS: [&str; 3] = ["Level 1", "Level 2", "Level 3"];

#[derive(Serialize)]
struct ApprovalPayload {
    approval_design: String,
    approval_levels: [&'static str; 3],
    approval_timestamp: DateTime<Utc>,
    approval_status: &'static str,
}

pub struct ApprovalStage {
    generator: Arc<dyn TextGenerator>,
}

impl ApprovalStage {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self { generator }
    }
}

#[async_trait]
impl StageHandler for ApprovalStage {
    fn stage(&self) -> Stage {
        Stage::Approval
    }

    fn description(&self) -> &str {
        "Design the approval hierarchy and record the decision"
    }

    async fn execute(
        &self,
        input: &WorkflowInput,
        _state: &WorkflowState,
    ) -> Result<StagePayload, StageError> {
        let prompt = build_prompt(
            "Design an approval workflow for the following requirements:",
            input,
            &[
                "Approval hierarchy design",
                "Decision gate criteria",
                "Escalation procedures",
                "Compliance requirements",
                "Audit trail design",
            ],
        );

        let approval_design = narrate(
            self.generator.as_ref(),
            Stage::Approval,
            &APPROVAL_MANAGER,
            &prompt,
        )
        .await?;

        to_payload(
            Stage::Approval,
            &ApprovalPayload {
                approval_design,
                approval_levels: APPROVAL_LEVELS,
                approval_timestamp: Utc::now(),
                approval_status: "approved",
            },
        )
    }
}
