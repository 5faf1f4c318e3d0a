use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::engine::errors::StageError;
use crate::engine::types::{Stage, StagePayload, WorkflowInput, WorkflowState};
use crate::stages::StageHandler;
use crate::textgen::{DATA_PROCESSOR, TextGenerator};

use super::{build_prompt, narrate, to_payload};

pub const VALIDATION_RULES: [&str; 3] = ["data_format", "data_range", "data_completeness"];

#[derive(Serialize)]
struct DataProcessingPayload {
    pipeline_design: String,
    validation_rules: [&'static str; 3],
    processing_timestamp: DateTime<Utc>,
    records_processed: usize,
}

/// Number of entries in the input's `data` array; anything else counts as zero.
pub fn record_count(input: &WorkflowInput) -> usize {
    input
        .get("data")
        .and_then(|v| v.as_array())
        .map_or(0, Vec::len)
}

pub struct DataProcessingStage {
    generator: Arc<dyn TextGenerator>,
}

impl DataProcessingStage {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self { generator }
    }
}

#[async_trait]
impl StageHandler for DataProcessingStage {
    fn stage(&self) -> Stage {
        Stage::DataProcessing
    }

    fn description(&self) -> &str {
        "Design the data pipeline and count the records to process"
    }

    async fn execute(
        &self,
        input: &WorkflowInput,
        _state: &WorkflowState,
    ) -> Result<StagePayload, StageError> {
        let prompt = build_prompt(
            "Design a data processing workflow for the following requirements:",
            input,
            &[
                "Data transformation pipeline design",
                "Validation rules and quality checks",
                "Error handling strategies",
                "Performance optimization recommendations",
                "Data security considerations",
            ],
        );

        let pipeline_design = narrate(
            self.generator.as_ref(),
            Stage::DataProcessing,
            &DATA_PROCESSOR,
            &prompt,
        )
        .await?;

        to_payload(
            Stage::DataProcessing,
            &DataProcessingPayload {
                pipeline_design,
                validation_rules: VALIDATION_RULES,
                processing_timestamp: Utc::now(),
                records_processed: record_count(input),
            },
        )
    }
}
