pub mod approval;
pub mod business_logic;
pub mod data_processing;
pub mod finalization;
pub mod planning;

use std::sync::Arc;

use serde::Serialize;

use crate::engine::errors::StageError;
use crate::engine::types::{Stage, StagePayload, WorkflowInput};
use crate::stages::StageRegistry;
use crate::textgen::{Persona, TextGenerator};

pub use business_logic::{RuleTable, WorkflowKind};

/// Register all built-in stages into the registry.
pub fn register_all(registry: &mut StageRegistry, generator: Arc<dyn TextGenerator>) {
    registry.register(Arc::new(planning::PlanningStage::new(generator.clone())));
    registry.register(Arc::new(data_processing::DataProcessingStage::new(
        generator.clone(),
    )));
    registry.register(Arc::new(business_logic::BusinessLogicStage));
    registry.register(Arc::new(approval::ApprovalStage::new(generator)));
    registry.register(Arc::new(finalization::FinalizationStage));
}

/// Serialize a typed payload struct into the generic payload map.
pub(crate) fn to_payload<T: Serialize>(stage: Stage, value: &T) -> Result<StagePayload, StageError> {
    match serde_json::to_value(value) {
        Ok(serde_json::Value::Object(map)) => Ok(map.into_iter().collect()),
        Ok(_) => Err(StageError::new(stage, "stage payload is not a JSON object")),
        Err(e) => Err(StageError::new(stage, format!("failed to encode payload: {e}"))),
    }
}

/// Build a prompt: heading, the input as pretty JSON, then numbered asks.
pub(crate) fn build_prompt(heading: &str, input: &WorkflowInput, asks: &[&str]) -> String {
    let rendered = serde_json::to_string_pretty(input).unwrap_or_else(|_| "{}".to_string());
    let mut prompt = format!("{heading}\n\nWorkflow Input: {rendered}\n\nPlease provide:\n");
    for (i, ask) in asks.iter().enumerate() {
        prompt.push_str(&format!("{}. {}\n", i + 1, ask));
    }
    prompt
}

/// Ask the generator for narrative text; failures and blank replies become stage errors.
pub(crate) async fn narrate(
    generator: &dyn TextGenerator,
    stage: Stage,
    persona: &Persona,
    prompt: &str,
) -> Result<String, StageError> {
    let text = generator
        .generate(persona, prompt)
        .await
        .map_err(|e| StageError::new(stage, format!("{} generator: {}", generator.name(), e)))?;

    if text.trim().is_empty() {
        return Err(StageError::new(
            stage,
            format!("{} generator returned an empty response", generator.name()),
        ));
    }
    Ok(text)
}
