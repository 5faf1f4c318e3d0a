//! Business rules, selected by the workflow's `type` field.
//!
//! Each kind carries its own rule table and input checks. Unrecognized kinds
//! fall back to the standard table.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::engine::errors::StageError;
use crate::engine::types::{Stage, StagePayload, WorkflowInput, WorkflowState};
use crate::stages::StageHandler;

use super::to_payload;

/// Rule table for one workflow kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuleTable {
    pub rules: &'static [&'static str],
    /// Label and entries of the computed-fields (or steps) list.
    pub computed: (&'static str, &'static [&'static str]),
    /// Label and entries of the compliance (or quality) tags.
    pub tags: (&'static str, &'static [&'static str]),
}

const FINANCIAL: RuleTable = RuleTable {
    rules: &["amount_validation", "budget_check", "approval_threshold"],
    computed: ("calculations", &["total_amount", "tax_calculation", "final_amount"]),
    tags: ("compliance", &["SOX", "GAAP", "Internal Controls"]),
};

const APPROVAL: RuleTable = RuleTable {
    rules: &["role_based_access", "delegation_rules", "escalation_criteria"],
    computed: ("workflow", &["submit", "review", "approve", "notify"]),
    tags: ("compliance", &["audit_trail", "documentation", "timeline_tracking"]),
};

const STANDARD: RuleTable = RuleTable {
    rules: &["business_validation", "data_integrity", "process_compliance"],
    computed: ("workflow", &["input_validation", "processing", "output_generation"]),
    tags: ("quality", &["error_handling", "logging", "monitoring"]),
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowKind {
    Financial,
    Approval,
    Standard,
}

impl WorkflowKind {
    pub fn from_input(input: &WorkflowInput) -> Self {
        match input.get("type").and_then(Value::as_str) {
            Some("financial") => WorkflowKind::Financial,
            Some("approval") => WorkflowKind::Approval,
            _ => WorkflowKind::Standard,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            WorkflowKind::Financial => "financial",
            WorkflowKind::Approval => "approval",
            WorkflowKind::Standard => "standard",
        }
    }

    pub fn rule_table(self) -> &'static RuleTable {
        match self {
            WorkflowKind::Financial => &FINANCIAL,
            WorkflowKind::Approval => &APPROVAL,
            WorkflowKind::Standard => &STANDARD,
        }
    }

    /// Input checks for this kind.
    pub fn validate(self, input: &WorkflowInput) -> Result<(), String> {
        match self {
            WorkflowKind::Financial => match input.get("amount") {
                None => Err("financial workflows require an 'amount'".to_string()),
                Some(v) => match v.as_f64() {
                    Some(amount) if amount >= 0.0 => Ok(()),
                    Some(amount) => Err(format!("amount must be non-negative, got {}", amount)),
                    None => Err(format!("amount must be a number, got {}", v)),
                },
            },
            WorkflowKind::Approval => {
                let has_approvers = input
                    .get("approvers")
                    .and_then(Value::as_array)
                    .is_some_and(|a| !a.is_empty());
                if has_approvers {
                    Ok(())
                } else {
                    Err("approval workflows require a non-empty 'approvers' list".to_string())
                }
            }
            WorkflowKind::Standard => Ok(()),
        }
    }
}

impl RuleTable {
    fn to_value(&self, kind: WorkflowKind) -> Value {
        let mut map = serde_json::Map::new();
        map.insert("type".to_string(), Value::from(kind.as_str()));
        map.insert("rules".to_string(), Value::from(self.rules.to_vec()));
        map.insert(self.computed.0.to_string(), Value::from(self.computed.1.to_vec()));
        map.insert(self.tags.0.to_string(), Value::from(self.tags.1.to_vec()));
        Value::Object(map)
    }
}

#[derive(Serialize)]
struct BusinessLogicPayload {
    business_logic: Value,
    workflow_type: String,
    execution_timestamp: DateTime<Utc>,
    business_rules_applied: usize,
}

pub struct BusinessLogicStage;

#[async_trait]
impl StageHandler for BusinessLogicStage {
    fn stage(&self) -> Stage {
        Stage::BusinessLogic
    }

    fn description(&self) -> &str {
        "Apply the rule table for the workflow kind (financial, approval, standard)"
    }

    async fn execute(
        &self,
        input: &WorkflowInput,
        _state: &WorkflowState,
    ) -> Result<StagePayload, StageError> {
        let kind = WorkflowKind::from_input(input);
        kind.validate(input)
            .map_err(|msg| StageError::new(Stage::BusinessLogic, msg))?;

        let table = kind.rule_table();
        let workflow_type = input
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or("standard")
            .to_string();

        to_payload(
            Stage::BusinessLogic,
            &BusinessLogicPayload {
                business_logic: table.to_value(kind),
                workflow_type,
                execution_timestamp: Utc::now(),
                business_rules_applied: table.rules.len(),
            },
        )
    }
}
