use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::engine::errors::{EngineError, StageError};
use crate::recovery::RecoveryDirective;

/// Parameters handed to every stage handler, as a JSON-compatible key-value map.
pub type WorkflowInput = HashMap<String, serde_json::Value>;

/// Output returned by a stage handler, stored as the record's `stage_data`.
pub type StagePayload = HashMap<String, serde_json::Value>;

/// Pipeline position of a workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Initialization,
    Planning,
    DataProcessing,
    BusinessLogic,
    Approval,
    Finalization,
}

impl Stage {
    /// The executable stages, in the only order they are ever visited.
    pub const PIPELINE: [Stage; 5] = [
        Stage::Planning,
        Stage::DataProcessing,
        Stage::BusinessLogic,
        Stage::Approval,
        Stage::Finalization,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Initialization => "initialization",
            Stage::Planning => "planning",
            Stage::DataProcessing => "data_processing",
            Stage::BusinessLogic => "business_logic",
            Stage::Approval => "approval",
            Stage::Finalization => "finalization",
        }
    }

    pub fn is_executable(self) -> bool {
        self != Stage::Initialization
    }

    /// Index within [`Stage::PIPELINE`], `None` for `Initialization`.
    pub fn position(self) -> Option<usize> {
        Self::PIPELINE.iter().position(|s| *s == self)
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "initialization" => Ok(Stage::Initialization),
            "planning" => Ok(Stage::Planning),
            "data_processing" => Ok(Stage::DataProcessing),
            "business_logic" => Ok(Stage::BusinessLogic),
            "approval" => Ok(Stage::Approval),
            "finalization" => Ok(Stage::Finalization),
            other => Err(format!("unknown stage '{}'", other)),
        }
    }
}

/// Status of a workflow record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStatus {
    Running,
    Completed,
    Failed,
    Paused,
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkflowStatus::Running => write!(f, "running"),
            WorkflowStatus::Completed => write!(f, "completed"),
            WorkflowStatus::Failed => write!(f, "failed"),
            WorkflowStatus::Paused => write!(f, "paused"),
        }
    }
}

impl std::str::FromStr for WorkflowStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(WorkflowStatus::Running),
            "completed" => Ok(WorkflowStatus::Completed),
            "failed" => Ok(WorkflowStatus::Failed),
            "paused" => Ok(WorkflowStatus::Paused),
            other => Err(format!("unknown workflow status '{}'", other)),
        }
    }
}

/// Persistent record tracking one workflow's progress.
///
/// Records are treated as immutable snapshots: every transition returns a new
/// value which the engine persists as a whole.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    pub workflow_id: String,
    pub current_stage: Stage,
    pub stage_data: StagePayload,
    pub completed_stages: Vec<Stage>,
    pub failed_stages: Vec<Stage>,
    pub workflow_data: HashMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub status: WorkflowStatus,
}

impl WorkflowState {
    pub fn new(workflow_id: &str) -> Self {
        let now = Utc::now();
        Self {
            workflow_id: workflow_id.to_string(),
            current_stage: Stage::Initialization,
            stage_data: StagePayload::new(),
            completed_stages: Vec::new(),
            failed_stages: Vec::new(),
            workflow_data: HashMap::new(),
            created_at: now,
            updated_at: now,
            status: WorkflowStatus::Running,
        }
    }

    /// Executable stages not yet in `completed_stages`, in pipeline order.
    pub fn pending_stages(&self) -> Vec<Stage> {
        Stage::PIPELINE
            .iter()
            .copied()
            .filter(|s| !self.completed_stages.contains(s))
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.completed_stages.as_slice() == Stage::PIPELINE.as_slice()
    }

    /// Apply the result of one stage attempt.
    pub fn advance(&self, stage: Stage, result: &Result<StagePayload, StageError>) -> Self {
        match result {
            Ok(payload) => self.succeed(stage, payload),
            Err(e) => self.fail(stage, &e.message),
        }
    }

    pub fn succeed(&self, stage: Stage, payload: &StagePayload) -> Self {
        let mut next = self.touched();
        next.current_stage = stage;
        next.stage_data = payload.clone();
        next.workflow_data
            .insert(stage.as_str().to_string(), payload_to_value(payload));
        if !next.completed_stages.contains(&stage) {
            next.completed_stages.push(stage);
        }
        next.status = if next.is_complete() {
            WorkflowStatus::Completed
        } else {
            WorkflowStatus::Running
        };
        next
    }

    pub fn fail(&self, stage: Stage, message: &str) -> Self {
        let mut next = self.touched();
        next.current_stage = stage;
        next.stage_data = StagePayload::from([(
            "error".to_string(),
            serde_json::Value::String(message.to_string()),
        )]);
        next.failed_stages.push(stage);
        next.status = WorkflowStatus::Failed;
        next
    }

    /// Mark a record whose stages are all done as completed.
    pub fn completed(&self) -> Self {
        let mut next = self.touched();
        next.status = WorkflowStatus::Completed;
        next
    }

    pub fn with_status(&self, status: WorkflowStatus) -> Self {
        let mut next = self.touched();
        next.status = status;
        next
    }

    /// Drop all progress so the pipeline can run again from the start.
    /// Identity and creation time are kept.
    pub fn restarted(&self) -> Self {
        let mut next = self.touched();
        next.current_stage = Stage::Initialization;
        next.stage_data.clear();
        next.completed_stages.clear();
        next.failed_stages.clear();
        next.workflow_data.clear();
        next.status = WorkflowStatus::Running;
        next
    }

    /// True when the record carries anything a restart would discard.
    pub fn has_progress(&self) -> bool {
        !self.completed_stages.is_empty()
            || !self.failed_stages.is_empty()
            || self.status != WorkflowStatus::Running
    }

    /// Copy with `updated_at` moved to now. Never moves backwards.
    pub(crate) fn touched(&self) -> Self {
        let mut next = self.clone();
        next.updated_at = Utc::now().max(self.updated_at);
        next
    }

    pub fn elapsed(&self) -> TimeDelta {
        self.updated_at - self.created_at
    }

    /// Check the record invariants. Returns a description of the first violation.
    pub fn validate(&self) -> Result<(), String> {
        if self.workflow_id.is_empty() {
            return Err("workflow_id is empty".to_string());
        }
        if let Some(s) = self
            .completed_stages
            .iter()
            .chain(&self.failed_stages)
            .find(|s| !s.is_executable())
        {
            return Err(format!("'{}' is not an executable stage", s));
        }
        for (i, s) in self.completed_stages.iter().enumerate() {
            if self.completed_stages[..i].contains(s) {
                return Err(format!("stage '{}' completed more than once", s));
            }
        }
        if self.status == WorkflowStatus::Completed && !self.is_complete() {
            return Err("status is completed but not all stages completed in order".to_string());
        }
        if self.status == WorkflowStatus::Failed
            && self.failed_stages.last() != Some(&self.current_stage)
        {
            return Err(format!(
                "status is failed but current stage '{}' is not the last failed stage",
                self.current_stage
            ));
        }
        if self.updated_at < self.created_at {
            return Err("updated_at precedes created_at".to_string());
        }
        Ok(())
    }
}

pub(crate) fn payload_to_value(payload: &StagePayload) -> serde_json::Value {
    serde_json::Value::Object(
        payload
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
    )
}

/// Format a duration as `H:MM:SS`, dropping sub-second precision.
pub fn format_elapsed(delta: TimeDelta) -> String {
    let secs = delta.num_seconds().max(0);
    format!("{}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

/// How `run` treats a record that already has progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResumeMode {
    /// Run only the stages missing from `completed_stages`.
    #[default]
    Resume,
    /// Clear progress and run every stage again.
    Restart,
}

impl std::str::FromStr for ResumeMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "resume" => Ok(ResumeMode::Resume),
            "restart" => Ok(ResumeMode::Restart),
            other => Err(format!("unknown resume mode '{}'", other)),
        }
    }
}

/// Engine tuning.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub resume_mode: ResumeMode,
    /// Upper bound on a single stage attempt. `None` waits indefinitely.
    pub stage_timeout: Option<Duration>,
}

/// Which layer a failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    Stage,
    Storage,
    Unexpected,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Stage => write!(f, "stage"),
            ErrorKind::Storage => write!(f, "storage"),
            ErrorKind::Unexpected => write!(f, "unexpected"),
        }
    }
}

/// Structured result of a `run` call.
///
/// When `error_kind` is `storage`, `status` only says this call did not finish;
/// the stored record's status is unknown and `failed_stage` is left empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub success: bool,
    pub workflow_id: String,
    pub status: WorkflowStatus,
    pub completed_stages: Vec<Stage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_result: Option<StagePayload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow_summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_stage: Option<Stage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recovery_options: Vec<RecoveryDirective>,
}

impl Outcome {
    pub fn completed(state: &WorkflowState, final_result: StagePayload, summary: String) -> Self {
        Self {
            success: true,
            workflow_id: state.workflow_id.clone(),
            status: state.status,
            completed_stages: state.completed_stages.clone(),
            final_result: Some(final_result),
            workflow_summary: Some(summary),
            failed_stage: None,
            error: None,
            error_kind: None,
            recovery_options: Vec::new(),
        }
    }

    pub fn failed(
        workflow_id: &str,
        completed_stages: &[Stage],
        failed_stage: Option<Stage>,
        error: &EngineError,
        recovery_options: Vec<RecoveryDirective>,
    ) -> Self {
        Self {
            success: false,
            workflow_id: workflow_id.to_string(),
            status: WorkflowStatus::Failed,
            completed_stages: completed_stages.to_vec(),
            final_result: None,
            workflow_summary: None,
            failed_stage,
            error: Some(error.to_string()),
            error_kind: Some(error.kind()),
            recovery_options,
        }
    }
}
