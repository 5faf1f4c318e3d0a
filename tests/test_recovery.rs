//! Tests for recovery directives and the recovery executor.

use std::str::FromStr;
use std::sync::Arc;

use serde_json::json;
use stageflow::engine::types::*;
use stageflow::engine::{EngineError, StageError, WorkflowEngine};
use stageflow::recovery::{
    RecoveryDirective, RecoveryError, RecoveryExecutor, STANDARD_DIRECTIVES, apply_directive,
    directives,
};
use stageflow::stages::StageRegistry;
use stageflow::storage::memory_store::MemoryStateStore;
use stageflow::storage::{StateStore, StorageError};
use stageflow::textgen::OfflineTextGenerator;

fn payload(stage: Stage) -> StagePayload {
    StagePayload::from([("stage".to_string(), json!(stage.as_str()))])
}

/// Planning and data_processing done, business_logic failed.
fn failed_at_business_logic() -> WorkflowState {
    WorkflowState::new("wf")
        .succeed(Stage::Planning, &payload(Stage::Planning))
        .succeed(Stage::DataProcessing, &payload(Stage::DataProcessing))
        .fail(Stage::BusinessLogic, "amount must be non-negative, got -1")
}

// --- directives ---

#[test]
fn directives_are_always_the_standard_four() {
    let stage_err = EngineError::from(StageError::new(Stage::Approval, "nope"));
    let storage_err = EngineError::from(StorageError::InvalidId("x".into()));
    let unexpected = EngineError::Unexpected("boom".into());

    for stage in Stage::PIPELINE {
        for err in [&stage_err, &storage_err, &unexpected] {
            assert_eq!(directives(stage, err), STANDARD_DIRECTIVES.to_vec());
        }
    }
}

#[test]
fn directive_names() {
    let names: Vec<String> = STANDARD_DIRECTIVES.iter().map(|d| d.to_string()).collect();
    assert_eq!(names, ["retry", "skip", "pause", "rollback"]);
    assert_eq!(
        RecoveryDirective::from_str("rollback").unwrap(),
        RecoveryDirective::Rollback
    );
    assert!(RecoveryDirective::from_str("abort").is_err());
    assert_eq!(serde_json::to_string(&RecoveryDirective::Skip).unwrap(), r#""skip""#);
}

// --- apply_directive ---

#[test]
fn retry_rearms_failed_workflow() {
    let state = failed_at_business_logic();
    let next = apply_directive(&state, RecoveryDirective::Retry).unwrap();

    assert_eq!(next.status, WorkflowStatus::Running);
    assert_eq!(next.current_stage, Stage::BusinessLogic);
    assert_eq!(next.completed_stages, state.completed_stages);
    assert_eq!(next.pending_stages()[0], Stage::BusinessLogic);
}

#[test]
fn retry_and_pause_reject_completed() {
    let mut state = WorkflowState::new("wf");
    for stage in Stage::PIPELINE {
        state = state.succeed(stage, &StagePayload::new());
    }

    for directive in [RecoveryDirective::Retry, RecoveryDirective::Pause] {
        let err = apply_directive(&state, directive).unwrap_err();
        assert!(matches!(err, RecoveryError::InvalidTransition { .. }));
    }
}

#[test]
fn pause_sets_paused() {
    let next = apply_directive(&failed_at_business_logic(), RecoveryDirective::Pause).unwrap();
    assert_eq!(next.status, WorkflowStatus::Paused);
    assert!(next.validate().is_ok());
}

#[test]
fn skip_marks_failed_stage_done() {
    let state = failed_at_business_logic();
    let next = apply_directive(&state, RecoveryDirective::Skip).unwrap();

    assert_eq!(next.status, WorkflowStatus::Running);
    assert_eq!(
        next.completed_stages,
        vec![Stage::Planning, Stage::DataProcessing, Stage::BusinessLogic]
    );
    assert_eq!(next.workflow_data["skipped_stages"], json!(["business_logic"]));
    assert!(next.stage_data.is_empty());
    assert!(!next.workflow_data.contains_key("business_logic"));
    assert_eq!(next.pending_stages(), vec![Stage::Approval, Stage::Finalization]);
    assert!(next.validate().is_ok());
}

#[test]
fn skip_requires_failed_status() {
    let state = WorkflowState::new("wf").succeed(Stage::Planning, &StagePayload::new());
    let err = apply_directive(&state, RecoveryDirective::Skip).unwrap_err();
    assert!(err.to_string().contains("cannot skip"));
}

#[test]
fn skip_rejects_finalization() {
    let mut state = WorkflowState::new("wf");
    for stage in &Stage::PIPELINE[..4] {
        state = state.succeed(*stage, &payload(*stage));
    }
    let state = state.fail(Stage::Finalization, "report failed");

    let err = apply_directive(&state, RecoveryDirective::Skip).unwrap_err();
    assert!(matches!(err, RecoveryError::InvalidTransition { .. }));
    assert!(err.to_string().contains("finalization"));

    // Retry remains available.
    let next = apply_directive(&state, RecoveryDirective::Retry).unwrap();
    assert_eq!(next.pending_stages(), vec![Stage::Finalization]);
}

#[test]
fn rollback_undoes_last_completed_stage() {
    let state = failed_at_business_logic();
    let next = apply_directive(&state, RecoveryDirective::Rollback).unwrap();

    assert_eq!(next.status, WorkflowStatus::Running);
    assert_eq!(next.completed_stages, vec![Stage::Planning]);
    assert_eq!(next.current_stage, Stage::Planning);
    assert_eq!(next.stage_data, payload(Stage::Planning));
    assert!(!next.workflow_data.contains_key("data_processing"));
    assert_eq!(next.workflow_data["rolled_back_stages"], json!(["data_processing"]));
    assert_eq!(next.failed_stages, vec![Stage::BusinessLogic]);
}

#[test]
fn rollback_to_initialization() {
    let state = WorkflowState::new("wf").succeed(Stage::Planning, &payload(Stage::Planning));
    let next = apply_directive(&state, RecoveryDirective::Rollback).unwrap();
    assert_eq!(next.current_stage, Stage::Initialization);
    assert!(next.completed_stages.is_empty());
    assert!(next.stage_data.is_empty());

    let err = apply_directive(&next, RecoveryDirective::Rollback).unwrap_err();
    assert!(err.to_string().contains("no completed stage"));
}

// --- RecoveryExecutor ---

#[tokio::test]
async fn executor_persists_transition() {
    let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
    store.put(&failed_at_business_logic()).await.unwrap();

    let executor = RecoveryExecutor::new(store.clone());
    let next = executor.apply("wf", RecoveryDirective::Pause).await.unwrap();

    assert_eq!(next.status, WorkflowStatus::Paused);
    assert_eq!(store.get("wf").await.unwrap().unwrap(), next);
}

#[tokio::test]
async fn executor_unknown_workflow() {
    let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
    let executor = RecoveryExecutor::new(store);

    let err = executor
        .apply("ghost", RecoveryDirective::Retry)
        .await
        .unwrap_err();
    assert!(matches!(err, RecoveryError::NotFound(ref id) if id == "ghost"));
}

#[tokio::test]
async fn executor_rejection_leaves_record_untouched() {
    let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
    let state = WorkflowState::new("wf");
    store.put(&state).await.unwrap();

    let executor = RecoveryExecutor::new(store.clone());
    assert!(executor.apply("wf", RecoveryDirective::Skip).await.is_err());
    assert_eq!(store.get("wf").await.unwrap().unwrap(), state);
}

#[tokio::test]
async fn failed_finalization_cannot_complete_without_a_report() {
    let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
    let mut state = WorkflowState::new("wf");
    for stage in &Stage::PIPELINE[..4] {
        state = state.succeed(*stage, &payload(*stage));
    }
    let failed = state.fail(Stage::Finalization, "report failed");
    store.put(&failed).await.unwrap();

    let executor = RecoveryExecutor::new(store.clone());
    assert!(executor.apply("wf", RecoveryDirective::Skip).await.is_err());
    assert_eq!(store.get("wf").await.unwrap().unwrap(), failed);

    // Retrying runs finalization for real, so the outcome carries its payload.
    executor.apply("wf", RecoveryDirective::Retry).await.unwrap();
    let registry = Arc::new(StageRegistry::with_builtins(Arc::new(OfflineTextGenerator)));
    let outcome = WorkflowEngine::new(registry, store.clone())
        .run("wf", &WorkflowInput::new())
        .await;

    assert!(outcome.success, "{:?}", outcome.error);
    let final_result = outcome.final_result.unwrap();
    assert_eq!(
        final_result["workflow_summary"],
        json!("Workflow wf completed successfully")
    );
}

#[tokio::test]
async fn skip_then_run_finishes_the_pipeline() {
    let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
    let registry = Arc::new(StageRegistry::with_builtins(Arc::new(OfflineTextGenerator)));
    let engine = WorkflowEngine::new(registry, store.clone());
    let input: WorkflowInput =
        serde_json::from_value(json!({"type": "financial", "amount": -5})).unwrap();

    let outcome = engine.run("wf", &input).await;
    assert_eq!(outcome.failed_stage, Some(Stage::BusinessLogic));

    RecoveryExecutor::new(store.clone())
        .apply("wf", RecoveryDirective::Skip)
        .await
        .unwrap();

    let outcome = engine.run("wf", &input).await;
    assert!(outcome.success, "{:?}", outcome.error);

    let state = store.get("wf").await.unwrap().unwrap();
    assert_eq!(state.status, WorkflowStatus::Completed);
    assert_eq!(state.workflow_data["skipped_stages"], json!(["business_logic"]));
}
