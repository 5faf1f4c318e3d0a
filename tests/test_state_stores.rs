//! Tests for StateStore implementations: memory, JSON files and SQLite.

use std::collections::HashSet;
use std::sync::Arc;

use stageflow::engine::types::*;
use stageflow::storage::json_store::JsonStateStore;
use stageflow::storage::memory_store::MemoryStateStore;
use stageflow::storage::sqlite_store::SqliteStateStore;
use stageflow::storage::{self, Backend, StateStore, StorageError};

fn sample_state(id: &str) -> WorkflowState {
    let plan = StagePayload::from([
        ("plan".to_string(), serde_json::json!("## Plan\n\n1. Gather")),
        ("nested".to_string(), serde_json::json!({"a": [1, 2, {"b": null}]})),
    ]);
    WorkflowState::new(id)
        .succeed(Stage::Planning, &plan)
        .fail(Stage::DataProcessing, "source unavailable")
}

/// Shared contract every backend must satisfy.
async fn exercise_store(store: &dyn StateStore) {
    // Missing
    assert!(store.get("missing").await.unwrap().is_none());

    // Round trip
    let state = sample_state("wf_a");
    store.put(&state).await.unwrap();
    let loaded = store.get("wf_a").await.unwrap().unwrap();
    assert_eq!(loaded, state);

    // Overwrite
    let retried = state.with_status(WorkflowStatus::Running);
    store.put(&retried).await.unwrap();
    let loaded = store.get("wf_a").await.unwrap().unwrap();
    assert_eq!(loaded.status, WorkflowStatus::Running);
    assert_eq!(loaded, retried);

    // List
    store.put(&sample_state("wf_b")).await.unwrap();
    store.put(&WorkflowState::new("wf_c")).await.unwrap();
    let ids: HashSet<String> = store.list().await.unwrap().into_iter().collect();
    let expected: HashSet<String> = ["wf_a", "wf_b", "wf_c"].iter().map(|s| s.to_string()).collect();
    assert_eq!(ids, expected);

    // Delete, then delete again
    store.delete("wf_b").await.unwrap();
    assert!(store.get("wf_b").await.unwrap().is_none());
    store.delete("wf_b").await.unwrap();
    assert_eq!(store.list().await.unwrap().len(), 2);
}

async fn concurrent_puts(store: Arc<dyn StateStore>) {
    let mut handles = Vec::new();
    for i in 0..16 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            let state = sample_state(&format!("wf_{i}"));
            store.put(&state).await.unwrap();
            state
        }));
    }

    for handle in handles {
        let state = handle.await.unwrap();
        let loaded = store.get(&state.workflow_id).await.unwrap().unwrap();
        assert_eq!(loaded, state);
    }
    assert_eq!(store.list().await.unwrap().len(), 16);
}

// ===== MemoryStateStore =====

#[tokio::test]
async fn memory_store_contract() {
    exercise_store(&MemoryStateStore::new()).await;
}

#[tokio::test]
async fn memory_store_concurrent_puts() {
    concurrent_puts(Arc::new(MemoryStateStore::new())).await;
}

// ===== JsonStateStore =====

#[tokio::test]
async fn json_store_contract() {
    let dir = tempfile::tempdir().unwrap();
    exercise_store(&JsonStateStore::new(dir.path())).await;
}

#[tokio::test]
async fn json_store_concurrent_puts() {
    let dir = tempfile::tempdir().unwrap();
    concurrent_puts(Arc::new(JsonStateStore::new(dir.path()))).await;
}

#[tokio::test]
async fn json_store_list_missing_dir() {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonStateStore::new(dir.path().join("nope"));
    assert!(store.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn json_store_leaves_no_temp_files() {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonStateStore::new(dir.path());
    for _ in 0..3 {
        store.put(&sample_state("wf")).await.unwrap();
    }

    let names: Vec<String> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .collect();
    assert_eq!(names, vec!["wf.json".to_string()]);
}

#[tokio::test]
async fn json_store_rejects_path_like_ids() {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonStateStore::new(dir.path());

    for id in ["", "../escape", "a/b", ".hidden"] {
        let err = store.get(id).await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidId(_)), "id {id:?}");
    }
    assert!(store.put(&WorkflowState::new("a/b")).await.is_err());
}

#[tokio::test]
async fn json_store_detects_garbage() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("wf.json"), "{not json").unwrap();

    let store = JsonStateStore::new(dir.path());
    let err = store.get("wf").await.unwrap_err();
    assert!(matches!(err, StorageError::Serialization { .. }));
}

#[tokio::test]
async fn json_store_detects_invariant_violation() {
    let dir = tempfile::tempdir().unwrap();
    let mut state = WorkflowState::new("wf");
    state.status = WorkflowStatus::Completed;
    std::fs::write(
        dir.path().join("wf.json"),
        serde_json::to_string(&state).unwrap(),
    )
    .unwrap();

    let store = JsonStateStore::new(dir.path());
    let err = store.get("wf").await.unwrap_err();
    assert!(matches!(err, StorageError::Corrupt { .. }));
}

#[tokio::test]
async fn json_store_detects_mismatched_id() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("wf.json"),
        serde_json::to_string(&WorkflowState::new("other")).unwrap(),
    )
    .unwrap();

    let store = JsonStateStore::new(dir.path());
    let err = store.get("wf").await.unwrap_err();
    assert!(err.to_string().contains("other"));
}

// ===== SqliteStateStore =====

#[tokio::test]
async fn sqlite_store_contract_in_memory() {
    exercise_store(&SqliteStateStore::in_memory().await.unwrap()).await;
}

#[tokio::test]
async fn sqlite_store_contract_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let store = SqliteStateStore::open(dir.path().join("db").join("states.db"))
        .await
        .unwrap();
    exercise_store(&store).await;
}

#[tokio::test]
async fn sqlite_store_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("states.db");
    let state = sample_state("wf_persist");

    {
        let store = SqliteStateStore::open(&path).await.unwrap();
        store.put(&state).await.unwrap();
    }

    let store = SqliteStateStore::open(&path).await.unwrap();
    assert_eq!(store.get("wf_persist").await.unwrap().unwrap(), state);
}

#[tokio::test]
async fn sqlite_store_concurrent_puts() {
    let dir = tempfile::tempdir().unwrap();
    let store = SqliteStateStore::open(dir.path().join("states.db"))
        .await
        .unwrap();
    concurrent_puts(Arc::new(store)).await;
}

// ===== open() =====

#[tokio::test]
async fn open_each_backend() {
    let dir = tempfile::tempdir().unwrap();
    for (backend, path) in [
        (Backend::Sqlite, dir.path().join("s.db")),
        (Backend::Json, dir.path().join("json")),
        (Backend::Memory, dir.path().to_path_buf()),
    ] {
        let store = storage::open(backend, &path).await.unwrap();
        store.put(&WorkflowState::new("wf")).await.unwrap();
        assert!(store.get("wf").await.unwrap().is_some(), "{backend}");
    }
}

#[test]
fn backend_parse_and_defaults() {
    assert_eq!("json".parse::<Backend>().unwrap(), Backend::Json);
    assert!("redis".parse::<Backend>().is_err());
    assert_eq!(Backend::default(), Backend::Sqlite);
    assert_eq!(Backend::Sqlite.default_path(), "data/workflow_states.db");
}
