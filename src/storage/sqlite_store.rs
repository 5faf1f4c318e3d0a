use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use sqlx::Row;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow};

use crate::engine::types::{Stage, WorkflowState, WorkflowStatus};
use crate::storage::{StateStore, StorageError, check_record};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS workflow_states (
        workflow_id TEXT PRIMARY KEY,
        current_stage TEXT NOT NULL,
        stage_data TEXT NOT NULL,
        completed_stages TEXT NOT NULL,
        failed_stages TEXT NOT NULL,
        workflow_data TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        status TEXT NOT NULL
    )";

/// SQLite-backed store, one row per workflow. Structured columns hold JSON text.
pub struct SqliteStateStore {
    pool: SqlitePool,
}

impl SqliteStateStore {
    /// Open (creating if needed) the database file at `path`.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| StorageError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        Self::with_pool(pool).await
    }

    /// Private in-memory database, mainly for tests.
    pub async fn in_memory() -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        // A single long-lived connection, since each connection gets its own memory database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> Result<Self, StorageError> {
        sqlx::query(SCHEMA).execute(&pool).await?;
        Ok(Self { pool })
    }

    fn encode<T: serde::Serialize>(workflow_id: &str, value: &T) -> Result<String, StorageError> {
        serde_json::to_string(value).map_err(|source| StorageError::Serialization {
            workflow_id: workflow_id.to_string(),
            source,
        })
    }

    fn decode<T: DeserializeOwned>(workflow_id: &str, text: &str) -> Result<T, StorageError> {
        serde_json::from_str(text).map_err(|source| StorageError::Serialization {
            workflow_id: workflow_id.to_string(),
            source,
        })
    }

    fn corrupt(workflow_id: &str, reason: String) -> StorageError {
        StorageError::Corrupt {
            workflow_id: workflow_id.to_string(),
            reason,
        }
    }

    fn parse_time(workflow_id: &str, text: &str) -> Result<DateTime<Utc>, StorageError> {
        DateTime::parse_from_rfc3339(text)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| Self::corrupt(workflow_id, format!("bad timestamp '{}': {}", text, e)))
    }

    fn row_to_state(workflow_id: &str, row: &SqliteRow) -> Result<WorkflowState, StorageError> {
        let current_stage: String = row.try_get("current_stage")?;
        let status: String = row.try_get("status")?;
        let created_at: String = row.try_get("created_at")?;
        let updated_at: String = row.try_get("updated_at")?;

        Ok(WorkflowState {
            workflow_id: workflow_id.to_string(),
            current_stage: Stage::from_str(&current_stage)
                .map_err(|e| Self::corrupt(workflow_id, e))?,
            stage_data: Self::decode(workflow_id, &row.try_get::<String, _>("stage_data")?)?,
            completed_stages: Self::decode(
                workflow_id,
                &row.try_get::<String, _>("completed_stages")?,
            )?,
            failed_stages: Self::decode(workflow_id, &row.try_get::<String, _>("failed_stages")?)?,
            workflow_data: Self::decode(workflow_id, &row.try_get::<String, _>("workflow_data")?)?,
            created_at: Self::parse_time(workflow_id, &created_at)?,
            updated_at: Self::parse_time(workflow_id, &updated_at)?,
            status: WorkflowStatus::from_str(&status).map_err(|e| Self::corrupt(workflow_id, e))?,
        })
    }
}

#[async_trait]
impl StateStore for SqliteStateStore {
    async fn put(&self, state: &WorkflowState) -> Result<(), StorageError> {
        let id = state.workflow_id.as_str();
        sqlx::query(
            "INSERT OR REPLACE INTO workflow_states
                (workflow_id, current_stage, stage_data, completed_stages,
                 failed_stages, workflow_data, created_at, updated_at, status)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(id)
        .bind(state.current_stage.as_str())
        .bind(Self::encode(id, &state.stage_data)?)
        .bind(Self::encode(id, &state.completed_stages)?)
        .bind(Self::encode(id, &state.failed_stages)?)
        .bind(Self::encode(id, &state.workflow_data)?)
        .bind(state.created_at.to_rfc3339())
        .bind(state.updated_at.to_rfc3339())
        .bind(state.status.to_string())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, workflow_id: &str) -> Result<Option<WorkflowState>, StorageError> {
        let row = sqlx::query(
            "SELECT current_stage, stage_data, completed_stages, failed_stages,
                    workflow_data, created_at, updated_at, status
             FROM workflow_states WHERE workflow_id = ?",
        )
        .bind(workflow_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => check_record(Self::row_to_state(workflow_id, &row)?).map(Some),
            None => Ok(None),
        }
    }

    async fn list(&self) -> Result<Vec<String>, StorageError> {
        let rows = sqlx::query("SELECT workflow_id FROM workflow_states")
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| row.try_get::<String, _>("workflow_id").map_err(StorageError::from))
            .collect()
    }

    async fn delete(&self, workflow_id: &str) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM workflow_states WHERE workflow_id = ?")
            .bind(workflow_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
