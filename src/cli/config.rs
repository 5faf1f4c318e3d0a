use std::path::Path;

use anyhow::{Context as _, Result};
use serde::Deserialize;

use crate::engine::types::ResumeMode;
use crate::storage::Backend;

/// Configuration loaded from `stageflow.yaml`.
/// All fields are optional; missing fields fall back to CLI, env and defaults.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct StageflowConfig {
    pub backend: Option<Backend>,
    /// SQLite database file, or directory for the JSON backend.
    pub store_path: Option<String>,
    pub model: Option<String>,
    pub base_url: Option<String>,
    /// Per-request timeout for the text generator.
    pub request_timeout_s: Option<f64>,
    /// Per-stage timeout enforced by the engine. Unset means no limit.
    pub stage_timeout_s: Option<f64>,
    pub resume_mode: Option<ResumeMode>,
    /// Concurrency limit for `batch`.
    pub max_concurrent: Option<usize>,
}

impl StageflowConfig {
    /// Load configuration from a YAML file.
    ///
    /// - If `path` is `Some`, load that specific file (error if missing).
    /// - If `path` is `None`, auto-detect `stageflow.yaml` in cwd; return defaults if absent.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file_path = match path {
            Some(p) => {
                if !p.exists() {
                    anyhow::bail!("Config file not found: {}", p.display());
                }
                p.to_path_buf()
            }
            None => {
                let default_path = Path::new("stageflow.yaml");
                if !default_path.exists() {
                    return Ok(Self::default());
                }
                default_path.to_path_buf()
            }
        };

        let contents = std::fs::read_to_string(&file_path)
            .with_context(|| format!("Failed to read config file: {}", file_path.display()))?;

        let config: StageflowConfig = serde_yml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", file_path.display()))?;

        Ok(config)
    }
}
