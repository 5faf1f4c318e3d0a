mod config;

pub use config::StageflowConfig;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use tokio::sync::Semaphore;
use tracing::{info, warn};
use uuid::Uuid;

use crate::engine::WorkflowEngine;
use crate::engine::types::{EngineConfig, Outcome, ResumeMode, Stage, WorkflowInput, WorkflowStatus};
use crate::recovery::{RecoveryDirective, RecoveryExecutor};
use crate::stages::StageRegistry;
use crate::storage::{self, Backend, StateStore};
use crate::textgen::{OfflineTextGenerator, OpenAiSettings, OpenAiTextGenerator, TextGenerator};

#[derive(Parser)]
#[command(name = "stageflow", version, about = "Fixed-stage workflow engine with durable state")]
pub struct Cli {
    /// Path to a .env file to load (default: auto-detect .env in cwd)
    #[arg(long, global = true)]
    dotenv: Option<PathBuf>,

    /// Path to a stageflow.yaml config file (default: auto-detect in cwd)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// State store backend (sqlite, json, memory)
    #[arg(long, global = true, env = "STAGEFLOW_BACKEND")]
    backend: Option<Backend>,

    /// SQLite database file, or directory for the json backend
    #[arg(long, global = true, env = "STAGEFLOW_STORE")]
    store_path: Option<PathBuf>,

    /// Model name for the OpenAI text generator
    #[arg(long, global = true, env = "OPENAI_MODEL")]
    model: Option<String>,

    /// Base URL of an OpenAI-compatible API
    #[arg(long, global = true, env = "OPENAI_BASE_URL")]
    base_url: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run or resume a workflow
    Run {
        /// Workflow ID (generated when omitted)
        workflow_id: Option<String>,

        /// Workflow input as a JSON object
        #[arg(short, long, conflicts_with = "input_file")]
        input: Option<String>,

        /// Read workflow input from a JSON file
        #[arg(long)]
        input_file: Option<PathBuf>,

        /// Discard prior progress and run every stage again
        #[arg(long)]
        restart: bool,

        /// Use the offline text generator instead of the OpenAI API
        #[arg(long)]
        offline: bool,

        /// Output format (text, json)
        #[arg(long, default_value = "text")]
        format: String,
    },

    /// Run several workflows concurrently from a JSON/YAML list of {id, input}
    Batch {
        file: PathBuf,

        #[arg(long)]
        restart: bool,

        #[arg(long)]
        offline: bool,
    },

    /// List stored workflows
    List {
        /// Filter by status (running, completed, failed, paused)
        #[arg(short, long)]
        status: Option<WorkflowStatus>,

        /// Output format (table, json)
        #[arg(long, default_value = "table")]
        format: String,
    },

    /// Show a stored workflow record
    Inspect { workflow_id: String },

    /// Delete a stored workflow record
    Delete { workflow_id: String },

    /// Apply a recovery directive (retry, skip, pause, rollback) to a workflow
    Recover {
        workflow_id: String,
        directive: RecoveryDirective,
    },

    /// List the registered stages
    Stages,
}

/// CLI flags, env and config file merged together.
struct Settings {
    backend: Backend,
    store_path: PathBuf,
    model: Option<String>,
    base_url: Option<String>,
    config: StageflowConfig,
}

impl Settings {
    fn resolve(cli: &Cli) -> Result<Self> {
        let config = StageflowConfig::load(cli.config.as_deref())?;
        let backend = cli.backend.or(config.backend).unwrap_or_default();
        let store_path = cli
            .store_path
            .clone()
            .or_else(|| config.store_path.as_ref().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(backend.default_path()));
        Ok(Self {
            backend,
            store_path,
            model: cli.model.clone().or_else(|| config.model.clone()),
            base_url: cli.base_url.clone().or_else(|| config.base_url.clone()),
            config,
        })
    }

    async fn open_store(&self) -> Result<Arc<dyn StateStore>> {
        storage::open(self.backend, &self.store_path)
            .await
            .with_context(|| {
                format!(
                    "Failed to open {} store at {}",
                    self.backend,
                    self.store_path.display()
                )
            })
    }

    fn generator(&self, offline: bool) -> Result<Arc<dyn TextGenerator>> {
        if offline {
            return Ok(Arc::new(OfflineTextGenerator));
        }

        let mut settings = OpenAiSettings::from_env();
        if let Some(model) = &self.model {
            settings.model = model.clone();
        }
        if let Some(base_url) = &self.base_url {
            settings.base_url = base_url.clone();
        }
        if let Some(timeout) = self.config.request_timeout_s {
            settings.timeout = seconds("request_timeout_s", timeout)?;
        }
        if settings.api_key.is_none() {
            warn!("OPENAI_API_KEY is not set; requests will be sent without credentials (use --offline to skip the API)");
        }

        Ok(Arc::new(OpenAiTextGenerator::new(settings)?))
    }

    fn engine(
        &self,
        store: Arc<dyn StateStore>,
        offline: bool,
        restart: bool,
    ) -> Result<WorkflowEngine> {
        let registry = Arc::new(StageRegistry::with_builtins(self.generator(offline)?));
        let resume_mode = if restart {
            ResumeMode::Restart
        } else {
            self.config.resume_mode.unwrap_or_default()
        };
        let stage_timeout = self
            .config
            .stage_timeout_s
            .map(|s| seconds("stage_timeout_s", s))
            .transpose()?;
        let config = EngineConfig {
            resume_mode,
            stage_timeout,
        };
        Ok(WorkflowEngine::new(registry, store).with_config(config))
    }
}

fn seconds(key: &str, value: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(value)
        .with_context(|| format!("Invalid {} in config: {}", key, value))
}

pub async fn run_cli() -> Result<()> {
    let cli = Cli::parse();

    // Load .env file
    load_dotenv(cli.dotenv.as_deref());

    let settings = Settings::resolve(&cli)?;

    match cli.command {
        Commands::Run {
            workflow_id,
            input,
            input_file,
            restart,
            offline,
            format,
        } => {
            let input = read_input(input, input_file)?;
            cmd_run(&settings, workflow_id, input, restart, offline, &format).await
        }
        Commands::Batch {
            file,
            restart,
            offline,
        } => cmd_batch(&settings, &file, restart, offline).await,
        Commands::List { status, format } => cmd_list(&settings, status, &format).await,
        Commands::Inspect { workflow_id } => cmd_inspect(&settings, &workflow_id).await,
        Commands::Delete { workflow_id } => cmd_delete(&settings, &workflow_id).await,
        Commands::Recover {
            workflow_id,
            directive,
        } => cmd_recover(&settings, &workflow_id, directive).await,
        Commands::Stages => cmd_stages(),
    }
}

/// Load environment variables from a .env file.
/// If an explicit path is given, load from that path (error if missing).
/// Otherwise, auto-detect .env in the current working directory (silently skip if absent).
fn load_dotenv(explicit_path: Option<&Path>) {
    match explicit_path {
        Some(path) => match dotenvy::from_path(path) {
            Ok(()) => info!("Loaded env from {}", path.display()),
            Err(e) => {
                eprintln!(
                    "Warning: Failed to load dotenv file '{}': {}",
                    path.display(),
                    e
                );
            }
        },
        None => match dotenvy::dotenv() {
            Ok(path) => info!("Loaded env from {}", path.display()),
            Err(dotenvy::Error::Io(_)) => {}
            Err(e) => {
                eprintln!("Warning: Failed to parse .env file: {}", e);
            }
        },
    }
}

fn read_input(inline: Option<String>, file: Option<PathBuf>) -> Result<WorkflowInput> {
    match (inline, file) {
        (Some(json), _) => serde_json::from_str(&json).context("Failed to parse --input JSON"),
        (None, Some(path)) => {
            let data = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read input file: {}", path.display()))?;
            serde_json::from_str(&data)
                .with_context(|| format!("Failed to parse input file: {}", path.display()))
        }
        (None, None) => Ok(WorkflowInput::new()),
    }
}

async fn cmd_run(
    settings: &Settings,
    workflow_id: Option<String>,
    input: WorkflowInput,
    restart: bool,
    offline: bool,
    format: &str,
) -> Result<()> {
    let store = settings.open_store().await?;
    let engine = settings.engine(store, offline, restart)?;
    let workflow_id = workflow_id.unwrap_or_else(|| format!("wf_{}", Uuid::new_v4().simple()));

    let outcome = engine.run(&workflow_id, &input).await;

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        print_outcome(&outcome);
    }

    if outcome.success {
        Ok(())
    } else {
        anyhow::bail!("workflow '{}' did not complete", outcome.workflow_id)
    }
}

fn print_outcome(outcome: &Outcome) {
    println!("Workflow: {}", outcome.workflow_id);
    println!("Status:   {}", outcome.status);

    println!("\nStages:");
    for stage in Stage::PIPELINE {
        let icon = if outcome.completed_stages.contains(&stage) {
            "✓"
        } else if outcome.failed_stage == Some(stage) {
            "✗"
        } else {
            "○"
        };
        println!("  {} {}", icon, stage);
    }

    if let Some(ref summary) = outcome.workflow_summary {
        println!("\n{}", summary);
    }

    if let Some(ref error) = outcome.error {
        println!("\nError: {}", error);
        if let Some(kind) = outcome.error_kind {
            println!("Kind:  {}", kind);
        }
        let options: Vec<String> = outcome.recovery_options.iter().map(|d| d.to_string()).collect();
        println!("Recovery options: {}", options.join(", "));
    }
}

#[derive(Deserialize)]
struct BatchEntry {
    id: String,
    #[serde(default)]
    input: WorkflowInput,
}

async fn cmd_batch(settings: &Settings, file: &Path, restart: bool, offline: bool) -> Result<()> {
    let contents = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read batch file: {}", file.display()))?;
    let entries: Vec<BatchEntry> = serde_yml::from_str(&contents)
        .with_context(|| format!("Failed to parse batch file: {}", file.display()))?;

    let store = settings.open_store().await?;
    let engine = Arc::new(settings.engine(store, offline, restart)?);
    let limit = settings.config.max_concurrent.unwrap_or_else(num_cpus::get).max(1);
    let semaphore = Arc::new(Semaphore::new(limit));

    info!(workflows = entries.len(), max_concurrent = limit, "Starting batch");

    let mut handles = Vec::new();
    for entry in entries {
        let engine = engine.clone();
        let semaphore = semaphore.clone();
        handles.push(tokio::spawn(async move {
            let _permit = semaphore.acquire_owned().await;
            engine.run(&entry.id, &entry.input).await
        }));
    }

    let mut outcomes = Vec::new();
    for handle in handles {
        outcomes.push(handle.await?);
    }

    println!("{:<32} {:<10} {:<16}", "WORKFLOW ID", "STATUS", "FAILED STAGE");
    println!("{}", "-".repeat(60));
    for outcome in &outcomes {
        let failed = outcome
            .failed_stage
            .map(|s| s.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<32} {:<10} {:<16}",
            outcome.workflow_id, outcome.status, failed
        );
    }

    let succeeded = outcomes.iter().filter(|o| o.success).count();
    println!(
        "\nTotal: {} workflow(s), {} succeeded, {} failed",
        outcomes.len(),
        succeeded,
        outcomes.len() - succeeded
    );
    Ok(())
}

async fn cmd_list(settings: &Settings, status: Option<WorkflowStatus>, format: &str) -> Result<()> {
    let store = settings.open_store().await?;

    let mut ids = store.list().await?;
    ids.sort();

    let mut states = Vec::new();
    for id in &ids {
        match store.get(id).await {
            Ok(Some(state)) => {
                if status.is_none_or(|s| s == state.status) {
                    states.push(state);
                }
            }
            Ok(None) => {}
            Err(e) => warn!(workflow_id = %id, error = %e, "Skipping unreadable workflow"),
        }
    }

    if states.is_empty() {
        println!("No workflows found.");
        return Ok(());
    }

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&states)?);
        return Ok(());
    }

    println!(
        "{:<32} {:<10} {:<16} {:<20}",
        "WORKFLOW ID", "STATUS", "STAGE", "UPDATED"
    );
    println!("{}", "-".repeat(80));
    for state in &states {
        println!(
            "{:<32} {:<10} {:<16} {:<20}",
            state.workflow_id,
            state.status,
            state.current_stage,
            state.updated_at.format("%Y-%m-%d %H:%M:%S")
        );
    }

    println!("\nTotal: {} workflow(s)", states.len());
    Ok(())
}

async fn cmd_inspect(settings: &Settings, workflow_id: &str) -> Result<()> {
    let store = settings.open_store().await?;
    let state = store
        .get(workflow_id)
        .await?
        .with_context(|| format!("Workflow '{}' not found", workflow_id))?;

    println!("{}", serde_json::to_string_pretty(&state)?);
    Ok(())
}

async fn cmd_delete(settings: &Settings, workflow_id: &str) -> Result<()> {
    let store = settings.open_store().await?;
    store.delete(workflow_id).await?;
    println!("Deleted workflow '{}'", workflow_id);
    Ok(())
}

async fn cmd_recover(
    settings: &Settings,
    workflow_id: &str,
    directive: RecoveryDirective,
) -> Result<()> {
    let store = settings.open_store().await?;
    let executor = RecoveryExecutor::new(store);
    let state = executor.apply(workflow_id, directive).await?;

    println!(
        "Applied '{}' to '{}': status {}, stage {}",
        directive, workflow_id, state.status, state.current_stage
    );
    if directive == RecoveryDirective::Retry || directive == RecoveryDirective::Skip {
        println!("Run `stageflow run {}` to continue.", workflow_id);
    }
    Ok(())
}

fn cmd_stages() -> Result<()> {
    let registry = StageRegistry::with_builtins(Arc::new(OfflineTextGenerator));
    let stages = registry.list();

    println!("{:<16} DESCRIPTION", "STAGE");
    println!("{}", "-".repeat(60));

    for (stage, desc) in &stages {
        println!("{:<16} {}", stage, desc);
    }

    println!("\nTotal: {} stage(s)", stages.len());
    Ok(())
}
