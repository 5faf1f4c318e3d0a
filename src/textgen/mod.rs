pub mod offline;
pub mod openai;

use async_trait::async_trait;
use thiserror::Error;

pub use offline::OfflineTextGenerator;
pub use openai::{OpenAiSettings, OpenAiTextGenerator};

/// Role-specific instruction set sent ahead of every prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Persona {
    pub name: &'static str,
    pub role: &'static str,
    pub instructions: &'static [&'static str],
}

impl Persona {
    pub fn system_prompt(&self) -> String {
        let mut out = format!("You are the {}: {}.\n", self.name, self.role);
        for line in self.instructions {
            out.push_str("- ");
            out.push_str(line);
            out.push('\n');
        }
        out
    }
}

pub const ORCHESTRATOR: Persona = Persona {
    name: "Workflow Orchestrator",
    role: "a specialist that orchestrates complex multi-step workflows with state management",
    instructions: &[
        "Analyze workflow requirements and break them down into manageable stages",
        "Identify dependencies between workflow stages and critical path items",
        "Handle error conditions and provide recovery strategies",
        "Manage workflow state and ensure data consistency across stages",
        "Use markdown formatting for workflow documentation and status reports",
    ],
};

pub const DATA_PROCESSOR: Persona = Persona {
    name: "Data Processor",
    role: "a data processing specialist that handles transformation, validation and analysis workflows",
    instructions: &[
        "Design data transformation pipelines and validation rules",
        "Handle data quality issues and provide data cleansing strategies",
        "Ensure data security and compliance throughout processing",
        "Optimize data processing performance and resource usage",
        "Use markdown formatting for data workflow documentation",
    ],
};

pub const APPROVAL_MANAGER: Persona = Persona {
    name: "Approval Manager",
    role: "an approval specialist that manages multi-level approval workflows and decision gates",
    instructions: &[
        "Design approval hierarchies and decision gate workflows",
        "Handle escalation procedures and exception management",
        "Ensure compliance with approval policies and regulations",
        "Track approval status and provide audit trails",
        "Use markdown formatting for approval workflow documentation",
    ],
};

#[derive(Debug, Error)]
pub enum TextGenError {
    #[error("request to {endpoint} failed: {source}")]
    Request {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{endpoint} returned {status}: {body}")]
    Status {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("invalid response from {endpoint}: {source}")]
    Decode {
        endpoint: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("text generator returned an empty response")]
    EmptyResponse,

    #[error("text generator misconfigured: {0}")]
    Config(String),
}

/// External collaborator that turns a prompt into narrative text.
///
/// The returned text is stored verbatim; callers never parse it.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Short identifier for logs.
    fn name(&self) -> &str;

    async fn generate(&self, persona: &Persona, prompt: &str) -> Result<String, TextGenError>;
}
