use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AtomflowError, Result};

/// Unique identifier of one chain run.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Workflow definitions ────────────────────────────────────────

/// An ordered recipe of steps, loaded once per run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Workflow id. Filled from the file name by loaders when omitted.
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub steps: Vec<StepSpec>,
    #[serde(default)]
    pub output_report: OutputReport,
}

/// One step of a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepSpec {
    #[serde(default)]
    pub name: String,
    /// Agent reference, handed to the definition loader as-is.
    pub agent: String,
    /// Literal value or context reference (`$.input_trigger.x`, `$.steps[0].y`).
    #[serde(default)]
    pub input: Option<serde_json::Value>,
    /// Literal value or context reference; only used by model-chat agents.
    #[serde(default)]
    pub prompt: Option<serde_json::Value>,
}

/// Where and how the final report is delivered.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutputReport {
    #[serde(default)]
    pub deliver_to: Option<String>,
    #[serde(default)]
    pub template: Option<String>,
    /// Literal value or context reference resolved after the last step.
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

// ── Agent definitions ───────────────────────────────────────────

/// Typed description of how one step is executed.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentDefinition {
    pub name: String,
    pub description: Option<String>,
    pub kind: AgentKind,
}

/// Closed set of execution strategies, each with its own configuration.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentKind {
    ModelChat(ModelChatConfig),
    InternalTool(InternalToolConfig),
    LocalScript(LocalScriptConfig),
}

impl AgentKind {
    /// The type tag used in definition files.
    pub fn type_tag(&self) -> &'static str {
        match self {
            Self::ModelChat(_) => "llm_chat",
            Self::InternalTool(_) => "internal_tool",
            Self::LocalScript(_) => "local_tool",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelChatConfig {
    pub model: String,
    pub system_prompt: SystemPrompt,
    pub output_schema: OutputSchema,
}

/// System prompt given inline or assembled from named prompt modules.
#[derive(Debug, Clone, PartialEq)]
pub enum SystemPrompt {
    Literal(String),
    Modules(Vec<String>),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputSchema {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InternalToolConfig {
    pub function: InternalFunction,
}

/// Internal operations reachable from `internal_tool` agents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InternalFunction {
    SaveToGraphDb,
}

impl InternalFunction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SaveToGraphDb => "save_to_graph_db",
        }
    }
}

impl std::str::FromStr for InternalFunction {
    type Err = AtomflowError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "save_to_graph_db" => Ok(Self::SaveToGraphDb),
            other => Err(AtomflowError::UnknownTool(other.to_string())),
        }
    }
}

impl std::fmt::Display for InternalFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LocalScriptConfig {
    /// Script path, relative to the tools directory unless absolute.
    pub script_path: PathBuf,
    /// Interpreter override (e.g. `python3`); falls back to the configured default.
    pub interpreter: Option<String>,
    /// Timeout override in seconds.
    pub timeout_secs: Option<u64>,
}

/// Untyped agent document as it appears on disk.
///
/// Converted into an [`AgentDefinition`] with [`AgentDefinition::from_document`],
/// which rejects unknown type tags and tool names.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentDocument {
    #[serde(rename = "type", default)]
    pub agent_type: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub prompt_modules: Option<Vec<String>>,
    #[serde(default)]
    pub output_schema: Option<String>,
    #[serde(default)]
    pub function_name: Option<String>,
    #[serde(default)]
    pub script_path: Option<String>,
    #[serde(default)]
    pub interpreter: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl AgentDefinition {
    /// Build a typed definition from its on-disk document.
    ///
    /// `reference` is the name the agent was loaded by; it is used when the
    /// document carries no `name` of its own.
    pub fn from_document(reference: &str, doc: AgentDocument) -> Result<Self> {
        let name = doc.name.clone().unwrap_or_else(|| reference.to_string());
        let invalid = |message: &str| AtomflowError::Definition {
            name: reference.to_string(),
            message: message.to_string(),
        };

        let agent_type = doc
            .agent_type
            .as_deref()
            .ok_or_else(|| invalid("missing agent 'type'"))?;

        let kind = match agent_type {
            "llm_chat" => {
                let model = doc
                    .model
                    .ok_or_else(|| invalid("llm_chat agent requires 'model'"))?;
                let system_prompt = match (doc.system_prompt, doc.prompt_modules) {
                    (Some(_), Some(_)) => {
                        return Err(invalid(
                            "set either 'system_prompt' or 'prompt_modules', not both",
                        ))
                    }
                    (_, Some(modules)) => SystemPrompt::Modules(modules),
                    (literal, None) => SystemPrompt::Literal(literal.unwrap_or_default()),
                };
                let output_schema = match doc.output_schema.as_deref() {
                    None | Some("text") => OutputSchema::Text,
                    Some("json") => OutputSchema::Json,
                    Some(other) => {
                        return Err(invalid(&format!("unsupported output_schema '{}'", other)))
                    }
                };
                AgentKind::ModelChat(ModelChatConfig {
                    model,
                    system_prompt,
                    output_schema,
                })
            }
            "internal_tool" => {
                let function = doc
                    .function_name
                    .as_deref()
                    .ok_or_else(|| invalid("internal_tool agent requires 'function_name'"))?
                    .parse()?;
                AgentKind::InternalTool(InternalToolConfig { function })
            }
            "local_tool" => {
                let script_path = doc
                    .script_path
                    .ok_or_else(|| invalid("local_tool agent requires 'script_path'"))?;
                AgentKind::LocalScript(LocalScriptConfig {
                    script_path: PathBuf::from(script_path),
                    interpreter: doc.interpreter,
                    timeout_secs: doc.timeout_secs,
                })
            }
            other => {
                return Err(AtomflowError::UnknownAgentType {
                    agent: reference.to_string(),
                    agent_type: other.to_string(),
                })
            }
        };

        Ok(Self {
            name,
            description: doc.description,
            kind,
        })
    }
}

// ── Run results ─────────────────────────────────────────────────

/// Final answer of a completed run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainResult {
    pub deliver_to: Option<String>,
    pub template: Option<String>,
    pub data: serde_json::Value,
}

/// Outcome label emitted once per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainOutcome {
    Success,
    /// The run was rejected: missing definitions or bad references/config.
    Error,
    /// The run broke while executing: backend, script or internal failure.
    Failed,
}

impl ChainOutcome {
    pub fn of(result: &Result<ChainResult>) -> Self {
        match result {
            Ok(_) => Self::Success,
            Err(e) => match e.classify() {
                crate::error::FailureClass::Internal => Self::Failed,
                _ => Self::Error,
            },
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
            Self::Failed => "failed",
        }
    }
}

// ── Model-serving messages ──────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Reply from the model server.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatResponse {
    pub content: String,
    pub model: String,
}

// ── Graph store ─────────────────────────────────────────────────

/// A node to create, or merge into when one with the same key exists.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeUpsert {
    pub label: String,
    pub key: String,
    pub key_value: serde_json::Value,
    pub properties: serde_json::Map<String, serde_json::Value>,
}

/// Whether `s` can be used as a node label or property key without quoting.
pub fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpsertedNode {
    /// Backend-assigned element id.
    pub node_id: String,
    pub created: bool,
}

// ── Local scripts ───────────────────────────────────────────────

/// A fully resolved script call.
#[derive(Debug, Clone)]
pub struct ScriptInvocation {
    pub script: PathBuf,
    pub interpreter: Option<String>,
    pub timeout: Duration,
}

impl ScriptInvocation {
    pub fn display_name(&self) -> String {
        self.script.display().to_string()
    }
}

// ── Events ──────────────────────────────────────────────────────

/// Chain lifecycle event broadcast to all subscribers.
#[derive(Debug, Clone)]
pub enum ChainEvent {
    RunStarted {
        run_id: RunId,
        workflow_id: String,
        at: DateTime<Utc>,
    },
    StepStarted {
        run_id: RunId,
        index: usize,
        step: String,
        agent: String,
    },
    StepCompleted {
        run_id: RunId,
        index: usize,
        elapsed_ms: u64,
    },
    RunCompleted {
        run_id: RunId,
        workflow_id: String,
        outcome: ChainOutcome,
        elapsed_ms: u64,
        error: Option<String>,
    },
}
