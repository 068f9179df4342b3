use thiserror::Error;

/// Caller-facing classification of a failed run, independent of transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    NotFound,
    BadInput,
    Internal,
}

impl FailureClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "not-found",
            Self::BadInput => "bad-input",
            Self::Internal => "internal",
        }
    }
}

impl std::fmt::Display for FailureClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum AtomflowError {
    // Definition errors
    #[error("Workflow definition not found: {0}")]
    DefinitionNotFound(String),

    #[error("Agent definition not found: {0}")]
    AgentNotFound(String),

    #[error("Unknown agent type '{agent_type}' in agent {agent}")]
    UnknownAgentType { agent: String, agent_type: String },

    #[error("Invalid definition {name}: {message}")]
    Definition { name: String, message: String },

    // Context errors
    #[error("Cannot resolve reference '{reference}': {reason}")]
    Reference { reference: String, reason: String },

    // Model-serving errors
    #[error("Model server unavailable: {0}")]
    ModelUnavailable(String),

    /// The server answered with an error, or the exchange broke off.
    /// `status` is the HTTP status when one was received.
    #[error("Model request failed: {message}")]
    ModelRequest { status: Option<u16>, message: String },

    #[error("Model request timed out: {0}")]
    ModelTimeout(String),

    #[error("Model response parse error: {0}")]
    ModelParse(String),

    // Graph store / internal tool errors
    #[error("Graph store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Graph store error: {0}")]
    Store(String),

    #[error("Unknown internal tool: {0}")]
    UnknownTool(String),

    #[error("Invalid input for tool {tool}: {message}")]
    InvalidToolInput { tool: String, message: String },

    // Local script errors
    #[error("Script {script} exited with code {code:?}: {stderr}")]
    ScriptExecution {
        script: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("Script {script} did not return valid JSON: {message}")]
    ScriptOutput { script: String, message: String },

    #[error("Script timeout after {timeout_secs}s: {script}")]
    ScriptTimeout { script: String, timeout_secs: u64 },

    // Run errors
    #[error("Step {} ({agent}) failed: {source}", index + 1)]
    Step {
        index: usize,
        step: String,
        agent: String,
        #[source]
        source: Box<AtomflowError>,
    },

    #[error("Run cancelled")]
    Cancelled,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AtomflowError {
    /// Wrap an error raised while executing a step with its position and agent.
    pub fn in_step(self, index: usize, step: impl Into<String>, agent: impl Into<String>) -> Self {
        Self::Step {
            index,
            step: step.into(),
            agent: agent.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error, looking through step wrappers.
    pub fn root(&self) -> &AtomflowError {
        match self {
            Self::Step { source, .. } => source.root(),
            other => other,
        }
    }

    /// Index of the failing step, if this error came from a step.
    pub fn step_index(&self) -> Option<usize> {
        match self {
            Self::Step { index, .. } => Some(*index),
            _ => None,
        }
    }

    pub fn classify(&self) -> FailureClass {
        match self.root() {
            Self::DefinitionNotFound(_) | Self::AgentNotFound(_) => FailureClass::NotFound,
            Self::Reference { .. }
            | Self::UnknownAgentType { .. }
            | Self::UnknownTool(_)
            | Self::InvalidToolInput { .. }
            | Self::Definition { .. }
            | Self::InvalidRequest(_) => FailureClass::BadInput,
            _ => FailureClass::Internal,
        }
    }
}

pub type Result<T> = std::result::Result<T, AtomflowError>;
