use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{AtomflowError, Result};

/// Top-level atomflow configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub graph: GraphConfig,
    #[serde(default)]
    pub scripts: ScriptConfig,
    #[serde(default)]
    pub cache: Option<CacheConfig>,
    #[serde(default)]
    pub gateway: Option<GatewayConfig>,
}

/// Where definitions, tool scripts and prompt modules live.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_workflows_dir")]
    pub workflows_dir: String,
    #[serde(default = "default_agents_dir")]
    pub agents_dir: String,
    #[serde(default = "default_tools_dir")]
    pub tools_dir: String,
    #[serde(default = "default_prompts_dir")]
    pub prompts_dir: String,
    /// Capacity of the chain event broadcast channel.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workflows_dir: default_workflows_dir(),
            agents_dir: default_agents_dir(),
            tools_dir: default_tools_dir(),
            prompts_dir: default_prompts_dir(),
            event_capacity: default_event_capacity(),
        }
    }
}

fn default_workflows_dir() -> String { "workflows".to_string() }
fn default_agents_dir() -> String { "agents".to_string() }
fn default_tools_dir() -> String { "agents/tools".to_string() }
fn default_prompts_dir() -> String { "prompts".to_string() }
fn default_event_capacity() -> usize { 256 }

/// Model-serving endpoint (Ollama-compatible chat API).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_model_base_url")]
    pub base_url: String,
    #[serde(default = "default_model_timeout")]
    pub timeout_secs: u64,
    /// Bounded retries for transient failures. Absent = no retries.
    #[serde(default)]
    pub retry: Option<RetryConfig>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base_url: default_model_base_url(),
            timeout_secs: default_model_timeout(),
            retry: None,
        }
    }
}

fn default_model_base_url() -> String { "http://localhost:11434".to_string() }
fn default_model_timeout() -> u64 { 300 }

/// Retry configuration for model requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
        }
    }
}

fn default_max_retries() -> u32 { 3 }
fn default_initial_backoff() -> u64 { 1000 }
fn default_max_backoff() -> u64 { 30000 }

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GraphBackend {
    #[default]
    Sqlite,
    Neo4j,
}

/// Graph database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphConfig {
    #[serde(default)]
    pub backend: GraphBackend,
    /// SQLite database file.
    #[serde(default = "default_graph_path")]
    pub path: String,
    /// Neo4j HTTP endpoint, e.g. `http://localhost:7474`.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_graph_database")]
    pub database: String,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            backend: GraphBackend::default(),
            path: default_graph_path(),
            url: None,
            user: None,
            password: None,
            database: default_graph_database(),
        }
    }
}

fn default_graph_path() -> String { "~/.atomflow/graph.db".to_string() }
fn default_graph_database() -> String { "neo4j".to_string() }

/// Local script execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptConfig {
    /// Default interpreter (e.g. `python3`). None = execute the script directly.
    #[serde(default)]
    pub interpreter: Option<String>,
    #[serde(default = "default_script_timeout")]
    pub timeout_secs: u64,
    /// Maximum child processes alive at once, across all runs.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
}

impl Default for ScriptConfig {
    fn default() -> Self {
        Self {
            interpreter: None,
            timeout_secs: default_script_timeout(),
            max_concurrent: default_max_concurrent(),
        }
    }
}

fn default_script_timeout() -> u64 { 120 }
fn default_max_concurrent() -> usize { 4 }

/// Cache connection. Reserved for tool functions; reported in status only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String { "127.0.0.1:8000".to_string() }

impl AppConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| AtomflowError::ConfigNotFound(path.display().to_string()))?;

        Self::from_toml(&content)
    }

    /// Parse config from TOML text, with env var expansion.
    pub fn from_toml(content: &str) -> Result<Self> {
        let expanded = expand_env_vars(content);

        toml::from_str(&expanded).map_err(|e| AtomflowError::Config(e.to_string()))
    }
}

/// Expand a leading `~/` to the home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs_home() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                Err(_) => {
                    // Keep original if env var not set
                    result.push_str(&format!("${{{}}}", var_name));
                }
            }
        } else {
            result.push(c);
        }
    }
    result
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_env_vars() {
        std::env::set_var("TEST_ATOMFLOW_VAR", "hello");
        let result = expand_env_vars("key = \"${TEST_ATOMFLOW_VAR}\"");
        assert_eq!(result, "key = \"hello\"");
        std::env::remove_var("TEST_ATOMFLOW_VAR");
    }

    #[test]
    fn test_expand_env_vars_missing() {
        let result = expand_env_vars("key = \"${NONEXISTENT_ATOMFLOW_VAR}\"");
        assert_eq!(result, "key = \"${NONEXISTENT_ATOMFLOW_VAR}\"");
    }

    #[test]
    fn test_defaults_from_empty_toml() {
        let config = AppConfig::from_toml("").unwrap();
        assert_eq!(config.engine.workflows_dir, "workflows");
        assert_eq!(config.engine.tools_dir, "agents/tools");
        assert_eq!(config.model.base_url, "http://localhost:11434");
        assert!(config.model.retry.is_none());
        assert_eq!(config.graph.backend, GraphBackend::Sqlite);
        assert_eq!(config.scripts.timeout_secs, 120);
        assert_eq!(config.scripts.max_concurrent, 4);
        assert!(config.gateway.is_none());
        assert!(config.cache.is_none());
    }

    #[test]
    fn test_neo4j_backend() {
        let config = AppConfig::from_toml(
            r#"
[graph]
backend = "neo4j"
url = "http://localhost:7474"
user = "neo4j"
password = "secret"
"#,
        )
        .unwrap();
        assert_eq!(config.graph.backend, GraphBackend::Neo4j);
        assert_eq!(config.graph.database, "neo4j");
        assert_eq!(config.graph.url.as_deref(), Some("http://localhost:7474"));
    }

    #[test]
    fn test_retry_section_defaults() {
        let config = AppConfig::from_toml("[model.retry]\nmax_retries = 1\n").unwrap();
        let retry = config.model.retry.unwrap();
        assert_eq!(retry.max_retries, 1);
        assert_eq!(retry.initial_backoff_ms, 1000);
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let err = AppConfig::from_toml("[graph]\nbackend = \"mongo\"\n").unwrap_err();
        assert!(matches!(err, AtomflowError::Config(_)));
    }

    #[test]
    fn test_expand_home() {
        if let Some(home) = dirs_home() {
            assert_eq!(expand_home("~/.atomflow/graph.db"), home.join(".atomflow/graph.db"));
        }
        assert_eq!(expand_home("/var/graph.db"), PathBuf::from("/var/graph.db"));
        assert_eq!(expand_home("graph.db"), PathBuf::from("graph.db"));
    }
}
