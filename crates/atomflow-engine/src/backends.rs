use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use atomflow_core::config::AppConfig;
use atomflow_core::traits::{ChatModel, GraphStore, PromptLibrary, ScriptRunner, SchemaAdapter};
use atomflow_tools::ProcessScriptRunner;

use crate::extract::JsonSchemaAdapter;
use crate::prompts::DirPromptLibrary;

/// Defaults applied to local-script agents that do not override them.
#[derive(Debug, Clone)]
pub struct ScriptDefaults {
    pub interpreter: Option<String>,
    pub timeout: Duration,
}

impl Default for ScriptDefaults {
    fn default() -> Self {
        Self {
            interpreter: None,
            timeout: Duration::from_secs(120),
        }
    }
}

/// Every external capability a step may need, injected as trait objects.
///
/// A backend that was unreachable at startup is `None`; steps that need it
/// fail with the matching `*Unavailable` error.
pub struct Backends {
    pub model: Option<Arc<dyn ChatModel>>,
    pub graph: Option<Arc<dyn GraphStore>>,
    pub scripts: Arc<dyn ScriptRunner>,
    pub prompts: Arc<dyn PromptLibrary>,
    pub schema_adapter: Option<Arc<dyn SchemaAdapter>>,
    /// Base directory for relative `script_path`s.
    pub tools_dir: PathBuf,
    pub script_defaults: ScriptDefaults,
    /// Declared cache endpoint. Reported in status only.
    pub cache_url: Option<String>,
}

impl Backends {
    /// Backends with no model or graph store connected.
    pub fn new(scripts: Arc<dyn ScriptRunner>, prompts: Arc<dyn PromptLibrary>) -> Self {
        Self {
            model: None,
            graph: None,
            scripts,
            prompts,
            schema_adapter: None,
            tools_dir: PathBuf::from("."),
            script_defaults: ScriptDefaults::default(),
            cache_url: None,
        }
    }

    pub fn with_model(mut self, model: Arc<dyn ChatModel>) -> Self {
        self.model = Some(model);
        self
    }

    pub fn with_graph(mut self, graph: Arc<dyn GraphStore>) -> Self {
        self.graph = Some(graph);
        self
    }

    pub fn with_schema_adapter(mut self, adapter: Arc<dyn SchemaAdapter>) -> Self {
        self.schema_adapter = Some(adapter);
        self
    }

    pub fn with_tools_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.tools_dir = dir.into();
        self
    }

    pub fn with_script_defaults(mut self, defaults: ScriptDefaults) -> Self {
        self.script_defaults = defaults;
        self
    }

    /// Build the production backends from config, probing each remote
    /// service once. Unreachable services leave the engine degraded rather
    /// than failing startup.
    pub async fn connect(config: &AppConfig) -> Self {
        let scripts: Arc<dyn ScriptRunner> =
            Arc::new(ProcessScriptRunner::from_config(&config.scripts));
        let prompts: Arc<dyn PromptLibrary> =
            Arc::new(DirPromptLibrary::new(&config.engine.prompts_dir));

        let mut backends = Self::new(scripts, prompts)
            .with_schema_adapter(Arc::new(JsonSchemaAdapter::new()))
            .with_tools_dir(&config.engine.tools_dir)
            .with_script_defaults(ScriptDefaults {
                interpreter: config.scripts.interpreter.clone(),
                timeout: Duration::from_secs(config.scripts.timeout_secs),
            });
        backends.cache_url = config.cache.as_ref().map(|c| c.url.clone());

        let model = atomflow_llm::create_client(&config.model);
        match model.ping().await {
            Ok(()) => {
                info!(backend = model.name(), url = %config.model.base_url, "Model server connected");
                backends.model = Some(model);
            }
            Err(e) => {
                warn!(url = %config.model.base_url, error = %e, "Model server unreachable, model-chat steps will fail");
            }
        }

        match atomflow_graph::open_store(&config.graph) {
            Ok(store) => match store.ping().await {
                Ok(()) => {
                    info!(backend = store.name(), "Graph store connected");
                    backends.graph = Some(store);
                }
                Err(e) => {
                    warn!(backend = store.name(), error = %e, "Graph store unreachable, graph tools will fail");
                }
            },
            Err(e) => {
                warn!(error = %e, "Graph store could not be opened, graph tools will fail");
            }
        }

        backends
    }

    /// What is connected, for status endpoints and `doctor`.
    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            model: self.model.as_ref().map(|m| m.name().to_string()),
            graph: self.graph.as_ref().map(|g| g.name().to_string()),
            cache: self.cache_url.clone(),
        }
    }
}

/// Connected backends by name; `None` means absent or unreachable.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct EngineStatus {
    pub model: Option<String>,
    pub graph: Option<String>,
    pub cache: Option<String>,
}

impl EngineStatus {
    /// Whether any backend is missing.
    ///
    /// The cache is never exercised by a strategy, so it does not count.
    pub fn degraded(&self) -> bool {
        self.model.is_none() || self.graph.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atomflow_test_utils::{MemoryGraphStore, MockChatModel, RecordingScriptRunner, StaticPromptLibrary};

    fn base() -> Backends {
        Backends::new(
            Arc::new(RecordingScriptRunner::echo()),
            Arc::new(StaticPromptLibrary::new(Vec::<(String, String)>::new())),
        )
    }

    #[test]
    fn test_status_reports_degradation() {
        let status = base().status();
        assert!(status.degraded());
        assert_eq!(status.model, None);

        let status = base()
            .with_model(Arc::new(MockChatModel::new()))
            .with_graph(Arc::new(MemoryGraphStore::new()))
            .status();
        assert!(!status.degraded());
        assert_eq!(status.model.as_deref(), Some("mock"));
        assert_eq!(status.graph.as_deref(), Some("memory"));
        assert_eq!(status.cache, None);
    }

    #[tokio::test]
    async fn test_connect_degrades_when_model_unreachable() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.model.base_url = "http://127.0.0.1:9".into();
        config.model.timeout_secs = 2;
        config.graph.path = dir.path().join("graph.db").display().to_string();
        config.cache = Some(atomflow_core::config::CacheConfig {
            url: "redis://localhost:6379".into(),
        });

        let backends = Backends::connect(&config).await;
        let status = backends.status();
        assert_eq!(status.model, None);
        assert_eq!(status.graph.as_deref(), Some("sqlite"));
        assert_eq!(status.cache.as_deref(), Some("redis://localhost:6379"));
        assert!(status.degraded());
    }
}
