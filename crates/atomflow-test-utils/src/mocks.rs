use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use atomflow_core::error::{AtomflowError, Result};
use atomflow_core::traits::{ChatModel, DefinitionLoader, GraphStore, PromptLibrary, ScriptRunner};
use atomflow_core::types::*;

// ── Chat model ──────────────────────────────────────────────────

/// Chat model that replays scripted replies and records every request.
pub struct MockChatModel {
    replies: Mutex<VecDeque<Result<String>>>,
    requests: Arc<Mutex<Vec<(String, Vec<ChatMessage>)>>>,
    calls: Arc<AtomicUsize>,
    hang: bool,
}

impl MockChatModel {
    pub fn new() -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            requests: Arc::new(Mutex::new(Vec::new())),
            calls: Arc::new(AtomicUsize::new(0)),
            hang: false,
        }
    }

    pub fn with_replies<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mock = Self::new();
        for reply in replies {
            mock.push_reply(reply);
        }
        mock
    }

    /// A model that records each request and then never answers.
    pub fn hanging() -> Self {
        Self {
            hang: true,
            ..Self::new()
        }
    }

    pub fn push_reply(&self, content: impl Into<String>) {
        self.replies.lock().unwrap().push_back(Ok(content.into()));
    }

    pub fn push_error(&self, error: AtomflowError) {
        self.replies.lock().unwrap().push_back(Err(error));
    }

    pub fn call_counter(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }

    pub fn requests(&self) -> Vec<(String, Vec<ChatMessage>)> {
        self.requests.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for MockChatModel {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatModel for MockChatModel {
    fn name(&self) -> &str {
        "mock"
    }

    fn chat(&self, model: &str, messages: Vec<ChatMessage>) -> BoxFuture<'_, Result<ChatResponse>> {
        let model = model.to_string();
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.requests
                .lock()
                .unwrap()
                .push((model.clone(), messages));
            if self.hang {
                return futures::future::pending().await;
            }
            let next = self.replies.lock().unwrap().pop_front();
            match next {
                Some(Ok(content)) => Ok(ChatResponse { content, model }),
                Some(Err(e)) => Err(e),
                None => Err(AtomflowError::ModelRequest {
                    status: None,
                    message: "no scripted reply".into(),
                }),
            }
        })
    }

    fn ping(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async { Ok(()) })
    }
}

// ── Graph store ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct StoredNode {
    pub node_id: String,
    pub label: String,
    pub properties: serde_json::Map<String, serde_json::Value>,
}

/// In-memory graph store with upsert semantics.
pub struct MemoryGraphStore {
    nodes: Mutex<HashMap<(String, String, String), StoredNode>>,
    next_id: AtomicUsize,
    reachable: bool,
}

impl MemoryGraphStore {
    pub fn new() -> Self {
        Self {
            nodes: Mutex::new(HashMap::new()),
            next_id: AtomicUsize::new(0),
            reachable: true,
        }
    }

    /// A store that rejects every call with `StoreUnavailable`.
    pub fn unreachable() -> Self {
        Self {
            reachable: false,
            ..Self::new()
        }
    }

    pub fn nodes(&self) -> Vec<StoredNode> {
        self.nodes.lock().unwrap().values().cloned().collect()
    }
}

impl Default for MemoryGraphStore {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphStore for MemoryGraphStore {
    fn name(&self) -> &str {
        "memory"
    }

    fn upsert_node(&self, node: NodeUpsert) -> BoxFuture<'_, Result<UpsertedNode>> {
        Box::pin(async move {
            if !self.reachable {
                return Err(AtomflowError::StoreUnavailable("memory store offline".into()));
            }
            let key = (node.label.clone(), node.key.clone(), node.key_value.to_string());
            let mut nodes = self.nodes.lock().unwrap();
            if let Some(existing) = nodes.get_mut(&key) {
                existing.properties.extend(node.properties);
                return Ok(UpsertedNode {
                    node_id: existing.node_id.clone(),
                    created: false,
                });
            }
            let node_id = format!("mem:{}", self.next_id.fetch_add(1, Ordering::SeqCst));
            nodes.insert(
                key,
                StoredNode {
                    node_id: node_id.clone(),
                    label: node.label,
                    properties: node.properties,
                },
            );
            Ok(UpsertedNode {
                node_id,
                created: true,
            })
        })
    }

    fn ping(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if self.reachable {
                Ok(())
            } else {
                Err(AtomflowError::StoreUnavailable("memory store offline".into()))
            }
        })
    }
}

// ── Script runner ───────────────────────────────────────────────

type ScriptBehavior = dyn Fn(&ScriptInvocation, &serde_json::Value) -> Result<serde_json::Value>
    + Send
    + Sync;

/// Script runner that records invocations instead of spawning processes.
pub struct RecordingScriptRunner {
    behavior: Box<ScriptBehavior>,
    invocations: Mutex<Vec<(ScriptInvocation, serde_json::Value)>>,
}

impl RecordingScriptRunner {
    /// Echo the input back, like `cat`.
    pub fn echo() -> Self {
        Self::with(|_, input| Ok(input.clone()))
    }

    pub fn with<F>(behavior: F) -> Self
    where
        F: Fn(&ScriptInvocation, &serde_json::Value) -> Result<serde_json::Value>
            + Send
            + Sync
            + 'static,
    {
        Self {
            behavior: Box::new(behavior),
            invocations: Mutex::new(Vec::new()),
        }
    }

    pub fn invocations(&self) -> Vec<(ScriptInvocation, serde_json::Value)> {
        self.invocations.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.invocations.lock().unwrap().len()
    }
}

impl ScriptRunner for RecordingScriptRunner {
    fn run(
        &self,
        invocation: ScriptInvocation,
        input: serde_json::Value,
        cancel: CancellationToken,
    ) -> BoxFuture<'_, Result<serde_json::Value>> {
        Box::pin(async move {
            if cancel.is_cancelled() {
                return Err(AtomflowError::Cancelled);
            }
            let result = (self.behavior)(&invocation, &input);
            self.invocations.lock().unwrap().push((invocation, input));
            result
        })
    }
}

// ── Prompt library ──────────────────────────────────────────────

/// Prompt modules held in memory, joined with a blank line.
pub struct StaticPromptLibrary {
    modules: HashMap<String, String>,
}

impl StaticPromptLibrary {
    pub fn new<I, K, V>(modules: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            modules: modules
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl PromptLibrary for StaticPromptLibrary {
    fn assemble(&self, modules: &[String]) -> BoxFuture<'_, Result<String>> {
        let modules = modules.to_vec();
        Box::pin(async move {
            let mut parts = Vec::with_capacity(modules.len());
            for name in &modules {
                let text = self.modules.get(name).ok_or_else(|| AtomflowError::Definition {
                    name: name.clone(),
                    message: "prompt module not found".into(),
                })?;
                parts.push(text.clone());
            }
            Ok(parts.join("\n\n"))
        })
    }
}

// ── Definition loader ───────────────────────────────────────────

/// Definitions held in memory. Agents are kept as raw documents so that
/// type validation runs on every load, as with file-backed loaders.
pub struct MemoryLoader {
    workflows: HashMap<String, WorkflowDefinition>,
    agents: HashMap<String, AgentDocument>,
    agent_loads: AtomicUsize,
}

impl MemoryLoader {
    pub fn new() -> Self {
        Self {
            workflows: HashMap::new(),
            agents: HashMap::new(),
            agent_loads: AtomicUsize::new(0),
        }
    }

    pub fn with_workflow(mut self, workflow: WorkflowDefinition) -> Self {
        self.workflows.insert(workflow.id.clone(), workflow);
        self
    }

    /// Register an agent document given as JSON (same keys as the YAML files).
    pub fn with_agent(mut self, name: &str, document: serde_json::Value) -> Self {
        let doc: AgentDocument =
            serde_json::from_value(document).expect("agent document must deserialize");
        self.agents.insert(name.to_string(), doc);
        self
    }

    pub fn agent_loads(&self) -> usize {
        self.agent_loads.load(Ordering::SeqCst)
    }
}

impl Default for MemoryLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl DefinitionLoader for MemoryLoader {
    fn load_workflow(&self, id: &str) -> BoxFuture<'_, Result<WorkflowDefinition>> {
        let result = self
            .workflows
            .get(id)
            .cloned()
            .ok_or_else(|| AtomflowError::DefinitionNotFound(id.to_string()));
        Box::pin(async move { result })
    }

    fn load_agent(&self, name: &str) -> BoxFuture<'_, Result<AgentDefinition>> {
        self.agent_loads.fetch_add(1, Ordering::SeqCst);
        let result = match self.agents.get(name) {
            Some(doc) => AgentDefinition::from_document(name, doc.clone()),
            None => Err(AtomflowError::AgentNotFound(name.to_string())),
        };
        Box::pin(async move { result })
    }
}
