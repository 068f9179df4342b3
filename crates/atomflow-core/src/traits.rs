use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::types::*;

/// Model-serving backend: system + user chat completion.
pub trait ChatModel: Send + Sync + 'static {
    /// Backend name for logs and status reports.
    fn name(&self) -> &str;

    /// Send a chat exchange and wait for the complete reply.
    fn chat(&self, model: &str, messages: Vec<ChatMessage>) -> BoxFuture<'_, Result<ChatResponse>>;

    /// Check that the server is reachable.
    fn ping(&self) -> BoxFuture<'_, Result<()>>;
}

/// Graph database backend.
pub trait GraphStore: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Create the node if absent, otherwise merge `properties` into it.
    fn upsert_node(&self, node: NodeUpsert) -> BoxFuture<'_, Result<UpsertedNode>>;

    fn ping(&self) -> BoxFuture<'_, Result<()>>;
}

/// Out-of-process script execution.
///
/// Implementations must kill the child when `cancel` fires or the
/// invocation's timeout elapses.
pub trait ScriptRunner: Send + Sync + 'static {
    fn run(
        &self,
        invocation: ScriptInvocation,
        input: serde_json::Value,
        cancel: CancellationToken,
    ) -> BoxFuture<'_, Result<serde_json::Value>>;
}

/// Source of workflow and agent definitions.
pub trait DefinitionLoader: Send + Sync + 'static {
    /// Fails with `DefinitionNotFound` when no workflow has this id.
    fn load_workflow(&self, id: &str) -> BoxFuture<'_, Result<WorkflowDefinition>>;

    /// Fails with `AgentNotFound` when no agent has this name.
    fn load_agent(&self, name: &str) -> BoxFuture<'_, Result<AgentDefinition>>;
}

/// Assembles system prompts from named modules.
pub trait PromptLibrary: Send + Sync + 'static {
    fn assemble(&self, modules: &[String]) -> BoxFuture<'_, Result<String>>;
}

/// Structured extraction from free-form model output.
pub trait SchemaAdapter: Send + Sync + 'static {
    /// Return the structured value, or `None` when the text holds none.
    fn extract(&self, text: &str) -> Option<serde_json::Value>;
}
