use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use atomflow_core::error::Result;
use atomflow_core::types::{AgentDefinition, AgentKind, StepSpec};

use crate::backends::Backends;
use crate::context::ExecutionContext;
use crate::reference::resolve;
use crate::strategy::{internal_tool, local_script, model_chat};

/// Resolves a step's inputs and hands it to exactly one strategy.
pub struct StepDispatcher {
    backends: Arc<Backends>,
    dispatched: AtomicUsize,
}

impl StepDispatcher {
    pub fn new(backends: Arc<Backends>) -> Self {
        Self {
            backends,
            dispatched: AtomicUsize::new(0),
        }
    }

    pub fn backends(&self) -> &Backends {
        &self.backends
    }

    /// Number of steps handed to a strategy so far.
    pub fn dispatched(&self) -> usize {
        self.dispatched.load(Ordering::SeqCst)
    }

    pub async fn dispatch(
        &self,
        step: &StepSpec,
        agent: &AgentDefinition,
        ctx: &ExecutionContext,
        cancel: CancellationToken,
    ) -> Result<Value> {
        let input = match step.input {
            Some(ref v) => resolve(v, ctx)?,
            None => Value::Null,
        };
        let prompt = match agent.kind {
            AgentKind::ModelChat(_) => step.prompt.as_ref().map(|p| resolve(p, ctx)).transpose()?,
            _ => None,
        };

        self.dispatched.fetch_add(1, Ordering::SeqCst);
        debug!(
            run_id = %ctx.run_id(),
            agent = %agent.name,
            kind = agent.kind.type_tag(),
            "Dispatching step"
        );

        match agent.kind {
            AgentKind::ModelChat(ref config) => {
                model_chat::execute(&self.backends, config, &input, prompt.as_ref()).await
            }
            AgentKind::InternalTool(ref config) => {
                internal_tool::execute(&self.backends, config, input).await
            }
            AgentKind::LocalScript(ref config) => {
                local_script::execute(&self.backends, config, input, cancel).await
            }
        }
    }
}
