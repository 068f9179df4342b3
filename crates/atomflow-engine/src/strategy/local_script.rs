use std::time::Duration;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use atomflow_core::error::Result;
use atomflow_core::types::{LocalScriptConfig, ScriptInvocation};

use crate::backends::Backends;

/// Resolve the agent's script settings against the configured defaults.
pub fn invocation(backends: &Backends, config: &LocalScriptConfig) -> ScriptInvocation {
    let defaults = &backends.script_defaults;
    ScriptInvocation {
        script: backends.tools_dir.join(&config.script_path),
        interpreter: config
            .interpreter
            .clone()
            .or_else(|| defaults.interpreter.clone()),
        timeout: config
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(defaults.timeout),
    }
}

pub async fn execute(
    backends: &Backends,
    config: &LocalScriptConfig,
    input: Value,
    cancel: CancellationToken,
) -> Result<Value> {
    backends
        .scripts
        .run(invocation(backends, config), input, cancel)
        .await
}
