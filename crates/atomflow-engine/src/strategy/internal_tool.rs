use serde_json::Value;

use atomflow_core::error::Result;
use atomflow_core::types::InternalToolConfig;

use crate::backends::Backends;

pub async fn execute(backends: &Backends, config: &InternalToolConfig, input: Value) -> Result<Value> {
    atomflow_tools::internal::invoke(config.function, backends.graph.as_deref(), input).await
}
