use serde_json::{json, Value};
use tracing::debug;

use atomflow_core::error::{AtomflowError, Result};
use atomflow_core::traits::SchemaAdapter;
use atomflow_core::types::{ChatMessage, ModelChatConfig, OutputSchema, SystemPrompt};

use crate::backends::Backends;

/// Render a resolved value as message text: strings verbatim, null as
/// nothing, anything else as compact JSON.
pub fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// `"{context}\n\n{prompt}"`
pub fn user_message(input: &Value, prompt: Option<&Value>) -> String {
    let prompt = prompt.map(render).unwrap_or_default();
    format!("{}\n\n{}", render(input), prompt)
}

/// Turn the model's reply into a step result.
pub fn parse_output(
    content: &str,
    schema: OutputSchema,
    adapter: Option<&dyn SchemaAdapter>,
) -> Value {
    if schema == OutputSchema::Json {
        if let Some(v) = adapter.and_then(|a| a.extract(content)) {
            return v;
        }
        let trimmed = content.trim();
        if trimmed.starts_with('{') || trimmed.starts_with('[') {
            if let Ok(v) = serde_json::from_str::<Value>(trimmed) {
                return v;
            }
        }
    }
    json!({ "raw_text": content })
}

pub async fn execute(
    backends: &Backends,
    config: &ModelChatConfig,
    input: &Value,
    prompt: Option<&Value>,
) -> Result<Value> {
    let model = backends.model.as_ref().ok_or_else(|| {
        AtomflowError::ModelUnavailable("no model server is connected".into())
    })?;

    let system = match config.system_prompt {
        SystemPrompt::Literal(ref text) => text.clone(),
        SystemPrompt::Modules(ref modules) => backends.prompts.assemble(modules).await?,
    };
    let messages = vec![ChatMessage::system(system), ChatMessage::user(user_message(input, prompt))];

    debug!(model = %config.model, backend = model.name(), "Calling model");
    let response = model.chat(&config.model, messages).await?;

    Ok(parse_output(
        &response.content,
        config.output_schema,
        backends.schema_adapter.as_deref(),
    ))
}
