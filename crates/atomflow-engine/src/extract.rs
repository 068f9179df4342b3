use atomflow_core::traits::SchemaAdapter;

/// Pulls a JSON document out of chatty model output: fenced code blocks, or
/// the outermost `{...}` / `[...]` span surrounded by prose.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonSchemaAdapter;

impl JsonSchemaAdapter {
    pub fn new() -> Self {
        Self
    }
}

/// Strip markdown code fences from text.
fn strip_code_fences(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    let start = trimmed.find("```")?;
    let after = &trimmed[start + 3..];
    // Skip the language tag line
    let content_start = after.find('\n').map_or(0, |p| p + 1);
    let after = &after[content_start..];
    let end = after.find("```")?;
    Some(after[..end].trim())
}

/// The span from the first opening bracket to the matching last closer.
fn bracketed_span(text: &str) -> Option<&str> {
    let start = text.find(['{', '['])?;
    let close = if text[start..].starts_with('{') { '}' } else { ']' };
    let end = text.rfind(close)?;
    (end > start).then(|| &text[start..=end])
}

fn parse_structured(candidate: &str) -> Option<serde_json::Value> {
    match serde_json::from_str::<serde_json::Value>(candidate) {
        Ok(v) if v.is_object() || v.is_array() => Some(v),
        _ => None,
    }
}

impl SchemaAdapter for JsonSchemaAdapter {
    fn extract(&self, text: &str) -> Option<serde_json::Value> {
        if let Some(fenced) = strip_code_fences(text) {
            if let Some(v) = parse_structured(fenced) {
                return Some(v);
            }
        }
        bracketed_span(text).and_then(parse_structured)
    }
}
