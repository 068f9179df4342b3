use serde_json::Value;

use atomflow_core::error::{AtomflowError, Result};

use crate::context::ExecutionContext;

const PREFIX: &str = "$.";

/// A parsed context reference.
///
/// ```text
/// $.input_trigger.<key>
/// $.steps[<index>].<key>
/// ```
///
/// Keys carry no further structure: `$.input_trigger.a.b` looks up the key
/// `"a.b"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reference {
    InputTrigger { key: String },
    Step { index: usize, key: String },
}

fn malformed(raw: &str, reason: &str) -> AtomflowError {
    AtomflowError::Reference {
        reference: raw.to_string(),
        reason: reason.to_string(),
    }
}

impl Reference {
    /// Whether `s` is written as a reference (starts with `$.`).
    pub fn is_reference(s: &str) -> bool {
        s.starts_with(PREFIX)
    }

    /// Parse a reference string. Anything starting with `$.` that does not
    /// match the grammar is an error.
    pub fn parse(raw: &str) -> Result<Self> {
        let path = raw
            .strip_prefix(PREFIX)
            .ok_or_else(|| malformed(raw, "references start with '$.'"))?;

        if let Some(key) = path.strip_prefix("input_trigger.") {
            if key.is_empty() {
                return Err(malformed(raw, "empty key"));
            }
            return Ok(Self::InputTrigger {
                key: key.to_string(),
            });
        }

        if let Some(rest) = path.strip_prefix("steps[") {
            let (index, key) = rest
                .split_once("].")
                .ok_or_else(|| malformed(raw, "expected '$.steps[<n>].<key>'"))?;
            if index.is_empty() || !index.bytes().all(|b| b.is_ascii_digit()) {
                return Err(malformed(raw, "step index must be a non-negative integer"));
            }
            let index = index
                .parse()
                .map_err(|_| malformed(raw, "step index out of range"))?;
            if key.is_empty() {
                return Err(malformed(raw, "empty key"));
            }
            return Ok(Self::Step {
                index,
                key: key.to_string(),
            });
        }

        Err(malformed(
            raw,
            "expected '$.input_trigger.<key>' or '$.steps[<n>].<key>'",
        ))
    }

    /// Look the reference up in `ctx`.
    pub fn lookup(&self, raw: &str, ctx: &ExecutionContext) -> Result<Value> {
        match self {
            Self::InputTrigger { key } => {
                let trigger = ctx
                    .input_trigger()
                    .as_object()
                    .ok_or_else(|| malformed(raw, "trigger input is not a mapping"))?;
                trigger
                    .get(key)
                    .cloned()
                    .ok_or_else(|| malformed(raw, &format!("trigger input has no key '{}'", key)))
            }
            Self::Step { index, key } => {
                let output = ctx.step_output(*index).ok_or_else(|| {
                    malformed(
                        raw,
                        &format!(
                            "step {} has not run ({} step(s) completed)",
                            index,
                            ctx.completed()
                        ),
                    )
                })?;
                let map = output
                    .as_object()
                    .ok_or_else(|| malformed(raw, &format!("output of step {} is not a mapping", index)))?;
                map.get(key).cloned().ok_or_else(|| {
                    malformed(raw, &format!("output of step {} has no key '{}'", index, key))
                })
            }
        }
    }
}

/// Resolve a step value against the context.
///
/// Strings starting with `$.` are references; every other value, including
/// non-string JSON, is a literal returned unchanged. Never mutates `ctx`.
pub fn resolve(value: &Value, ctx: &ExecutionContext) -> Result<Value> {
    match value {
        Value::String(s) if Reference::is_reference(s) => Reference::parse(s)?.lookup(s, ctx),
        literal => Ok(literal.clone()),
    }
}
