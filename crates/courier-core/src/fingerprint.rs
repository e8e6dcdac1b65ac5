use std::fmt;

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::context_store::ToolContext;

/// Deterministic identity of a tool invocation: SHA-256 over the tool name
/// and its input with object keys sorted at every depth.
///
/// Only the name and input go in. Timestamps or anything tied to a
/// monitoring run must never be mixed in, or previews stop matching.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn compute(tool_name: &str, tool_input: &Value) -> Self {
        let mut canonical = String::new();
        canonical.push_str("{\"input\":");
        write_canonical(tool_input, &mut canonical);
        canonical.push_str(",\"tool\":");
        write_canonical(&Value::String(tool_name.to_string()), &mut canonical);
        canonical.push('}');

        let digest = Sha256::digest(canonical.as_bytes());
        Self(format!("{:x}", digest))
    }

    pub fn of_context(context: &ToolContext) -> Self {
        Self::compute(&context.tool_name, &context.tool_input)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Prefix for log fields
    pub fn short(&self) -> &str {
        &self.0[..16.min(self.0.len())]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(&Value::String(key.clone()), out);
                out.push(':');
                write_canonical(&map[key.as_str()], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}
