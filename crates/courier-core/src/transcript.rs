//! Reading the agent's JSONL transcript to summarize the finished turn.

use std::path::Path;

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    User,
    Assistant,
}

#[derive(Debug)]
struct Entry {
    role: Role,
    text: String,
}

fn text_of_blocks(blocks: &[Value]) -> String {
    blocks
        .iter()
        .filter(|block| block.get("type").and_then(Value::as_str) == Some("text"))
        .filter_map(|block| block.get("text").and_then(Value::as_str))
        .collect::<Vec<_>>()
        .join("")
}

fn parse_entry(line: &str) -> Option<Entry> {
    let record: Value = serde_json::from_str(line.trim()).ok()?;
    let role = match record.get("type").and_then(Value::as_str)? {
        "user" => Role::User,
        "assistant" => Role::Assistant,
        _ => return None,
    };
    let content = record.get("message").and_then(|m| m.get("content"));

    let text = match content {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(blocks)) => {
            let is_tool_result = blocks
                .first()
                .and_then(|b| b.get("type"))
                .and_then(Value::as_str)
                == Some("tool_result");
            if role == Role::User && is_tool_result {
                return None;
            }
            text_of_blocks(blocks)
        }
        _ => String::new(),
    };

    // A user entry marks the turn boundary even when empty
    if role == Role::Assistant && text.trim().is_empty() {
        return None;
    }
    Some(Entry { role, text })
}

/// Assistant text of the current turn: everything after the last user
/// message, joined into one block. Tool-result records are not turn
/// boundaries.
pub fn current_turn_text(contents: &str) -> Option<String> {
    let entries: Vec<Entry> = contents.lines().filter_map(parse_entry).collect();

    let start = entries
        .iter()
        .rposition(|e| e.role == Role::User)
        .map(|i| i + 1)
        .unwrap_or(0);

    let text = entries[start..]
        .iter()
        .filter(|e| e.role == Role::Assistant)
        .map(|e| e.text.trim())
        .collect::<Vec<_>>()
        .join("\n");

    debug!(entries = entries.len(), turn_start = start, "Parsed transcript");
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

/// Read a transcript file and extract the current turn's assistant text
pub async fn read_current_turn(path: &Path) -> Result<Option<String>> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read transcript {}", path.display()))?;
    Ok(current_turn_text(&contents))
}
