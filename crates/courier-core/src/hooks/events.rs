use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle event emitted by the agent's hooks
#[derive(Debug, Clone, PartialEq)]
pub struct HookEvent {
    pub session_id: String,
    pub working_directory: Option<PathBuf>,
    pub timestamp: Option<DateTime<Utc>>,
    pub kind: HookEventKind,
}

/// Kind-specific payload. Adding a kind means extending this enum and
/// every exhaustive match over it.
#[derive(Debug, Clone, PartialEq)]
pub enum HookEventKind {
    /// Tool is about to run
    ToolStarted { tool_name: String, tool_input: Value },
    /// Tool has returned
    ToolFinished {
        tool_name: String,
        tool_input: Value,
        tool_output: Value,
    },
    /// Agent is blocked on a permission decision or idle waiting for input
    PermissionOrIdleNotice {
        message: String,
        tool_name: Option<String>,
        tool_input: Option<Value>,
    },
    /// Agent finished its turn
    TurnStopped { transcript_path: Option<PathBuf> },
    /// User submitted a prompt to the agent
    PromptSubmitted { prompt: String },
}

impl HookEventKind {
    /// Discriminator written to the wire (the agent's native hook names)
    pub fn wire_name(&self) -> &'static str {
        match self {
            HookEventKind::ToolStarted { .. } => "PreToolUse",
            HookEventKind::ToolFinished { .. } => "PostToolUse",
            HookEventKind::PermissionOrIdleNotice { .. } => "Notification",
            HookEventKind::TurnStopped { .. } => "Stop",
            HookEventKind::PromptSubmitted { .. } => "UserPromptSubmit",
        }
    }
}

/// Flat wire record: one JSON object per connection.
///
/// Accepts both the descriptive field names (`event_kind`,
/// `working_directory`, `tool_output`) and the agent's native ones
/// (`hook_event_name`, `cwd`, `tool_response`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HookRecord {
    #[serde(alias = "hook_event_name")]
    pub event_kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub tool_input: Value,
    #[serde(default, alias = "tool_response", skip_serializing_if = "Value::is_null")]
    pub tool_output: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript_path: Option<PathBuf>,
    #[serde(default, alias = "cwd", skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub timestamp: Value,
}

impl HookEvent {
    pub fn new(session_id: impl Into<String>, kind: HookEventKind) -> Self {
        Self {
            session_id: session_id.into(),
            working_directory: None,
            timestamp: None,
            kind,
        }
    }

    pub fn tool_started(session_id: &str, tool_name: &str, tool_input: Value) -> Self {
        Self::new(
            session_id,
            HookEventKind::ToolStarted {
                tool_name: tool_name.to_string(),
                tool_input,
            },
        )
    }

    pub fn tool_finished(session_id: &str, tool_name: &str, tool_input: Value, tool_output: Value) -> Self {
        Self::new(
            session_id,
            HookEventKind::ToolFinished {
                tool_name: tool_name.to_string(),
                tool_input,
                tool_output,
            },
        )
    }

    pub fn notice(session_id: &str, message: &str) -> Self {
        Self::new(
            session_id,
            HookEventKind::PermissionOrIdleNotice {
                message: message.to_string(),
                tool_name: None,
                tool_input: None,
            },
        )
    }

    pub fn with_working_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Tool name carried by the event, if any
    pub fn tool_name(&self) -> Option<&str> {
        match &self.kind {
            HookEventKind::ToolStarted { tool_name, .. }
            | HookEventKind::ToolFinished { tool_name, .. } => Some(tool_name),
            HookEventKind::PermissionOrIdleNotice { tool_name, .. } => tool_name.as_deref(),
            HookEventKind::TurnStopped { .. } | HookEventKind::PromptSubmitted { .. } => None,
        }
    }

    pub fn working_directory(&self) -> Option<&Path> {
        self.working_directory.as_deref()
    }

    /// Parse one wire payload into an event
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let record: HookRecord =
            serde_json::from_slice(bytes).context("Hook payload is not a valid record")?;
        Self::try_from(record)
    }

    /// Serialize into the wire payload
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(&self.to_record()).context("Failed to serialize hook record")
    }

    pub fn to_record(&self) -> HookRecord {
        let mut record = HookRecord {
            event_kind: self.kind.wire_name().to_string(),
            session_id: Some(self.session_id.clone()),
            working_directory: self.working_directory.clone(),
            timestamp: self
                .timestamp
                .map(|t| Value::String(t.to_rfc3339_opts(SecondsFormat::AutoSi, true)))
                .unwrap_or(Value::Null),
            ..HookRecord::default()
        };

        match &self.kind {
            HookEventKind::ToolStarted {
                tool_name,
                tool_input,
            } => {
                record.tool_name = Some(tool_name.clone());
                record.tool_input = tool_input.clone();
            }
            HookEventKind::ToolFinished {
                tool_name,
                tool_input,
                tool_output,
            } => {
                record.tool_name = Some(tool_name.clone());
                record.tool_input = tool_input.clone();
                record.tool_output = tool_output.clone();
            }
            HookEventKind::PermissionOrIdleNotice {
                message,
                tool_name,
                tool_input,
            } => {
                record.message = Some(message.clone());
                record.tool_name = tool_name.clone();
                record.tool_input = tool_input.clone().unwrap_or(Value::Null);
            }
            HookEventKind::TurnStopped { transcript_path } => {
                record.transcript_path = transcript_path.clone();
            }
            HookEventKind::PromptSubmitted { prompt } => {
                record.prompt = Some(prompt.clone());
            }
        }

        record
    }
}

impl TryFrom<HookRecord> for HookEvent {
    type Error = anyhow::Error;

    fn try_from(record: HookRecord) -> Result<Self> {
        let session_id = record
            .session_id
            .context("Hook record missing 'session_id'")?;

        let kind = match record.event_kind.as_str() {
            "PreToolUse" | "ToolStarted" => HookEventKind::ToolStarted {
                tool_name: record.tool_name.context("PreToolUse missing 'tool_name'")?,
                tool_input: record.tool_input,
            },
            "PostToolUse" | "ToolFinished" => HookEventKind::ToolFinished {
                tool_name: record.tool_name.context("PostToolUse missing 'tool_name'")?,
                tool_input: record.tool_input,
                tool_output: record.tool_output,
            },
            "Notification" | "PermissionOrIdleNotice" => HookEventKind::PermissionOrIdleNotice {
                message: record.message.unwrap_or_default(),
                tool_name: record.tool_name,
                tool_input: Some(record.tool_input).filter(|v| !v.is_null()),
            },
            "Stop" | "TurnStopped" => HookEventKind::TurnStopped {
                transcript_path: record.transcript_path,
            },
            "UserPromptSubmit" | "PromptSubmitted" => HookEventKind::PromptSubmitted {
                prompt: record.prompt.unwrap_or_default(),
            },
            other => return Err(anyhow!("Unknown hook event kind: {}", other)),
        };

        Ok(Self {
            session_id,
            working_directory: record.working_directory,
            timestamp: parse_timestamp(&record.timestamp),
            kind,
        })
    }
}

/// Accepts RFC 3339 strings or epoch seconds; anything else is dropped
fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|t| t.with_timezone(&Utc)),
        Value::Number(n) => {
            let secs = n.as_f64()?;
            let whole = secs.trunc() as i64;
            let nanos = ((secs - secs.trunc()) * 1e9).round() as u32;
            Utc.timestamp_opt(whole, nanos.min(999_999_999)).single()
        }
        _ => None,
    }
}
