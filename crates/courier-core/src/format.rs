//! Chat-facing text for every notification the engine sends.
//!
//! Nothing here touches engine state; the state machines decide *whether*
//! to send and these functions decide *what it says*.

use std::path::Path;

use serde_json::Value;

use crate::context_store::ToolContext;
use crate::dispatch::Outbound;

/// Choices offered on an authoritative permission notice when the pane
/// options are not known
pub const DEFAULT_PERMISSION_CHOICES: [&str; 3] = ["Yes", "Yes, and don't ask again", "No"];

const PERMISSION_HEADER: &str = "🔐 **Permission Required**";
const SELECT_FOOTER: &str = "Please select an option:";

fn str_field<'a>(input: &'a Value, key: &str) -> &'a str {
    input.get(key).and_then(Value::as_str).unwrap_or("")
}

/// Code block language for a file, from its name or extension
pub fn language_for(file_path: &str) -> &'static str {
    if file_path.is_empty() {
        return "";
    }
    let path = Path::new(file_path);
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();
    match file_name.as_str() {
        "dockerfile" => return "dockerfile",
        "makefile" => return "makefile",
        "vagrantfile" | "gemfile" | "rakefile" => return "ruby",
        _ => {}
    }

    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();
    match ext.as_str() {
        "py" => "python",
        "js" | "mjs" | "cjs" => "javascript",
        "ts" => "typescript",
        "jsx" => "jsx",
        "tsx" => "tsx",
        "java" => "java",
        "c" | "h" => "c",
        "cpp" | "cc" | "cxx" | "hpp" => "cpp",
        "cs" => "csharp",
        "go" => "go",
        "rs" => "rust",
        "php" => "php",
        "rb" => "ruby",
        "sh" | "bash" | "zsh" | "fish" => "bash",
        "ps1" => "powershell",
        "sql" => "sql",
        "html" => "html",
        "css" => "css",
        "scss" => "scss",
        "sass" => "sass",
        "json" => "json",
        "xml" => "xml",
        "yaml" | "yml" => "yaml",
        "toml" => "toml",
        "ini" | "cfg" | "conf" => "ini",
        "md" | "markdown" => "markdown",
        "mk" => "makefile",
        _ => "",
    }
}

fn code_block(lang: &str, body: &str) -> String {
    format!("```{lang}\n{body}\n```")
}

/// Text shown when a tool starts
pub fn tool_started(tool_name: &str, input: &Value) -> String {
    match tool_name {
        "Bash" => {
            let description = str_field(input, "description");
            let mut message = String::from("💻 **Bash**");
            if !description.is_empty() {
                message.push_str(&format!(" - {description}"));
            }
            message.push('\n');
            message.push_str(&code_block("bash", str_field(input, "command")));
            message
        }
        "LS" => format!("📂 **Listing:** `{}`", str_field(input, "path")),
        "Edit" => {
            let file_path = str_field(input, "file_path");
            let lang = language_for(file_path);
            let mut message = format!("✏️ **Editing:** `{file_path}`\n");
            let old = str_field(input, "old_string");
            let new = str_field(input, "new_string");
            if !old.is_empty() {
                message.push_str(&format!("\n**Removing:**\n{}\n", code_block(lang, old)));
            }
            if !new.is_empty() {
                message.push_str(&format!("\n**Adding:**\n{}", code_block(lang, new)));
            }
            message.trim_end().to_string()
        }
        "MultiEdit" => {
            let file_path = str_field(input, "file_path");
            let lang = language_for(file_path);
            let edits = input
                .get("edits")
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or(&[]);
            let mut message = format!(
                "✏️ **Multi-editing:** `{file_path}` ({} changes)\n",
                edits.len()
            );
            for (i, edit) in edits.iter().enumerate() {
                message.push_str(&format!("\n**Edit {}:**", i + 1));
                let old = str_field(edit, "old_string");
                let new = str_field(edit, "new_string");
                if !old.is_empty() {
                    message.push_str(&format!("\n**Removing:**\n{}", code_block(lang, old)));
                }
                if !new.is_empty() {
                    message.push_str(&format!("\n**Adding:**\n{}", code_block(lang, new)));
                }
                message.push('\n');
            }
            message.trim_end().to_string()
        }
        "Write" => {
            let file_path = str_field(input, "file_path");
            let content = str_field(input, "content");
            let mut message = format!("✍️ **Writing:** `{file_path}`");
            if !content.is_empty() {
                message.push_str(&format!(
                    "\n\n**Content:**\n{}",
                    code_block(language_for(file_path), content)
                ));
            }
            message
        }
        "Read" => {
            let offset = input.get("offset").and_then(Value::as_u64);
            let limit = input.get("limit").and_then(Value::as_u64);
            let range = match (offset, limit) {
                (None, None) => String::new(),
                (start, Some(limit)) => {
                    let start = start.unwrap_or(0);
                    format!(" (lines {}-{})", start, start + limit)
                }
                (Some(start), None) => format!(" (from line {start})"),
            };
            format!("📖 **Reading:** `{}`{}", str_field(input, "file_path"), range)
        }
        "Grep" => {
            let mut message = format!("🔍 **Searching in:** `{}`", str_field(input, "path"));
            let mode = str_field(input, "output_mode");
            if !mode.is_empty() && mode != "files_with_matches" {
                message.push_str(&format!(" ({mode})"));
            }
            message.push('\n');
            message.push_str(&code_block("regex", str_field(input, "pattern")));
            message
        }
        "Glob" => format!("🗂️ **Finding files:** `{}`", str_field(input, "pattern")),
        "WebSearch" => format!("🌐 **Web Search:**\n{}", code_block("", str_field(input, "query"))),
        "TodoWrite" => {
            let mut message = String::from("📝 **Managing todos:**");
            let todos = input
                .get("todos")
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or(&[]);
            if !todos.is_empty() {
                message.push_str("\n\n**Todo List:**");
                for todo in todos {
                    let status = match str_field(todo, "status") {
                        "pending" => "⏳",
                        "in_progress" => "🔄",
                        "completed" => "✅",
                        _ => "❓",
                    };
                    let priority = match str_field(todo, "priority") {
                        "high" => " 🔥",
                        "medium" => " ⚡",
                        _ => "",
                    };
                    message.push_str(&format!("\n{} {}{}", status, str_field(todo, "content"), priority));
                }
            }
            message
        }
        other => format!("🔧 **{other}**"),
    }
}

/// Completion line appended to the start notification.
///
/// `None` means the tool finishes silently.
pub fn tool_finished(tool_name: &str) -> Option<String> {
    let text = match tool_name {
        "Read" => return None,
        "Edit" => "✅ **Edit completed**".to_string(),
        "Write" => "✅ **File created**".to_string(),
        "Bash" => "✅ **Command completed**".to_string(),
        "Grep" => "✅ **Search completed**".to_string(),
        "Glob" => "✅ **File search completed**".to_string(),
        "MultiEdit" => "✅ **Multi-edit completed**".to_string(),
        "WebSearch" => "✅ **Web search completed**".to_string(),
        other => format!("✅ **{other} completed**"),
    };
    Some(text)
}

/// Start text followed by completion text, as shown after an edit
pub fn combine(started: &str, finished: &str) -> String {
    format!("{started}\n\n{finished}")
}

/// Fast preview sent when the pane shows a prompt: tool and file only
pub fn permission_preview(context: &ToolContext, options: &[String]) -> Outbound {
    let input = &context.tool_input;
    let file_path = str_field(input, "file_path");
    let tool = context.tool_name.as_str();

    let action = match tool {
        "Edit" | "MultiEdit" | "Update" => "edit",
        "Write" => "write",
        _ => "",
    };
    let mut body = match (action, file_path.is_empty()) {
        ("", true) => format!("⚡ Claude needs permission to use {tool}"),
        ("", false) => format!("⚡ Claude needs permission to use {tool} on `{file_path}`"),
        (action, true) => format!("⚡ Claude needs permission to {action} a file"),
        (action, false) => format!("⚡ Claude needs permission to {action} `{file_path}`"),
    };
    if tool == "MultiEdit" {
        let count = input
            .get("edits")
            .and_then(Value::as_array)
            .map(Vec::len)
            .unwrap_or(0);
        if count > 0 {
            body.push_str(&format!(" ({count} changes)"));
        }
    }

    Outbound::text(format!("{PERMISSION_HEADER}\n\n{body}\n\n{SELECT_FOOTER}"))
        .with_choices(options.to_vec())
}

/// Full authoritative permission notice with the tool's detail
pub fn permission_request(message: &str, context: Option<&ToolContext>) -> Outbound {
    let base = if message.trim().is_empty() {
        "Claude needs your permission"
    } else {
        message.trim()
    };
    let mut text = format!("{PERMISSION_HEADER}\n\n{base}");

    if let Some(context) = context {
        let input = &context.tool_input;
        let file_path = str_field(input, "file_path");
        let lang = language_for(file_path);
        if !file_path.is_empty() {
            text.push_str(&format!("\n\n📂 **File:** `{file_path}`"));
        }
        match context.tool_name.as_str() {
            "Bash" => {
                let command = str_field(input, "command");
                if !command.is_empty() {
                    text.push_str(&format!("\n\n**Command to execute:**\n{}", code_block("bash", command)));
                }
            }
            "Edit" | "Update" => {
                let old = str_field(input, "old_string");
                let new = str_field(input, "new_string");
                if !old.is_empty() {
                    text.push_str(&format!("\n\n**Code to replace:**\n{}", code_block(lang, old)));
                }
                if !new.is_empty() {
                    text.push_str(&format!("\n\n**New code:**\n{}", code_block(lang, new)));
                }
            }
            "Write" => {
                let content = str_field(input, "content");
                if !content.is_empty() {
                    text.push_str(&format!("\n\n**Content to write:**\n{}", code_block(lang, content)));
                }
            }
            "MultiEdit" => {
                let edits = input
                    .get("edits")
                    .and_then(Value::as_array)
                    .map(Vec::as_slice)
                    .unwrap_or(&[]);
                if let Some(first) = edits.first() {
                    let new = str_field(first, "new_string");
                    if !new.is_empty() {
                        text.push_str(&format!(
                            "\n\n**First of {} changes:**\n{}",
                            edits.len(),
                            code_block(lang, new)
                        ));
                    }
                }
            }
            _ => {}
        }
    }

    text.push_str(&format!("\n\n{SELECT_FOOTER}"));
    Outbound::text(text).with_choices(
        DEFAULT_PERMISSION_CHOICES
            .iter()
            .map(|c| c.to_string())
            .collect(),
    )
}

pub fn idle_notice(message: &str) -> Outbound {
    Outbound::text(format!("🔔 {}", message.trim()))
}

pub fn prompt_submitted(prompt: &str) -> Outbound {
    Outbound::text(format!("💬 **New Prompt:**\n{}", code_block("", prompt)))
}

pub fn assistant_summary(text: &str) -> Outbound {
    Outbound::text(format!("🤖 **Claude:**\n{text}"))
}

/// Prompt text rewritten once an option was picked from the chat
pub fn choice_selected(prompt_text: &str, option: usize, option_text: &str) -> String {
    format!("{prompt_text}\n\n✅ **Selected:** {option}. {option_text}")
}
