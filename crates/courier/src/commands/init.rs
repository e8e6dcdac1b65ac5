use anyhow::{Context, Result};
use std::path::Path;

pub const DEFAULT_CONFIG: &str = r#"# Courier Configuration

[relay]
# Directory whose agent sessions are relayed (empty: current directory)
target_dir = ""
# Socket directory (empty: $COURIER_RUNTIME_DIR, $XDG_RUNTIME_DIR, then /tmp)
runtime_dir = ""
filter_by_directory = true
shutdown_grace_secs = 5

[monitor]
window_ms = 5000
poll_interval_ms = 500
pane_lines = 50

[retention]
context_ttl_secs = 300
operation_ttl_secs = 600
dialog_ttl_secs = 300
sweep_interval_secs = 60
context_capacity = 1000
permission_window_secs = 60
finish_retry_ms = 100

[tmux]
# session:window.pane (empty: first pane running the agent)
target = ""

[telegram]
bot_token = "${TELEGRAM_BOT_TOKEN}"
chat_id = "${TELEGRAM_CHAT_ID}"
api_base = "https://api.telegram.org"
max_message_len = 3900
part_delay_ms = 100
# Answer permission prompts by tapping the chat's buttons
callbacks = true
"#;

/// Initialize a new config file
pub fn run_init(path: &Path) -> Result<()> {
    if path.exists() {
        anyhow::bail!("Config already exists at {:?}", path);
    }
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {:?}", parent))?;
        }
    }
    std::fs::write(path, DEFAULT_CONFIG).with_context(|| format!("Failed to write {:?}", path))?;
    println!("Created config at {:?}", path);
    Ok(())
}
