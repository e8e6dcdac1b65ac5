use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use courier_core::{KeyInjector, PaneReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Command name tmux reports for the agent's pane
const AGENT_COMMAND: &str = "claude";

const LIST_FORMAT: &str = "#{session_name}:#{window_index}.#{pane_index} #{pane_current_command}";

/// Reads the agent's terminal through `tmux capture-pane`
#[derive(Debug, Clone)]
pub struct TmuxPane {
    target: String,
    tmux_bin: String,
}

impl TmuxPane {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            tmux_bin: "tmux".to_string(),
        }
    }

    /// Use a different tmux binary (socket wrappers, tests)
    pub fn with_binary(mut self, bin: impl Into<String>) -> Self {
        self.tmux_bin = bin.into();
        self
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    async fn capture(&self, max_lines: usize) -> Result<String> {
        let start = format!("-{}", max_lines);
        let output = Command::new(&self.tmux_bin)
            .args(["capture-pane", "-p", "-t", &self.target, "-S", &start])
            .output()
            .await
            .context("Failed to run tmux")?;

        if !output.status.success() {
            bail!(
                "tmux capture-pane failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl PaneReader for TmuxPane {
    async fn read_buffer(&self, max_lines: usize) -> String {
        match self.capture(max_lines).await {
            Ok(text) => text,
            Err(e) => {
                debug!(target = %self.target, error = %e, "Pane read failed");
                String::new()
            }
        }
    }
}

#[async_trait]
impl KeyInjector for TmuxPane {
    /// Type `keys` literally; a digit picks that option of an open prompt
    async fn send_keys(&self, keys: &str) -> Result<()> {
        let output = Command::new(&self.tmux_bin)
            .args(["send-keys", "-t", &self.target, "-l", keys])
            .output()
            .await
            .context("Failed to run tmux")?;

        if !output.status.success() {
            bail!(
                "tmux send-keys failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        debug!(target = %self.target, keys, "Sent keys to pane");
        Ok(())
    }
}

/// First pane target whose current command is the agent
pub fn find_agent_pane(list_output: &str) -> Option<String> {
    list_output.lines().find_map(|line| {
        let mut fields = line.split_whitespace();
        let target = fields.next()?;
        let command = fields.next()?;
        (command == AGENT_COMMAND).then(|| target.to_string())
    })
}

/// Ask tmux for every pane and pick the agent's
pub async fn discover_agent_pane() -> Result<String> {
    let output = Command::new("tmux")
        .args(["list-panes", "-a", "-F", LIST_FORMAT])
        .output()
        .await
        .context("Failed to run tmux")?;

    if !output.status.success() {
        bail!(
            "tmux list-panes failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }

    let listing = String::from_utf8_lossy(&output.stdout);
    match find_agent_pane(&listing) {
        Some(target) => {
            info!(target = %target, "Discovered agent pane");
            Ok(target)
        }
        None => {
            warn!(panes = listing.lines().count(), "No pane is running the agent");
            bail!("No tmux pane is running '{}'", AGENT_COMMAND)
        }
    }
}
