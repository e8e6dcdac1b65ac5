use anyhow::Result;
use async_trait::async_trait;

/// Read-only view of the agent's terminal pane
#[async_trait]
pub trait PaneReader: Send + Sync {
    /// Visible text, up to `max_lines` lines of history.
    ///
    /// Failures return an empty string: no text is a valid
    /// "nothing to detect yet" state.
    async fn read_buffer(&self, max_lines: usize) -> String;
}

/// Types keystrokes into the agent's pane; answers a prompt from the chat
#[async_trait]
pub trait KeyInjector: Send + Sync {
    async fn send_keys(&self, keys: &str) -> Result<()>;
}
