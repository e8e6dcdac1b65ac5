use anyhow::{Context, Result};
use courier_adapters::telegram::DEFAULT_API_BASE;
use courier_core::dispatch::DEFAULT_MAX_MESSAGE_LEN;
use courier_core::EngineConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub relay: RelayConfig,

    #[serde(default)]
    pub monitor: MonitorConfig,

    #[serde(default)]
    pub retention: RetentionConfig,

    #[serde(default)]
    pub tmux: TmuxConfig,

    #[serde(default)]
    pub telegram: TelegramConfig,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct RelayConfig {
    /// Directory whose sessions are relayed; empty means the current directory
    #[serde(default)]
    pub target_dir: String,

    /// Where the ingest socket lives; empty means the platform runtime dir
    #[serde(default)]
    pub runtime_dir: String,

    /// Drop events whose working directory is outside `target_dir`
    #[serde(default = "default_true")]
    pub filter_by_directory: bool,

    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct MonitorConfig {
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_pane_lines")]
    pub pane_lines: usize,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct RetentionConfig {
    #[serde(default = "default_context_ttl_secs")]
    pub context_ttl_secs: u64,

    #[serde(default = "default_operation_ttl_secs")]
    pub operation_ttl_secs: u64,

    #[serde(default = "default_dialog_ttl_secs")]
    pub dialog_ttl_secs: u64,

    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    #[serde(default = "default_context_capacity")]
    pub context_capacity: usize,

    #[serde(default = "default_permission_window_secs")]
    pub permission_window_secs: u64,

    #[serde(default = "default_finish_retry_ms")]
    pub finish_retry_ms: u64,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct TmuxConfig {
    /// Pane to watch (`session:window.pane`); empty means auto-discover
    #[serde(default)]
    pub target: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct TelegramConfig {
    /// Bot token; `$VAR` / `${VAR}` are expanded from the environment
    #[serde(default = "default_bot_token")]
    pub bot_token: String,

    #[serde(default = "default_chat_id")]
    pub chat_id: String,

    #[serde(default = "default_api_base")]
    pub api_base: String,

    #[serde(default = "default_max_message_len")]
    pub max_message_len: usize,

    #[serde(default = "default_part_delay_ms")]
    pub part_delay_ms: u64,

    /// Answer permission prompts from the chat's buttons
    #[serde(default = "default_true")]
    pub callbacks: bool,
}

fn default_true() -> bool {
    true
}

fn default_shutdown_grace_secs() -> u64 {
    5
}

fn default_window_ms() -> u64 {
    5000
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_pane_lines() -> usize {
    50
}

fn default_context_ttl_secs() -> u64 {
    300
}

fn default_operation_ttl_secs() -> u64 {
    600
}

fn default_dialog_ttl_secs() -> u64 {
    300
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_context_capacity() -> usize {
    1000
}

fn default_permission_window_secs() -> u64 {
    60
}

fn default_finish_retry_ms() -> u64 {
    100
}

fn default_bot_token() -> String {
    "${TELEGRAM_BOT_TOKEN}".to_string()
}

fn default_chat_id() -> String {
    "${TELEGRAM_CHAT_ID}".to_string()
}

fn default_api_base() -> String {
    DEFAULT_API_BASE.to_string()
}

fn default_max_message_len() -> usize {
    DEFAULT_MAX_MESSAGE_LEN
}

fn default_part_delay_ms() -> u64 {
    100
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            target_dir: String::new(),
            runtime_dir: String::new(),
            filter_by_directory: default_true(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            window_ms: default_window_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            pane_lines: default_pane_lines(),
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            context_ttl_secs: default_context_ttl_secs(),
            operation_ttl_secs: default_operation_ttl_secs(),
            dialog_ttl_secs: default_dialog_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            context_capacity: default_context_capacity(),
            permission_window_secs: default_permission_window_secs(),
            finish_retry_ms: default_finish_retry_ms(),
        }
    }
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: default_bot_token(),
            chat_id: default_chat_id(),
            api_base: default_api_base(),
            max_message_len: default_max_message_len(),
            part_delay_ms: default_part_delay_ms(),
            callbacks: true,
        }
    }
}

impl Config {
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            monitor_window: Duration::from_millis(self.monitor.window_ms),
            poll_interval: Duration::from_millis(self.monitor.poll_interval_ms),
            pane_lines: self.monitor.pane_lines,
            context_ttl: Duration::from_secs(self.retention.context_ttl_secs),
            operation_ttl: Duration::from_secs(self.retention.operation_ttl_secs),
            dialog_ttl: Duration::from_secs(self.retention.dialog_ttl_secs),
            sweep_interval: Duration::from_secs(self.retention.sweep_interval_secs),
            context_capacity: self.retention.context_capacity,
            permission_heuristic_window: Duration::from_secs(
                self.retention.permission_window_secs,
            ),
            finish_retry: Duration::from_millis(self.retention.finish_retry_ms),
            part_delay: Duration::from_millis(self.telegram.part_delay_ms),
            shutdown_grace: Duration::from_secs(self.relay.shutdown_grace_secs),
        }
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        let nonzero = [
            ("monitor.window_ms", self.monitor.window_ms),
            ("monitor.poll_interval_ms", self.monitor.poll_interval_ms),
            ("retention.sweep_interval_secs", self.retention.sweep_interval_secs),
        ];
        for (name, value) in nonzero {
            if value == 0 {
                anyhow::bail!("{} must be greater than zero", name);
            }
        }
        if self.monitor.pane_lines == 0 {
            anyhow::bail!("monitor.pane_lines must be greater than zero");
        }
        if self.retention.context_capacity == 0 {
            anyhow::bail!("retention.context_capacity must be greater than zero");
        }
        Ok(())
    }

    /// Configured target directory, else the current directory
    pub fn target_dir(&self) -> Result<PathBuf> {
        if self.relay.target_dir.is_empty() {
            return std::env::current_dir().context("Failed to read current directory");
        }
        Ok(expand_path(&self.relay.target_dir))
    }

    /// Configured runtime directory, else the platform default
    pub fn runtime_dir(&self) -> PathBuf {
        if self.relay.runtime_dir.is_empty() {
            courier_gateway::runtime_dir()
        } else {
            expand_path(&self.relay.runtime_dir)
        }
    }

    pub fn socket_path(&self, target_dir: &Path) -> PathBuf {
        courier_gateway::socket_path_in(&self.runtime_dir(), target_dir)
    }

    /// Bot token and chat id with environment references resolved
    pub fn telegram_credentials(&self) -> Result<(String, String)> {
        let token = shellexpand::env(&self.telegram.bot_token)
            .context("telegram.bot_token references an unset variable")?;
        let chat_id = shellexpand::env(&self.telegram.chat_id)
            .context("telegram.chat_id references an unset variable")?;
        if token.trim().is_empty() || chat_id.trim().is_empty() {
            anyhow::bail!("telegram.bot_token and telegram.chat_id must be set (or use --dry-run)");
        }
        Ok((token.into_owned(), chat_id.into_owned()))
    }
}

fn expand_path(raw: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(raw).into_owned())
}

/// Load config from file or use defaults
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    if let Some(path) = path {
        let path = expand_path(&path.to_string_lossy());
        let content =
            fs::read_to_string(&path).context(format!("Failed to read config file: {:?}", path))?;

        let config: Config = toml::from_str(&content).context("Failed to parse TOML config")?;
        config.validate()?;

        Ok(config)
    } else {
        Ok(Config::default())
    }
}
