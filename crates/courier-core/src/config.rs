use std::time::Duration;

use crate::monitor::MonitorSettings;

/// Engine tuning. Defaults match the production timings.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How long a Monitoring run polls the pane
    pub monitor_window: Duration,
    pub poll_interval: Duration,
    /// Lines of pane history read per poll
    pub pane_lines: usize,
    pub context_ttl: Duration,
    pub operation_ttl: Duration,
    pub dialog_ttl: Duration,
    pub sweep_interval: Duration,
    pub context_capacity: usize,
    /// A ToolContext this recent makes an unclassified notice a permission request
    pub permission_heuristic_window: Duration,
    /// Wait before re-checking an operation whose start send is in flight
    pub finish_retry: Duration,
    /// Pause between parts of a split message
    pub part_delay: Duration,
    pub shutdown_grace: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            monitor_window: Duration::from_secs(5),
            poll_interval: Duration::from_millis(500),
            pane_lines: 50,
            context_ttl: Duration::from_secs(300),
            operation_ttl: Duration::from_secs(600),
            dialog_ttl: Duration::from_secs(300),
            sweep_interval: Duration::from_secs(60),
            context_capacity: 1000,
            permission_heuristic_window: Duration::from_secs(60),
            finish_retry: Duration::from_millis(100),
            part_delay: Duration::from_millis(100),
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

impl EngineConfig {
    pub fn monitor_settings(&self) -> MonitorSettings {
        MonitorSettings {
            window: self.monitor_window,
            poll_interval: self.poll_interval,
            pane_lines: self.pane_lines,
        }
    }
}
