pub mod clock;
pub mod config;
pub mod context_store;
pub mod dispatch;
pub mod engine;
pub mod fingerprint;
pub mod format;
pub mod hooks;
pub mod monitor;
pub mod notice;
pub mod pane;
pub mod tracker;
pub mod transcript;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::EngineConfig;
pub use context_store::{ContextStore, ToolContext};
pub use dispatch::{Dispatcher, MessageHandle, Notifier, Outbound, SentSeries};
pub use engine::{ChoiceOutcome, Dispatched, Engine, SweepStats};
pub use fingerprint::Fingerprint;
pub use hooks::{HookEvent, HookEventKind, HookRecord};
pub use monitor::{
    detect_prompt, DialogOrigin, MonitorOutcome, MonitorState, NoticeDecision, OpenPrompt,
    PermissionDialogRecord, PermissionMonitor,
};
pub use notice::{NoticeClass, NoticeClassifier, PhraseClassifier};
pub use pane::{KeyInjector, PaneReader};
pub use tracker::{FinishOutcome, OperationKey, OperationTracker, PendingOperation};

/// Initialize structured JSON logging.
///
/// `RUST_LOG` wins when set; otherwise `debug` raises the default level.
pub fn init_logging(debug: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    fmt()
        .json()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
