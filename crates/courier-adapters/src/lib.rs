pub mod callbacks;
pub mod log_dispatcher;
pub mod telegram;
pub mod tmux_pane;

pub use callbacks::{parse_choice, CallbackListener};
pub use log_dispatcher::LogDispatcher;
pub use telegram::TelegramDispatcher;
pub use tmux_pane::{discover_agent_pane, TmuxPane};
