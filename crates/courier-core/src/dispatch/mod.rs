pub mod chunking;
pub mod notifier;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use chunking::split_message;
pub use notifier::{Notifier, SentSeries};

/// Default per-message size limit, below the chat platform's hard cap
pub const DEFAULT_MAX_MESSAGE_LEN: usize = 3900;

/// Reference to a message already shown in the chat
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageHandle {
    pub chat_id: String,
    pub message_id: i64,
}

/// Outbound notification: text plus optional actionable choices
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Outbound {
    pub text: String,
    pub choices: Vec<String>,
    /// Session a chosen option is answered for
    pub choice_tag: Option<String>,
}

impl Outbound {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn with_choices(mut self, choices: Vec<String>) -> Self {
        self.choices = choices;
        self
    }

    pub fn with_choice_tag(mut self, session_id: impl Into<String>) -> Self {
        self.choice_tag = Some(session_id.into());
        self
    }
}

/// Chat platform boundary. Both calls may fail (deleted target, rate limit);
/// failures come back as `Err`, never as panics.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Send a single message (already within the size limit)
    async fn send(&self, message: &Outbound) -> Result<MessageHandle>;

    /// Replace the text of a message sent earlier
    async fn edit(&self, handle: &MessageHandle, text: &str) -> Result<MessageHandle>;

    /// Maximum characters per message
    fn max_message_len(&self) -> usize {
        DEFAULT_MAX_MESSAGE_LEN
    }
}
