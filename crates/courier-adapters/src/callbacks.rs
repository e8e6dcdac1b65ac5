//! Button taps from the chat, routed back to the agent's pane.
//!
//! Permission prompts go out with one inline button per option, each
//! carrying `perm_{session_id}_{option}`. The listener long-polls for
//! taps, hands the choice to [`Engine::respond`], and rewrites the
//! prompt message to show what was picked.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use courier_core::{format, ChoiceOutcome, Dispatcher, Engine, MessageHandle};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::telegram::TelegramDispatcher;

const CHOICE_PREFIX: &str = "perm_";

/// Pause after a failed poll before asking again
const RETRY_DELAY: Duration = Duration::from_secs(5);

pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(25);

pub const EXPIRED_REPLY: &str = "This permission dialog has expired.";

/// Callback data for option `option` (1-based) of the session's prompt
pub fn choice_data(session_id: &str, option: usize) -> String {
    format!("{CHOICE_PREFIX}{session_id}_{option}")
}

/// Session id and option number from callback data
pub fn parse_choice(data: &str) -> Option<(&str, usize)> {
    let (session_id, option) = data.strip_prefix(CHOICE_PREFIX)?.rsplit_once('_')?;
    if session_id.is_empty() {
        return None;
    }
    Some((session_id, option.parse().ok()?))
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub callback_query: Option<CallbackQuery>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub data: Option<String>,
    pub message: Option<CallbackMessage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackMessage {
    pub message_id: i64,
    pub chat: Chat,
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

pub struct CallbackListener {
    telegram: Arc<TelegramDispatcher>,
    engine: Engine,
    poll_timeout: Duration,
}

impl CallbackListener {
    pub fn new(telegram: Arc<TelegramDispatcher>, engine: Engine) -> Self {
        Self {
            telegram,
            engine,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
        }
    }

    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    /// Poll until `shutdown` is cancelled
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        info!(chat_id = %self.telegram.chat_id(), "Listening for chat choices");
        let mut offset = 0;
        loop {
            let polled = tokio::select! {
                _ = shutdown.cancelled() => break,
                polled = self.poll_once(offset) => polled,
            };
            match polled {
                Ok(next) => offset = next,
                Err(e) => {
                    warn!(error = %e, "Polling for chat choices failed");
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(RETRY_DELAY) => {}
                    }
                }
            }
        }
        info!("Callback listener stopped");
        Ok(())
    }

    /// Fetch and handle one batch; returns the offset for the next poll
    pub async fn poll_once(&self, offset: i64) -> Result<i64> {
        let updates = self.telegram.get_updates(offset, self.poll_timeout).await?;
        let mut next = offset;
        for update in updates {
            next = next.max(update.update_id + 1);
            if let Some(query) = update.callback_query {
                if let Err(e) = self.handle(query).await {
                    warn!(update_id = update.update_id, error = %e, "Chat choice not handled");
                }
            }
        }
        Ok(next)
    }

    fn from_our_chat(&self, message: &CallbackMessage) -> bool {
        match self.telegram.chat_id().parse::<i64>() {
            Ok(id) => id == message.chat.id,
            // Channel usernames cannot be compared to numeric ids
            Err(_) => true,
        }
    }

    async fn handle(&self, query: CallbackQuery) -> Result<()> {
        let Some(message) = query.message.as_ref().filter(|m| self.from_our_chat(m)) else {
            debug!(callback_id = %query.id, "Ignoring tap from another chat");
            return self.telegram.answer_callback(&query.id, None).await;
        };
        let Some((session_id, option)) = query.data.as_deref().and_then(parse_choice) else {
            debug!(callback_id = %query.id, data = ?query.data, "Ignoring unknown button");
            return self.telegram.answer_callback(&query.id, None).await;
        };

        match self.engine.respond(session_id, option).await {
            Ok(ChoiceOutcome::Delivered { option_text }) => {
                let handle = MessageHandle {
                    chat_id: message.chat.id.to_string(),
                    message_id: message.message_id,
                };
                let text = format::choice_selected(&message.text, option, &option_text);
                if let Err(e) = self.telegram.edit(&handle, &text).await {
                    warn!(message_id = message.message_id, error = %e, "Could not mark choice on prompt");
                }
                let reply = format!("Selected option {option}");
                self.telegram.answer_callback(&query.id, Some(&reply)).await
            }
            Ok(ChoiceOutcome::Expired) => {
                self.telegram.answer_callback(&query.id, Some(EXPIRED_REPLY)).await
            }
            Ok(ChoiceOutcome::UnknownOption { available }) => {
                debug!(session_id, option, available, "Choice out of range");
                self.telegram.answer_callback(&query.id, Some("Unknown option")).await
            }
            Err(e) => {
                warn!(session_id, option, error = %e, "Could not deliver chat choice");
                self.telegram
                    .answer_callback(&query.id, Some("Could not reach Claude"))
                    .await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_choice() {
        assert_eq!(parse_choice("perm_abc-123_2"), Some(("abc-123", 2)));
        let data = choice_data("a_b", 3);
        assert_eq!(parse_choice(&data), Some(("a_b", 3)));
        assert_eq!(parse_choice("option_2"), None);
        assert_eq!(parse_choice("perm__1"), None);
        assert_eq!(parse_choice("perm_s1_x"), None);
        assert_eq!(parse_choice("perm_s1"), None);
    }
}
