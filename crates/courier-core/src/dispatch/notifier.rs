use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use tracing::{debug, warn};

use super::{split_message, Dispatcher, MessageHandle, Outbound};

/// Result of sending one notification, possibly as several parts.
/// Only the last part is eligible for later edits.
#[derive(Debug, Clone, PartialEq)]
pub struct SentSeries {
    pub parts: Vec<MessageHandle>,
    pub last_handle: MessageHandle,
    pub last_text: String,
}

impl SentSeries {
    pub fn total_parts(&self) -> usize {
        self.parts.len()
    }
}

/// Sends notifications through a dispatcher, splitting oversized text
pub struct Notifier {
    dispatcher: Arc<dyn Dispatcher>,
    part_delay: Duration,
}

impl Notifier {
    pub fn new(dispatcher: Arc<dyn Dispatcher>) -> Self {
        Self {
            dispatcher,
            part_delay: Duration::from_millis(100),
        }
    }

    /// Pause between parts of one series
    pub fn with_part_delay(mut self, delay: Duration) -> Self {
        self.part_delay = delay;
        self
    }

    pub fn max_message_len(&self) -> usize {
        self.dispatcher.max_message_len()
    }

    /// Send a notification as an ordered series of parts.
    ///
    /// Choices attach to the last part. A failed part aborts the rest of
    /// the series and the whole call fails.
    pub async fn send(&self, message: Outbound) -> Result<SentSeries> {
        let parts = split_message(&message.text, self.max_message_len());
        let total = parts.len();
        let mut sent = Vec::with_capacity(total);
        let mut last_text = String::new();

        for (i, part) in parts.into_iter().enumerate() {
            let is_last = i + 1 == total;
            let outbound = if is_last {
                Outbound {
                    text: part,
                    choices: message.choices.clone(),
                    choice_tag: message.choice_tag.clone(),
                }
            } else {
                Outbound::text(part)
            };

            match self.dispatcher.send(&outbound).await {
                Ok(handle) => {
                    sent.push(handle);
                    last_text = outbound.text;
                }
                Err(e) => {
                    warn!(part = i + 1, total, error = %e, "Message part failed, aborting series");
                    return Err(e.context(format!("Sent {}/{} parts before failure", i, total)));
                }
            }

            if !is_last && !self.part_delay.is_zero() {
                tokio::time::sleep(self.part_delay).await;
            }
        }

        let last_handle = sent
            .last()
            .cloned()
            .ok_or_else(|| anyhow!("Nothing to send"))?;
        debug!(parts = total, message_id = last_handle.message_id, "Notification sent");

        Ok(SentSeries {
            parts: sent,
            last_handle,
            last_text,
        })
    }

    pub async fn edit(&self, handle: &MessageHandle, text: &str) -> Result<MessageHandle> {
        self.dispatcher.edit(handle, text).await
    }
}
