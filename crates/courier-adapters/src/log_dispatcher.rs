use std::sync::atomic::{AtomicI64, Ordering};

use anyhow::Result;
use async_trait::async_trait;
use courier_core::{Dispatcher, MessageHandle, Outbound};
use tracing::info;

/// Dry-run dispatcher: logs every send/edit and hands out synthetic ids
#[derive(Debug, Default)]
pub struct LogDispatcher {
    next_id: AtomicI64,
}

impl LogDispatcher {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Dispatcher for LogDispatcher {
    async fn send(&self, message: &Outbound) -> Result<MessageHandle> {
        let message_id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        info!(
            message_id,
            choices = ?message.choices,
            text = %message.text,
            "DRY-RUN: send"
        );
        Ok(MessageHandle {
            chat_id: "dry-run".to_string(),
            message_id,
        })
    }

    async fn edit(&self, handle: &MessageHandle, text: &str) -> Result<MessageHandle> {
        info!(message_id = handle.message_id, text = %text, "DRY-RUN: edit");
        Ok(handle.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ids_increase() {
        let dispatcher = LogDispatcher::new();
        let a = dispatcher.send(&Outbound::text("a")).await.unwrap();
        let b = dispatcher.send(&Outbound::text("b")).await.unwrap();
        assert_eq!((a.message_id, b.message_id), (1, 2));
        assert_eq!(dispatcher.edit(&a, "a2").await.unwrap(), a);
    }
}
