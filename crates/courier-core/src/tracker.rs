//! Pre/post correlation: one chat message per tool invocation.
//!
//! ToolStarted inserts a provisional [`PendingOperation`] before any I/O,
//! so a ToolFinished processed afterwards always finds it; only the handle
//! may still be empty while the first send is in flight.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use dashmap::DashMap;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::dispatch::{MessageHandle, Notifier, Outbound};
use crate::format;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OperationKey {
    pub session_id: String,
    pub tool_name: String,
}

impl OperationKey {
    pub fn new(session_id: &str, tool_name: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            tool_name: tool_name.to_string(),
        }
    }
}

impl fmt::Display for OperationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.session_id, self.tool_name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PendingOperation {
    /// Distinguishes a superseding invocation from the one it replaced
    pub id: u64,
    pub key: OperationKey,
    /// Last part of the start notification; `None` until the send completes
    pub handle: Option<MessageHandle>,
    pub last_text: String,
    pub created_at: Instant,
}

/// What happened to a ToolFinished
#[derive(Debug, Clone, PartialEq)]
pub enum FinishOutcome {
    /// Start notification edited in place
    Edited(MessageHandle),
    /// No usable start notification; completion sent on its own
    SentFresh(MessageHandle),
    /// Tool finishes without a completion line
    Silent,
    /// Fresh send failed too
    Failed,
}

pub struct OperationTracker {
    operations: DashMap<OperationKey, PendingOperation>,
    notifier: Arc<Notifier>,
    clock: Arc<dyn Clock>,
    next_id: AtomicU64,
    finish_retry: Duration,
}

impl OperationTracker {
    pub fn new(notifier: Arc<Notifier>, clock: Arc<dyn Clock>, finish_retry: Duration) -> Self {
        Self {
            operations: DashMap::new(),
            notifier,
            clock,
            next_id: AtomicU64::new(1),
            finish_retry,
        }
    }

    /// Insert the provisional operation for a ToolStarted, superseding any
    /// unresolved one for the same key. Returns the new operation id.
    pub fn begin(&self, session_id: &str, tool_name: &str) -> u64 {
        let key = OperationKey::new(session_id, tool_name);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let op = PendingOperation {
            id,
            key: key.clone(),
            handle: None,
            last_text: String::new(),
            created_at: self.clock.now(),
        };
        if let Some(previous) = self.operations.insert(key.clone(), op) {
            info!(key = %key, superseded = previous.id, id, "Superseded pending operation");
        } else {
            debug!(key = %key, id, "Registered pending operation");
        }
        id
    }

    /// Send the start notification for operation `id` and record its handle.
    ///
    /// A send failure leaves the operation without a handle; it is consumed
    /// by the next ToolFinished or swept by age.
    pub async fn send_started(&self, session_id: &str, tool_name: &str, id: u64, text: String) -> Result<()> {
        let key = OperationKey::new(session_id, tool_name);
        let series = match self.notifier.send(Outbound::text(text)).await {
            Ok(series) => series,
            Err(e) => {
                warn!(key = %key, id, error = %e, "Start notification failed");
                return Err(e);
            }
        };

        match self.operations.get_mut(&key) {
            Some(mut op) if op.id == id => {
                op.handle = Some(series.last_handle.clone());
                op.last_text = series.last_text;
                debug!(
                    key = %key,
                    id,
                    message_id = series.last_handle.message_id,
                    parts = series.parts.len(),
                    "Pending operation has handle"
                );
            }
            _ => {
                debug!(key = %key, id, "Operation resolved or superseded before send completed");
            }
        }
        Ok(())
    }

    /// Resolve a ToolFinished: edit the start notification when possible,
    /// otherwise send the completion on its own.
    pub async fn finish(&self, session_id: &str, tool_name: &str, completion: Option<String>) -> FinishOutcome {
        let key = OperationKey::new(session_id, tool_name);

        // Removal is the claim: a concurrent finish for the key cannot take it too
        let mut op = self
            .operations
            .remove_if(&key, |_, current| current.handle.is_some())
            .map(|(_, op)| op);
        if op.is_none() {
            let in_flight = self.operations.get(&key).map(|entry| entry.id);
            if let Some(id) = in_flight {
                debug!(key = %key, id, wait_ms = self.finish_retry.as_millis() as u64, "Start send in flight, waiting");
                tokio::time::sleep(self.finish_retry).await;
                op = self
                    .operations
                    .remove_if(&key, |_, current| current.id == id)
                    .map(|(_, op)| op);
            }
        }

        let Some(completion) = completion else {
            debug!(key = %key, "Tool finishes silently");
            return FinishOutcome::Silent;
        };

        match op {
            Some(PendingOperation {
                handle: Some(handle),
                last_text,
                id,
                ..
            }) => {
                let combined = format::combine(&last_text, &completion);
                if combined.chars().count() > self.notifier.max_message_len() {
                    debug!(key = %key, id, "Combined text too long to edit");
                } else {
                    match self.notifier.edit(&handle, &combined).await {
                        Ok(edited) => {
                            info!(key = %key, id, message_id = edited.message_id, "Edited start notification");
                            return FinishOutcome::Edited(edited);
                        }
                        Err(e) => {
                            warn!(key = %key, id, error = %e, "Edit failed, sending fresh completion");
                        }
                    }
                }
            }
            Some(o) => {
                info!(key = %key, id = o.id, "Start notification never got a handle, sending fresh completion");
            }
            None => {
                info!(key = %key, "No pending operation, sending fresh completion");
            }
        }

        match self.notifier.send(Outbound::text(completion)).await {
            Ok(series) => FinishOutcome::SentFresh(series.last_handle),
            Err(e) => {
                warn!(key = %key, error = %e, "Completion notification failed");
                FinishOutcome::Failed
            }
        }
    }

    pub fn pending(&self, session_id: &str, tool_name: &str) -> Option<PendingOperation> {
        self.operations
            .get(&OperationKey::new(session_id, tool_name))
            .map(|entry| entry.value().clone())
    }

    /// Drop operations older than `age`; models the agent dying mid-tool
    pub fn purge_older_than(&self, age: Duration) -> usize {
        let now = self.clock.now();
        let before = self.operations.len();
        self.operations
            .retain(|_, op| now.saturating_duration_since(op.created_at) <= age);
        let purged = before.saturating_sub(self.operations.len());
        if purged > 0 {
            debug!(purged, "Purged expired pending operations");
        }
        purged
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}
