use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;
use tracing::debug;

use crate::clock::Clock;

/// Most recent tool invocation seen for a session
#[derive(Debug, Clone, PartialEq)]
pub struct ToolContext {
    pub tool_name: String,
    pub tool_input: Value,
    pub captured_at: Instant,
}

impl ToolContext {
    pub fn new(tool_name: impl Into<String>, tool_input: Value, captured_at: Instant) -> Self {
        Self {
            tool_name: tool_name.into(),
            tool_input,
            captured_at,
        }
    }
}

/// Capacity-bounded map from session id to its latest ToolContext.
///
/// Full inserts evict the oldest entry by capture time; the map never grows
/// past `capacity`.
pub struct ContextStore {
    entries: Mutex<HashMap<String, ToolContext>>,
    capacity: usize,
    clock: Arc<dyn Clock>,
}

impl ContextStore {
    pub fn new(capacity: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
            clock,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, ToolContext>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace any prior context for the session
    pub fn put(&self, session_id: &str, context: ToolContext) {
        let mut entries = self.lock();

        if !entries.contains_key(session_id) && entries.len() >= self.capacity {
            let oldest = entries
                .iter()
                .min_by_key(|(_, ctx)| ctx.captured_at)
                .map(|(session, _)| session.clone());
            if let Some(oldest) = oldest {
                entries.remove(&oldest);
                debug!(session_id = %oldest, capacity = self.capacity, "Evicted oldest tool context");
            }
        }

        entries.insert(session_id.to_string(), context);
    }

    pub fn get(&self, session_id: &str) -> Option<ToolContext> {
        self.lock().get(session_id).cloned()
    }

    /// Context captured no longer than `window` ago
    pub fn get_recent(&self, session_id: &str, window: Duration) -> Option<ToolContext> {
        let now = self.clock.now();
        self.get(session_id)
            .filter(|ctx| now.saturating_duration_since(ctx.captured_at) <= window)
    }

    /// Remove entries older than `age`, returns how many were removed
    pub fn evict_older_than(&self, age: Duration) -> usize {
        let now = self.clock.now();
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, ctx| now.saturating_duration_since(ctx.captured_at) <= age);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
