//! Proactive permission prompt detection.
//!
//! Each session runs at most one monitoring task:
//! `Idle -> Monitoring -> {Detected, Expired} -> Idle`. A newer ToolStarted
//! or the agent's authoritative notice cancels the running task. Only a task
//! that reaches Detected writes a [`PermissionDialogRecord`], and it does so
//! under the same lock that guards its generation, so a cancelled or
//! superseded task can never leave a record behind.
//!
//! A prompt whose buttons reached the chat is kept as an [`OpenPrompt`]
//! until it is answered, the tool finishes, a newer run starts, or it ages out.

pub mod prompt;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::context_store::ToolContext;
use crate::dispatch::Notifier;
use crate::fingerprint::Fingerprint;
use crate::format;
use crate::pane::PaneReader;

pub use prompt::detect_prompt;

/// Timing knobs for a monitoring run
#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub window: Duration,
    pub poll_interval: Duration,
    pub pane_lines: usize,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(5),
            poll_interval: Duration::from_millis(500),
            pane_lines: 50,
        }
    }
}

/// Who put a dialog record in place
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialogOrigin {
    /// Pane polling spotted the prompt and a preview went out
    Preview,
    /// The agent's own notice was relayed in full
    Authoritative,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PermissionDialogRecord {
    pub fingerprint: Fingerprint,
    pub created_at: Instant,
    pub user_responded: bool,
    pub tool_name: String,
    pub origin: DialogOrigin,
}

/// Outcome of an authoritative permission notice
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeDecision {
    /// Same request already shown; send nothing
    Duplicate(DialogOrigin),
    /// Relay the full notice
    Relay,
}

/// Observable per-session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Idle,
    Monitoring,
}

/// How a monitoring run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorOutcome {
    /// Prompt found; preview sent with these options
    Detected { options: Vec<String>, checks: u32 },
    /// Prompt found but a dialog was already on record for the session
    AlreadyShown,
    /// Window elapsed with nothing found
    Expired { checks: u32 },
    /// Cancelled by a newer run, the authoritative notice, or shutdown
    Cancelled,
}

struct ActiveRun {
    generation: u64,
    token: CancellationToken,
}

/// Options shown with buttons in the chat, awaiting a choice
#[derive(Debug, Clone, PartialEq)]
pub struct OpenPrompt {
    pub options: Vec<String>,
    pub opened_at: Instant,
}

#[derive(Default)]
struct SessionSlot {
    run: Option<ActiveRun>,
    dialog: Option<PermissionDialogRecord>,
    prompt: Option<OpenPrompt>,
    /// Generation of the latest run started for the session
    epoch: u64,
}

impl SessionSlot {
    fn is_empty(&self) -> bool {
        self.run.is_none() && self.dialog.is_none() && self.prompt.is_none()
    }
}

pub struct PermissionMonitor {
    slots: Mutex<HashMap<String, SessionSlot>>,
    pane: Arc<dyn PaneReader>,
    notifier: Arc<Notifier>,
    clock: Arc<dyn Clock>,
    settings: MonitorSettings,
    tasks: TaskTracker,
    shutdown: CancellationToken,
    next_generation: AtomicU64,
}

impl PermissionMonitor {
    pub fn new(
        pane: Arc<dyn PaneReader>,
        notifier: Arc<Notifier>,
        clock: Arc<dyn Clock>,
        settings: MonitorSettings,
        tasks: TaskTracker,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            pane,
            notifier,
            clock,
            settings,
            tasks,
            shutdown,
            next_generation: AtomicU64::new(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, SessionSlot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start monitoring after a ToolStarted, cancelling any run already
    /// active for the session and clearing its dialog record.
    pub fn start(self: &Arc<Self>, session_id: &str, context: ToolContext) -> JoinHandle<MonitorOutcome> {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let token = self.shutdown.child_token();

        {
            let mut slots = self.lock();
            let slot = slots.entry(session_id.to_string()).or_default();
            if let Some(previous) = slot.run.take() {
                previous.token.cancel();
                debug!(session_id, generation = previous.generation, "Superseded monitoring run");
            }
            slot.dialog = None;
            slot.prompt = None;
            slot.epoch = generation;
            slot.run = Some(ActiveRun {
                generation,
                token: token.clone(),
            });
        }

        info!(
            session_id,
            tool = %context.tool_name,
            generation,
            "Started permission monitoring"
        );

        let this = Arc::clone(self);
        let session_id = session_id.to_string();
        self.tasks
            .spawn(async move { this.run(session_id, context, generation, token).await })
    }

    /// Cancel the session's running task, if any
    pub fn cancel(&self, session_id: &str) -> bool {
        let mut slots = self.lock();
        let Some(slot) = slots.get_mut(session_id) else {
            return false;
        };
        match slot.run.take() {
            Some(run) => {
                run.token.cancel();
                debug!(session_id, generation = run.generation, "Cancelled monitoring run");
                true
            }
            None => false,
        }
    }

    pub fn state(&self, session_id: &str) -> MonitorState {
        match self.lock().get(session_id) {
            Some(slot) if slot.run.is_some() => MonitorState::Monitoring,
            _ => MonitorState::Idle,
        }
    }

    pub fn active_monitors(&self) -> usize {
        self.lock().values().filter(|slot| slot.run.is_some()).count()
    }

    pub fn dialog(&self, session_id: &str) -> Option<PermissionDialogRecord> {
        self.lock().get(session_id).and_then(|slot| slot.dialog.clone())
    }

    /// Settle an authoritative permission notice against the session's
    /// dialog record, cancelling any running monitor first.
    ///
    /// A matching record is consumed and the notice reported as a
    /// duplicate. Otherwise the notice's fingerprint replaces whatever was
    /// on record so a repeat of it is recognized.
    pub fn resolve_notice(
        &self,
        session_id: &str,
        fingerprint: Option<&Fingerprint>,
        tool_name: &str,
    ) -> NoticeDecision {
        let mut slots = self.lock();
        let slot = slots.entry(session_id.to_string()).or_default();

        if let Some(run) = slot.run.take() {
            run.token.cancel();
            debug!(session_id, generation = run.generation, "Authoritative notice cancelled monitoring");
        }

        let previous = slot.dialog.take();
        let Some(fingerprint) = fingerprint else {
            return NoticeDecision::Relay;
        };
        if let Some(record) = previous {
            if &record.fingerprint == fingerprint {
                return NoticeDecision::Duplicate(record.origin);
            }
            debug!(session_id, stale = record.fingerprint.short(), "Replacing stale dialog record");
        }

        slot.dialog = Some(PermissionDialogRecord {
            fingerprint: fingerprint.clone(),
            created_at: self.clock.now(),
            user_responded: false,
            tool_name: tool_name.to_string(),
            origin: DialogOrigin::Authoritative,
        });
        NoticeDecision::Relay
    }

    /// Drop an authoritative record whose notice never reached the chat
    pub fn forget_authoritative(&self, session_id: &str, fingerprint: &Fingerprint) {
        let mut slots = self.lock();
        if let Some(slot) = slots.get_mut(session_id) {
            let ours = slot
                .dialog
                .as_ref()
                .map(|d| d.origin == DialogOrigin::Authoritative && &d.fingerprint == fingerprint)
                .unwrap_or(false);
            if ours {
                slot.dialog = None;
            }
        }
    }

    /// Flag the session's dialog as answered from the chat side
    pub fn mark_user_responded(&self, session_id: &str) -> bool {
        match self
            .lock()
            .get_mut(session_id)
            .and_then(|slot| slot.dialog.as_mut())
        {
            Some(dialog) => {
                dialog.user_responded = true;
                info!(session_id, tool = %dialog.tool_name, "User responded to permission dialog");
                true
            }
            None => false,
        }
    }

    /// Record the options a chat choice for the session may pick from
    pub fn open_prompt(&self, session_id: &str, options: Vec<String>) {
        let opened_at = self.clock.now();
        let mut slots = self.lock();
        slots.entry(session_id.to_string()).or_default().prompt = Some(OpenPrompt { options, opened_at });
    }

    /// Claim the session's open prompt; a second claim gets nothing
    pub fn take_prompt(&self, session_id: &str) -> Option<OpenPrompt> {
        self.lock().get_mut(session_id).and_then(|slot| slot.prompt.take())
    }

    pub fn prompt(&self, session_id: &str) -> Option<OpenPrompt> {
        self.lock().get(session_id).and_then(|slot| slot.prompt.clone())
    }

    /// Drop dialog records and open prompts older than `ttl`, then empty slots
    pub fn sweep(&self, ttl: Duration) -> usize {
        let now = self.clock.now();
        let mut slots = self.lock();
        let mut expired = 0;
        for (session_id, slot) in slots.iter_mut() {
            let stale = slot
                .dialog
                .as_ref()
                .map(|d| now.saturating_duration_since(d.created_at) > ttl)
                .unwrap_or(false);
            if stale {
                slot.dialog = None;
                expired += 1;
                debug!(session_id = %session_id, "Expired permission dialog record");
            }
            let prompt_stale = slot
                .prompt
                .as_ref()
                .map(|p| now.saturating_duration_since(p.opened_at) > ttl)
                .unwrap_or(false);
            if prompt_stale {
                slot.prompt = None;
            }
        }
        slots.retain(|_, slot| !slot.is_empty());
        expired
    }

    async fn run(
        self: Arc<Self>,
        session_id: String,
        context: ToolContext,
        generation: u64,
        token: CancellationToken,
    ) -> MonitorOutcome {
        let started = Instant::now();
        let deadline = started + self.settings.window;
        let mut checks = 0u32;

        loop {
            checks += 1;
            let buffer = tokio::select! {
                _ = token.cancelled() => {
                    debug!(session_id = %session_id, checks, elapsed_ms = started.elapsed().as_millis() as u64, "Monitoring cancelled");
                    return MonitorOutcome::Cancelled;
                }
                buffer = self.pane.read_buffer(self.settings.pane_lines) => buffer,
            };

            if let Some(options) = detect_prompt(&buffer) {
                info!(
                    session_id = %session_id,
                    options = options.len(),
                    checks,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Permission prompt detected"
                );
                return self
                    .on_detected(&session_id, &context, generation, &token, options, checks)
                    .await;
            }

            tokio::select! {
                _ = token.cancelled() => {
                    debug!(session_id = %session_id, checks, "Monitoring cancelled");
                    return MonitorOutcome::Cancelled;
                }
                _ = tokio::time::sleep(self.settings.poll_interval) => {}
            }

            if Instant::now() >= deadline {
                self.finish_run(&session_id, generation);
                debug!(session_id = %session_id, checks, "Monitoring window expired");
                return MonitorOutcome::Expired { checks };
            }
        }
    }

    async fn on_detected(
        &self,
        session_id: &str,
        context: &ToolContext,
        generation: u64,
        token: &CancellationToken,
        options: Vec<String>,
        checks: u32,
    ) -> MonitorOutcome {
        let fingerprint = Fingerprint::of_context(context);

        {
            let mut slots = self.lock();
            let Some(slot) = slots.get_mut(session_id) else {
                return MonitorOutcome::Cancelled;
            };
            let is_current = slot
                .run
                .as_ref()
                .map(|run| run.generation == generation)
                .unwrap_or(false);
            if !is_current || token.is_cancelled() {
                return MonitorOutcome::Cancelled;
            }
            slot.run = None;
            if slot.dialog.is_some() {
                return MonitorOutcome::AlreadyShown;
            }
            slot.dialog = Some(PermissionDialogRecord {
                fingerprint: fingerprint.clone(),
                created_at: self.clock.now(),
                user_responded: false,
                tool_name: context.tool_name.clone(),
                origin: DialogOrigin::Preview,
            });
        }

        let preview = format::permission_preview(context, &options).with_choice_tag(session_id);
        match self.notifier.send(preview).await {
            Ok(series) => {
                let opened_at = self.clock.now();
                let mut slots = self.lock();
                if let Some(slot) = slots.get_mut(session_id) {
                    // Skip if a newer run started while the preview was in flight
                    if slot.epoch == generation {
                        slot.prompt = Some(OpenPrompt {
                            options: options.clone(),
                            opened_at,
                        });
                    }
                }
                drop(slots);
                info!(
                    session_id,
                    tool = %context.tool_name,
                    fingerprint = fingerprint.short(),
                    message_id = series.last_handle.message_id,
                    "Sent permission preview"
                );
            }
            Err(e) => {
                warn!(session_id, error = %e, "Permission preview failed, dropping dialog record");
                let mut slots = self.lock();
                if let Some(slot) = slots.get_mut(session_id) {
                    let ours = slot
                        .dialog
                        .as_ref()
                        .map(|d| d.origin == DialogOrigin::Preview && d.fingerprint == fingerprint)
                        .unwrap_or(false);
                    if ours {
                        slot.dialog = None;
                    }
                }
            }
        }

        MonitorOutcome::Detected { options, checks }
    }

    fn finish_run(&self, session_id: &str, generation: u64) {
        let mut slots = self.lock();
        if let Some(slot) = slots.get_mut(session_id) {
            if slot.run.as_ref().map(|r| r.generation) == Some(generation) {
                slot.run = None;
            }
        }
    }
}
