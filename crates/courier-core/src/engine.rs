//! The correlation engine: one instance per process, shared by handle.
//!
//! [`Engine::ingest`] does the correlation bookkeeping synchronously
//! (context store, provisional operation, monitor start, dedup decision)
//! and spawns the outbound I/O on the engine's task tracker, so callers
//! return immediately and shutdown can drain everything in one place.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use anyhow::{bail, Result};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::context_store::{ContextStore, ToolContext};
use crate::dispatch::{Dispatcher, Notifier};
use crate::fingerprint::Fingerprint;
use crate::format;
use crate::hooks::{HookEvent, HookEventKind};
use crate::monitor::{MonitorOutcome, NoticeDecision, PermissionMonitor};
use crate::notice::{NoticeClass, NoticeClassifier, PhraseClassifier};
use crate::pane::{KeyInjector, PaneReader};
use crate::tracker::OperationTracker;
use crate::transcript;

/// Handles to the work spawned for one event
#[derive(Debug, Default)]
pub struct Dispatched {
    pub work: Option<JoinHandle<()>>,
    pub monitor: Option<JoinHandle<MonitorOutcome>>,
}

impl Dispatched {
    /// Wait for the outbound work (not the monitor) to finish
    pub async fn settle(self) {
        if let Some(work) = self.work {
            if let Err(e) = work.await {
                warn!(error = %e, "Event task failed");
            }
        }
    }
}

/// Result of answering a prompt from the chat
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChoiceOutcome {
    /// The option was typed into the agent's pane
    Delivered { option_text: String },
    /// No prompt is open for the session any more
    Expired,
    /// The prompt has no such option; it stays open
    UnknownOption { available: usize },
}

/// Counts from one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub contexts: usize,
    pub operations: usize,
    pub dialogs: usize,
}

struct EngineInner {
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    contexts: ContextStore,
    tracker: OperationTracker,
    monitor: Arc<PermissionMonitor>,
    notifier: Arc<Notifier>,
    classifier: Arc<dyn NoticeClassifier>,
    injector: OnceLock<Arc<dyn KeyInjector>>,
    tasks: TaskTracker,
    shutdown: CancellationToken,
}

#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    pub fn new(config: EngineConfig, dispatcher: Arc<dyn Dispatcher>, pane: Arc<dyn PaneReader>) -> Self {
        Self::with_parts(
            config,
            dispatcher,
            pane,
            Arc::new(SystemClock),
            Arc::new(PhraseClassifier::default()),
        )
    }

    pub fn with_parts(
        config: EngineConfig,
        dispatcher: Arc<dyn Dispatcher>,
        pane: Arc<dyn PaneReader>,
        clock: Arc<dyn Clock>,
        classifier: Arc<dyn NoticeClassifier>,
    ) -> Self {
        let tasks = TaskTracker::new();
        let shutdown = CancellationToken::new();
        let notifier = Arc::new(Notifier::new(dispatcher).with_part_delay(config.part_delay));

        let monitor = Arc::new(PermissionMonitor::new(
            pane,
            notifier.clone(),
            clock.clone(),
            config.monitor_settings(),
            tasks.clone(),
            shutdown.clone(),
        ));

        Self {
            inner: Arc::new(EngineInner {
                contexts: ContextStore::new(config.context_capacity, clock.clone()),
                tracker: OperationTracker::new(notifier.clone(), clock.clone(), config.finish_retry),
                clock,
                monitor,
                notifier,
                classifier,
                injector: OnceLock::new(),
                tasks,
                shutdown,
                config,
            }),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn contexts(&self) -> &ContextStore {
        &self.inner.contexts
    }

    pub fn tracker(&self) -> &OperationTracker {
        &self.inner.tracker
    }

    pub fn monitor(&self) -> &PermissionMonitor {
        &self.inner.monitor
    }

    /// Token cancelled when the engine shuts down
    pub fn shutdown_token(&self) -> CancellationToken {
        self.inner.shutdown.clone()
    }

    /// Accept one hook event. Never blocks on outbound I/O.
    pub fn ingest(&self, event: HookEvent) -> Dispatched {
        let inner = &self.inner;
        let session_id = event.session_id;
        debug!(session_id = %session_id, kind = event.kind.wire_name(), "Ingesting hook event");

        match event.kind {
            HookEventKind::ToolStarted { tool_name, tool_input } => {
                let context = ToolContext::new(&tool_name, tool_input, self.now());
                inner.contexts.put(&session_id, context.clone());
                let id = inner.tracker.begin(&session_id, &tool_name);
                let monitor = inner.monitor.start(&session_id, context.clone());

                let text = format::tool_started(&tool_name, &context.tool_input);
                let this = Arc::clone(inner);
                let work = inner.tasks.spawn(async move {
                    // Failure is logged by the tracker; the operation is left to age out
                    let _ = this
                        .tracker
                        .send_started(&session_id, &tool_name, id, text)
                        .await;
                });
                Dispatched {
                    work: Some(work),
                    monitor: Some(monitor),
                }
            }

            HookEventKind::ToolFinished { tool_name, .. } => {
                inner.monitor.cancel(&session_id);
                // The prompt, if any, was settled in the terminal
                inner.monitor.take_prompt(&session_id);
                let completion = format::tool_finished(&tool_name);
                let this = Arc::clone(inner);
                let work = inner.tasks.spawn(async move {
                    let outcome = this.tracker.finish(&session_id, &tool_name, completion).await;
                    debug!(session_id = %session_id, tool = %tool_name, ?outcome, "Tool finished");
                });
                Dispatched {
                    work: Some(work),
                    monitor: None,
                }
            }

            HookEventKind::PermissionOrIdleNotice {
                message,
                tool_name,
                tool_input,
            } => self.ingest_notice(session_id, message, tool_name, tool_input),

            HookEventKind::TurnStopped { transcript_path } => {
                let this = Arc::clone(inner);
                let work = inner.tasks.spawn(async move {
                    let Some(path) = transcript_path else {
                        debug!(session_id = %session_id, "Turn stopped without transcript");
                        return;
                    };
                    match transcript::read_current_turn(&path).await {
                        Ok(Some(text)) => {
                            if let Err(e) = this.notifier.send(format::assistant_summary(&text)).await {
                                warn!(session_id = %session_id, error = %e, "Turn summary failed");
                            }
                        }
                        Ok(None) => debug!(session_id = %session_id, "No assistant text in current turn"),
                        Err(e) => warn!(session_id = %session_id, error = %e, "Could not read transcript"),
                    }
                });
                Dispatched {
                    work: Some(work),
                    monitor: None,
                }
            }

            HookEventKind::PromptSubmitted { prompt } => {
                let this = Arc::clone(inner);
                let work = inner.tasks.spawn(async move {
                    if let Err(e) = this.notifier.send(format::prompt_submitted(&prompt)).await {
                        warn!(session_id = %session_id, error = %e, "Prompt notification failed");
                    }
                });
                Dispatched {
                    work: Some(work),
                    monitor: None,
                }
            }
        }
    }

    fn ingest_notice(
        &self,
        session_id: String,
        message: String,
        tool_name: Option<String>,
        tool_input: Option<serde_json::Value>,
    ) -> Dispatched {
        let inner = &self.inner;
        // Any notice ends the session's monitoring run, whatever its class
        inner.monitor.cancel(&session_id);

        let recent = inner
            .contexts
            .get_recent(&session_id, inner.config.permission_heuristic_window);
        let class = inner.classifier.classify(&message, recent.as_ref());
        info!(session_id = %session_id, ?class, "Classified notice");

        if class != NoticeClass::PermissionRequest {
            let this = Arc::clone(inner);
            let work = inner.tasks.spawn(async move {
                if let Err(e) = this.notifier.send(format::idle_notice(&message)).await {
                    warn!(session_id = %session_id, error = %e, "Notice failed");
                }
            });
            return Dispatched {
                work: Some(work),
                monitor: None,
            };
        }

        // Tool detail carried on the notice wins over the stored context
        let context = match tool_name {
            Some(name) => Some(ToolContext::new(
                name,
                tool_input.unwrap_or(serde_json::Value::Null),
                self.now(),
            )),
            None => inner.contexts.get(&session_id),
        };
        let fingerprint = context.as_ref().map(Fingerprint::of_context);
        let tool = context
            .as_ref()
            .map(|c| c.tool_name.clone())
            .unwrap_or_default();

        match inner
            .monitor
            .resolve_notice(&session_id, fingerprint.as_ref(), &tool)
        {
            NoticeDecision::Duplicate(origin) => {
                info!(
                    session_id = %session_id,
                    ?origin,
                    fingerprint = fingerprint.as_ref().map(|f| f.short()).unwrap_or(""),
                    "Suppressed duplicate permission notice"
                );
                Dispatched::default()
            }
            NoticeDecision::Relay => {
                let notice = format::permission_request(&message, context.as_ref())
                    .with_choice_tag(session_id.as_str());
                let options = notice.choices.clone();
                let this = Arc::clone(inner);
                let work = inner.tasks.spawn(async move {
                    match this.notifier.send(notice).await {
                        Ok(series) => {
                            this.monitor.open_prompt(&session_id, options);
                            info!(
                                session_id = %session_id,
                                tool = %tool,
                                message_id = series.last_handle.message_id,
                                "Sent permission notice"
                            );
                        }
                        Err(e) => {
                            warn!(session_id = %session_id, error = %e, "Permission notice failed");
                            if let Some(fingerprint) = fingerprint {
                                this.monitor.forget_authoritative(&session_id, &fingerprint);
                            }
                        }
                    }
                });
                Dispatched {
                    work: Some(work),
                    monitor: None,
                }
            }
        }
    }

    /// Mark the session's permission dialog as answered from the chat
    pub fn mark_user_responded(&self, session_id: &str) -> bool {
        self.inner.monitor.mark_user_responded(session_id)
    }

    /// Install what types chat choices into the agent; set once
    pub fn attach_key_injector(&self, injector: Arc<dyn KeyInjector>) -> Result<()> {
        if self.inner.injector.set(injector).is_err() {
            bail!("A key injector is already attached");
        }
        Ok(())
    }

    /// Answer the session's open prompt with the 1-based `option`.
    ///
    /// The prompt is claimed before the keys go out, so of two concurrent
    /// answers only one reaches the pane. It is reopened when the option
    /// is out of range or the keys could not be sent.
    pub async fn respond(&self, session_id: &str, option: usize) -> Result<ChoiceOutcome> {
        let inner = &self.inner;
        let Some(injector) = inner.injector.get() else {
            bail!("No key injector attached");
        };
        let Some(prompt) = inner.monitor.take_prompt(session_id) else {
            debug!(session_id, option, "Choice for a prompt that is no longer open");
            return Ok(ChoiceOutcome::Expired);
        };

        let Some(option_text) = option
            .checked_sub(1)
            .and_then(|i| prompt.options.get(i))
            .cloned()
        else {
            let available = prompt.options.len();
            inner.monitor.open_prompt(session_id, prompt.options);
            return Ok(ChoiceOutcome::UnknownOption { available });
        };

        if let Err(e) = injector.send_keys(&option.to_string()).await {
            inner.monitor.open_prompt(session_id, prompt.options);
            return Err(e.context("Failed to type the choice into the agent's pane"));
        }

        inner.monitor.mark_user_responded(session_id);
        info!(session_id, option, choice = %option_text, "Delivered chat choice to agent");
        Ok(ChoiceOutcome::Delivered { option_text })
    }

    /// Age out every registry once
    pub fn sweep(&self) -> SweepStats {
        let inner = &self.inner;
        let stats = SweepStats {
            contexts: inner.contexts.evict_older_than(inner.config.context_ttl),
            operations: inner.tracker.purge_older_than(inner.config.operation_ttl),
            dialogs: inner.monitor.sweep(inner.config.dialog_ttl),
        };
        if stats != SweepStats::default() {
            info!(
                contexts = stats.contexts,
                operations = stats.operations,
                dialogs = stats.dialogs,
                "Swept expired state"
            );
        }
        stats
    }

    /// Run [`Engine::sweep`] every `sweep_interval` until shutdown
    pub fn spawn_sweeper(&self) -> JoinHandle<()> {
        let engine = self.clone();
        let period = self.inner.config.sweep_interval;
        let shutdown = self.inner.shutdown.clone();
        self.inner.tasks.spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        engine.sweep();
                    }
                }
            }
            debug!("Sweeper stopped");
        })
    }

    /// Cancel all monitors and wait up to `grace` for outstanding work.
    /// Returns false if work was still running when the grace ran out.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        let inner = &self.inner;
        inner.tasks.close();
        inner.shutdown.cancel();
        info!(
            outstanding = inner.tasks.len(),
            active_monitors = inner.monitor.active_monitors(),
            "Engine shutting down"
        );

        match tokio::time::timeout(grace, inner.tasks.wait()).await {
            Ok(()) => {
                info!("Engine stopped");
                true
            }
            Err(_) => {
                warn!(
                    outstanding = inner.tasks.len(),
                    grace_ms = grace.as_millis() as u64,
                    "Shutdown grace elapsed with work outstanding"
                );
                false
            }
        }
    }

    fn now(&self) -> tokio::time::Instant {
        self.inner.clock.now()
    }
}
