use anyhow::{bail, Result};
use async_trait::async_trait;
use courier_core::{
    ChoiceOutcome, Dispatcher, EngineConfig, Engine, Fingerprint, HookEvent, HookEventKind,
    KeyInjector, ManualClock, MessageHandle, MonitorOutcome, MonitorState, Notifier, Outbound,
    PaneReader, PhraseClassifier,
};
use serde_json::json;
use std::io::Write;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

const BASH_PROMPT: &str = "\
│ Bash command
│   rm -rf /
│ Do you want to proceed?
│ ❯ 1. Yes
│   2. Yes, and don't ask again for rm commands
│   3. No, and tell Claude what to do differently (esc)
";

// Records every outbound call
#[derive(Default)]
struct MockDispatcher {
    next_id: AtomicI64,
    sent: Mutex<Vec<(MessageHandle, Outbound)>>,
    edits: Mutex<Vec<(MessageHandle, String)>>,
    max_len: Option<usize>,
    fail_sends_after: Option<usize>,
}

impl MockDispatcher {
    fn sent_texts(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|(_, m)| m.text.clone())
            .collect()
    }

    fn sends(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    fn edits(&self) -> Vec<(MessageHandle, String)> {
        self.edits.lock().unwrap().clone()
    }
}

#[async_trait]
impl Dispatcher for MockDispatcher {
    async fn send(&self, message: &Outbound) -> Result<MessageHandle> {
        let mut sent = self.sent.lock().unwrap();
        if let Some(limit) = self.fail_sends_after {
            if sent.len() >= limit {
                bail!("rate limited");
            }
        }
        let handle = MessageHandle {
            chat_id: "42".into(),
            message_id: self.next_id.fetch_add(1, Ordering::SeqCst) + 1,
        };
        sent.push((handle.clone(), message.clone()));
        Ok(handle)
    }

    async fn edit(&self, handle: &MessageHandle, text: &str) -> Result<MessageHandle> {
        self.edits
            .lock()
            .unwrap()
            .push((handle.clone(), text.to_string()));
        Ok(handle.clone())
    }

    fn max_message_len(&self) -> usize {
        self.max_len.unwrap_or(3900)
    }
}

// Pane whose contents the test controls
#[derive(Default)]
struct ScriptedPane {
    buffer: Mutex<String>,
    reads: AtomicUsize,
}

impl ScriptedPane {
    fn showing(text: &str) -> Self {
        Self {
            buffer: Mutex::new(text.to_string()),
            reads: AtomicUsize::new(0),
        }
    }

    fn set(&self, text: &str) {
        *self.buffer.lock().unwrap() = text.to_string();
    }

    fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaneReader for ScriptedPane {
    async fn read_buffer(&self, _max_lines: usize) -> String {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.buffer.lock().unwrap().clone()
    }
}

// Keys typed into the pane, in order
#[derive(Default)]
struct RecordingInjector {
    typed: Mutex<Vec<String>>,
    fail: bool,
}

#[async_trait]
impl KeyInjector for RecordingInjector {
    async fn send_keys(&self, keys: &str) -> Result<()> {
        if self.fail {
            bail!("no server running on /tmp/tmux-0/default");
        }
        self.typed.lock().unwrap().push(keys.to_string());
        Ok(())
    }
}

fn test_config() -> EngineConfig {
    EngineConfig {
        part_delay: Duration::ZERO,
        ..Default::default()
    }
}

fn engine(dispatcher: Arc<MockDispatcher>, pane: Arc<ScriptedPane>) -> Engine {
    Engine::new(test_config(), dispatcher, pane)
}

fn notice(session: &str, message: &str) -> HookEvent {
    HookEvent::notice(session, message)
}

#[tokio::test(start_paused = true)]
async fn test_start_then_finish_is_one_edited_message() {
    let dispatcher = Arc::new(MockDispatcher::default());
    let engine = engine(dispatcher.clone(), Arc::new(ScriptedPane::default()));

    engine
        .ingest(HookEvent::tool_started("s1", "Edit", json!({"file_path": "a.py"})))
        .settle()
        .await;
    engine
        .ingest(HookEvent::tool_finished(
            "s1",
            "Edit",
            json!({"file_path": "a.py"}),
            json!({"success": true}),
        ))
        .settle()
        .await;

    assert_eq!(dispatcher.sends(), 1);
    let edits = dispatcher.edits();
    assert_eq!(edits.len(), 1);
    assert_eq!(edits[0].0.message_id, 1);
    assert!(edits[0].1.starts_with("✏️ **Editing:** `a.py`"));
    assert!(edits[0].1.ends_with("\n\n✅ **Edit completed**"));
    assert!(engine.tracker().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_finish_without_start_sends_completion() {
    let dispatcher = Arc::new(MockDispatcher::default());
    let engine = engine(dispatcher.clone(), Arc::new(ScriptedPane::default()));

    engine
        .ingest(HookEvent::tool_finished("s1", "Bash", json!({}), json!({})))
        .settle()
        .await;

    assert_eq!(dispatcher.sent_texts(), vec!["✅ **Command completed**".to_string()]);
    assert!(dispatcher.edits().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_preview_then_matching_notice_is_suppressed() {
    let dispatcher = Arc::new(MockDispatcher::default());
    let pane = Arc::new(ScriptedPane::showing(BASH_PROMPT));
    let engine = engine(dispatcher.clone(), pane);

    let dispatched = engine.ingest(HookEvent::tool_started(
        "s1",
        "Bash",
        json!({"command": "rm -rf /"}),
    ));
    let monitor = dispatched.monitor.unwrap();
    dispatched.work.unwrap().await.unwrap();

    match monitor.await.unwrap() {
        MonitorOutcome::Detected { options, .. } => assert_eq!(options.len(), 3),
        other => panic!("expected detection, got {:?}", other),
    }

    let previews: Vec<(MessageHandle, Outbound)> = dispatcher
        .sent
        .lock()
        .unwrap()
        .iter()
        .filter(|(_, m)| m.text.contains("needs permission to use Bash"))
        .cloned()
        .collect();
    assert_eq!(previews.len(), 1);
    assert_eq!(previews[0].1.choices[0], "Yes");
    assert_eq!(dispatcher.sends(), 2);

    let record = engine.monitor().dialog("s1").unwrap();
    assert_eq!(
        record.fingerprint,
        Fingerprint::compute("Bash", &json!({"command": "rm -rf /"}))
    );

    let dispatched = engine.ingest(notice("s1", "Claude needs your permission to use Bash"));
    assert!(dispatched.work.is_none());
    assert_eq!(dispatcher.sends(), 2);
    assert!(engine.monitor().dialog("s1").is_none());
}

#[tokio::test(start_paused = true)]
async fn test_notice_with_different_tool_is_relayed() {
    let dispatcher = Arc::new(MockDispatcher::default());
    let engine = engine(dispatcher.clone(), Arc::new(ScriptedPane::showing(BASH_PROMPT)));

    let dispatched = engine.ingest(HookEvent::tool_started("s1", "Bash", json!({"command": "ls"})));
    dispatched.monitor.unwrap().await.unwrap();

    let event = HookEvent::new(
        "s1",
        HookEventKind::PermissionOrIdleNotice {
            message: "Claude needs your permission to use Bash".into(),
            tool_name: Some("Bash".into()),
            tool_input: Some(json!({"command": "rm -rf build"})),
        },
    );
    engine.ingest(event).settle().await;

    let texts = dispatcher.sent_texts();
    let full = texts
        .iter()
        .filter(|t| t.contains("**Command to execute:**"))
        .count();
    assert_eq!(full, 1);
    assert!(texts.iter().any(|t| t.contains("rm -rf build")));
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_authoritative_notices_send_once() {
    let dispatcher = Arc::new(MockDispatcher::default());
    let engine = engine(dispatcher.clone(), Arc::new(ScriptedPane::default()));

    let event = || {
        HookEvent::new(
            "s9",
            HookEventKind::PermissionOrIdleNotice {
                message: "Claude needs your permission to use Write".into(),
                tool_name: Some("Write".into()),
                tool_input: Some(json!({"file_path": "b.rs", "content": "fn main() {}"})),
            },
        )
    };

    engine.ingest(event()).settle().await;
    engine.ingest(event()).settle().await;

    assert_eq!(dispatcher.sends(), 1);
    assert!(dispatcher.sent_texts()[0].contains("**Content to write:**"));
}

#[tokio::test(start_paused = true)]
async fn test_idle_notice_stops_permission_flow() {
    let dispatcher = Arc::new(MockDispatcher::default());
    let pane = Arc::new(ScriptedPane::default());
    let engine = engine(dispatcher.clone(), pane.clone());

    let started = engine.ingest(HookEvent::tool_started("s1", "Bash", json!({"command": "make"})));
    let monitor = started.monitor.unwrap();
    started.work.unwrap().await.unwrap();

    engine
        .ingest(notice("s1", "Claude is waiting for your input"))
        .settle()
        .await;
    assert_eq!(engine.monitor().state("s1"), MonitorState::Idle);

    // A prompt showing up afterwards must not produce a preview
    pane.set(BASH_PROMPT);
    assert_eq!(monitor.await.unwrap(), MonitorOutcome::Cancelled);
    tokio::time::sleep(Duration::from_secs(6)).await;

    let texts = dispatcher.sent_texts();
    assert_eq!(texts.len(), 2);
    assert!(texts.contains(&"🔔 Claude is waiting for your input".to_string()));
    assert!(!texts.iter().any(|t| t.contains("Permission Required")));
    assert!(engine.monitor().dialog("s1").is_none());
}

#[tokio::test(start_paused = true)]
async fn test_detection_stops_before_window() {
    let dispatcher = Arc::new(MockDispatcher::default());
    let pane = Arc::new(ScriptedPane::default());
    let engine = engine(dispatcher.clone(), pane.clone());

    let begin = Instant::now();
    let dispatched = engine.ingest(HookEvent::tool_started("s1", "Bash", json!({"command": "rm -rf /"})));

    // Prompt appears after the third poll
    tokio::time::sleep(Duration::from_millis(1200)).await;
    pane.set(BASH_PROMPT);

    let outcome = dispatched.monitor.unwrap().await.unwrap();
    assert!(matches!(outcome, MonitorOutcome::Detected { checks: 4, .. }));
    assert!(begin.elapsed() < Duration::from_secs(5));
    assert_eq!(pane.reads(), 4);
    assert_eq!(engine.monitor().state("s1"), MonitorState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_window_expires_without_side_effects() {
    let dispatcher = Arc::new(MockDispatcher::default());
    let pane = Arc::new(ScriptedPane::default());
    let engine = engine(dispatcher.clone(), pane.clone());

    let dispatched = engine.ingest(HookEvent::tool_started("s1", "Glob", json!({"pattern": "*.rs"})));
    dispatched.work.unwrap().await.unwrap();
    let outcome = dispatched.monitor.unwrap().await.unwrap();

    assert_eq!(outcome, MonitorOutcome::Expired { checks: 10 });
    assert_eq!(pane.reads(), 10);
    assert_eq!(dispatcher.sends(), 1);
    assert!(engine.monitor().dialog("s1").is_none());
    assert_eq!(engine.monitor().state("s1"), MonitorState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_newer_tool_cancels_older_monitor() {
    let dispatcher = Arc::new(MockDispatcher::default());
    let pane = Arc::new(ScriptedPane::default());
    let engine = engine(dispatcher.clone(), pane.clone());

    let first = engine.ingest(HookEvent::tool_started("s1", "Bash", json!({"command": "ls"})));
    let second = engine.ingest(HookEvent::tool_started("s1", "Edit", json!({"file_path": "x.rs"})));
    pane.set(BASH_PROMPT);

    assert_eq!(first.monitor.unwrap().await.unwrap(), MonitorOutcome::Cancelled);
    assert!(matches!(
        second.monitor.unwrap().await.unwrap(),
        MonitorOutcome::Detected { .. }
    ));

    let record = engine.monitor().dialog("s1").unwrap();
    assert_eq!(record.tool_name, "Edit");
    assert_eq!(
        record.fingerprint,
        Fingerprint::compute("Edit", &json!({"file_path": "x.rs"}))
    );
}

#[tokio::test(start_paused = true)]
async fn test_repeated_start_keeps_only_latest_operation() {
    let dispatcher = Arc::new(MockDispatcher::default());
    let engine = engine(dispatcher.clone(), Arc::new(ScriptedPane::default()));

    engine
        .ingest(HookEvent::tool_started("s1", "Bash", json!({"command": "make a"})))
        .settle()
        .await;
    engine
        .ingest(HookEvent::tool_started("s1", "Bash", json!({"command": "make b"})))
        .settle()
        .await;
    assert_eq!(engine.tracker().len(), 1);

    engine
        .ingest(HookEvent::tool_finished("s1", "Bash", json!({}), json!({})))
        .settle()
        .await;

    let edits = dispatcher.edits();
    assert_eq!(edits.len(), 1);
    assert_eq!(edits[0].0.message_id, 2);
    assert!(edits[0].1.contains("make b"));
    assert!(engine.tracker().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_failed_start_send_leaves_operation_for_sweep() {
    let dispatcher = Arc::new(MockDispatcher {
        fail_sends_after: Some(0),
        ..Default::default()
    });
    let clock = Arc::new(ManualClock::new());
    let engine = Engine::with_parts(
        test_config(),
        dispatcher.clone(),
        Arc::new(ScriptedPane::default()),
        clock.clone(),
        Arc::new(PhraseClassifier::default()),
    );

    engine
        .ingest(HookEvent::tool_started("s1", "Bash", json!({"command": "ls"})))
        .settle()
        .await;
    let op = engine.tracker().pending("s1", "Bash").unwrap();
    assert!(op.handle.is_none());

    clock.advance(Duration::from_secs(601));
    let stats = engine.sweep();
    assert_eq!(stats.operations, 1);
    assert_eq!(stats.contexts, 1);
    assert!(engine.tracker().is_empty());
    assert!(engine.contexts().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_sweep_respects_each_ttl() {
    let dispatcher = Arc::new(MockDispatcher::default());
    let clock = Arc::new(ManualClock::new());
    let engine = Engine::with_parts(
        test_config(),
        dispatcher,
        Arc::new(ScriptedPane::showing(BASH_PROMPT)),
        clock.clone(),
        Arc::new(PhraseClassifier::default()),
    );

    let dispatched = engine.ingest(HookEvent::tool_started("s1", "Bash", json!({"command": "ls"})));
    dispatched.monitor.unwrap().await.unwrap();
    dispatched.work.unwrap().await.unwrap();
    assert!(engine.monitor().dialog("s1").is_some());
    assert!(engine.monitor().prompt("s1").is_some());

    clock.advance(Duration::from_secs(301));
    let stats = engine.sweep();
    assert_eq!(stats.contexts, 1);
    assert_eq!(stats.dialogs, 1);
    assert_eq!(stats.operations, 0);
    assert!(engine.monitor().dialog("s1").is_none());
    assert!(engine.monitor().prompt("s1").is_none());
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_cancels_monitors() {
    let dispatcher = Arc::new(MockDispatcher::default());
    let engine = engine(dispatcher, Arc::new(ScriptedPane::default()));

    let dispatched = engine.ingest(HookEvent::tool_started("s1", "Bash", json!({"command": "sleep 60"})));
    assert_eq!(engine.monitor().active_monitors(), 1);

    assert!(engine.shutdown(Duration::from_secs(5)).await);
    assert_eq!(dispatched.monitor.unwrap().await.unwrap(), MonitorOutcome::Cancelled);
}

#[tokio::test(start_paused = true)]
async fn test_user_response_is_recorded() {
    let dispatcher = Arc::new(MockDispatcher::default());
    let engine = engine(dispatcher, Arc::new(ScriptedPane::showing(BASH_PROMPT)));

    assert!(!engine.mark_user_responded("s1"));
    let dispatched = engine.ingest(HookEvent::tool_started("s1", "Bash", json!({"command": "ls"})));
    dispatched.monitor.unwrap().await.unwrap();

    assert!(engine.mark_user_responded("s1"));
    assert!(engine.monitor().dialog("s1").unwrap().user_responded);
}

#[tokio::test(start_paused = true)]
async fn test_preview_choice_is_typed_into_pane() {
    let dispatcher = Arc::new(MockDispatcher::default());
    let engine = engine(dispatcher.clone(), Arc::new(ScriptedPane::showing(BASH_PROMPT)));
    let injector = Arc::new(RecordingInjector::default());
    engine.attach_key_injector(injector.clone()).unwrap();
    assert!(engine.attach_key_injector(injector.clone()).is_err());

    let dispatched = engine.ingest(HookEvent::tool_started("s1", "Bash", json!({"command": "rm -rf /"})));
    dispatched.monitor.unwrap().await.unwrap();

    let preview = dispatcher
        .sent
        .lock()
        .unwrap()
        .iter()
        .map(|(_, m)| m.clone())
        .find(|m| !m.choices.is_empty())
        .unwrap();
    assert_eq!(preview.choice_tag.as_deref(), Some("s1"));
    assert_eq!(engine.monitor().prompt("s1").unwrap().options.len(), 3);

    let outcome = engine.respond("s1", 2).await.unwrap();
    assert_eq!(
        outcome,
        ChoiceOutcome::Delivered {
            option_text: "Yes, and don't ask again for rm commands".into()
        }
    );
    assert_eq!(*injector.typed.lock().unwrap(), vec!["2".to_string()]);
    assert!(engine.monitor().dialog("s1").unwrap().user_responded);

    // A second tap on the same buttons finds nothing open
    assert_eq!(engine.respond("s1", 1).await.unwrap(), ChoiceOutcome::Expired);
    assert_eq!(injector.typed.lock().unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_authoritative_notice_opens_default_choices() {
    let dispatcher = Arc::new(MockDispatcher::default());
    let engine = engine(dispatcher.clone(), Arc::new(ScriptedPane::default()));
    let injector = Arc::new(RecordingInjector::default());
    engine.attach_key_injector(injector.clone()).unwrap();

    let dispatched = engine.ingest(HookEvent::new(
        "s1",
        HookEventKind::PermissionOrIdleNotice {
            message: "Claude needs your permission to use Write".into(),
            tool_name: Some("Write".into()),
            tool_input: Some(json!({"file_path": "a.rs", "content": "x"})),
        },
    ));
    dispatched.settle().await;

    let notice = dispatcher.sent.lock().unwrap().last().unwrap().1.clone();
    assert_eq!(notice.choice_tag.as_deref(), Some("s1"));

    assert_eq!(
        engine.respond("s1", 4).await.unwrap(),
        ChoiceOutcome::UnknownOption { available: 3 }
    );
    assert!(injector.typed.lock().unwrap().is_empty());

    assert_eq!(
        engine.respond("s1", 3).await.unwrap(),
        ChoiceOutcome::Delivered { option_text: "No".into() }
    );
    assert_eq!(*injector.typed.lock().unwrap(), vec!["3".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_failed_injection_keeps_prompt_open() {
    let dispatcher = Arc::new(MockDispatcher::default());
    let engine = engine(dispatcher, Arc::new(ScriptedPane::showing(BASH_PROMPT)));

    assert!(engine.respond("s1", 1).await.is_err());

    engine
        .attach_key_injector(Arc::new(RecordingInjector {
            fail: true,
            ..Default::default()
        }))
        .unwrap();
    let dispatched = engine.ingest(HookEvent::tool_started("s1", "Bash", json!({"command": "ls"})));
    dispatched.monitor.unwrap().await.unwrap();

    assert!(engine.respond("s1", 1).await.is_err());
    assert!(engine.monitor().prompt("s1").is_some());
    assert!(!engine.monitor().dialog("s1").unwrap().user_responded);
}

#[tokio::test(start_paused = true)]
async fn test_tool_finished_closes_prompt() {
    let dispatcher = Arc::new(MockDispatcher::default());
    let engine = engine(dispatcher, Arc::new(ScriptedPane::showing(BASH_PROMPT)));
    let injector = Arc::new(RecordingInjector::default());
    engine.attach_key_injector(injector.clone()).unwrap();

    let dispatched = engine.ingest(HookEvent::tool_started("s1", "Bash", json!({"command": "ls"})));
    dispatched.monitor.unwrap().await.unwrap();
    dispatched.work.unwrap().await.unwrap();

    engine
        .ingest(HookEvent::tool_finished("s1", "Bash", json!({"command": "ls"}), json!("ok")))
        .settle()
        .await;
    assert_eq!(engine.respond("s1", 1).await.unwrap(), ChoiceOutcome::Expired);
    assert!(injector.typed.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_turn_summary_from_transcript() {
    let dispatcher = Arc::new(MockDispatcher::default());
    let engine = engine(dispatcher.clone(), Arc::new(ScriptedPane::default()));

    let mut transcript = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        transcript,
        r#"{{"type":"user","message":{{"content":"add a test"}}}}"#
    )
    .unwrap();
    writeln!(
        transcript,
        r#"{{"type":"assistant","message":{{"content":[{{"type":"text","text":"Added the test."}}]}}}}"#
    )
    .unwrap();

    let event = HookEvent::new(
        "s1",
        HookEventKind::TurnStopped {
            transcript_path: Some(transcript.path().to_path_buf()),
        },
    );
    engine.ingest(event).settle().await;

    assert_eq!(
        dispatcher.sent_texts(),
        vec!["🤖 **Claude:**\nAdded the test.".to_string()]
    );
}

#[tokio::test]
async fn test_prompt_submitted_is_relayed() {
    let dispatcher = Arc::new(MockDispatcher::default());
    let engine = engine(dispatcher.clone(), Arc::new(ScriptedPane::default()));

    let event = HookEvent::new(
        "s1",
        HookEventKind::PromptSubmitted {
            prompt: "run the benchmarks".into(),
        },
    );
    engine.ingest(event).settle().await;

    assert_eq!(
        dispatcher.sent_texts(),
        vec!["💬 **New Prompt:**\n```\nrun the benchmarks\n```".to_string()]
    );
}

#[tokio::test]
async fn test_series_choices_attach_to_last_part() {
    let dispatcher = Arc::new(MockDispatcher {
        max_len: Some(40),
        ..Default::default()
    });
    let notifier = Notifier::new(dispatcher.clone()).with_part_delay(Duration::ZERO);

    let text = "line one is here\nline two is here\nline three is here\nline four";
    let series = notifier
        .send(
            Outbound::text(text)
                .with_choices(vec!["Yes".into(), "No".into()])
                .with_choice_tag("s1"),
        )
        .await
        .unwrap();

    assert!(series.total_parts() > 1);
    let sent = dispatcher.sent.lock().unwrap();
    assert_eq!(sent.len(), series.total_parts());
    for (_, part) in &sent[..sent.len() - 1] {
        assert!(part.choices.is_empty());
        assert!(part.choice_tag.is_none());
        assert!(part.text.chars().count() <= 40);
    }
    assert_eq!(sent.last().unwrap().1.choices.len(), 2);
    assert_eq!(sent.last().unwrap().1.choice_tag.as_deref(), Some("s1"));
    assert_eq!(series.last_handle, sent.last().unwrap().0);
}

#[tokio::test]
async fn test_series_aborts_on_failed_part() {
    let dispatcher = Arc::new(MockDispatcher {
        max_len: Some(20),
        fail_sends_after: Some(1),
        ..Default::default()
    });
    let notifier = Notifier::new(dispatcher.clone()).with_part_delay(Duration::ZERO);

    let result = notifier
        .send(Outbound::text("aaaa bbbb cccc dddd eeee ffff gggg hhhh"))
        .await;

    assert!(result.is_err());
    assert_eq!(dispatcher.sends(), 1);
}
