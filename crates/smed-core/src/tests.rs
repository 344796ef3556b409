// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! End-to-end loop scenarios against scripted providers.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;

use smed_audit::{verify_chain, AuditLogger};
use smed_config::{PermissionMode, RunConfig};
use smed_model::{
    ChatMessage, ModelRouter, ProviderAdapter, RoutingStrategy, ScriptedProvider, StreamEvent,
    TokenBudgetTracker, Usage,
};
use smed_permissions::{PermissionConfig, PermissionManager};
use smed_session::Session;
use smed_tools::ToolRegistry;

use crate::agent::{AgentLoop, LoopParts};
use crate::events::AgentEvent;
use crate::hooks::HookManager;
use crate::steering::steering_channel;

struct Fixture {
    dir: tempfile::TempDir,
}

impl Fixture {
    fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    fn cwd(&self) -> PathBuf {
        self.dir.path().to_path_buf()
    }

    fn sessions_dir(&self) -> PathBuf {
        self.dir.path().join("sessions")
    }

    fn session(&self, id: Option<&str>) -> Session {
        Session::open(&self.sessions_dir(), id, &self.cwd().to_string_lossy()).unwrap()
    }

    fn parts(
        &self,
        provider: Arc<dyn ProviderAdapter>,
        mode: PermissionMode,
        session: Session,
    ) -> LoopParts {
        let mut tools = ToolRegistry::new();
        tools.register_defaults();
        LoopParts {
            provider,
            tools: Arc::new(tools),
            config: RunConfig {
                provider: "mock".into(),
                permission_mode: mode,
                cwd: Some(self.cwd()),
                ..Default::default()
            },
            session,
            context_window: 200_000,
            permissions: PermissionManager::new(mode, PermissionConfig::default(), None),
            mcp: None,
            hooks: HookManager::empty(),
            steering: None,
            approval: None,
            audit: AuditLogger::disabled(),
            sandbox: None,
            system: String::new(),
            extra_tool_defs: Vec::new(),
            cwd: self.cwd(),
        }
    }
}

async fn run_and_collect(
    mut agent_loop: AgentLoop,
    prompt: &str,
) -> (Vec<AgentEvent>, crate::events::RunResult) {
    let (tx, mut rx) = mpsc::channel(256);
    let result = agent_loop.run(prompt, tx, None).await;
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    (events, result)
}

fn final_texts(events: &[AgentEvent]) -> Vec<&str> {
    events
        .iter()
        .filter_map(|e| match e {
            AgentEvent::Text {
                text,
                is_partial: false,
            } => Some(text.as_str()),
            _ => None,
        })
        .collect()
}

// ── Scenario 1: simple text turn ─────────────────────────────────────────────

#[tokio::test]
async fn simple_text_turn() {
    let fx = Fixture::new();
    let provider = Arc::new(ScriptedProvider::always_text("Hello."));
    let agent_loop = AgentLoop::new(fx.parts(
        provider,
        PermissionMode::Default,
        fx.session(None),
    ));
    let (events, result) = run_and_collect(agent_loop, "Hi").await;

    assert!(matches!(
        &events[0],
        AgentEvent::System { kind, .. } if kind == "session_start"
    ));
    // Partials concatenate to the final text.
    let partial: String = events
        .iter()
        .filter_map(|e| match e {
            AgentEvent::Text {
                text,
                is_partial: true,
            } => Some(text.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(partial, "Hello.");
    assert_eq!(final_texts(&events), vec!["Hello."]);
    assert!(matches!(events.last().unwrap(), AgentEvent::Result(_)));

    assert_eq!(result.text, "Hello.");
    assert_eq!(result.turns, 1);
    assert_eq!(result.tool_calls, 0);
    assert_eq!(result.stop_reason, "end_turn");
}

// ── Scenario 2: single tool call ─────────────────────────────────────────────

#[tokio::test]
async fn single_tool_call_reads_file() {
    let fx = Fixture::new();
    std::fs::write(fx.cwd().join("test.txt"), "hello\nworld\n").unwrap();
    let provider = Arc::new(ScriptedProvider::tool_then_text(
        "toolu_01",
        "Read",
        r#"{"file_path": "test.txt"}"#,
        "The file contains two lines.",
    ));
    let agent_loop = AgentLoop::new(fx.parts(
        provider,
        PermissionMode::Default,
        fx.session(None),
    ));
    let (events, result) = run_and_collect(agent_loop, "Read test.txt").await;

    let tool_uses: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            AgentEvent::ToolUse { id, name, .. } => Some((id.as_str(), name.as_str())),
            _ => None,
        })
        .collect();
    assert_eq!(tool_uses, vec![("toolu_01", "Read")]);

    let tool_results: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            AgentEvent::ToolResult {
                tool_use_id,
                content,
                is_error,
                ..
            } => Some((tool_use_id.as_str(), content.as_str(), *is_error)),
            _ => None,
        })
        .collect();
    assert_eq!(tool_results.len(), 1);
    let (id, content, is_error) = tool_results[0];
    assert_eq!(id, "toolu_01");
    assert!(!is_error);
    assert!(content.contains("hello"));
    assert!(content.contains("world"));

    assert_eq!(result.turns, 2);
    assert_eq!(result.tool_calls, 1);
    assert_eq!(result.stop_reason, "end_turn");
    assert_eq!(result.text, "The file contains two lines.");
}

// ── Scenario 3: denied tool in plan mode ─────────────────────────────────────

#[tokio::test]
async fn plan_mode_denies_write_and_continues() {
    let fx = Fixture::new();
    let provider = Arc::new(ScriptedProvider::tool_then_text(
        "toolu_02",
        "Write",
        r#"{"file_path": "x", "content": "y"}"#,
        "Understood, not writing.",
    ));
    let agent_loop = AgentLoop::new(fx.parts(provider, PermissionMode::Plan, fx.session(None)));
    let (events, result) = run_and_collect(agent_loop, "Write x").await;

    let denial = events
        .iter()
        .find_map(|e| match e {
            AgentEvent::ToolResult {
                content, is_error, ..
            } => Some((content.clone(), *is_error)),
            _ => None,
        })
        .expect("a tool result event");
    assert!(denial.1);
    assert!(denial.0.contains("Permission denied"));
    assert!(denial.0.contains("plan"));

    // The loop continued to the next provider turn and ended normally.
    assert_eq!(result.turns, 2);
    assert_eq!(result.stop_reason, "end_turn");
    // Filesystem unchanged.
    assert!(!fx.cwd().join("x").exists());
}

// ── Scenario 4: compaction fires ─────────────────────────────────────────────

#[tokio::test]
async fn compaction_fires_before_provider_call() {
    let fx = Fixture::new();
    let provider = Arc::new(ScriptedProvider::always_text("continuing"));
    let mut session = fx.session(None);
    // Seed enough short history to cross 85 % of a 1 000-token window.
    for i in 0..10 {
        session
            .add_message(ChatMessage::user(format!("q{i} {}", "x".repeat(160))))
            .unwrap();
        session
            .add_message(ChatMessage::assistant(format!("a{i} {}", "x".repeat(160))))
            .unwrap();
    }

    let mut parts = fx.parts(provider, PermissionMode::Default, session);
    parts.context_window = 1000;
    let agent_loop = AgentLoop::new(parts);
    let (events, result) = run_and_collect(agent_loop, "continue").await;

    let compaction = events
        .iter()
        .find_map(|e| match e {
            AgentEvent::Compaction {
                tokens_before,
                tokens_after,
                ..
            } => Some((*tokens_before, *tokens_after)),
            _ => None,
        })
        .expect("a compaction event");
    assert!(compaction.0 > 850, "tokens_before = {}", compaction.0);
    assert!(compaction.1 <= 550, "tokens_after = {}", compaction.1);
    assert_eq!(result.stop_reason, "end_turn");
}

#[tokio::test]
async fn compaction_replaces_prefix_with_summary_message() {
    let fx = Fixture::new();
    let provider = Arc::new(ScriptedProvider::always_text("ok"));
    let mut session = fx.session(None);
    for i in 0..10 {
        session
            .add_message(ChatMessage::user(format!("q{i} {}", "x".repeat(160))))
            .unwrap();
        session
            .add_message(ChatMessage::assistant(format!("a{i} {}", "x".repeat(160))))
            .unwrap();
    }
    let mut parts = fx.parts(provider, PermissionMode::Default, session);
    parts.context_window = 1000;
    let mut agent_loop = AgentLoop::new(parts);
    let (tx, mut rx) = mpsc::channel(256);
    agent_loop.run("continue", tx, None).await;
    while rx.try_recv().is_ok() {}

    let first = agent_loop.session().messages().first().unwrap();
    assert!(first.as_text().unwrap().starts_with("[Context Summary"));
}

// ── Scenario 5: session resume ───────────────────────────────────────────────

#[tokio::test]
async fn session_resume_continues_history() {
    let fx = Fixture::new();

    // Run A.
    let provider_a = Arc::new(ScriptedProvider::always_text("first answer"));
    let agent_loop = AgentLoop::new(fx.parts(
        provider_a,
        PermissionMode::Default,
        fx.session(None),
    ));
    let (_, result_a) = run_and_collect(agent_loop, "first question").await;
    let session_id = result_a.session_id.clone();

    let journal = fx.sessions_dir().join(format!("{session_id}.jsonl"));
    let len_after_a = std::fs::metadata(&journal).unwrap().len();

    // Run B resumes the same session.
    let provider_b = Arc::new(ScriptedProvider::always_text("second answer"));
    let provider_view = Arc::clone(&provider_b);
    let agent_loop = AgentLoop::new(fx.parts(
        provider_b,
        PermissionMode::Default,
        fx.session(Some(&session_id)),
    ));
    let (_, result_b) = run_and_collect(agent_loop, "second question").await;
    assert_eq!(result_b.session_id, session_id);

    // The provider saw A's history plus B's new prompt, in order.
    let seen = provider_view.last_messages.lock().unwrap();
    let texts: Vec<Option<&str>> = seen.iter().map(|m| m.as_text()).collect();
    assert_eq!(
        texts,
        vec![
            Some("first question"),
            Some("first answer"),
            Some("second question"),
        ]
    );
    drop(seen);

    // The journal grew monotonically.
    let len_after_b = std::fs::metadata(&journal).unwrap().len();
    assert!(len_after_b > len_after_a);
}

// ── Scenario 6: audit chain verification ─────────────────────────────────────

#[tokio::test]
async fn audit_chain_verifies_and_detects_corruption() {
    let fx = Fixture::new();
    let audit_dir = fx.dir.path().join("audit");
    let session = fx.session(None);
    let audit = AuditLogger::new(&session.session_id, Some(audit_dir.clone()), true, true).unwrap();

    let provider = Arc::new(ScriptedProvider::tool_then_text(
        "t1",
        "Glob",
        r#"{"pattern": "*.txt"}"#,
        "done",
    ));
    let mut parts = fx.parts(provider, PermissionMode::Default, session);
    parts.audit = audit;
    let agent_loop = AgentLoop::new(parts);
    let (_, result) = run_and_collect(agent_loop, "list text files").await;

    let path = audit_dir.join(format!("audit-{}.jsonl", result.session_id));
    let (ok, errors) = verify_chain(&path);
    assert!(ok, "{errors:?}");

    // The log saw the whole lifecycle.
    let text = std::fs::read_to_string(&path).unwrap();
    for kind in [
        "session_start",
        "permission_decision",
        "tool_call",
        "tool_result",
        "provider_call",
        "session_end",
    ] {
        assert!(text.contains(kind), "missing {kind} event");
    }

    // Corrupt one byte inside an early event's data.
    let tampered = text.replacen("Glob", "Grab", 1);
    std::fs::write(&path, tampered).unwrap();
    let (ok, errors) = verify_chain(&path);
    assert!(!ok);
    assert!(errors.iter().any(|e| e.contains("hash mismatch")));
}

// ── Steering ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn steering_message_is_visible_to_next_provider_call() {
    let fx = Fixture::new();
    let provider = Arc::new(ScriptedProvider::always_text("noted"));
    let provider_view = Arc::clone(&provider);

    let (steer_tx, steer_rx) = steering_channel();
    assert!(steer_tx.send_nowait("also check the tests"));

    let mut parts = fx.parts(provider, PermissionMode::Default, fx.session(None));
    parts.steering = Some(steer_rx);
    let agent_loop = AgentLoop::new(parts);
    let (_, result) = run_and_collect(agent_loop, "fix the bug").await;
    assert_eq!(result.stop_reason, "end_turn");

    let seen = provider_view.last_messages.lock().unwrap();
    let texts: Vec<Option<&str>> = seen.iter().map(|m| m.as_text()).collect();
    assert_eq!(
        texts,
        vec![Some("fix the bug"), Some("also check the tests")]
    );
}

// ── Budget, max turns, unknown tools ─────────────────────────────────────────

#[tokio::test]
async fn exhausted_budget_ends_run_with_error_result() {
    let fx = Fixture::new();
    let inner = Arc::new(ScriptedProvider::new(vec![
        ScriptedProvider::tool_call_script("t1", "Glob", r#"{"pattern": "*"}"#),
        ScriptedProvider::text_script("never reached"),
    ]));
    // The tool-call script reports 16 tokens; the 10-token budget is gone
    // before the second call.
    let provider = Arc::new(ModelRouter::new(
        inner,
        RoutingStrategy::Manual,
        None,
        Arc::new(TokenBudgetTracker::new(10, 0.0)),
    ));
    let agent_loop = AgentLoop::new(fx.parts(
        provider,
        PermissionMode::Bypass,
        fx.session(None),
    ));
    let (_, result) = run_and_collect(agent_loop, "go").await;
    assert_eq!(result.stop_reason, "error");
    assert!(result.text.contains("budget exhausted"), "{}", result.text);
}

#[tokio::test]
async fn turn_budget_exhaustion_reports_max_turns() {
    let fx = Fixture::new();
    let provider = Arc::new(ScriptedProvider::new(vec![
        ScriptedProvider::tool_call_script("t1", "Glob", r#"{"pattern": "*"}"#),
        ScriptedProvider::tool_call_script("t2", "Glob", r#"{"pattern": "*"}"#),
        ScriptedProvider::tool_call_script("t3", "Glob", r#"{"pattern": "*"}"#),
    ]));
    let mut parts = fx.parts(provider, PermissionMode::Bypass, fx.session(None));
    parts.config.max_turns = 2;
    let agent_loop = AgentLoop::new(parts);
    let (_, result) = run_and_collect(agent_loop, "loop forever").await;
    assert_eq!(result.turns, 2);
    assert_eq!(result.stop_reason, "max_turns");
}

#[tokio::test]
async fn unknown_tool_returns_error_result_and_loop_continues() {
    let fx = Fixture::new();
    let provider = Arc::new(ScriptedProvider::tool_then_text(
        "t1",
        "Transmogrify",
        "{}",
        "fine, no such tool",
    ));
    let agent_loop = AgentLoop::new(fx.parts(
        provider,
        PermissionMode::Bypass,
        fx.session(None),
    ));
    let (events, result) = run_and_collect(agent_loop, "use the gadget").await;
    let tool_result = events
        .iter()
        .find_map(|e| match e {
            AgentEvent::ToolResult {
                content, is_error, ..
            } => Some((content.clone(), *is_error)),
            _ => None,
        })
        .unwrap();
    assert!(tool_result.1);
    assert!(tool_result.0.contains("Unknown tool"));
    assert_eq!(result.stop_reason, "end_turn");
    assert_eq!(result.tool_calls, 1);
}

#[tokio::test]
async fn ask_without_approval_handler_behaves_as_denied() {
    let fx = Fixture::new();
    // Default mode asks for Bash; no handler is installed.
    let provider = Arc::new(ScriptedProvider::tool_then_text(
        "t1",
        "Bash",
        r#"{"command": "echo hi"}"#,
        "okay",
    ));
    let agent_loop = AgentLoop::new(fx.parts(
        provider,
        PermissionMode::Default,
        fx.session(None),
    ));
    let (events, _) = run_and_collect(agent_loop, "run something").await;
    let denial = events
        .iter()
        .find_map(|e| match e {
            AgentEvent::ToolResult {
                content, is_error, ..
            } => Some((content.clone(), *is_error)),
            _ => None,
        })
        .unwrap();
    assert!(denial.1);
    assert!(denial.0.contains("denied by user"));
}

#[tokio::test]
async fn approval_handler_approves_execution() {
    use async_trait::async_trait;
    use serde_json::Value;

    struct ApproveAll;

    #[async_trait]
    impl crate::approval::ApprovalHandler for ApproveAll {
        async fn request_approval(&self, _tool: &str, _args: &Value, description: &str) -> bool {
            assert!(description.starts_with("Run command:"));
            true
        }
    }

    let fx = Fixture::new();
    let provider = Arc::new(ScriptedProvider::tool_then_text(
        "t1",
        "Bash",
        r#"{"command": "echo approved-run"}"#,
        "ran it",
    ));
    let mut parts = fx.parts(provider, PermissionMode::Default, fx.session(None));
    parts.approval = Some(Arc::new(ApproveAll));
    let agent_loop = AgentLoop::new(parts);
    let (events, result) = run_and_collect(agent_loop, "run something").await;
    let output = events
        .iter()
        .find_map(|e| match e {
            AgentEvent::ToolResult { content, .. } => Some(content.clone()),
            _ => None,
        })
        .unwrap();
    assert!(output.contains("approved-run"));
    assert_eq!(result.stop_reason, "end_turn");
}

// ── Invariant: every ToolUse gets exactly one matching ToolResult ────────────

#[tokio::test]
async fn every_tool_use_is_answered_before_the_terminal_result() {
    let fx = Fixture::new();
    std::fs::write(fx.cwd().join("a.txt"), "a\n").unwrap();
    let provider = Arc::new(ScriptedProvider::new(vec![
        vec![
            StreamEvent::ToolUseStart {
                id: "t1".into(),
                name: "Read".into(),
            },
            StreamEvent::ToolUseDelta {
                partial_json: r#"{"file_path": "a.txt"}"#.into(),
            },
            StreamEvent::ToolUseEnd,
            StreamEvent::ToolUseStart {
                id: "t2".into(),
                name: "Glob".into(),
            },
            StreamEvent::ToolUseDelta {
                partial_json: r#"{"pattern": "*.txt"}"#.into(),
            },
            StreamEvent::ToolUseEnd,
            StreamEvent::MessageEnd {
                stop_reason: "tool_use".into(),
                usage: Usage::default(),
            },
        ],
        ScriptedProvider::text_script("both done"),
    ]));
    let agent_loop = AgentLoop::new(fx.parts(
        provider,
        PermissionMode::Bypass,
        fx.session(None),
    ));
    let (events, result) = run_and_collect(agent_loop, "read and glob").await;

    let mut open: Vec<String> = Vec::new();
    for event in &events {
        match event {
            AgentEvent::ToolUse { id, .. } => open.push(id.clone()),
            AgentEvent::ToolResult { tool_use_id, .. } => {
                let pos = open
                    .iter()
                    .position(|o| o == tool_use_id)
                    .expect("result without matching use");
                open.remove(pos);
            }
            AgentEvent::Result(_) => {
                assert!(open.is_empty(), "unanswered tool uses: {open:?}");
            }
            _ => {}
        }
    }
    assert_eq!(result.tool_calls, 2);

    // Tool calls ran in the order the provider emitted them.
    let names: Vec<String> = events
        .iter()
        .filter_map(|e| match e {
            AgentEvent::ToolUse { name, .. } => Some(name.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(names, vec!["Read", "Glob"]);
}

// ── Cancellation ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn cancel_signal_stops_before_next_turn() {
    let fx = Fixture::new();
    let provider = Arc::new(ScriptedProvider::new(vec![
        ScriptedProvider::tool_call_script("t1", "Glob", r#"{"pattern": "*"}"#),
        ScriptedProvider::text_script("should not be reached"),
    ]));
    let mut agent_loop = AgentLoop::new(fx.parts(
        provider,
        PermissionMode::Bypass,
        fx.session(None),
    ));
    let (cancel_tx, cancel_rx) = tokio::sync::oneshot::channel();
    // Fire the cancel before the run starts: turn 1 never happens.
    cancel_tx.send(()).unwrap();
    let (tx, mut rx) = mpsc::channel(256);
    let result = agent_loop.run("go", tx, Some(cancel_rx)).await;
    assert_eq!(result.turns, 0);
    // The terminal result still arrived.
    let mut saw_result = false;
    while let Ok(event) = rx.try_recv() {
        if matches!(event, AgentEvent::Result(_)) {
            saw_result = true;
        }
    }
    assert!(saw_result);
}

#[tokio::test]
async fn dropped_receiver_stops_the_loop() {
    let fx = Fixture::new();
    let provider = Arc::new(ScriptedProvider::new(vec![
        ScriptedProvider::tool_call_script("t1", "Glob", r#"{"pattern": "*"}"#),
        ScriptedProvider::tool_call_script("t2", "Glob", r#"{"pattern": "*"}"#),
        ScriptedProvider::text_script("end"),
    ]));
    let mut agent_loop = AgentLoop::new(fx.parts(
        provider,
        PermissionMode::Bypass,
        fx.session(None),
    ));
    let (tx, rx) = mpsc::channel(256);
    drop(rx);
    let result = agent_loop.run("go", tx, None).await;
    // The loop noticed the dead channel and stopped early rather than
    // burning through the whole turn budget.
    assert!(result.turns <= 1, "ran {} turns", result.turns);
}
