// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use futures::StreamExt;
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use smed_audit::{AuditLogger, PiiScanner};
use smed_config::{HookEvent, RunConfig};
use smed_mcp::McpManager;
use smed_model::{
    catalog, ChatMessage, ContentBlock, ProviderAdapter, StreamEvent, ToolDef, Usage,
};
use smed_permissions::{PermissionDecision, PermissionManager};
use smed_sandbox::SandboxExecutor;
use smed_session::Session;
use smed_tools::{ToolContext, ToolRegistry, ToolResultData};

use crate::approval::{describe_tool_call, ApprovalHandler};
use crate::context;
use crate::events::{AgentEvent, RunResult};
use crate::hooks::{HookContext, HookManager};
use crate::steering::SteeringReceiver;

/// Everything an [`AgentLoop`] needs, assembled by the engine (or directly
/// by tests and the sub-agent manager).
pub struct LoopParts {
    pub provider: Arc<dyn ProviderAdapter>,
    pub tools: Arc<ToolRegistry>,
    pub config: RunConfig,
    pub session: Session,
    pub context_window: usize,
    pub permissions: PermissionManager,
    pub mcp: Option<Arc<McpManager>>,
    pub hooks: HookManager,
    pub steering: Option<SteeringReceiver>,
    pub approval: Option<Arc<dyn ApprovalHandler>>,
    pub audit: AuditLogger,
    pub sandbox: Option<Arc<dyn SandboxExecutor>>,
    pub system: String,
    /// Definitions appended to the registry's own (MCP tools).
    pub extra_tool_defs: Vec<ToolDef>,
    pub cwd: PathBuf,
}

/// The core turn loop: provider stream → tool phase → repeat, until a turn
/// ends without tool calls, an error is fatal, or the turn budget runs out.
pub struct AgentLoop {
    provider: Arc<dyn ProviderAdapter>,
    tools: Arc<ToolRegistry>,
    config: RunConfig,
    session: Session,
    context_window: usize,
    permissions: PermissionManager,
    mcp: Option<Arc<McpManager>>,
    hooks: HookManager,
    steering: Option<SteeringReceiver>,
    approval: Option<Arc<dyn ApprovalHandler>>,
    audit: AuditLogger,
    sandbox: Option<Arc<dyn SandboxExecutor>>,
    scanner: PiiScanner,
    system: String,
    tool_defs: Vec<ToolDef>,
    cwd: PathBuf,
}

/// A tool call collected from the stream, arguments parsed.
struct CollectedCall {
    id: String,
    name: String,
    args: Value,
}

/// What one provider stream produced.
struct TurnOutput {
    text: String,
    tool_uses: Vec<CollectedCall>,
    stop_reason: String,
    usage: Usage,
    stream_error: Option<String>,
}

impl AgentLoop {
    pub fn new(parts: LoopParts) -> Self {
        let mut tool_defs = parts.tools.definitions();
        tool_defs.extend(parts.extra_tool_defs);
        Self {
            provider: parts.provider,
            tools: parts.tools,
            config: parts.config,
            session: parts.session,
            context_window: parts.context_window,
            permissions: parts.permissions,
            mcp: parts.mcp,
            hooks: parts.hooks,
            steering: parts.steering,
            approval: parts.approval,
            audit: parts.audit,
            sandbox: parts.sandbox,
            scanner: PiiScanner::new(),
            system: parts.system,
            tool_defs,
            cwd: parts.cwd,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Run the loop for one user prompt, emitting events through `tx`.
    ///
    /// Always terminates with exactly one `AgentEvent::Result`, also
    /// returned. A dropped receiver or a fired `cancel` stops the loop at
    /// the next suspension point; an in-flight tool finishes first.
    pub async fn run(
        &mut self,
        prompt: &str,
        tx: mpsc::Sender<AgentEvent>,
        mut cancel: Option<oneshot::Receiver<()>>,
    ) -> RunResult {
        let mode = self.permissions.mode();
        let mut turns = 0u32;
        let mut tool_call_count = 0u32;
        let mut total_tokens = 0u64;
        let mut total_cost = 0.0f64;
        let mut final_text = String::new();
        let mut stop_reason = "end_turn".to_string();
        let mut alive = true;

        if let Err(e) = self.session.add_message(ChatMessage::user(prompt)) {
            warn!(error = %e, "failed to journal user prompt");
        }
        self.fire_hook(HookEvent::UserPrompt).await;
        self.audit
            .log_session_start(&self.config.provider, self.provider.model_id());
        self.fire_hook(HookEvent::SessionStart).await;
        alive &= emit(
            &tx,
            AgentEvent::System {
                kind: "session_start".into(),
                data: json!({ "session_id": self.session.session_id }),
            },
        )
        .await;

        'turns: while turns < self.config.max_turns {
            if !alive || cancelled(&mut cancel) {
                break;
            }
            turns += 1;

            // Steering messages are visible to this turn's provider call and
            // never injected mid-stream.
            if let Some(steering) = &mut self.steering {
                while let Some(message) = steering.try_recv() {
                    debug!("steering message consumed between turns");
                    let _ = self.session.add_message(ChatMessage::user(message));
                }
            }

            if context::needs_compaction(
                self.session.messages(),
                &self.system,
                self.provider.as_ref(),
                self.context_window,
            ) {
                let (compacted, outcome) = context::compact_messages(
                    self.session.messages(),
                    &self.system,
                    self.provider.as_ref(),
                    self.context_window,
                );
                self.session.set_messages(compacted);
                alive &= emit(
                    &tx,
                    AgentEvent::Compaction {
                        tokens_before: outcome.tokens_before,
                        tokens_after: outcome.tokens_after,
                        summary: outcome.summary,
                    },
                )
                .await;
                self.fire_hook(HookEvent::Compaction).await;
            }

            let stream = match self
                .provider
                .stream(
                    self.session.messages(),
                    &self.tool_defs,
                    &self.system,
                    self.config.max_tokens,
                )
                .await
            {
                Ok(stream) => stream,
                Err(e) => {
                    stop_reason = "error".into();
                    final_text = e.to_string();
                    break;
                }
            };

            let turn = self.consume_stream(stream, &tx, &mut alive).await;
            if let Some(error) = turn.stream_error {
                // Mid-stream fatal: ends the run with an error result, no
                // retry and no synthetic event.
                stop_reason = "error".into();
                final_text = error;
                break;
            }

            if !turn.text.is_empty() {
                alive &= emit(
                    &tx,
                    AgentEvent::Text {
                        text: turn.text.clone(),
                        is_partial: false,
                    },
                )
                .await;
                final_text = turn.text.clone();
            }

            // One assistant message carries the text and every tool_use
            // block of the turn.
            if !turn.text.is_empty() || !turn.tool_uses.is_empty() {
                let message = if turn.tool_uses.is_empty() {
                    ChatMessage::assistant(turn.text.clone())
                } else {
                    let mut blocks = Vec::new();
                    if !turn.text.is_empty() {
                        blocks.push(ContentBlock::Text {
                            text: turn.text.clone(),
                        });
                    }
                    for call in &turn.tool_uses {
                        blocks.push(self.provider.format_tool_use(
                            &call.id,
                            &call.name,
                            &call.args,
                        ));
                    }
                    ChatMessage::assistant_blocks(blocks)
                };
                let _ = self.session.add_message(message);
            }

            let turn_tokens = turn.usage.input_tokens + turn.usage.output_tokens;
            let turn_cost = catalog::turn_cost(
                self.provider.model_id(),
                turn.usage.input_tokens,
                turn.usage.output_tokens,
            );
            total_tokens += turn_tokens;
            total_cost += turn_cost;
            let _ = self.session.record_turn(turn_tokens, turn_cost);
            self.audit.log_provider_call(
                &self.config.provider,
                self.provider.model_id(),
                turn.usage.input_tokens,
                turn.usage.output_tokens,
                turn_cost,
            );

            stop_reason = turn.stop_reason.clone();
            if turn.stop_reason != "tool_use" || turn.tool_uses.is_empty() {
                break;
            }

            // Tool phase: strictly sequential, in the order the provider
            // emitted the calls.
            for call in turn.tool_uses {
                if cancelled(&mut cancel) {
                    break 'turns;
                }
                tool_call_count += 1;

                let decision = self.permissions.check(&call.name, &call.args);
                self.audit.log_permission_decision(
                    &call.name,
                    decision.as_str(),
                    mode.as_str(),
                );

                alive &= emit(
                    &tx,
                    AgentEvent::ToolUse {
                        id: call.id.clone(),
                        name: call.name.clone(),
                        args: call.args.clone(),
                    },
                )
                .await;

                let result = match decision {
                    PermissionDecision::Deny => ToolResultData::error(format!(
                        "Permission denied: {} is not allowed in {} mode.",
                        call.name, mode
                    )),
                    PermissionDecision::Ask => {
                        let approved = match &self.approval {
                            Some(handler) => {
                                let description = describe_tool_call(&call.name, &call.args);
                                handler
                                    .request_approval(&call.name, &call.args, &description)
                                    .await
                            }
                            None => false,
                        };
                        if approved {
                            self.dispatch_tool(&call.name, &call.args).await
                        } else {
                            ToolResultData::error(format!(
                                "Tool call {} was denied by user.",
                                call.name
                            ))
                        }
                    }
                    PermissionDecision::Allow => self.dispatch_tool(&call.name, &call.args).await,
                };

                alive &= emit(
                    &tx,
                    AgentEvent::ToolResult {
                        tool_use_id: call.id.clone(),
                        content: result.content.clone(),
                        is_error: result.is_error,
                        display: result.display.clone(),
                    },
                )
                .await;

                // The provider adapter decides the wire form of the result
                // message (user block vs. dedicated tool role).
                let message =
                    self.provider
                        .format_tool_result(&call.id, &result.content, result.is_error);
                let _ = self.session.add_message(message);
            }
        }

        if turns >= self.config.max_turns && stop_reason == "tool_use" {
            stop_reason = "max_turns".into();
        }

        self.fire_hook(HookEvent::AgentStop).await;
        self.audit
            .log_session_end(turns, total_tokens, total_cost);
        self.fire_hook(HookEvent::SessionEnd).await;
        self.audit.close();

        let result = RunResult {
            text: final_text,
            session_id: self.session.session_id.clone(),
            turns,
            tool_calls: tool_call_count,
            total_tokens,
            total_cost,
            stop_reason,
        };
        let _ = emit(&tx, AgentEvent::Result(result.clone())).await;
        result
    }

    /// Pump one provider stream: text deltas out live, tool calls collected
    /// with their argument buffers, usage and stop reason recorded from
    /// `MessageEnd`.
    async fn consume_stream(
        &mut self,
        mut stream: smed_model::EventStream,
        tx: &mpsc::Sender<AgentEvent>,
        alive: &mut bool,
    ) -> TurnOutput {
        let mut out = TurnOutput {
            text: String::new(),
            tool_uses: Vec::new(),
            stop_reason: "end_turn".into(),
            usage: Usage::default(),
            stream_error: None,
        };
        // (id, name, argument buffer) of the currently open tool_use.
        let mut pending: Option<(String, String, String)> = None;

        while let Some(item) = stream.next().await {
            match item {
                Ok(StreamEvent::TextDelta(delta)) => {
                    if delta.is_empty() {
                        continue;
                    }
                    out.text.push_str(&delta);
                    *alive &= emit(
                        tx,
                        AgentEvent::Text {
                            text: delta,
                            is_partial: true,
                        },
                    )
                    .await;
                }
                Ok(StreamEvent::ToolUseStart { id, name }) => {
                    pending = Some((id, name, String::new()));
                }
                Ok(StreamEvent::ToolUseDelta { partial_json }) => {
                    if let Some((_, _, buffer)) = &mut pending {
                        buffer.push_str(&partial_json);
                    }
                }
                Ok(StreamEvent::ToolUseEnd) => {
                    if let Some((id, name, buffer)) = pending.take() {
                        out.tool_uses.push(CollectedCall {
                            id,
                            name,
                            args: parse_tool_args(&buffer),
                        });
                    }
                }
                Ok(StreamEvent::MessageEnd { stop_reason, usage }) => {
                    out.stop_reason = stop_reason;
                    out.usage = usage;
                }
                Err(e) => {
                    out.stream_error = Some(e.to_string());
                    break;
                }
            }
        }
        out
    }

    /// Execute through the registry or the MCP router, wrapped in the audit
    /// and hook plumbing.
    async fn dispatch_tool(&mut self, name: &str, args: &Value) -> ToolResultData {
        self.audit.log_tool_call(name, Some(args));
        self.fire_tool_hook(HookEvent::PreToolUse, name, args, None)
            .await;

        let result = if name.starts_with("mcp__") {
            match &self.mcp {
                Some(mcp) => mcp.call_tool(name, args.clone()).await,
                None => ToolResultData::error(format!("Unknown tool: '{name}'")),
            }
        } else {
            self.tools
                .execute(name, args.clone(), self.tool_context())
                .await
        };

        self.fire_tool_hook(HookEvent::PostToolUse, name, args, Some(&result))
            .await;
        self.audit
            .log_tool_result(name, result.is_error, result.content.len());

        // One pii_detected event per distinct pattern per result.
        if self.audit.enabled() {
            let mut seen: BTreeSet<String> = BTreeSet::new();
            for finding in self.scanner.scan(&result.content) {
                if seen.insert(finding.pattern_name.clone()) {
                    self.audit.log_pii_detected(
                        &finding.pattern_name,
                        &format!("tool result from {name}"),
                    );
                }
            }
        }

        result
    }

    fn tool_context(&self) -> ToolContext {
        ToolContext {
            cwd: self.cwd.clone(),
            permission_mode: self.permissions.mode().as_str().to_string(),
            session_id: self.session.session_id.clone(),
            sandbox: self.sandbox.clone(),
            interactive: self.config.interactive,
        }
    }

    async fn fire_hook(&self, event: HookEvent) {
        if self.hooks.is_empty() {
            return;
        }
        let ctx = HookContext::new(event, &self.session.session_id, &self.cwd.to_string_lossy());
        self.hooks.fire(&ctx).await;
    }

    async fn fire_tool_hook(
        &self,
        event: HookEvent,
        name: &str,
        args: &Value,
        result: Option<&ToolResultData>,
    ) {
        if self.hooks.is_empty() {
            return;
        }
        let mut ctx = HookContext::new(event, &self.session.session_id, &self.cwd.to_string_lossy())
            .with_tool(name, args);
        if let Some(result) = result {
            ctx = ctx.with_result(&result.content, result.is_error);
        }
        self.hooks.fire(&ctx).await;
    }
}

/// Parse a streamed argument buffer. An empty buffer means no arguments;
/// malformed JSON degrades to an empty object so the tool reports a
/// validation error instead of the turn aborting.
fn parse_tool_args(buffer: &str) -> Value {
    if buffer.trim().is_empty() {
        return json!({});
    }
    match serde_json::from_str::<Value>(buffer) {
        Ok(v) if v.is_object() => v,
        Ok(_) | Err(_) => {
            warn!(buffer, "model sent malformed tool arguments; substituting {{}}");
            json!({})
        }
    }
}

async fn emit(tx: &mpsc::Sender<AgentEvent>, event: AgentEvent) -> bool {
    tx.send(event).await.is_ok()
}

/// Both an explicit cancel signal and a dropped sender count as
/// cancellation.
fn cancelled(cancel: &mut Option<oneshot::Receiver<()>>) -> bool {
    match cancel {
        Some(rx) => !matches!(rx.try_recv(), Err(oneshot::error::TryRecvError::Empty)),
        None => false,
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod unit_tests {
    use super::*;

    #[test]
    fn empty_buffer_parses_to_empty_object() {
        assert_eq!(parse_tool_args(""), json!({}));
        assert_eq!(parse_tool_args("   "), json!({}));
    }

    #[test]
    fn malformed_json_parses_to_empty_object() {
        assert_eq!(parse_tool_args("{\"a\": "), json!({}));
        assert_eq!(parse_tool_args("not json"), json!({}));
    }

    #[test]
    fn non_object_json_parses_to_empty_object() {
        assert_eq!(parse_tool_args("[1,2]"), json!({}));
        assert_eq!(parse_tool_args("\"str\""), json!({}));
    }

    #[test]
    fn valid_object_passes_through() {
        assert_eq!(
            parse_tool_args(r#"{"file_path": "a.txt"}"#),
            json!({"file_path": "a.txt"})
        );
    }

    #[test]
    fn cancelled_reports_fired_and_dropped_senders() {
        let (tx, rx) = oneshot::channel::<()>();
        let mut cancel = Some(rx);
        assert!(!cancelled(&mut cancel));
        tx.send(()).unwrap();
        assert!(cancelled(&mut cancel));

        let (tx2, rx2) = oneshot::channel::<()>();
        let mut cancel2 = Some(rx2);
        drop(tx2);
        assert!(cancelled(&mut cancel2));

        let mut none = None;
        assert!(!cancelled(&mut none));
    }
}
