// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde_json::Value;

/// Terminal summary of a run. Always the last event on the stream.
#[derive(Debug, Clone, PartialEq)]
pub struct RunResult {
    /// The final assistant text, or the error description for
    /// `stop_reason == "error"`.
    pub text: String,
    pub session_id: String,
    pub turns: u32,
    pub tool_calls: u32,
    pub total_tokens: u64,
    pub total_cost: f64,
    /// One of `end_turn`, `tool_use`, `max_turns`, `error`.
    pub stop_reason: String,
}

/// Events emitted by the agent loop, in the order the work happened.
/// Consumers (CLI, CI runner, sub-agent collector) subscribe to these.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    /// Streaming text. `is_partial` chunks arrive live; one final event with
    /// `is_partial == false` carries the turn's full text.
    Text { text: String, is_partial: bool },
    /// The model requested a tool call.
    ToolUse {
        id: String,
        name: String,
        args: Value,
    },
    /// A tool call finished (or was denied).
    ToolResult {
        tool_use_id: String,
        content: String,
        is_error: bool,
        display: Option<String>,
    },
    /// Context was compacted before a provider call.
    Compaction {
        tokens_before: usize,
        tokens_after: usize,
        summary: String,
    },
    /// Lifecycle event; the first event of every run is
    /// `System { kind: "session_start", .. }`.
    System { kind: String, data: Value },
    /// Terminal event.
    Result(RunResult),
}
