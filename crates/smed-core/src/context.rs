// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Context management: token estimation and safe compaction.
//!
//! Compaction never splits a tool_use/tool_result pair: the split point is
//! always a plain user message, so either a pair survives whole or it is
//! absorbed into the summary together.

use std::collections::BTreeSet;

use smed_model::{ChatMessage, ContentBlock, MessageContent, ProviderAdapter, Role};

/// Compaction triggers at this fraction of the context window.
const COMPACTION_THRESHOLD: f64 = 0.85;
/// After compaction, aim for this fraction of the context window.
const COMPACTION_TARGET: f64 = 0.50;
/// Never compact histories shorter than this.
const MIN_MESSAGES_KEEP: usize = 4;

/// Per-message token overhead on top of the content estimate.
const MESSAGE_OVERHEAD: usize = 4;
/// Extra tokens per tool_use / tool_result block beyond the payload.
const TOOL_BLOCK_OVERHEAD: usize = 10;
/// Extra tokens for the system prompt.
const SYSTEM_OVERHEAD: usize = 10;

/// Outcome of a compaction pass, reported to the event stream.
#[derive(Debug, Clone, PartialEq)]
pub struct CompactionOutcome {
    pub tokens_before: usize,
    pub tokens_after: usize,
    pub summary: String,
}

pub fn estimate_message_tokens(msg: &ChatMessage, provider: &dyn ProviderAdapter) -> usize {
    match &msg.content {
        MessageContent::Text(t) => provider.estimate_tokens(t) + MESSAGE_OVERHEAD,
        MessageContent::Blocks(blocks) => {
            let mut total = MESSAGE_OVERHEAD;
            for block in blocks {
                total += match block {
                    ContentBlock::Text { text } => provider.estimate_tokens(text),
                    ContentBlock::ToolUse { input, .. } => {
                        provider.estimate_tokens(&input.to_string()) + TOOL_BLOCK_OVERHEAD
                    }
                    ContentBlock::ToolResult { content, .. } => {
                        provider.estimate_tokens(content) + TOOL_BLOCK_OVERHEAD
                    }
                };
            }
            total
        }
    }
}

pub fn estimate_total_tokens(
    messages: &[ChatMessage],
    system: &str,
    provider: &dyn ProviderAdapter,
) -> usize {
    let mut total = provider.estimate_tokens(system) + SYSTEM_OVERHEAD;
    for msg in messages {
        total += estimate_message_tokens(msg, provider);
    }
    total
}

pub fn needs_compaction(
    messages: &[ChatMessage],
    system: &str,
    provider: &dyn ProviderAdapter,
    context_window: usize,
) -> bool {
    if messages.len() < MIN_MESSAGES_KEEP {
        return false;
    }
    let total = estimate_total_tokens(messages, system, provider);
    total > (context_window as f64 * COMPACTION_THRESHOLD) as usize
}

/// Find a safe index to split at: the first user message at or after
/// `target_idx` whose content carries no tool_result block. Falls back to
/// keeping the last [`MIN_MESSAGES_KEEP`] messages.
fn find_safe_boundary(messages: &[ChatMessage], target_idx: usize) -> usize {
    let mut idx = target_idx;
    while idx < messages.len().saturating_sub(MIN_MESSAGES_KEEP) {
        let msg = &messages[idx];
        if msg.role == Role::User && !msg.has_tool_result() {
            return idx;
        }
        idx += 1;
    }
    messages.len().saturating_sub(MIN_MESSAGES_KEEP)
}

/// Compact by summarising older messages into one synthetic user message.
///
/// Returns the (possibly unchanged) message list plus the outcome stats.
pub fn compact_messages(
    messages: &[ChatMessage],
    system: &str,
    provider: &dyn ProviderAdapter,
    context_window: usize,
) -> (Vec<ChatMessage>, CompactionOutcome) {
    let tokens_before = estimate_total_tokens(messages, system, provider);
    let target_tokens = (context_window as f64 * COMPACTION_TARGET) as usize;
    let Some(tokens_to_remove) = tokens_before.checked_sub(target_tokens).filter(|n| *n > 0)
    else {
        return (
            messages.to_vec(),
            CompactionOutcome {
                tokens_before,
                tokens_after: tokens_before,
                summary: "No compaction needed.".into(),
            },
        );
    };

    // Walk forward until enough tokens are accounted for.
    let mut running = 0usize;
    let mut split_idx = 0usize;
    for (i, msg) in messages.iter().enumerate() {
        running += estimate_message_tokens(msg, provider);
        if running >= tokens_to_remove {
            split_idx = i + 1;
            break;
        }
    }

    let split_idx = find_safe_boundary(messages, split_idx);
    if split_idx == 0 {
        return (
            messages.to_vec(),
            CompactionOutcome {
                tokens_before,
                tokens_after: tokens_before,
                summary: "Cannot compact further.".into(),
            },
        );
    }

    let old_messages = &messages[..split_idx];
    let kept_messages = &messages[split_idx..];
    let summary = build_summary(old_messages);

    let summary_msg = ChatMessage::user(format!(
        "[Context Summary — {} earlier messages compacted]\n\n{summary}\n\n\
         [End of summary. The conversation continues below.]",
        old_messages.len()
    ));

    let mut compacted = Vec::with_capacity(kept_messages.len() + 1);
    compacted.push(summary_msg);
    compacted.extend_from_slice(kept_messages);
    let tokens_after = estimate_total_tokens(&compacted, system, provider);

    (
        compacted,
        CompactionOutcome {
            tokens_before,
            tokens_after,
            summary,
        },
    )
}

/// Extractive summary of the messages being dropped.
///
/// No model call: snippets of user/assistant text, the distinct tools used,
/// the files they touched, and truncated shell commands. Deterministic by
/// construction.
fn build_summary(messages: &[ChatMessage]) -> String {
    let mut parts: Vec<String> = Vec::new();
    let mut tool_calls: Vec<String> = Vec::new();
    let mut files: BTreeSet<String> = BTreeSet::new();

    for msg in messages {
        match &msg.content {
            MessageContent::Text(text) => {
                if text.len() > 200 {
                    let head: String = text.chars().take(200).collect();
                    match msg.role {
                        Role::User => parts.push(format!("User asked: {head}...")),
                        Role::Assistant => parts.push(format!("Assistant replied: {head}...")),
                        _ => {}
                    }
                }
            }
            MessageContent::Blocks(blocks) => {
                for block in blocks {
                    match block {
                        ContentBlock::ToolUse { name, input, .. } => {
                            tool_calls.push(name.clone());
                            if let Some(path) = input.get("file_path").and_then(|v| v.as_str()) {
                                files.insert(path.to_string());
                            } else if let Some(cmd) =
                                input.get("command").and_then(|v| v.as_str())
                            {
                                let cmd: String = if cmd.len() > 80 {
                                    format!("{}...", cmd.chars().take(80).collect::<String>())
                                } else {
                                    cmd.to_string()
                                };
                                tool_calls.push(format!("  $ {cmd}"));
                            }
                        }
                        ContentBlock::Text { text } if text.len() > 100 => {
                            let head: String = text.chars().take(100).collect();
                            parts.push(format!("{head}..."));
                        }
                        _ => {}
                    }
                }
            }
        }
    }

    let mut lines: Vec<String> = Vec::new();
    if !parts.is_empty() {
        lines.push("Conversation included:".into());
        for p in parts.iter().take(10) {
            lines.push(format!("  - {p}"));
        }
    }
    if !tool_calls.is_empty() {
        let unique: BTreeSet<&str> = tool_calls.iter().map(|s| s.as_str()).collect();
        let listed: Vec<&str> = unique.into_iter().take(20).collect();
        lines.push(format!("Tools used: {}", listed.join(", ")));
    }
    if !files.is_empty() {
        let listed: Vec<&str> = files.iter().take(20).map(|s| s.as_str()).collect();
        lines.push(format!("Files referenced: {}", listed.join(", ")));
    }
    if lines.is_empty() {
        lines.push(format!("({} messages were exchanged.)", messages.len()));
    }
    lines.join("\n")
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
