// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream;

use crate::error::ProviderError;
use crate::provider::{EventStream, ProviderAdapter};
use crate::types::{ChatMessage, Role, StreamEvent, ToolDef, Usage};

/// Deterministic mock provider for tests. Echoes the last user message back
/// as the assistant response.
#[derive(Default)]
pub struct MockProvider;

#[async_trait]
impl ProviderAdapter for MockProvider {
    fn model_id(&self) -> &str {
        "mock-model"
    }

    async fn stream(
        &self,
        messages: &[ChatMessage],
        _tools: &[ToolDef],
        _system: &str,
        _max_tokens: u32,
    ) -> Result<EventStream, ProviderError> {
        let reply = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .and_then(|m| m.as_text())
            .unwrap_or("[no input]")
            .to_string();

        let events: Vec<Result<StreamEvent, ProviderError>> = vec![
            Ok(StreamEvent::TextDelta(format!("MOCK: {reply}"))),
            Ok(StreamEvent::MessageEnd {
                stop_reason: "end_turn".into(),
                usage: Usage {
                    input_tokens: 10,
                    output_tokens: 10,
                    ..Default::default()
                },
            }),
        ];
        Ok(Box::pin(stream::iter(events)))
    }
}

/// A pre-scripted provider. Each call to `stream` pops the next event script
/// from the front of the queue, letting tests specify exact event sequences
/// (including tool calls) without network access.
pub struct ScriptedProvider {
    scripts: Mutex<Vec<Vec<StreamEvent>>>,
    /// Message list of the most recent request, for assertions.
    pub last_messages: Arc<Mutex<Vec<ChatMessage>>>,
}

impl ScriptedProvider {
    /// The outer `Vec` is the ordered list of calls; the inner `Vec` is the
    /// event sequence emitted for that call.
    pub fn new(scripts: Vec<Vec<StreamEvent>>) -> Self {
        Self {
            scripts: Mutex::new(scripts),
            last_messages: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Convenience: a single text reply.
    pub fn always_text(reply: impl Into<String>) -> Self {
        Self::new(vec![Self::text_script(reply)])
    }

    /// A one-turn script delivering `reply` in two partial chunks.
    pub fn text_script(reply: impl Into<String>) -> Vec<StreamEvent> {
        let reply = reply.into();
        let mut mid = reply.len() / 2;
        while mid > 0 && !reply.is_char_boundary(mid) {
            mid -= 1;
        }
        let (a, b) = reply.split_at(mid);
        let mut events = Vec::new();
        if !a.is_empty() {
            events.push(StreamEvent::TextDelta(a.to_string()));
        }
        if !b.is_empty() {
            events.push(StreamEvent::TextDelta(b.to_string()));
        }
        events.push(StreamEvent::MessageEnd {
            stop_reason: "end_turn".into(),
            usage: Usage {
                input_tokens: 5,
                output_tokens: 5,
                ..Default::default()
            },
        });
        events
    }

    /// A one-turn script requesting a single tool call.
    pub fn tool_call_script(
        id: impl Into<String>,
        name: impl Into<String>,
        args_json: impl Into<String>,
    ) -> Vec<StreamEvent> {
        vec![
            StreamEvent::ToolUseStart {
                id: id.into(),
                name: name.into(),
            },
            StreamEvent::ToolUseDelta {
                partial_json: args_json.into(),
            },
            StreamEvent::ToolUseEnd,
            StreamEvent::MessageEnd {
                stop_reason: "tool_use".into(),
                usage: Usage {
                    input_tokens: 8,
                    output_tokens: 8,
                    ..Default::default()
                },
            },
        ]
    }

    /// Convenience: round 1 requests a tool, round 2 answers in text.
    pub fn tool_then_text(
        id: impl Into<String>,
        name: impl Into<String>,
        args_json: impl Into<String>,
        final_text: impl Into<String>,
    ) -> Self {
        Self::new(vec![
            Self::tool_call_script(id, name, args_json),
            Self::text_script(final_text),
        ])
    }
}

#[async_trait]
impl ProviderAdapter for ScriptedProvider {
    fn model_id(&self) -> &str {
        "scripted-mock-model"
    }

    async fn stream(
        &self,
        messages: &[ChatMessage],
        _tools: &[ToolDef],
        _system: &str,
        _max_tokens: u32,
    ) -> Result<EventStream, ProviderError> {
        *self.last_messages.lock().unwrap() = messages.to_vec();
        let events = {
            let mut scripts = self.scripts.lock().unwrap();
            if scripts.is_empty() {
                // Default fallback when all scripts are consumed.
                vec![
                    StreamEvent::TextDelta("[no more scripts]".into()),
                    StreamEvent::MessageEnd {
                        stop_reason: "end_turn".into(),
                        usage: Usage::default(),
                    },
                ]
            } else {
                scripts.remove(0)
            }
        };
        let wrapped: Vec<Result<StreamEvent, ProviderError>> =
            events.into_iter().map(Ok).collect();
        Ok(Box::pin(stream::iter(wrapped)))
    }
}

/// A provider that always fails at the connection phase. For fallback tests.
pub struct FailingProvider {
    pub error_kind: fn(String) -> ProviderError,
}

#[async_trait]
impl ProviderAdapter for FailingProvider {
    fn model_id(&self) -> &str {
        "failing-model"
    }

    async fn stream(
        &self,
        _messages: &[ChatMessage],
        _tools: &[ToolDef],
        _system: &str,
        _max_tokens: u32,
    ) -> Result<EventStream, ProviderError> {
        Err((self.error_kind)("scripted failure".into()))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
