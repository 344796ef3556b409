// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! OpenAI-compatible chat-completions driver.
//!
//! Also serves Ollama (`http://localhost:11434/v1`), Groq, and OpenRouter
//! via `base_url`. The streaming API interleaves tool-call fragments across
//! parallel indices, so fragments are buffered per index and each call is
//! flushed as one contiguous start/delta/end group at end of stream; the
//! neutral event contract forbids straddling events from different ids.

use std::collections::BTreeMap;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use tracing::debug;

use crate::error::ProviderError;
use crate::provider::{resolve_system, EventStream, ProviderAdapter};
use crate::types::{ChatMessage, ContentBlock, MessageContent, Role, StreamEvent, ToolDef, Usage};
use crate::{retry, sse};

pub struct OpenAiAdapter {
    model: String,
    api_key: Option<String>,
    base_url: String,
    client: reqwest::Client,
}

impl OpenAiAdapter {
    pub fn new(
        model: impl Into<String>,
        api_key: Option<String>,
        base_url: Option<String>,
    ) -> Self {
        Self {
            model: model.into(),
            api_key,
            base_url: base_url.unwrap_or_else(|| "https://api.openai.com/v1".into()),
            client: reqwest::Client::new(),
        }
    }

    /// Reasoning-oriented model families take `max_completion_tokens`
    /// instead of the legacy `max_tokens` parameter.
    fn uses_completion_token_param(&self) -> bool {
        let m = self.model.to_lowercase();
        ["gpt-5", "o1", "o3", "o4"]
            .iter()
            .any(|p| m.starts_with(p))
    }

    fn build_body(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDef],
        system: &str,
        max_tokens: u32,
    ) -> Value {
        let system_text = resolve_system(messages, system);
        let mut body = json!({
            "model": self.model,
            "messages": build_wire_messages(messages, &system_text),
            "stream": true,
            "stream_options": { "include_usage": true },
        });
        if self.uses_completion_token_param() {
            body["max_completion_tokens"] = json!(max_tokens);
        } else {
            body["max_tokens"] = json!(max_tokens);
        }
        let wire_tools: Vec<Value> = tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.input_schema(),
                    }
                })
            })
            .collect();
        if !wire_tools.is_empty() {
            body["tools"] = json!(wire_tools);
        }
        body
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiAdapter {
    fn model_id(&self) -> &str {
        &self.model
    }

    /// OpenAI wants each tool call answered in a dedicated tool-role message.
    fn format_tool_result(&self, tool_use_id: &str, content: &str, is_error: bool) -> ChatMessage {
        // The API has no first-class error flag on tool messages; the error
        // text travels in the content.
        let _ = is_error;
        ChatMessage {
            role: Role::Tool,
            content: MessageContent::Text(content.into()),
            tool_use_id: Some(tool_use_id.into()),
            tool_name: None,
        }
    }

    async fn stream(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDef],
        system: &str,
        max_tokens: u32,
    ) -> Result<EventStream, ProviderError> {
        let key = self
            .api_key
            .clone()
            .ok_or_else(|| ProviderError::MissingApiKey("OPENAI_API_KEY not set".into()))?;

        let body = self.build_body(messages, tools, system, max_tokens);
        debug!(model = %self.model, messages = messages.len(), "sending openai request");

        let url = format!("{}/chat/completions", self.base_url);
        let client = self.client.clone();
        let resp = retry::with_backoff("openai", || {
            let client = client.clone();
            let url = url.clone();
            let key = key.clone();
            let body = body.clone();
            async move {
                let resp = client
                    .post(&url)
                    .bearer_auth(&key)
                    .json(&body)
                    .send()
                    .await
                    .map_err(ProviderError::from)?;
                let status = resp.status();
                if !status.is_success() {
                    let text = resp.text().await.unwrap_or_default();
                    return Err(ProviderError::from_status(status.as_u16(), text));
                }
                Ok(resp)
            }
        })
        .await?;

        let events = sse::data_lines(resp)
            .scan(ScanState::default(), |state, item| {
                let out: Vec<Result<StreamEvent, ProviderError>> = match item {
                    Ok(data) if data == "[DONE]" => {
                        state.flush().into_iter().map(Ok).collect()
                    }
                    Ok(data) => match serde_json::from_str::<Value>(&data) {
                        Ok(v) => {
                            state.absorb(&v);
                            vec![]
                        }
                        Err(_) => vec![],
                    },
                    Err(e) => vec![Err(e)],
                };
                futures::future::ready(Some(out))
            })
            .flat_map(futures::stream::iter);

        Ok(Box::pin(events))
    }
}

// ─── Stream translation ───────────────────────────────────────────────────────

#[derive(Default)]
struct PendingCall {
    id: String,
    name: String,
    args: String,
}

#[derive(Default)]
struct ScanState {
    pending: BTreeMap<u64, PendingCall>,
    text: Vec<StreamEvent>,
    finish: Option<String>,
    usage: Usage,
    flushed: bool,
}

impl ScanState {
    /// Absorb one chunk. Text is held in arrival order; tool-call fragments
    /// accumulate per index until the flush.
    fn absorb(&mut self, v: &Value) {
        if let Some(usage) = v.get("usage").filter(|u| !u.is_null()) {
            self.usage.input_tokens = usage["prompt_tokens"].as_u64().unwrap_or(0);
            self.usage.output_tokens = usage["completion_tokens"].as_u64().unwrap_or(0);
        }
        let Some(choice) = v["choices"].get(0) else {
            return;
        };
        let delta = &choice["delta"];
        if let Some(text) = delta["content"].as_str() {
            if !text.is_empty() {
                self.text.push(StreamEvent::TextDelta(text.to_string()));
            }
        }
        if let Some(calls) = delta["tool_calls"].as_array() {
            for tc in calls {
                let index = tc["index"].as_u64().unwrap_or(0);
                let entry = self.pending.entry(index).or_default();
                if let Some(id) = tc["id"].as_str() {
                    entry.id = id.to_string();
                }
                if let Some(name) = tc["function"]["name"].as_str() {
                    entry.name.push_str(name);
                }
                if let Some(args) = tc["function"]["arguments"].as_str() {
                    entry.args.push_str(args);
                }
            }
        }
        if let Some(reason) = choice["finish_reason"].as_str() {
            self.finish = Some(normalize_finish_reason(reason));
        }
    }

    fn flush(&mut self) -> Vec<StreamEvent> {
        if self.flushed {
            return vec![];
        }
        self.flushed = true;
        let mut out = std::mem::take(&mut self.text);
        for (_, call) in std::mem::take(&mut self.pending) {
            out.push(StreamEvent::ToolUseStart {
                id: call.id,
                name: call.name,
            });
            out.push(StreamEvent::ToolUseDelta {
                partial_json: call.args,
            });
            out.push(StreamEvent::ToolUseEnd);
        }
        out.push(StreamEvent::MessageEnd {
            stop_reason: self
                .finish
                .take()
                .unwrap_or_else(|| "end_turn".to_string()),
            usage: self.usage.clone(),
        });
        out
    }
}

fn normalize_finish_reason(reason: &str) -> String {
    match reason {
        "tool_calls" => "tool_use".to_string(),
        "stop" => "end_turn".to_string(),
        other => other.to_string(),
    }
}

// ─── Wire conversion ──────────────────────────────────────────────────────────

fn build_wire_messages(messages: &[ChatMessage], system: &str) -> Vec<Value> {
    let mut out: Vec<Value> = Vec::new();
    if !system.is_empty() {
        out.push(json!({ "role": "system", "content": system }));
    }
    for msg in messages {
        match (&msg.role, &msg.content) {
            (Role::System, _) => {}
            (Role::Tool, MessageContent::Text(t)) => {
                out.push(json!({
                    "role": "tool",
                    "tool_call_id": msg.tool_use_id.clone().unwrap_or_default(),
                    "content": t,
                }));
            }
            (Role::User, MessageContent::Text(t)) => {
                out.push(json!({ "role": "user", "content": t }));
            }
            (Role::User, MessageContent::Blocks(blocks)) | (Role::Tool, MessageContent::Blocks(blocks)) => {
                // Histories recorded by another provider carry tool results
                // as user-role blocks; translate each into a tool message.
                for block in blocks {
                    match block {
                        ContentBlock::ToolResult {
                            tool_use_id,
                            content,
                            ..
                        } => out.push(json!({
                            "role": "tool",
                            "tool_call_id": tool_use_id,
                            "content": content,
                        })),
                        ContentBlock::Text { text } => {
                            out.push(json!({ "role": "user", "content": text }))
                        }
                        ContentBlock::ToolUse { .. } => {}
                    }
                }
            }
            (Role::Assistant, MessageContent::Text(t)) => {
                out.push(json!({ "role": "assistant", "content": t }));
            }
            (Role::Assistant, MessageContent::Blocks(blocks)) => {
                let mut text = String::new();
                let mut tool_calls: Vec<Value> = Vec::new();
                for block in blocks {
                    match block {
                        ContentBlock::Text { text: t } => text.push_str(t),
                        ContentBlock::ToolUse { id, name, input } => tool_calls.push(json!({
                            "id": id,
                            "type": "function",
                            "function": {
                                "name": name,
                                "arguments": input.to_string(),
                            }
                        })),
                        ContentBlock::ToolResult { .. } => {}
                    }
                }
                let mut m = json!({ "role": "assistant" });
                m["content"] = if text.is_empty() {
                    Value::Null
                } else {
                    json!(text)
                };
                if !tool_calls.is_empty() {
                    m["tool_calls"] = json!(tool_calls);
                }
                out.push(m);
            }
        }
    }
    out
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finish_reason_normalization() {
        assert_eq!(normalize_finish_reason("tool_calls"), "tool_use");
        assert_eq!(normalize_finish_reason("stop"), "end_turn");
        assert_eq!(normalize_finish_reason("length"), "length");
    }

    #[test]
    fn reasoning_models_use_completion_token_param() {
        for model in ["o1-mini", "o3-mini", "o4-mini", "gpt-5"] {
            let p = OpenAiAdapter::new(model, None, None);
            assert!(p.uses_completion_token_param(), "{model}");
        }
        let p = OpenAiAdapter::new("gpt-4o", None, None);
        assert!(!p.uses_completion_token_param());
        let body = p.build_body(&[], &[], "", 2048);
        assert_eq!(body["max_tokens"], 2048);
        assert!(body.get("max_completion_tokens").is_none());
    }

    #[test]
    fn system_prompt_becomes_first_message() {
        let wire = build_wire_messages(&[ChatMessage::user("hi")], "be good");
        assert_eq!(wire[0]["role"], "system");
        assert_eq!(wire[0]["content"], "be good");
        assert_eq!(wire[1]["role"], "user");
    }

    #[test]
    fn tool_result_becomes_tool_role_message() {
        let p = OpenAiAdapter::new("gpt-4o", None, None);
        let msg = p.format_tool_result("call_1", "ok", false);
        assert_eq!(msg.role, Role::Tool);
        let wire = build_wire_messages(&[msg], "");
        assert_eq!(wire[0]["role"], "tool");
        assert_eq!(wire[0]["tool_call_id"], "call_1");
        assert_eq!(wire[0]["content"], "ok");
    }

    #[test]
    fn assistant_blocks_split_into_content_and_tool_calls() {
        let msg = ChatMessage::assistant_blocks(vec![
            ContentBlock::Text {
                text: "running ls".into(),
            },
            ContentBlock::ToolUse {
                id: "call_7".into(),
                name: "Bash".into(),
                input: json!({"command": "ls"}),
            },
        ]);
        let wire = build_wire_messages(&[msg], "");
        assert_eq!(wire[0]["content"], "running ls");
        assert_eq!(wire[0]["tool_calls"][0]["id"], "call_7");
        assert_eq!(wire[0]["tool_calls"][0]["function"]["name"], "Bash");
        // Arguments travel as a JSON-encoded string.
        assert!(wire[0]["tool_calls"][0]["function"]["arguments"]
            .as_str()
            .unwrap()
            .contains("\"command\""));
    }

    #[test]
    fn interleaved_tool_calls_flush_grouped_per_index() {
        let mut st = ScanState::default();
        // Two tool calls interleaved across indices, as OpenAI streams them.
        st.absorb(&json!({ "choices": [{ "delta": { "tool_calls": [
            { "index": 0, "id": "call_a", "function": { "name": "Read", "arguments": "" } }
        ]}}]}));
        st.absorb(&json!({ "choices": [{ "delta": { "tool_calls": [
            { "index": 1, "id": "call_b", "function": { "name": "Grep", "arguments": "{\"pat" } }
        ]}}]}));
        st.absorb(&json!({ "choices": [{ "delta": { "tool_calls": [
            { "index": 0, "function": { "arguments": "{\"file_path\":\"x\"}" } }
        ]}}]}));
        st.absorb(&json!({ "choices": [{ "delta": { "tool_calls": [
            { "index": 1, "function": { "arguments": "tern\":\"y\"}" } }
        ]}}]}));
        st.absorb(&json!({ "choices": [{ "delta": {}, "finish_reason": "tool_calls" }]}));

        let events = st.flush();
        // Expect: start/delta/end for call_a, then start/delta/end for call_b,
        // then message end, with no straddling.
        assert_eq!(events.len(), 7);
        assert_eq!(
            events[0],
            StreamEvent::ToolUseStart {
                id: "call_a".into(),
                name: "Read".into()
            }
        );
        assert_eq!(
            events[1],
            StreamEvent::ToolUseDelta {
                partial_json: "{\"file_path\":\"x\"}".into()
            }
        );
        assert_eq!(events[2], StreamEvent::ToolUseEnd);
        assert_eq!(
            events[3],
            StreamEvent::ToolUseStart {
                id: "call_b".into(),
                name: "Grep".into()
            }
        );
        assert_eq!(
            events[4],
            StreamEvent::ToolUseDelta {
                partial_json: "{\"pattern\":\"y\"}".into()
            }
        );
        assert_eq!(events[5], StreamEvent::ToolUseEnd);
        assert!(matches!(
            &events[6],
            StreamEvent::MessageEnd { stop_reason, .. } if stop_reason == "tool_use"
        ));
    }

    #[test]
    fn usage_chunk_with_empty_choices_is_captured() {
        let mut st = ScanState::default();
        st.absorb(&json!({ "choices": [{ "delta": { "content": "hi" }, "finish_reason": "stop" }]}));
        st.absorb(&json!({ "choices": [], "usage": { "prompt_tokens": 12, "completion_tokens": 3 }}));
        let events = st.flush();
        match events.last().unwrap() {
            StreamEvent::MessageEnd { stop_reason, usage } => {
                assert_eq!(stop_reason, "end_turn");
                assert_eq!(usage.input_tokens, 12);
                assert_eq!(usage.output_tokens, 3);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn flush_is_idempotent() {
        let mut st = ScanState::default();
        st.absorb(&json!({ "choices": [{ "delta": { "content": "x" }, "finish_reason": "stop" }]}));
        assert!(!st.flush().is_empty());
        assert!(st.flush().is_empty());
    }
}
