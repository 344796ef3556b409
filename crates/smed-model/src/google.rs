// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Google Gemini driver (`streamGenerateContent` over SSE).
//!
//! Gemini delivers each function call whole (never fragmented) and supplies
//! no call id, so ids are synthesised. The `functionResponse` wire format
//! needs the function *name* back, which is why this driver remembers the
//! id→name mapping and embeds `tool_name` in its tool-result blocks.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use tracing::debug;

use crate::error::ProviderError;
use crate::provider::{resolve_system, EventStream, ProviderAdapter};
use crate::types::{ChatMessage, ContentBlock, MessageContent, Role, StreamEvent, ToolDef, Usage};
use crate::{retry, sse};

pub struct GoogleAdapter {
    model: String,
    api_key: Option<String>,
    base_url: String,
    client: reqwest::Client,
    call_counter: AtomicU64,
    /// tool_use_id → function name, for `functionResponse` encoding.
    /// Shared with the scan state so names recorded while streaming are
    /// visible to `format_tool_result` on the next turn.
    tool_names: Arc<Mutex<HashMap<String, String>>>,
}

impl GoogleAdapter {
    pub fn new(
        model: impl Into<String>,
        api_key: Option<String>,
        base_url: Option<String>,
    ) -> Self {
        Self {
            model: model.into(),
            api_key,
            base_url: base_url
                .unwrap_or_else(|| "https://generativelanguage.googleapis.com".into()),
            client: reqwest::Client::new(),
            call_counter: AtomicU64::new(0),
            tool_names: Arc::new(Mutex::new(HashMap::new())),
        }
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
            "contents": build_wire_contents(messages),
            "generationConfig": { "maxOutputTokens": max_tokens },
        });
        if !system_text.is_empty() {
            body["systemInstruction"] = json!({ "parts": [{ "text": system_text }] });
        }
        if !tools.is_empty() {
            let declarations: Vec<Value> = tools
                .iter()
                .map(|t| {
                    json!({
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.input_schema(),
                    })
                })
                .collect();
            body["tools"] = json!([{ "functionDeclarations": declarations }]);
        }
        body
    }
}

#[async_trait]
impl ProviderAdapter for GoogleAdapter {
    fn model_id(&self) -> &str {
        &self.model
    }

    fn format_tool_result(&self, tool_use_id: &str, content: &str, is_error: bool) -> ChatMessage {
        let name = self
            .tool_names
            .lock()
            .unwrap()
            .get(tool_use_id)
            .cloned()
            .unwrap_or_else(|| "unknown".to_string());
        ChatMessage {
            role: Role::User,
            content: MessageContent::Blocks(vec![ContentBlock::ToolResult {
                tool_use_id: tool_use_id.into(),
                content: content.into(),
                is_error,
                tool_name: Some(name),
            }]),
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
            .ok_or_else(|| ProviderError::MissingApiKey("GOOGLE_API_KEY not set".into()))?;

        let body = self.build_body(messages, tools, system, max_tokens);
        debug!(model = %self.model, messages = messages.len(), "sending gemini request");

        let url = format!(
            "{}/v1beta/models/{}:streamGenerateContent?alt=sse",
            self.base_url, self.model
        );
        let client = self.client.clone();
        let resp = retry::with_backoff("google", || {
            let client = client.clone();
            let url = url.clone();
            let key = key.clone();
            let body = body.clone();
            async move {
                let resp = client
                    .post(&url)
                    .header("x-goog-api-key", &key)
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

        // Synthesised ids must be unique across turns within this adapter.
        let base = self.call_counter.fetch_add(1_000, Ordering::Relaxed);
        let events = sse::data_lines(resp)
            .scan(
                ScanState::new(base, Arc::clone(&self.tool_names)),
                |state, item| {
                    let out: Vec<Result<StreamEvent, ProviderError>> = match item {
                        Ok(data) => match serde_json::from_str::<Value>(&data) {
                            Ok(v) => state.absorb(&v).into_iter().map(Ok).collect(),
                            Err(_) => vec![],
                        },
                        Err(e) => vec![Err(e)],
                    };
                    futures::future::ready(Some(out))
                },
            )
            .flat_map(futures::stream::iter);

        Ok(Box::pin(events))
    }
}

type SharedNames = Arc<Mutex<HashMap<String, String>>>;

// ─── Stream translation ───────────────────────────────────────────────────────

struct ScanState {
    next_id: u64,
    names: SharedNames,
    ended: bool,
}

impl ScanState {
    fn new(base: u64, names: SharedNames) -> Self {
        Self {
            next_id: base,
            names,
            ended: false,
        }
    }

    fn absorb(&mut self, v: &Value) -> Vec<StreamEvent> {
        let mut out = Vec::new();
        let Some(candidate) = v["candidates"].get(0) else {
            return out;
        };
        let parts = candidate["content"]["parts"].as_array();
        let mut saw_function_call = false;

        if let Some(parts) = parts {
            for part in parts {
                if let Some(text) = part["text"].as_str() {
                    if !text.is_empty() {
                        out.push(StreamEvent::TextDelta(text.to_string()));
                    }
                } else if let Some(fc) = part.get("functionCall") {
                    saw_function_call = true;
                    let name = fc["name"].as_str().unwrap_or("").to_string();
                    self.next_id += 1;
                    let id = format!("gemini_{}_{}", name, self.next_id);
                    self.names.lock().unwrap().insert(id.clone(), name.clone());
                    let args = fc.get("args").cloned().unwrap_or_else(|| json!({}));
                    out.push(StreamEvent::ToolUseStart {
                        id,
                        name,
                    });
                    out.push(StreamEvent::ToolUseDelta {
                        partial_json: args.to_string(),
                    });
                    out.push(StreamEvent::ToolUseEnd);
                }
            }
        }

        if candidate["finishReason"].as_str().is_some() && !self.ended {
            self.ended = true;
            let mut usage = Usage::default();
            if let Some(meta) = v.get("usageMetadata") {
                usage.input_tokens = meta["promptTokenCount"].as_u64().unwrap_or(0);
                usage.output_tokens = meta["candidatesTokenCount"].as_u64().unwrap_or(0);
            }
            let stop_reason = if saw_function_call {
                "tool_use"
            } else {
                "end_turn"
            };
            out.push(StreamEvent::MessageEnd {
                stop_reason: stop_reason.to_string(),
                usage,
            });
        }
        out
    }
}

// ─── Wire conversion ──────────────────────────────────────────────────────────

fn build_wire_contents(messages: &[ChatMessage]) -> Vec<Value> {
    let mut out: Vec<Value> = Vec::new();
    for msg in messages {
        match (&msg.role, &msg.content) {
            (Role::System, _) => {}
            (Role::Assistant, MessageContent::Text(t)) => {
                out.push(json!({ "role": "model", "parts": [{ "text": t }] }));
            }
            (Role::Assistant, MessageContent::Blocks(blocks)) => {
                let parts: Vec<Value> = blocks
                    .iter()
                    .filter_map(|b| match b {
                        ContentBlock::Text { text } => Some(json!({ "text": text })),
                        ContentBlock::ToolUse { name, input, .. } => Some(json!({
                            "functionCall": { "name": name, "args": input }
                        })),
                        ContentBlock::ToolResult { .. } => None,
                    })
                    .collect();
                if !parts.is_empty() {
                    out.push(json!({ "role": "model", "parts": parts }));
                }
            }
            (_, MessageContent::Text(t)) => {
                out.push(json!({ "role": "user", "parts": [{ "text": t }] }));
            }
            (_, MessageContent::Blocks(blocks)) => {
                let mut response_parts: Vec<Value> = Vec::new();
                let mut plain_parts: Vec<Value> = Vec::new();
                for block in blocks {
                    match block {
                        ContentBlock::ToolResult {
                            content, tool_name, ..
                        } => response_parts.push(json!({
                            "functionResponse": {
                                "name": tool_name.clone().unwrap_or_else(|| "unknown".into()),
                                "response": { "result": content },
                            }
                        })),
                        ContentBlock::Text { text } => {
                            plain_parts.push(json!({ "text": text }))
                        }
                        ContentBlock::ToolUse { .. } => {}
                    }
                }
                if !response_parts.is_empty() {
                    out.push(json!({ "role": "user", "parts": response_parts }));
                }
                if !plain_parts.is_empty() {
                    out.push(json!({ "role": "user", "parts": plain_parts }));
                }
            }
        }
    }
    out
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> ScanState {
        ScanState::new(0, Arc::new(Mutex::new(HashMap::new())))
    }

    #[test]
    fn text_part_becomes_delta() {
        let mut st = state();
        let v = json!({ "candidates": [{ "content": { "parts": [{ "text": "hello" }] } }] });
        assert_eq!(
            st.absorb(&v),
            vec![StreamEvent::TextDelta("hello".into())]
        );
    }

    #[test]
    fn function_call_emits_complete_tool_group() {
        let mut st = state();
        let v = json!({ "candidates": [{ "content": { "parts": [
            { "functionCall": { "name": "Read", "args": { "file_path": "a.txt" } } }
        ] } }] });
        let events = st.absorb(&v);
        assert_eq!(events.len(), 3);
        assert!(matches!(
            &events[0],
            StreamEvent::ToolUseStart { id, name } if name == "Read" && id.starts_with("gemini_Read_")
        ));
        assert!(matches!(
            &events[1],
            StreamEvent::ToolUseDelta { partial_json } if partial_json.contains("file_path")
        ));
        assert_eq!(events[2], StreamEvent::ToolUseEnd);
    }

    #[test]
    fn finish_with_function_call_is_tool_use() {
        let mut st = state();
        let v = json!({
            "candidates": [{
                "content": { "parts": [
                    { "functionCall": { "name": "Bash", "args": { "command": "ls" } } }
                ]},
                "finishReason": "STOP"
            }],
            "usageMetadata": { "promptTokenCount": 9, "candidatesTokenCount": 4 }
        });
        let events = st.absorb(&v);
        match events.last().unwrap() {
            StreamEvent::MessageEnd { stop_reason, usage } => {
                assert_eq!(stop_reason, "tool_use");
                assert_eq!(usage.input_tokens, 9);
                assert_eq!(usage.output_tokens, 4);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn finish_without_function_call_is_end_turn() {
        let mut st = state();
        let v = json!({
            "candidates": [{
                "content": { "parts": [{ "text": "done" }] },
                "finishReason": "STOP"
            }]
        });
        let events = st.absorb(&v);
        assert!(matches!(
            events.last().unwrap(),
            StreamEvent::MessageEnd { stop_reason, .. } if stop_reason == "end_turn"
        ));
    }

    #[test]
    fn assistant_tool_use_round_trips_to_function_call() {
        let msg = ChatMessage::assistant_blocks(vec![ContentBlock::ToolUse {
            id: "gemini_Read_1".into(),
            name: "Read".into(),
            input: json!({ "file_path": "x" }),
        }]);
        let wire = build_wire_contents(&[msg]);
        assert_eq!(wire[0]["role"], "model");
        assert_eq!(wire[0]["parts"][0]["functionCall"]["name"], "Read");
    }

    #[test]
    fn tool_result_becomes_function_response_with_name() {
        let p = GoogleAdapter::new("gemini-2.0-flash", None, None);
        p.tool_names
            .lock()
            .unwrap()
            .insert("gemini_Read_1".into(), "Read".into());
        let msg = p.format_tool_result("gemini_Read_1", "file text", false);
        let wire = build_wire_contents(&[msg]);
        let part = &wire[0]["parts"][0]["functionResponse"];
        assert_eq!(part["name"], "Read");
        assert_eq!(part["response"]["result"], "file text");
    }

    #[test]
    fn unknown_tool_use_id_falls_back_to_unknown_name() {
        let p = GoogleAdapter::new("gemini-2.0-flash", None, None);
        let msg = p.format_tool_result("nope", "x", false);
        let wire = build_wire_contents(&[msg]);
        assert_eq!(wire[0]["parts"][0]["functionResponse"]["name"], "unknown");
    }

    #[test]
    fn system_messages_are_not_in_contents() {
        let wire = build_wire_contents(&[
            ChatMessage::system("sys"),
            ChatMessage::user("hi"),
        ]);
        assert_eq!(wire.len(), 1);
        assert_eq!(wire[0]["role"], "user");
    }
}
