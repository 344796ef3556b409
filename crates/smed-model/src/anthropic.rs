// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use tracing::debug;

use crate::error::ProviderError;
use crate::provider::{resolve_system, EventStream, ProviderAdapter};
use crate::types::{ChatMessage, ContentBlock, MessageContent, Role, StreamEvent, ToolDef, Usage};
use crate::{retry, sse};

pub struct AnthropicAdapter {
    model: String,
    api_key: Option<String>,
    base_url: String,
    client: reqwest::Client,
}

impl AnthropicAdapter {
    pub fn new(
        model: impl Into<String>,
        api_key: Option<String>,
        base_url: Option<String>,
    ) -> Self {
        Self {
            model: model.into(),
            api_key,
            base_url: base_url.unwrap_or_else(|| "https://api.anthropic.com".into()),
            client: reqwest::Client::new(),
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
        let wire_tools: Vec<Value> = tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "description": t.description,
                    "input_schema": t.input_schema(),
                })
            })
            .collect();

        let mut body = json!({
            "model": self.model,
            "messages": build_wire_messages(messages),
            "max_tokens": max_tokens,
            "stream": true,
        });
        if !system_text.is_empty() {
            body["system"] = json!(system_text);
        }
        if !wire_tools.is_empty() {
            body["tools"] = json!(wire_tools);
        }
        body
    }
}

#[async_trait]
impl ProviderAdapter for AnthropicAdapter {
    fn model_id(&self) -> &str {
        &self.model
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
            .ok_or_else(|| ProviderError::MissingApiKey("ANTHROPIC_API_KEY not set".into()))?;

        let body = self.build_body(messages, tools, system, max_tokens);
        debug!(model = %self.model, messages = messages.len(), "sending anthropic request");

        let url = format!("{}/v1/messages", self.base_url);
        let client = self.client.clone();
        let resp = retry::with_backoff("anthropic", || {
            let client = client.clone();
            let url = url.clone();
            let key = key.clone();
            let body = body.clone();
            async move {
                let resp = client
                    .post(&url)
                    .header("x-api-key", &key)
                    .header("anthropic-version", "2023-06-01")
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
                    Ok(data) => match serde_json::from_str::<Value>(&data) {
                        Ok(v) => parse_event(state, &v).into_iter().map(Ok).collect(),
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
struct ScanState {
    /// Whether the content block at each index is a tool_use block, so that
    /// `content_block_stop` knows when to emit `ToolUseEnd`.
    block_is_tool: HashMap<u64, bool>,
    stop_reason: Option<String>,
    usage: Usage,
}

fn parse_event(state: &mut ScanState, v: &Value) -> Vec<StreamEvent> {
    match v["type"].as_str().unwrap_or("") {
        "message_start" => {
            if let Some(usage) = v["message"].get("usage") {
                state.usage.input_tokens = usage["input_tokens"].as_u64().unwrap_or(0);
                state.usage.cache_read_tokens =
                    usage["cache_read_input_tokens"].as_u64().unwrap_or(0);
                state.usage.cache_write_tokens =
                    usage["cache_creation_input_tokens"].as_u64().unwrap_or(0);
            }
            vec![]
        }
        "content_block_start" => {
            let index = v["index"].as_u64().unwrap_or(0);
            let block = &v["content_block"];
            if block["type"].as_str() == Some("tool_use") {
                state.block_is_tool.insert(index, true);
                vec![StreamEvent::ToolUseStart {
                    id: block["id"].as_str().unwrap_or("").to_string(),
                    name: block["name"].as_str().unwrap_or("").to_string(),
                }]
            } else {
                state.block_is_tool.insert(index, false);
                vec![]
            }
        }
        "content_block_delta" => {
            let delta = &v["delta"];
            match delta["type"].as_str().unwrap_or("") {
                "text_delta" => {
                    let text = delta["text"].as_str().unwrap_or("");
                    if text.is_empty() {
                        vec![]
                    } else {
                        vec![StreamEvent::TextDelta(text.to_string())]
                    }
                }
                "input_json_delta" => vec![StreamEvent::ToolUseDelta {
                    partial_json: delta["partial_json"].as_str().unwrap_or("").to_string(),
                }],
                _ => vec![],
            }
        }
        "content_block_stop" => {
            let index = v["index"].as_u64().unwrap_or(0);
            if state.block_is_tool.remove(&index).unwrap_or(false) {
                vec![StreamEvent::ToolUseEnd]
            } else {
                vec![]
            }
        }
        "message_delta" => {
            if let Some(reason) = v["delta"]["stop_reason"].as_str() {
                state.stop_reason = Some(reason.to_string());
            }
            if let Some(usage) = v.get("usage") {
                state.usage.output_tokens = usage["output_tokens"].as_u64().unwrap_or(0);
            }
            vec![]
        }
        "message_stop" => vec![StreamEvent::MessageEnd {
            stop_reason: state
                .stop_reason
                .take()
                .unwrap_or_else(|| "end_turn".to_string()),
            usage: state.usage.clone(),
        }],
        _ => vec![],
    }
}

// ─── Wire conversion ──────────────────────────────────────────────────────────

/// Convert the neutral history into Anthropic's messages array.
///
/// System messages are stripped (they travel in the top-level `system`
/// field). Tool results ride in user-role messages, which is what the API
/// expects.
fn build_wire_messages(messages: &[ChatMessage]) -> Vec<Value> {
    let mut out: Vec<Value> = Vec::new();
    for msg in messages {
        if msg.role == Role::System {
            continue;
        }
        let role = match msg.role {
            Role::Assistant => "assistant",
            _ => "user",
        };
        match &msg.content {
            MessageContent::Text(t) => {
                out.push(json!({ "role": role, "content": t }));
            }
            MessageContent::Blocks(blocks) => {
                let content: Vec<Value> = blocks
                    .iter()
                    .map(|b| match b {
                        ContentBlock::Text { text } => json!({ "type": "text", "text": text }),
                        ContentBlock::ToolUse { id, name, input } => json!({
                            "type": "tool_use",
                            "id": id,
                            "name": name,
                            "input": input,
                        }),
                        ContentBlock::ToolResult {
                            tool_use_id,
                            content,
                            is_error,
                            ..
                        } => {
                            let mut block = json!({
                                "type": "tool_result",
                                "tool_use_id": tool_use_id,
                                "content": content,
                            });
                            if *is_error {
                                block["is_error"] = json!(true);
                            }
                            block
                        }
                    })
                    .collect();
                out.push(json!({ "role": role, "content": content }));
            }
        }
    }
    out
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
