// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ─── Message types ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A single content block inside a block-list message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default, skip_serializing_if = "is_false")]
        is_error: bool,
        /// Providers whose tool-result wire format requires the function
        /// name (Gemini) carry it here; others leave it out.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool_name: Option<String>,
    },
}

fn is_false(b: &bool) -> bool {
    !*b
}

/// Message content: a plain string or an ordered list of blocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

/// A single message in the conversation history (provider-neutral form).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: MessageContent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_use_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: MessageContent::Text(text.into()),
            tool_use_id: None,
            tool_name: None,
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Text(text.into()),
            tool_use_id: None,
            tool_name: None,
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::Text(text.into()),
            tool_use_id: None,
            tool_name: None,
        }
    }

    pub fn assistant_blocks(blocks: Vec<ContentBlock>) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::Blocks(blocks),
            tool_use_id: None,
            tool_name: None,
        }
    }

    /// Return the plain text of this message when the content is a string.
    pub fn as_text(&self) -> Option<&str> {
        match &self.content {
            MessageContent::Text(t) => Some(t),
            MessageContent::Blocks(_) => None,
        }
    }

    /// True when any block in this message is a tool result.
    pub fn has_tool_result(&self) -> bool {
        match &self.content {
            MessageContent::Text(_) => false,
            MessageContent::Blocks(blocks) => blocks
                .iter()
                .any(|b| matches!(b, ContentBlock::ToolResult { .. })),
        }
    }

    /// All `tool_use` ids carried by this message.
    pub fn tool_use_ids(&self) -> Vec<&str> {
        match &self.content {
            MessageContent::Text(_) => vec![],
            MessageContent::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::ToolUse { id, .. } => Some(id.as_str()),
                    _ => None,
                })
                .collect(),
        }
    }
}

// ─── Stream events ────────────────────────────────────────────────────────────

/// Token usage reported by a provider at end of message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    #[serde(default)]
    pub cache_read_tokens: u64,
    #[serde(default)]
    pub cache_write_tokens: u64,
}

/// Provider-neutral streaming event.
///
/// Drivers must close every `ToolUseStart` with exactly one `ToolUseEnd`,
/// never interleave delta events belonging to different tool-call ids, and
/// emit exactly one `MessageEnd` per stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    TextDelta(String),
    ToolUseStart { id: String, name: String },
    ToolUseDelta { partial_json: String },
    ToolUseEnd,
    MessageEnd { stop_reason: String, usage: Usage },
}

// ─── Tool definitions ─────────────────────────────────────────────────────────

/// A single tool parameter, described in JSON-Schema terms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolParam {
    pub name: String,
    /// JSON-Schema type tag: "string", "integer", "number", "boolean",
    /// "array", or "object".
    pub json_type: String,
    pub description: String,
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    /// Item schema for array parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Value>,
}

impl ToolParam {
    pub fn required(name: &str, json_type: &str, description: &str) -> Self {
        Self {
            name: name.into(),
            json_type: json_type.into(),
            description: description.into(),
            required: true,
            enum_values: None,
            default: None,
            items: None,
        }
    }

    pub fn optional(name: &str, json_type: &str, description: &str) -> Self {
        Self {
            required: false,
            ..Self::required(name, json_type, description)
        }
    }

    pub fn with_enum(mut self, values: &[&str]) -> Self {
        self.enum_values = Some(values.iter().map(|s| s.to_string()).collect());
        self
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    fn to_schema(&self) -> Value {
        let mut prop = serde_json::json!({
            "type": self.json_type,
            "description": self.description,
        });
        if let Some(values) = &self.enum_values {
            prop["enum"] = serde_json::json!(values);
        }
        if let Some(default) = &self.default {
            prop["default"] = default.clone();
        }
        // Array types require an items schema (OpenAI enforces this).
        if self.json_type == "array" {
            prop["items"] = self
                .items
                .clone()
                .unwrap_or_else(|| serde_json::json!({ "type": "string" }));
        }
        prop
    }
}

/// Definition of a tool exposed to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDef {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub parameters: Vec<ToolParam>,
}

impl ToolDef {
    pub fn new(name: &str, description: &str, parameters: Vec<ToolParam>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }

    /// Render the parameter list as a JSON-Schema `object`.
    pub fn input_schema(&self) -> Value {
        let mut properties = serde_json::Map::new();
        let mut required: Vec<Value> = Vec::new();
        for param in &self.parameters {
            properties.insert(param.name.clone(), param.to_schema());
            if param.required {
                required.push(Value::String(param.name.clone()));
            }
        }
        let mut schema = serde_json::json!({
            "type": "object",
            "properties": Value::Object(properties),
        });
        if !required.is_empty() {
            schema["required"] = Value::Array(required);
        }
        schema
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
