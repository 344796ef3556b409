// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde_json::Value;

use crate::catalog;
use crate::error::ProviderError;
use crate::types::{ChatMessage, ContentBlock, MessageContent, Role, StreamEvent, ToolDef};

pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, ProviderError>> + Send>>;

/// The contract every provider driver implements.
///
/// `stream` covers the connection phase: by the time it returns `Ok`, the
/// request has been accepted and events will follow. Errors after that point
/// travel inside the stream and are never retried.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Model identifier as reported to users and the catalog.
    fn model_id(&self) -> &str;

    /// Rough token count estimate, roughly 4 characters per token.
    ///
    /// Intentionally imprecise; used for context budgeting, never billing.
    fn estimate_tokens(&self, text: &str) -> usize {
        text.len() / 4
    }

    /// Catalog entry for the active model, when known.
    fn model_info(&self) -> Option<&'static catalog::ModelInfo> {
        catalog::lookup(self.model_id())
    }

    /// Open a streaming completion request.
    async fn stream(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDef],
        system: &str,
        max_tokens: u32,
    ) -> Result<EventStream, ProviderError>;

    /// Build the content block recording a tool call in the assistant message.
    fn format_tool_use(&self, id: &str, name: &str, args: &Value) -> ContentBlock {
        ContentBlock::ToolUse {
            id: id.into(),
            name: name.into(),
            input: args.clone(),
        }
    }

    /// Encode a tool result for the next request.
    ///
    /// The default mirrors the Anthropic convention: a user-role message
    /// carrying one `tool_result` block. Providers that want a dedicated
    /// tool-role message override this.
    fn format_tool_result(&self, tool_use_id: &str, content: &str, is_error: bool) -> ChatMessage {
        ChatMessage {
            role: Role::User,
            content: MessageContent::Blocks(vec![ContentBlock::ToolResult {
                tool_use_id: tool_use_id.into(),
                content: content.into(),
                is_error,
                tool_name: None,
            }]),
            tool_use_id: Some(tool_use_id.into()),
            tool_name: None,
        }
    }
}

/// Resolve the effective system prompt: the explicit parameter, overridden
/// by the last system-role message found in the history.
pub(crate) fn resolve_system(messages: &[ChatMessage], system: &str) -> String {
    let mut resolved = system.to_string();
    for msg in messages {
        if msg.role == Role::System {
            if let Some(text) = msg.as_text() {
                resolved = text.to_string();
            }
        }
    }
    resolved
}
