// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

use crate::error::ProviderError;
use crate::provider::{EventStream, ProviderAdapter};
use crate::types::{ChatMessage, ContentBlock, ToolDef};

/// Tries providers in order, falling back on connection-phase errors only.
///
/// `stream()` covers the connection phase, so any error it returns is
/// eligible for fallback; once a stream is handed to the caller, mid-stream
/// errors propagate untouched. There is no mid-stream fallback because the
/// conversation state would be corrupted by partial output.
pub struct FallbackAdapter {
    providers: Vec<Arc<dyn ProviderAdapter>>,
    active: AtomicUsize,
}

impl FallbackAdapter {
    pub fn new(providers: Vec<Arc<dyn ProviderAdapter>>) -> anyhow::Result<Self> {
        anyhow::ensure!(
            !providers.is_empty(),
            "FallbackAdapter requires at least one provider"
        );
        Ok(Self {
            providers,
            active: AtomicUsize::new(0),
        })
    }

    fn active_provider(&self) -> &Arc<dyn ProviderAdapter> {
        &self.providers[self.active.load(Ordering::Relaxed) % self.providers.len()]
    }
}

#[async_trait]
impl ProviderAdapter for FallbackAdapter {
    fn model_id(&self) -> &str {
        self.active_provider().model_id()
    }

    fn estimate_tokens(&self, text: &str) -> usize {
        self.active_provider().estimate_tokens(text)
    }

    fn format_tool_use(&self, id: &str, name: &str, args: &Value) -> ContentBlock {
        self.active_provider().format_tool_use(id, name, args)
    }

    fn format_tool_result(&self, tool_use_id: &str, content: &str, is_error: bool) -> ChatMessage {
        self.active_provider()
            .format_tool_result(tool_use_id, content, is_error)
    }

    async fn stream(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDef],
        system: &str,
        max_tokens: u32,
    ) -> Result<EventStream, ProviderError> {
        let start = self.active.load(Ordering::Relaxed);
        let mut last_error: Option<ProviderError> = None;

        for i in 0..self.providers.len() {
            let idx = (start + i) % self.providers.len();
            match self.providers[idx]
                .stream(messages, tools, system, max_tokens)
                .await
            {
                Ok(stream) => {
                    self.active.store(idx, Ordering::Relaxed);
                    return Ok(stream);
                }
                Err(e) if e.is_connection_phase() => {
                    warn!(
                        provider = self.providers[idx].model_id(),
                        error = %e,
                        "provider failed at connection phase, trying next in chain"
                    );
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error
            .unwrap_or_else(|| ProviderError::Connect("all providers in chain failed".into())))
    }
}
