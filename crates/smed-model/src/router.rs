// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;

use crate::budget::TokenBudgetTracker;
use crate::catalog;
use crate::error::ProviderError;
use crate::provider::{EventStream, ProviderAdapter};
use crate::types::{ChatMessage, ContentBlock, StreamEvent, ToolDef};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingStrategy {
    Manual,
    CostOptimized,
    QualityFirst,
    LatencyFirst,
}

/// Routes requests across providers and enforces the run budget.
///
/// Implements `ProviderAdapter` so it drops in anywhere a plain provider
/// does. Only `Manual` and `CostOptimized` change behaviour: the latter
/// sends short conversations (≤ 4 messages) to the cheap provider when one
/// is configured. Usage from every `MessageEnd` is recorded into the budget
/// tracker; a crossed limit turns the next call into `BudgetExhausted`.
pub struct ModelRouter {
    primary: Arc<dyn ProviderAdapter>,
    simple_task_provider: Option<Arc<dyn ProviderAdapter>>,
    strategy: RoutingStrategy,
    budget: Arc<TokenBudgetTracker>,
}

/// Conversations at or below this length count as "short" for routing.
const SHORT_CONVERSATION_LEN: usize = 4;

impl ModelRouter {
    pub fn new(
        primary: Arc<dyn ProviderAdapter>,
        strategy: RoutingStrategy,
        simple_task_provider: Option<Arc<dyn ProviderAdapter>>,
        budget: Arc<TokenBudgetTracker>,
    ) -> Self {
        Self {
            primary,
            simple_task_provider,
            strategy,
            budget,
        }
    }

    pub fn budget(&self) -> &Arc<TokenBudgetTracker> {
        &self.budget
    }

    fn select_provider(&self, messages: &[ChatMessage]) -> &Arc<dyn ProviderAdapter> {
        match self.strategy {
            RoutingStrategy::CostOptimized => {
                if messages.len() <= SHORT_CONVERSATION_LEN {
                    if let Some(simple) = &self.simple_task_provider {
                        return simple;
                    }
                }
                &self.primary
            }
            // QualityFirst and LatencyFirst currently pin the primary.
            _ => &self.primary,
        }
    }
}

#[async_trait]
impl ProviderAdapter for ModelRouter {
    fn model_id(&self) -> &str {
        self.primary.model_id()
    }

    fn estimate_tokens(&self, text: &str) -> usize {
        self.primary.estimate_tokens(text)
    }

    fn format_tool_use(&self, id: &str, name: &str, args: &Value) -> ContentBlock {
        self.primary.format_tool_use(id, name, args)
    }

    fn format_tool_result(&self, tool_use_id: &str, content: &str, is_error: bool) -> ChatMessage {
        self.primary
            .format_tool_result(tool_use_id, content, is_error)
    }

    async fn stream(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDef],
        system: &str,
        max_tokens: u32,
    ) -> Result<EventStream, ProviderError> {
        self.budget.check_budget()?;

        let provider = self.select_provider(messages);
        let model = provider.model_id().to_string();
        let stream = provider.stream(messages, tools, system, max_tokens).await?;

        let budget = Arc::clone(&self.budget);
        let recorded = stream.map(move |item| {
            if let Ok(StreamEvent::MessageEnd { usage, .. }) = &item {
                let cost = catalog::turn_cost(&model, usage.input_tokens, usage.output_tokens);
                budget.record_usage(usage.input_tokens, usage.output_tokens, cost);
            }
            item
        });
        Ok(Box::pin(recorded))
    }
}
