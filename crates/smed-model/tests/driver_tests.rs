// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Cross-driver behaviour through the public `ProviderAdapter` surface.

use std::sync::Arc;

use futures::StreamExt;

use smed_model::{
    ChatMessage, ContentBlock, FallbackAdapter, MessageContent, MockProvider, ModelRouter,
    ProviderAdapter, ProviderError, Role, RoutingStrategy, ScriptedProvider, StreamEvent,
    TokenBudgetTracker, ToolDef, ToolParam,
};

async fn drain(provider: &dyn ProviderAdapter, messages: &[ChatMessage]) -> Vec<StreamEvent> {
    let mut stream = provider.stream(messages, &[], "", 1024).await.unwrap();
    let mut events = Vec::new();
    while let Some(item) = stream.next().await {
        events.push(item.unwrap());
    }
    events
}

#[tokio::test]
async fn every_stream_ends_with_exactly_one_message_end() {
    let providers: Vec<Box<dyn ProviderAdapter>> = vec![
        Box::new(MockProvider),
        Box::new(ScriptedProvider::always_text("hi")),
        Box::new(ScriptedProvider::tool_then_text(
            "t1",
            "Read",
            r#"{"file_path": "x"}"#,
            "done",
        )),
    ];
    for provider in providers {
        let events = drain(provider.as_ref(), &[ChatMessage::user("go")]).await;
        let ends = events
            .iter()
            .filter(|e| matches!(e, StreamEvent::MessageEnd { .. }))
            .count();
        assert_eq!(ends, 1, "{}", provider.model_id());
        assert!(matches!(events.last(), Some(StreamEvent::MessageEnd { .. })));
    }
}

#[tokio::test]
async fn tool_use_events_are_properly_bracketed() {
    let provider = ScriptedProvider::tool_then_text("t9", "Bash", r#"{"command":"ls"}"#, "ok");
    let events = drain(&provider, &[]).await;

    let mut open = 0i32;
    for event in &events {
        match event {
            StreamEvent::ToolUseStart { .. } => open += 1,
            StreamEvent::ToolUseEnd => {
                assert!(open > 0, "ToolUseEnd before ToolUseStart");
                open -= 1;
            }
            StreamEvent::ToolUseDelta { .. } => {
                assert!(open > 0, "ToolUseDelta outside a tool_use block");
            }
            _ => {}
        }
    }
    assert_eq!(open, 0, "unclosed tool_use block");
}

#[tokio::test]
async fn router_budget_is_shared_across_calls() {
    let inner = Arc::new(ScriptedProvider::new(vec![
        ScriptedProvider::text_script("one"),
        ScriptedProvider::text_script("two"),
        ScriptedProvider::text_script("three"),
    ]));
    let budget = Arc::new(TokenBudgetTracker::new(15, 0.0));
    let router = ModelRouter::new(inner, RoutingStrategy::Manual, None, Arc::clone(&budget));

    // Each scripted turn records 10 tokens; after two calls the 15-token
    // limit is spent and the third call is refused.
    for _ in 0..2 {
        let mut stream = router.stream(&[], &[], "", 64).await.unwrap();
        while stream.next().await.is_some() {}
    }
    let err = router.stream(&[], &[], "", 64).await.err().unwrap();
    assert!(matches!(err, ProviderError::BudgetExhausted(_)));
    assert_eq!(budget.snapshot().total_tokens_used, 20);
}

#[tokio::test]
async fn fallback_chain_composes_with_router() {
    struct DownProvider;

    #[async_trait::async_trait]
    impl ProviderAdapter for DownProvider {
        fn model_id(&self) -> &str {
            "down"
        }
        async fn stream(
            &self,
            _messages: &[ChatMessage],
            _tools: &[ToolDef],
            _system: &str,
            _max_tokens: u32,
        ) -> Result<smed_model::EventStream, ProviderError> {
            Err(ProviderError::Connect("refused".into()))
        }
    }

    let chain = Arc::new(
        FallbackAdapter::new(vec![
            Arc::new(DownProvider),
            Arc::new(ScriptedProvider::always_text("rescued")),
        ])
        .unwrap(),
    );
    let router = ModelRouter::new(
        chain,
        RoutingStrategy::Manual,
        None,
        Arc::new(TokenBudgetTracker::unlimited()),
    );
    let mut stream = router.stream(&[], &[], "", 64).await.unwrap();
    let mut text = String::new();
    while let Some(item) = stream.next().await {
        if let StreamEvent::TextDelta(t) = item.unwrap() {
            text.push_str(&t);
        }
    }
    assert_eq!(text, "rescued");
}

#[test]
fn default_tool_result_encoding_is_user_role_block() {
    let provider = MockProvider;
    let msg = provider.format_tool_result("call_3", "output text", false);
    assert_eq!(msg.role, Role::User);
    match msg.content {
        MessageContent::Blocks(blocks) => {
            assert!(matches!(
                &blocks[0],
                ContentBlock::ToolResult { tool_use_id, .. } if tool_use_id == "call_3"
            ));
        }
        other => panic!("unexpected content: {other:?}"),
    }
}

#[test]
fn tool_schema_renders_parameters_for_the_wire() {
    let def = ToolDef::new(
        "Grep",
        "search file contents",
        vec![
            ToolParam::required("pattern", "string", "regex"),
            ToolParam::optional("max_results", "integer", "cap"),
        ],
    );
    let schema = def.input_schema();
    assert_eq!(schema["type"], "object");
    assert_eq!(schema["properties"]["pattern"]["type"], "string");
    assert_eq!(schema["properties"]["max_results"]["type"], "integer");
    assert_eq!(schema["required"], serde_json::json!(["pattern"]));
}
