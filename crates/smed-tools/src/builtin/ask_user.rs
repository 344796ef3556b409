// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use smed_model::{ToolDef, ToolParam};

use crate::tool::{Tool, ToolContext, ToolResultData};

/// Callback supplied by the embedding host to put a question in front of
/// the user.
#[async_trait]
pub trait UserPrompt: Send + Sync {
    async fn ask(&self, question: &str, options: &[String]) -> anyhow::Result<String>;
}

/// Agent-initiated user prompt. Interactive runs forward the question to
/// the host's prompt callback; non-interactive runs get an error telling
/// the model to proceed on its own judgment.
pub struct AskUserTool {
    prompt: Option<Arc<dyn UserPrompt>>,
}

impl AskUserTool {
    pub fn new(prompt: Option<Arc<dyn UserPrompt>>) -> Self {
        Self { prompt }
    }
}

#[async_trait]
impl Tool for AskUserTool {
    fn definition(&self) -> ToolDef {
        ToolDef::new(
            "AskUser",
            "Ask the user a question to gather information or clarify requirements. \
             Use this when you need user input to proceed.",
            vec![
                ToolParam::required("question", "string", "The question to ask the user."),
                ToolParam::optional("options", "array", "Optional list of choices to present."),
            ],
        )
    }

    async fn execute(&self, args: &Value, ctx: &ToolContext) -> ToolResultData {
        let question = args["question"].as_str().unwrap_or_default();

        let prompt = match (&self.prompt, ctx.interactive) {
            (Some(p), true) => p,
            _ => {
                return ToolResultData::error(
                    "Cannot ask user questions in non-interactive mode. \
                     Make your best judgment and proceed.",
                )
            }
        };

        let options: Vec<String> = args["options"]
            .as_array()
            .map(|a| {
                a.iter()
                    .filter_map(|v| v.as_str().map(|s| s.to_string()))
                    .collect()
            })
            .unwrap_or_default();

        match prompt.ask(question, &options).await {
            Ok(answer) => ToolResultData::ok(answer),
            Err(e) => ToolResultData::error(format!("User prompt failed: {e}")),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
