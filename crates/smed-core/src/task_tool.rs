// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use smed_model::{ToolDef, ToolParam};
use smed_tools::{Tool, ToolContext, ToolResultData};

use crate::agents::AgentManager;

/// Delegates a focused task to a sub-agent and returns its final text.
///
/// Deliberately absent from sub-agent registries, which bounds nesting to
/// one level.
pub struct TaskTool {
    manager: Arc<AgentManager>,
}

impl TaskTool {
    pub fn new(manager: Arc<AgentManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl Tool for TaskTool {
    fn definition(&self) -> ToolDef {
        ToolDef::new(
            "Task",
            "Launch a sub-agent to handle a task. The sub-agent runs autonomously \
             with its own context and returns the result. Use 'general' for full \
             tool access, 'explore' for fast read-only search, or 'plan' for \
             read-only planning.",
            vec![
                ToolParam::required("prompt", "string", "The task description for the sub-agent."),
                ToolParam::optional("agent_type", "string", "The type of sub-agent to spawn.")
                    .with_enum(&["general", "explore", "plan"])
                    .with_default(serde_json::json!("general")),
            ],
        )
    }

    async fn execute(&self, args: &Value, _ctx: &ToolContext) -> ToolResultData {
        let prompt = args["prompt"].as_str().unwrap_or_default();
        let agent_type = args["agent_type"].as_str().unwrap_or("general");
        debug!(agent_type, "Task tool");

        match self.manager.spawn(agent_type, prompt).await {
            Ok(result) => ToolResultData::ok(result),
            Err(e) => ToolResultData::error(format!("Sub-agent failed: {e}")),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
