// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use smed_model::{ToolDef, ToolParam};
use smed_tools::{Tool, ToolContext, ToolResultData};

use crate::manager::McpManager;

const DEFAULT_MAX_RESULTS: usize = 5;

/// Meta-tool for progressive MCP tool discovery.
///
/// With many MCP tools, loading every definition into context is expensive;
/// this search tool lets the model find them on demand instead. Scoring:
/// +10 for the query as a substring of the name, +5 per query word in the
/// name, +2 per query word in the description.
pub struct ToolSearchTool {
    mcp: Arc<McpManager>,
}

impl ToolSearchTool {
    pub fn new(mcp: Arc<McpManager>) -> Self {
        Self { mcp }
    }
}

#[async_trait]
impl Tool for ToolSearchTool {
    fn definition(&self) -> ToolDef {
        ToolDef::new(
            "ToolSearch",
            "Search for available MCP tools by keyword. Use this to discover \
             tools from connected MCP servers. Returns matching tool names \
             and descriptions.",
            vec![
                ToolParam::required(
                    "query",
                    "string",
                    "Search query to find tools by name or description.",
                ),
                ToolParam::optional(
                    "max_results",
                    "integer",
                    "Maximum number of results to return (default 5).",
                )
                .with_default(json!(DEFAULT_MAX_RESULTS)),
            ],
        )
    }

    async fn execute(&self, args: &Value, _ctx: &ToolContext) -> ToolResultData {
        let query = args["query"].as_str().unwrap_or_default().to_lowercase();
        let max_results = args["max_results"]
            .as_u64()
            .map(|v| v as usize)
            .unwrap_or(DEFAULT_MAX_RESULTS);

        let all_tools = self.mcp.all_tools();
        if all_tools.is_empty() {
            return ToolResultData::ok("No MCP tools available.");
        }

        let mut scored: Vec<(u32, &ToolDef)> = all_tools
            .iter()
            .filter_map(|tool| {
                let score = score_tool(&query, tool);
                (score > 0).then_some((score, tool))
            })
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0));
        scored.truncate(max_results);

        if scored.is_empty() {
            let sample: Vec<&str> = all_tools.iter().take(10).map(|t| t.name.as_str()).collect();
            return ToolResultData::ok(format!(
                "No tools matching '{query}'. Available tools: {}",
                sample.join(", ")
            ));
        }

        let mut lines = vec![format!("Found {} matching tools:\n", scored.len())];
        for (_, tool) in scored {
            lines.push(format!("  {}", tool.name));
            lines.push(format!("    {}", tool.description));
            if !tool.parameters.is_empty() {
                let names: Vec<&str> = tool.parameters.iter().map(|p| p.name.as_str()).collect();
                lines.push(format!("    Parameters: {}", names.join(", ")));
            }
            lines.push(String::new());
        }
        ToolResultData::ok(lines.join("\n"))
    }
}

fn score_tool(query: &str, tool: &ToolDef) -> u32 {
    let name = tool.name.to_lowercase();
    let description = tool.description.to_lowercase();
    let mut score = 0;
    if name.contains(query) {
        score += 10;
    }
    for word in query.split_whitespace() {
        if name.contains(word) {
            score += 5;
        }
        if description.contains(word) {
            score += 2;
        }
    }
    score
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
