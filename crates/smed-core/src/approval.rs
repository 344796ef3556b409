// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use serde_json::Value;

/// Host callback for `ask` permission decisions.
///
/// A missing handler, a `false` return, and a panic inside the handler all
/// behave as a denial.
#[async_trait]
pub trait ApprovalHandler: Send + Sync {
    async fn request_approval(&self, tool_name: &str, args: &Value, description: &str) -> bool;
}

/// Canonical single-line rendering of a tool call for approval prompts.
pub fn describe_tool_call(tool_name: &str, args: &Value) -> String {
    let arg = |key: &str| args.get(key).and_then(|v| v.as_str()).unwrap_or("");
    match tool_name {
        "Bash" => format!("Run command: {}", arg("command")),
        "Edit" => format!("Edit {}", arg("file_path")),
        "Write" => format!("Write {}", arg("file_path")),
        "Read" => format!("Read {}", arg("file_path")),
        "Task" => format!(
            "Launch sub-agent: {}",
            args.get("agent_type")
                .and_then(|v| v.as_str())
                .unwrap_or("general")
        ),
        "WebFetch" => format!("Fetch URL: {}", arg("url")),
        _ => format!("Use tool: {tool_name}"),
    }
}
