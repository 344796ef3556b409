// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::process::Command;
use tracing::debug;

use smed_model::{ToolDef, ToolParam};

use crate::tool::{Tool, ToolContext, ToolResultData};

const DEFAULT_TIMEOUT_MS: u64 = 120_000;
const MAX_TIMEOUT_MS: u64 = 600_000;
const MAX_OUTPUT_CHARS: usize = 30_000;

pub struct BashTool;

#[async_trait]
impl Tool for BashTool {
    fn definition(&self) -> ToolDef {
        ToolDef::new(
            "Bash",
            "Execute a shell command and return its combined stdout + stderr output. \
             The command runs in the session working directory. \
             Output is truncated to 30 000 characters. \
             Timeout is in milliseconds (default 120 000, max 600 000).",
            vec![
                ToolParam::required("command", "string", "The shell command to execute."),
                ToolParam::optional(
                    "timeout",
                    "integer",
                    "Timeout in milliseconds before the process is killed. \
                     Default 120000, max 600000.",
                )
                .with_default(json!(DEFAULT_TIMEOUT_MS)),
            ],
        )
    }

    async fn execute(&self, args: &Value, ctx: &ToolContext) -> ToolResultData {
        let command = args["command"].as_str().unwrap_or_default().to_string();
        let timeout_ms = args["timeout"]
            .as_u64()
            .unwrap_or(DEFAULT_TIMEOUT_MS)
            .clamp(1, MAX_TIMEOUT_MS);

        debug!(command = %command, timeout_ms, sandboxed = ctx.sandbox.is_some(), "Bash tool");

        // Sandboxed execution path.
        if let Some(sandbox) = &ctx.sandbox {
            let result = sandbox
                .execute(&command, Some(&ctx.cwd), timeout_ms as f64 / 1000.0)
                .await;
            if let Some(error) = result.error {
                return ToolResultData::error(error);
            }
            if result.timed_out {
                return ToolResultData::error(format!(
                    "Command timed out after {timeout_ms} ms and was killed: {command}"
                ));
            }
            let mut output = result.stdout;
            if result.oom_killed {
                output.push_str("\n[Process killed: out of memory]");
            }
            return finish(output, result.exit_code);
        }

        // Host shell path. kill_on_drop reaps the process when the timeout
        // abandons the wait future.
        let child = Command::new("sh")
            .arg("-c")
            .arg(&command)
            .current_dir(&ctx.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();
        let child = match child {
            Ok(c) => c,
            Err(e) => return ToolResultData::error(format!("Failed to start process: {e}")),
        };

        let waited = tokio::time::timeout(
            Duration::from_millis(timeout_ms),
            child.wait_with_output(),
        )
        .await;

        let output = match waited {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return ToolResultData::error(format!("Failed to collect output: {e}"))
            }
            Err(_) => {
                return ToolResultData::error(format!(
                    "Command timed out after {timeout_ms} ms and was killed: {command}"
                ));
            }
        };

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        finish(combined, output.status.code().unwrap_or(-1))
    }
}

fn finish(mut output: String, exit_code: i32) -> ToolResultData {
    if output.len() > MAX_OUTPUT_CHARS {
        let cut = floor_char_boundary(&output, MAX_OUTPUT_CHARS);
        let truncated = output.len() - cut;
        output.truncate(cut);
        output.push_str(&format!("\n[...{truncated} characters truncated]"));
    }

    let mut result_text = if output.trim().is_empty() {
        "Command completed with no output".to_string()
    } else {
        output
    };

    if exit_code != 0 {
        while result_text.ends_with('\n') {
            result_text.pop();
        }
        result_text.push_str(&format!("\n[Exit code: {exit_code}]"));
        ToolResultData::error(result_text)
    } else {
        ToolResultData::ok(result_text)
    }
}

fn floor_char_boundary(s: &str, mut index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    while index > 0 && !s.is_char_boundary(index) {
        index -= 1;
    }
    index
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
