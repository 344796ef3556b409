// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use smed_model::{ToolDef, ToolParam};

use crate::tool::{Tool, ToolContext, ToolResultData};

pub struct WriteTool;

#[async_trait]
impl Tool for WriteTool {
    fn definition(&self) -> ToolDef {
        ToolDef::new(
            "Write",
            "Create or overwrite a file with the given content. \
             Parent directories are created automatically. \
             Existing file contents are replaced entirely.",
            vec![
                ToolParam::required(
                    "file_path",
                    "string",
                    "Absolute or cwd-relative path to the file to write.",
                ),
                ToolParam::required("content", "string", "The full content to write to the file."),
            ],
        )
    }

    async fn execute(&self, args: &Value, ctx: &ToolContext) -> ToolResultData {
        let raw_path = args["file_path"].as_str().unwrap_or_default();
        let content = args["content"].as_str().unwrap_or_default();
        let path = ctx.resolve(raw_path);

        debug!(path = %path.display(), bytes = content.len(), "Write tool");

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                if let Err(e) = tokio::fs::create_dir_all(parent).await {
                    return ToolResultData::error(format!(
                        "Cannot create parent directory for {}: {e}",
                        path.display()
                    ));
                }
            }
        }

        if let Err(e) = tokio::fs::write(&path, content).await {
            let msg = match e.kind() {
                std::io::ErrorKind::PermissionDenied => {
                    format!("Permission denied writing to: {}", path.display())
                }
                _ => format!("OS error writing file: {e}"),
            };
            return ToolResultData::error(msg);
        }

        let lines = content.lines().count();
        let byte_count = content.len();
        ToolResultData::ok(format!(
            "File written: {} ({lines} lines, {byte_count} bytes)",
            path.display()
        ))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
