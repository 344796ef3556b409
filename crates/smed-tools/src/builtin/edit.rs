// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use smed_model::{ToolDef, ToolParam};

use crate::tool::{Tool, ToolContext, ToolResultData};

/// Context lines shown around the first changed block in the success report.
const CONTEXT_LINES: usize = 3;

pub struct EditTool;

#[async_trait]
impl Tool for EditTool {
    fn definition(&self) -> ToolDef {
        ToolDef::new(
            "Edit",
            "Perform an exact string replacement in a file. \
             By default, old_string must appear exactly once (unique match). \
             Set replace_all=true to replace every occurrence. \
             old_string and new_string must differ.",
            vec![
                ToolParam::required(
                    "file_path",
                    "string",
                    "Absolute or cwd-relative path to the file to edit.",
                ),
                ToolParam::required("old_string", "string", "The exact text to find in the file."),
                ToolParam::required("new_string", "string", "The text to replace old_string with."),
                ToolParam::optional(
                    "replace_all",
                    "boolean",
                    "Replace all occurrences instead of requiring a unique match.",
                ),
            ],
        )
    }

    async fn execute(&self, args: &Value, ctx: &ToolContext) -> ToolResultData {
        let raw_path = args["file_path"].as_str().unwrap_or_default();
        let old_string = args["old_string"].as_str().unwrap_or_default();
        let new_string = args["new_string"].as_str().unwrap_or_default();
        let replace_all = args["replace_all"].as_bool().unwrap_or(false);

        if old_string == new_string {
            return ToolResultData::error("old_string and new_string must differ.");
        }

        let path = ctx.resolve(raw_path);
        debug!(path = %path.display(), replace_all, "Edit tool");

        if path.is_dir() {
            return ToolResultData::error(format!(
                "Path is a directory, not a file: {}",
                path.display()
            ));
        }
        let original = match tokio::fs::read_to_string(&path).await {
            Ok(t) => t,
            Err(e) => {
                let msg = match e.kind() {
                    std::io::ErrorKind::NotFound => {
                        format!("File not found: {}", path.display())
                    }
                    std::io::ErrorKind::PermissionDenied => {
                        format!("Permission denied reading: {}", path.display())
                    }
                    std::io::ErrorKind::InvalidData => {
                        format!("Cannot read file as text: {}", path.display())
                    }
                    _ => format!("Cannot read file {}: {e}", path.display()),
                };
                return ToolResultData::error(msg);
            }
        };

        let count = original.matches(old_string).count();

        let (updated, replacements) = if replace_all {
            if count == 0 {
                return ToolResultData::error(format!(
                    "old_string not found in file: {}\nNo replacements made.",
                    path.display()
                ));
            }
            (original.replace(old_string, new_string), count)
        } else {
            match count {
                0 => {
                    return ToolResultData::error(format!(
                        "old_string not found in file: {}\n\
                         Hint: ensure the string matches the file content exactly.",
                        path.display()
                    ))
                }
                1 => (original.replacen(old_string, new_string, 1), 1),
                n => {
                    return ToolResultData::error(format!(
                        "old_string appears {n} times in {}. \
                         It must be unique for a safe edit. \
                         Add more surrounding context or use replace_all=true.",
                        path.display()
                    ))
                }
            }
        };

        if let Err(e) = tokio::fs::write(&path, &updated).await {
            return ToolResultData::error(format!("OS error writing file: {e}"));
        }

        let snippet = brief_context(&updated, new_string);
        ToolResultData::ok(format!(
            "Made {replacements} replacement(s) in {}\n--- context ---\n{snippet}",
            path.display()
        ))
    }
}

/// A snippet showing the first inserted block with surrounding context.
fn brief_context(text: &str, new_string: &str) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let first_new = new_string.lines().next().unwrap_or("");
    let target_idx = if first_new.is_empty() {
        0
    } else {
        lines
            .iter()
            .position(|l| l.contains(first_new))
            .unwrap_or(0)
    };

    let new_len = new_string.lines().count().max(1);
    let start = target_idx.saturating_sub(CONTEXT_LINES);
    let end = (target_idx + new_len + CONTEXT_LINES).min(lines.len());
    lines[start..end].join("\n")
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
