// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use smed_model::{ToolDef, ToolParam};

use crate::tool::{Tool, ToolContext, ToolResultData};

const MAX_LINE_LENGTH: usize = 2000;
const DEFAULT_LIMIT: usize = 2000;

pub struct ReadTool;

#[async_trait]
impl Tool for ReadTool {
    fn definition(&self) -> ToolDef {
        ToolDef::new(
            "Read",
            "Read a file from the local filesystem. \
             Optionally specify an offset (1-based line number to start from) \
             and a limit (number of lines to read). \
             Lines longer than 2000 characters are truncated. \
             Returns content with line numbers in cat -n style.",
            vec![
                ToolParam::required(
                    "file_path",
                    "string",
                    "Absolute or cwd-relative path to the file to read.",
                ),
                ToolParam::optional("offset", "integer", "1-based line number to start reading from."),
                ToolParam::optional(
                    "limit",
                    "integer",
                    "Maximum number of lines to return (default 2000).",
                ),
            ],
        )
    }

    async fn execute(&self, args: &Value, ctx: &ToolContext) -> ToolResultData {
        let raw_path = args["file_path"].as_str().unwrap_or_default();
        let path = ctx.resolve(raw_path);
        let offset = args["offset"].as_u64().map(|v| v as usize);
        let limit = args["limit"].as_u64().map(|v| v as usize);

        debug!(path = %path.display(), "Read tool");

        if path.is_dir() {
            return ToolResultData::error(format!(
                "Path is a directory, not a file: {}",
                path.display()
            ));
        }

        let bytes = match tokio::fs::read(&path).await {
            Ok(b) => b,
            Err(e) => {
                let msg = match e.kind() {
                    std::io::ErrorKind::NotFound => {
                        format!("File not found: {}", path.display())
                    }
                    std::io::ErrorKind::PermissionDenied => {
                        format!("Permission denied: {}", path.display())
                    }
                    _ => format!("Cannot read file {}: {e}", path.display()),
                };
                return ToolResultData::error(msg);
            }
        };
        let text = match String::from_utf8(bytes) {
            Ok(t) => t,
            Err(_) => {
                return ToolResultData::error(format!(
                    "Cannot read file as text (binary or unsupported encoding): {}",
                    path.display()
                ))
            }
        };

        let lines: Vec<&str> = text.lines().collect();
        let total_lines = lines.len();

        let start_idx = offset.map(|o| o.saturating_sub(1)).unwrap_or(0);
        let effective_limit = limit.unwrap_or(DEFAULT_LIMIT);
        let end_idx = start_idx.saturating_add(effective_limit).min(total_lines);

        let mut numbered: Vec<String> = Vec::new();
        if start_idx < total_lines {
            for (i, line) in lines[start_idx..end_idx].iter().enumerate() {
                let lineno = start_idx + i + 1;
                if line.chars().count() > MAX_LINE_LENGTH {
                    let truncated: String = line.chars().take(MAX_LINE_LENGTH).collect();
                    numbered.push(format!("{lineno:>6}\t{truncated} [truncated]"));
                } else {
                    numbered.push(format!("{lineno:>6}\t{line}"));
                }
            }
        }

        let mut content = numbered.join("\n");
        if end_idx < total_lines {
            content.push_str(&format!(
                "\n[...{} more lines not shown (offset={})]",
                total_lines - end_idx,
                end_idx + 1
            ));
        }
        ToolResultData::ok(content)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn ctx_in(dir: &tempfile::TempDir) -> ToolContext {
        ToolContext::new(dir.path())
    }

    #[tokio::test]
    async fn reads_file_with_line_numbers() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "hello\nworld\n").unwrap();
        let out = ReadTool
            .execute(&json!({"file_path": "a.txt"}), &ctx_in(&dir))
            .await;
        assert!(!out.is_error, "{}", out.content);
        assert!(out.content.contains("1\thello"));
        assert!(out.content.contains("2\tworld"));
    }

    #[tokio::test]
    async fn missing_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let out = ReadTool
            .execute(&json!({"file_path": "nope.txt"}), &ctx_in(&dir))
            .await;
        assert!(out.is_error);
        assert!(out.content.contains("File not found"));
    }

    #[tokio::test]
    async fn directory_is_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        let out = ReadTool
            .execute(&json!({"file_path": "sub"}), &ctx_in(&dir))
            .await;
        assert!(out.is_error);
        assert!(out.content.contains("directory"));
    }

    #[tokio::test]
    async fn binary_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bin"), [0u8, 159, 146, 150]).unwrap();
        let out = ReadTool
            .execute(&json!({"file_path": "bin"}), &ctx_in(&dir))
            .await;
        assert!(out.is_error);
        assert!(out.content.contains("binary or unsupported encoding"));
    }

    #[tokio::test]
    async fn offset_and_limit_select_range() {
        let dir = tempfile::tempdir().unwrap();
        let body: String = (1..=10).map(|i| format!("line{i}\n")).collect();
        std::fs::write(dir.path().join("r.txt"), body).unwrap();
        let out = ReadTool
            .execute(
                &json!({"file_path": "r.txt", "offset": 3, "limit": 2}),
                &ctx_in(&dir),
            )
            .await;
        assert!(out.content.contains("3\tline3"));
        assert!(out.content.contains("4\tline4"));
        assert!(!out.content.contains("line5\n"));
        assert!(out.content.contains("[...6 more lines not shown (offset=5)]"));
    }

    #[tokio::test]
    async fn offset_past_eof_returns_no_lines_no_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("s.txt"), "only\n").unwrap();
        let out = ReadTool
            .execute(&json!({"file_path": "s.txt", "offset": 100}), &ctx_in(&dir))
            .await;
        assert!(!out.is_error);
        assert_eq!(out.content, "");
    }

    #[tokio::test]
    async fn limit_zero_returns_no_lines() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("z.txt"), "a\nb\n").unwrap();
        let out = ReadTool
            .execute(&json!({"file_path": "z.txt", "limit": 0}), &ctx_in(&dir))
            .await;
        assert!(!out.is_error);
        assert!(out.content.starts_with("[...2 more lines not shown"));
    }

    #[tokio::test]
    async fn overlong_line_is_truncated_with_marker() {
        let dir = tempfile::tempdir().unwrap();
        let long = "x".repeat(3000);
        std::fs::write(dir.path().join("l.txt"), format!("{long}\n")).unwrap();
        let out = ReadTool
            .execute(&json!({"file_path": "l.txt"}), &ctx_in(&dir))
            .await;
        assert!(out.content.ends_with(" [truncated]"));
        assert!(out.content.len() < 2100);
    }
}
