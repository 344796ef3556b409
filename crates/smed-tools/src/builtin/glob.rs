// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::time::SystemTime;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;
use walkdir::WalkDir;

use smed_model::{ToolDef, ToolParam};

use crate::builtin::IGNORED_DIRS;
use crate::tool::{Tool, ToolContext, ToolResultData};

const MAX_RESULTS: usize = 200;

pub struct GlobTool;

#[async_trait]
impl Tool for GlobTool {
    fn definition(&self) -> ToolDef {
        ToolDef::new(
            "Glob",
            "Find files whose paths match a glob pattern. \
             Results are sorted by modification time (newest first), \
             up to 200 matches. \
             Ignores .git, node_modules, __pycache__, and .venv directories.",
            vec![
                ToolParam::required(
                    "pattern",
                    "string",
                    "Glob pattern to match against file paths (e.g. '**/*.rs').",
                ),
                ToolParam::optional(
                    "path",
                    "string",
                    "Directory to search in. Defaults to the current working directory.",
                ),
            ],
        )
    }

    async fn execute(&self, args: &Value, ctx: &ToolContext) -> ToolResultData {
        let pattern = args["pattern"].as_str().unwrap_or_default();
        let root = match args["path"].as_str() {
            Some(p) => ctx.resolve(p),
            None => ctx.cwd.clone(),
        };

        debug!(pattern, root = %root.display(), "Glob tool");

        if !root.exists() {
            return ToolResultData::error(format!("Search path does not exist: {}", root.display()));
        }
        if !root.is_dir() {
            return ToolResultData::error(format!(
                "Search path is not a directory: {}",
                root.display()
            ));
        }

        let re = match glob_to_regex(pattern) {
            Ok(re) => re,
            Err(e) => return ToolResultData::error(format!("Invalid glob pattern: {e}")),
        };

        let mut matched: Vec<(SystemTime, String)> = Vec::new();
        let walker = WalkDir::new(&root).into_iter().filter_entry(|e| {
            !(e.file_type().is_dir()
                && e.file_name()
                    .to_str()
                    .is_some_and(|n| IGNORED_DIRS.contains(&n)))
        });
        for entry in walker.filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(rel) = entry.path().strip_prefix(&root) else {
                continue;
            };
            let rel_str = rel.to_string_lossy().replace('\\', "/");
            if re.is_match(&rel_str) {
                let mtime = entry
                    .metadata()
                    .ok()
                    .and_then(|m| m.modified().ok())
                    .unwrap_or(SystemTime::UNIX_EPOCH);
                matched.push((mtime, entry.path().display().to_string()));
            }
        }

        // Newest first.
        matched.sort_by(|a, b| b.0.cmp(&a.0));

        if matched.is_empty() {
            return ToolResultData::ok(format!(
                "No files matched pattern '{pattern}' in {}",
                root.display()
            ));
        }

        let truncated = matched.len().saturating_sub(MAX_RESULTS);
        let mut lines: Vec<String> = matched
            .into_iter()
            .take(MAX_RESULTS)
            .map(|(_, p)| p)
            .collect();
        if truncated > 0 {
            lines.push(format!("[...{truncated} more results not shown]"));
        }
        ToolResultData::ok(lines.join("\n"))
    }
}

/// Translate a glob pattern into an anchored regex over `/`-separated
/// relative paths.
///
/// `*` and `?` never cross a separator; `**/` matches zero or more whole
/// directories and a bare `**` matches across separators.
pub(crate) fn glob_to_regex(pattern: &str) -> Result<regex::Regex, regex::Error> {
    let chars: Vec<char> = pattern.chars().collect();
    let mut re = String::from("^");
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == '*' && i + 1 < chars.len() && chars[i + 1] == '*' {
            if i + 2 < chars.len() && chars[i + 2] == '/' {
                re.push_str("(?:[^/]+/)*");
                i += 3;
            } else {
                re.push_str(".*");
                i += 2;
            }
            continue;
        }
        match chars[i] {
            '*' => re.push_str("[^/]*"),
            '?' => re.push_str("[^/]"),
            c => re.push_str(&regex::escape(&c.to_string())),
        }
        i += 1;
    }
    re.push('$');
    regex::Regex::new(&re)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
