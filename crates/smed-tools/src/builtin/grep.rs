// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;
use walkdir::WalkDir;

use smed_model::{ToolDef, ToolParam};

use crate::builtin::{glob_to_regex, IGNORED_DIRS};
use crate::tool::{Tool, ToolContext, ToolResultData};

const DEFAULT_MAX_RESULTS: usize = 50;
/// A file whose first 8 KB contain a NUL byte is treated as binary.
const BINARY_SNIFF_BYTES: usize = 8192;

pub struct GrepTool;

#[async_trait]
impl Tool for GrepTool {
    fn definition(&self) -> ToolDef {
        ToolDef::new(
            "Grep",
            "Search for a regex pattern in file contents. \
             Uses ripgrep (rg) when available, otherwise falls back to an \
             in-process scanner. \
             Returns matching lines as 'path:line_number: content'. \
             Ignores binary files and common build/cache directories.",
            vec![
                ToolParam::required("pattern", "string", "Regular expression pattern to search for."),
                ToolParam::optional(
                    "path",
                    "string",
                    "Directory or file to search in. Defaults to cwd.",
                ),
                ToolParam::optional(
                    "glob",
                    "string",
                    "Glob pattern to filter which files are searched (e.g. '*.rs').",
                ),
                ToolParam::optional(
                    "include",
                    "string",
                    "Alias for glob — file-name pattern to include.",
                ),
                ToolParam::optional(
                    "max_results",
                    "integer",
                    "Max matching lines to return (default 50).",
                ),
            ],
        )
    }

    async fn execute(&self, args: &Value, ctx: &ToolContext) -> ToolResultData {
        let pattern = args["pattern"].as_str().unwrap_or_default().to_string();
        let search_path = match args["path"].as_str() {
            Some(p) => ctx.resolve(p),
            None => ctx.cwd.clone(),
        };
        if !search_path.exists() {
            return ToolResultData::error(format!(
                "Search path does not exist: {}",
                search_path.display()
            ));
        }
        // glob and include are aliases; glob takes precedence.
        let glob_filter = args["glob"]
            .as_str()
            .or_else(|| args["include"].as_str())
            .map(|s| s.to_string());
        let max_results = args["max_results"]
            .as_u64()
            .map(|v| v as usize)
            .unwrap_or(DEFAULT_MAX_RESULTS)
            .max(1);

        debug!(pattern = %pattern, path = %search_path.display(), "Grep tool");

        // Fast backend first; any failure to run it falls back to the
        // in-process scanner.
        let matches = match rg_search(&pattern, &search_path, glob_filter.as_deref(), max_results)
            .await
        {
            Ok(Some(matches)) => matches,
            Ok(None) => {
                match scan_search(&pattern, &search_path, glob_filter.as_deref(), max_results) {
                    Ok(m) => m,
                    Err(e) => return ToolResultData::error(e),
                }
            }
            Err(e) => return ToolResultData::error(e),
        };

        if matches.is_empty() {
            return ToolResultData::ok(format!(
                "No matches found for pattern '{pattern}' in {}",
                search_path.display()
            ));
        }

        let mut result = matches.join("\n");
        if matches.len() >= max_results {
            result.push_str(&format!("\n[Results limited to {max_results} matches]"));
        }
        ToolResultData::ok(result)
    }
}

// ─── ripgrep backend ──────────────────────────────────────────────────────────

/// Run ripgrep with JSON output. `Ok(None)` means rg is unavailable and the
/// caller should fall back; `Err` carries a real search error (bad regex).
async fn rg_search(
    pattern: &str,
    search_path: &Path,
    glob_filter: Option<&str>,
    max_results: usize,
) -> Result<Option<Vec<String>>, String> {
    let mut cmd = tokio::process::Command::new("rg");
    cmd.arg("--json")
        .arg("--max-count")
        .arg(max_results.to_string());
    if let Some(glob) = glob_filter {
        cmd.arg("--glob").arg(glob);
    }
    cmd.arg(pattern)
        .arg(search_path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let spawned = cmd.spawn();
    let child = match spawned {
        Ok(c) => c,
        // Typically NotFound: rg is not installed.
        Err(_) => return Ok(None),
    };
    let output = match tokio::time::timeout(Duration::from_secs(30), child.wait_with_output()).await
    {
        Ok(Ok(o)) => o,
        _ => return Ok(None),
    };

    // rg exits 0 on matches, 1 on no matches, 2 on real errors (bad regex).
    if output.status.code() == Some(2) {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(format!("Invalid regex pattern: {}", stderr.trim()));
    }

    let mut matches = Vec::new();
    for line in String::from_utf8_lossy(&output.stdout).lines() {
        let Ok(obj) = serde_json::from_str::<Value>(line.trim()) else {
            continue;
        };
        if obj["type"].as_str() != Some("match") {
            continue;
        }
        let data = &obj["data"];
        let file = data["path"]["text"].as_str().unwrap_or("");
        let lineno = data["line_number"].as_u64().unwrap_or(0);
        let text = data["lines"]["text"]
            .as_str()
            .unwrap_or("")
            .trim_end_matches('\n');
        matches.push(format!("{file}:{lineno}: {text}"));
        if matches.len() >= max_results {
            break;
        }
    }
    Ok(Some(matches))
}

// ─── In-process fallback ──────────────────────────────────────────────────────

fn scan_search(
    pattern: &str,
    search_path: &Path,
    glob_filter: Option<&str>,
    max_results: usize,
) -> Result<Vec<String>, String> {
    let compiled =
        regex::Regex::new(pattern).map_err(|e| format!("Invalid regex pattern: {e}"))?;
    let name_filter = match glob_filter {
        Some(g) => {
            Some(glob_to_regex(g).map_err(|e| format!("Invalid glob pattern: {e}"))?)
        }
        None => None,
    };

    let files: Vec<PathBuf> = if search_path.is_file() {
        vec![search_path.to_path_buf()]
    } else {
        WalkDir::new(search_path)
            .into_iter()
            .filter_entry(|e| {
                !(e.file_type().is_dir()
                    && e.file_name()
                        .to_str()
                        .is_some_and(|n| IGNORED_DIRS.contains(&n)))
            })
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter(|e| match &name_filter {
                Some(re) => {
                    // File-name filter for flat patterns, relative-path
                    // filter when the glob carries separators.
                    let target = if glob_filter.is_some_and(|g| g.contains('/')) {
                        e.path()
                            .strip_prefix(search_path)
                            .unwrap_or(e.path())
                            .to_string_lossy()
                            .replace('\\', "/")
                    } else {
                        e.file_name().to_string_lossy().into_owned()
                    };
                    re.is_match(&target)
                }
                None => true,
            })
            .map(|e| e.into_path())
            .collect()
    };

    let mut matches = Vec::new();
    for file in files {
        if is_binary(&file) {
            continue;
        }
        let Ok(text) = std::fs::read_to_string(&file) else {
            continue;
        };
        for (lineno, line) in text.lines().enumerate() {
            if compiled.is_match(line) {
                matches.push(format!(
                    "{}:{}: {}",
                    file.display(),
                    lineno + 1,
                    line.trim_end()
                ));
                if matches.len() >= max_results {
                    return Ok(matches);
                }
            }
        }
    }
    Ok(matches)
}

fn is_binary(path: &Path) -> bool {
    use std::io::Read;
    let Ok(mut f) = std::fs::File::open(path) else {
        return true;
    };
    let mut buf = [0u8; BINARY_SNIFF_BYTES];
    let n = f.read(&mut buf).unwrap_or(0);
    buf[..n].contains(&0)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
