// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use smed_model::{ToolDef, ToolParam};

use crate::tool::{Tool, ToolContext, ToolResultData};

/// Per-session checkpoint directory, relative to the working directory.
const CHECKPOINT_DIR: &str = ".smed/checkpoints";

pub struct CheckpointTool;

#[async_trait]
impl Tool for CheckpointTool {
    fn definition(&self) -> ToolDef {
        ToolDef::new(
            "Checkpoint",
            "Save, restore, or list file checkpoints. Use before making risky \
             changes to create a backup you can restore later.",
            vec![
                ToolParam::required("action", "string", "The action to perform.")
                    .with_enum(&["save", "restore", "list"]),
                ToolParam::optional(
                    "file_path",
                    "string",
                    "The file to checkpoint (required for save/restore).",
                ),
            ],
        )
    }

    async fn execute(&self, args: &Value, ctx: &ToolContext) -> ToolResultData {
        let action = args["action"].as_str().unwrap_or_default();
        debug!(action, "Checkpoint tool");

        if action == "list" {
            return list_checkpoints(ctx);
        }

        let file_path = args["file_path"].as_str().unwrap_or_default();
        if file_path.is_empty() {
            return ToolResultData::error("'file_path' is required for save/restore.");
        }
        let resolved = ctx.resolve(file_path);

        match action {
            "save" => save(ctx, &resolved, file_path),
            "restore" => restore(ctx, &resolved, file_path),
            _ => ToolResultData::error("'action' must be 'save', 'restore', or 'list'."),
        }
    }
}

fn checkpoint_dir(ctx: &ToolContext) -> PathBuf {
    ctx.cwd.join(CHECKPOINT_DIR).join(&ctx.session_id)
}

/// Checkpoint file name: the cwd-relative path with separators flattened
/// to `--`, so one flat directory can hold the whole tree.
fn checkpoint_path(ctx: &ToolContext, file_path: &str) -> PathBuf {
    let resolved = ctx.resolve(file_path);
    let rel = resolved
        .strip_prefix(&ctx.cwd)
        .map(Path::to_path_buf)
        .unwrap_or(resolved);
    let safe_name = rel
        .to_string_lossy()
        .replace(['/', '\\'], "--")
        .trim_start_matches("--")
        .to_string();
    checkpoint_dir(ctx).join(safe_name)
}

fn save(ctx: &ToolContext, resolved: &Path, file_path: &str) -> ToolResultData {
    if !resolved.is_file() {
        return ToolResultData::error(format!("File not found: {file_path}"));
    }
    let cp = checkpoint_path(ctx, file_path);
    if let Some(parent) = cp.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            return ToolResultData::error(format!("Cannot create checkpoint directory: {e}"));
        }
    }
    match std::fs::copy(resolved, &cp) {
        Ok(_) => ToolResultData::ok(format!("Checkpoint saved: {file_path}")),
        Err(e) => ToolResultData::error(format!("Checkpoint save failed: {e}")),
    }
}

fn restore(ctx: &ToolContext, resolved: &Path, file_path: &str) -> ToolResultData {
    let cp = checkpoint_path(ctx, file_path);
    if !cp.is_file() {
        return ToolResultData::error(format!("No checkpoint found for: {file_path}"));
    }
    if let Some(parent) = resolved.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    match std::fs::copy(&cp, resolved) {
        Ok(_) => ToolResultData::ok(format!("Restored from checkpoint: {file_path}")),
        Err(e) => ToolResultData::error(format!("Checkpoint restore failed: {e}")),
    }
}

fn list_checkpoints(ctx: &ToolContext) -> ToolResultData {
    let dir = checkpoint_dir(ctx);
    let Ok(read_dir) = std::fs::read_dir(&dir) else {
        return ToolResultData::ok("No checkpoints found.");
    };
    let mut files: Vec<String> = read_dir
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_file())
        .map(|e| e.file_name().to_string_lossy().replace("--", "/"))
        .collect();
    files.sort();
    if files.is_empty() {
        return ToolResultData::ok("No checkpoints found.");
    }
    let listing: Vec<String> = files.into_iter().map(|f| format!("  - {f}")).collect();
    ToolResultData::ok(format!("Checkpointed files:\n{}", listing.join("\n")))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn ctx_in(dir: &tempfile::TempDir) -> ToolContext {
        let mut ctx = ToolContext::new(dir.path());
        ctx.session_id = "sess00000001".into();
        ctx
    }

    #[tokio::test]
    async fn save_modify_restore_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx_in(&dir);
        std::fs::write(dir.path().join("code.rs"), "original").unwrap();

        let saved = CheckpointTool
            .execute(&json!({"action": "save", "file_path": "code.rs"}), &ctx)
            .await;
        assert!(!saved.is_error, "{}", saved.content);

        std::fs::write(dir.path().join("code.rs"), "broken").unwrap();

        let restored = CheckpointTool
            .execute(&json!({"action": "restore", "file_path": "code.rs"}), &ctx)
            .await;
        assert!(!restored.is_error, "{}", restored.content);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("code.rs")).unwrap(),
            "original"
        );
    }

    #[tokio::test]
    async fn nested_paths_flatten_into_session_dir() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx_in(&dir);
        std::fs::create_dir_all(dir.path().join("src/sub")).unwrap();
        std::fs::write(dir.path().join("src/sub/mod.rs"), "x").unwrap();

        CheckpointTool
            .execute(&json!({"action": "save", "file_path": "src/sub/mod.rs"}), &ctx)
            .await;
        let flat = dir
            .path()
            .join(".smed/checkpoints/sess00000001/src--sub--mod.rs");
        assert!(flat.exists(), "missing {}", flat.display());
    }

    #[tokio::test]
    async fn list_shows_flattened_names_unflattened() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx_in(&dir);
        std::fs::create_dir_all(dir.path().join("a/b")).unwrap();
        std::fs::write(dir.path().join("a/b/f.txt"), "x").unwrap();
        CheckpointTool
            .execute(&json!({"action": "save", "file_path": "a/b/f.txt"}), &ctx)
            .await;

        let out = CheckpointTool
            .execute(&json!({"action": "list"}), &ctx)
            .await;
        assert!(out.content.contains("a/b/f.txt"));
    }

    #[tokio::test]
    async fn restore_without_checkpoint_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx_in(&dir);
        let out = CheckpointTool
            .execute(&json!({"action": "restore", "file_path": "never.txt"}), &ctx)
            .await;
        assert!(out.is_error);
        assert!(out.content.contains("No checkpoint found"));
    }

    #[tokio::test]
    async fn save_missing_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx_in(&dir);
        let out = CheckpointTool
            .execute(&json!({"action": "save", "file_path": "ghost.txt"}), &ctx)
            .await;
        assert!(out.is_error);
        assert!(out.content.contains("File not found"));
    }

    #[tokio::test]
    async fn save_without_file_path_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx_in(&dir);
        let out = CheckpointTool
            .execute(&json!({"action": "save"}), &ctx)
            .await;
        assert!(out.is_error);
        assert!(out.content.contains("file_path"));
    }

    #[tokio::test]
    async fn list_with_no_checkpoints_is_friendly() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx_in(&dir);
        let out = CheckpointTool
            .execute(&json!({"action": "list"}), &ctx)
            .await;
        assert!(!out.is_error);
        assert_eq!(out.content, "No checkpoints found.");
    }
}
