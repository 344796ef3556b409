// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use smed_model::ToolDef;
use smed_sandbox::SandboxExecutor;

/// Context passed to every tool execution.
#[derive(Clone)]
pub struct ToolContext {
    /// Absolute, canonicalised working directory.
    pub cwd: PathBuf,
    pub permission_mode: String,
    pub session_id: String,
    /// When set, Bash routes shell execution through this sandbox.
    pub sandbox: Option<Arc<dyn SandboxExecutor>>,
    /// Whether AskUser may prompt the embedding host.
    pub interactive: bool,
}

impl ToolContext {
    pub fn new(cwd: impl Into<PathBuf>) -> Self {
        let cwd: PathBuf = cwd.into();
        Self {
            cwd: cwd.canonicalize().unwrap_or(cwd),
            permission_mode: "default".into(),
            session_id: String::new(),
            sandbox: None,
            interactive: false,
        }
    }

    /// Resolve a tool-supplied path: absolute paths pass through, relative
    /// ones anchor at the working directory.
    pub fn resolve(&self, raw: &str) -> PathBuf {
        let p = Path::new(raw);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.cwd.join(p)
        }
    }
}

impl std::fmt::Debug for ToolContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolContext")
            .field("cwd", &self.cwd)
            .field("permission_mode", &self.permission_mode)
            .field("session_id", &self.session_id)
            .field("sandbox", &self.sandbox.is_some())
            .field("interactive", &self.interactive)
            .finish()
    }
}

/// Data returned from tool execution.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResultData {
    pub content: String,
    pub is_error: bool,
    /// Optional rich rendering hint for the embedding UI.
    pub display: Option<String>,
}

impl ToolResultData {
    pub fn ok(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
            display: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            content: msg.into(),
            is_error: true,
            display: None,
        }
    }
}

/// Trait implemented by every built-in and meta tool.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Schema advertised to the model.
    fn definition(&self) -> ToolDef;

    /// Execute with validated arguments. Failures are values, not panics.
    async fn execute(&self, args: &Value, ctx: &ToolContext) -> ToolResultData;
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
