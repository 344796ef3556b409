// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Configuration types for a single agent run.
//!
//! These are plain data carriers: the embedding host (CLI, CI runner, tests)
//! fills in a [`RunConfig`] and hands it to the engine. Config *file* loading
//! lives with the host, not here.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Permission modes controlling what the agent may do without asking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionMode {
    /// Auto-approve read-only tools, ask for the rest.
    Default,
    /// Auto-approve file operations, ask for Bash and MCP tools.
    AcceptEdits,
    /// Read-only: deny writes and shell execution outright.
    Plan,
    /// Auto-approve everything.
    Bypass,
}

impl PermissionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::AcceptEdits => "accept_edits",
            Self::Plan => "plan",
            Self::Bypass => "bypass",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "default" => Some(Self::Default),
            "accept_edits" => Some(Self::AcceptEdits),
            "plan" => Some(Self::Plan),
            "bypass" => Some(Self::Bypass),
            _ => None,
        }
    }
}

impl Default for PermissionMode {
    fn default() -> Self {
        Self::Default
    }
}

impl std::fmt::Display for PermissionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration for one external MCP server.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct McpServerConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// Lifecycle events that can trigger hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookEvent {
    PreToolUse,
    PostToolUse,
    SessionStart,
    SessionEnd,
    UserPrompt,
    AgentStop,
    Compaction,
}

impl HookEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PreToolUse => "pre_tool_use",
            Self::PostToolUse => "post_tool_use",
            Self::SessionStart => "session_start",
            Self::SessionEnd => "session_end",
            Self::UserPrompt => "user_prompt",
            Self::AgentStop => "agent_stop",
            Self::Compaction => "compaction",
        }
    }
}

/// A hook: a shell command fired on a lifecycle event.
///
/// `matcher` is a glob over the tool name, only meaningful for the two
/// tool events. Template variables in `command` (`{tool_name}`,
/// `{file_path}`, `{command}`, `{pattern}`, `{result}`, `{session_id}`,
/// `{cwd}`, `{event}`) are substituted shell-quoted before execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookDef {
    pub event: HookEvent,
    pub command: String,
    #[serde(default)]
    pub matcher: Option<String>,
    #[serde(default = "default_hook_timeout")]
    pub timeout_secs: u64,
}

fn default_hook_timeout() -> u64 {
    30
}

/// Definition of a sub-agent type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDef {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub model: Option<String>,
    /// Allowed tool names; empty inherits the parent's full set.
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default = "default_agent_turns")]
    pub max_turns: u32,
    #[serde(default)]
    pub read_only: bool,
}

fn default_agent_turns() -> u32 {
    50
}

/// An explicit allow/deny rule supplied with the run.
///
/// `tool` is a glob over the tool name; `args_pattern` maps argument keys to
/// globs matched against the stringified argument value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleSpec {
    pub tool: String,
    #[serde(default)]
    pub args_pattern: BTreeMap<String, String>,
}

/// Configuration for a single engine run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    /// Built-in tool allow-list.
    #[serde(default = "default_tools")]
    pub tools: Vec<String>,
    #[serde(default)]
    pub mcp_servers: BTreeMap<String, McpServerConfig>,
    #[serde(default)]
    pub permission_mode: PermissionMode,
    #[serde(default)]
    pub allow_rules: Vec<RuleSpec>,
    #[serde(default)]
    pub deny_rules: Vec<RuleSpec>,
    /// Policy-as-code files, evaluated between explicit rules and mode defaults.
    #[serde(default)]
    pub policy_files: Vec<PathBuf>,
    /// Resume an existing session instead of creating a fresh one.
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default = "default_max_turns")]
    pub max_turns: u32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub hooks: Vec<HookDef>,
    /// Whether AskUser may prompt; false makes it return an error result.
    #[serde(default)]
    pub interactive: bool,
    #[serde(default)]
    pub audit_enabled: bool,
    /// Total-token budget for the run; 0 means unlimited.
    #[serde(default)]
    pub budget_max_tokens: u64,
    /// Cost budget in dollars; 0.0 means unlimited.
    #[serde(default)]
    pub budget_max_cost: f64,
}

fn default_tools() -> Vec<String> {
    ["Read", "Write", "Edit", "Bash", "Glob", "Grep"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_max_turns() -> u32 {
    100
}

fn default_max_tokens() -> u32 {
    16_384
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            provider: "anthropic".into(),
            model: None,
            tools: default_tools(),
            mcp_servers: BTreeMap::new(),
            permission_mode: PermissionMode::Default,
            allow_rules: Vec::new(),
            deny_rules: Vec::new(),
            policy_files: Vec::new(),
            session_id: None,
            max_turns: default_max_turns(),
            max_tokens: default_max_tokens(),
            cwd: None,
            api_key: None,
            base_url: None,
            system_prompt: None,
            hooks: Vec::new(),
            interactive: false,
            audit_enabled: false,
            budget_max_tokens: 0,
            budget_max_cost: 0.0,
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_mode_round_trips_through_str() {
        for mode in [
            PermissionMode::Default,
            PermissionMode::AcceptEdits,
            PermissionMode::Plan,
            PermissionMode::Bypass,
        ] {
            assert_eq!(PermissionMode::parse(mode.as_str()), Some(mode));
        }
    }

    #[test]
    fn permission_mode_unknown_is_none() {
        assert_eq!(PermissionMode::parse("yolo"), None);
    }

    #[test]
    fn default_config_has_six_builtin_tools() {
        let cfg = RunConfig::default();
        assert_eq!(cfg.tools.len(), 6);
        assert!(cfg.tools.iter().any(|t| t == "Bash"));
        assert_eq!(cfg.max_turns, 100);
        assert_eq!(cfg.max_tokens, 16_384);
    }

    #[test]
    fn run_config_deserializes_with_defaults() {
        let cfg: RunConfig = serde_json::from_str(r#"{"provider":"openai"}"#).unwrap();
        assert_eq!(cfg.provider, "openai");
        assert_eq!(cfg.permission_mode, PermissionMode::Default);
        assert!(cfg.mcp_servers.is_empty());
    }

    #[test]
    fn hook_def_defaults_timeout_to_30s() {
        let hook: HookDef = serde_json::from_str(
            r#"{"event":"pre_tool_use","command":"echo hi"}"#,
        )
        .unwrap();
        assert_eq!(hook.timeout_secs, 30);
        assert_eq!(hook.event.as_str(), "pre_tool_use");
    }
}
