// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde_json::Value;

use smed_config::PermissionMode;

use crate::policy::PolicyEngine;
use crate::rules::{PermissionConfig, PermissionDecision};

/// Tools considered read-only, safe to auto-approve in default mode.
const READ_ONLY_TOOLS: &[&str] = &["Read", "Glob", "Grep", "ToolSearch"];

/// Tools auto-approved in accept_edits mode.
const EDIT_TOOLS: &[&str] = &["Read", "Write", "Edit", "Glob", "Grep", "ToolSearch"];

/// Tools always denied in plan mode.
const PLAN_DENIED_TOOLS: &[&str] = &["Write", "Edit", "Bash"];

/// Evaluates whether a tool call is allowed, denied, or needs approval.
///
/// Evaluation order:
/// 1. explicit deny rules (highest priority)
/// 2. explicit allow rules
/// 3. policy-file rules (fall through on no match)
/// 4. mode defaults
pub struct PermissionManager {
    mode: PermissionMode,
    config: PermissionConfig,
    policy_engine: Option<PolicyEngine>,
}

impl PermissionManager {
    pub fn new(
        mode: PermissionMode,
        config: PermissionConfig,
        policy_engine: Option<PolicyEngine>,
    ) -> Self {
        Self {
            mode,
            config,
            policy_engine,
        }
    }

    pub fn mode(&self) -> PermissionMode {
        self.mode
    }

    pub fn check(&mut self, tool_name: &str, args: &Value) -> PermissionDecision {
        for rule in &self.config.deny_rules {
            if rule.matches(tool_name, args) {
                return PermissionDecision::Deny;
            }
        }
        for rule in &self.config.allow_rules {
            if rule.matches(tool_name, args) {
                return PermissionDecision::Allow;
            }
        }
        if let Some(engine) = &mut self.policy_engine {
            if let Some(decision) = engine.check(tool_name, args) {
                return decision;
            }
        }
        self.mode_default(tool_name)
    }

    fn mode_default(&self, tool_name: &str) -> PermissionDecision {
        match self.mode {
            PermissionMode::Bypass => PermissionDecision::Allow,
            PermissionMode::Plan => {
                if PLAN_DENIED_TOOLS.contains(&tool_name) || tool_name.starts_with("mcp__") {
                    PermissionDecision::Deny
                } else {
                    PermissionDecision::Allow
                }
            }
            PermissionMode::AcceptEdits => {
                if EDIT_TOOLS.contains(&tool_name) {
                    PermissionDecision::Allow
                } else {
                    PermissionDecision::Ask
                }
            }
            PermissionMode::Default => {
                if READ_ONLY_TOOLS.contains(&tool_name) {
                    PermissionDecision::Allow
                } else {
                    PermissionDecision::Ask
                }
            }
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
