// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use smed_config::RuleSpec;

/// Result of a permission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionDecision {
    Allow,
    Deny,
    Ask,
}

impl PermissionDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Deny => "deny",
            Self::Ask => "ask",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "allow" => Some(Self::Allow),
            "deny" => Some(Self::Deny),
            "ask" => Some(Self::Ask),
            _ => None,
        }
    }
}

/// A single explicit permission rule.
///
/// `tool` is a glob over the tool name; `args_pattern` maps argument keys to
/// globs matched against the stringified argument value.
#[derive(Debug, Clone)]
pub struct PermissionRule {
    pub tool: String,
    pub decision: PermissionDecision,
    pub args_pattern: BTreeMap<String, String>,
}

impl PermissionRule {
    pub fn matches(&self, tool_name: &str, args: &Value) -> bool {
        if !glob_match(&self.tool, tool_name) {
            return false;
        }
        for (key, pattern) in &self.args_pattern {
            let value = stringify_arg(args.get(key));
            if !glob_match(pattern, &value) {
                return false;
            }
        }
        true
    }
}

/// Explicit allow/deny rules supplied with the run.
#[derive(Debug, Clone, Default)]
pub struct PermissionConfig {
    pub deny_rules: Vec<PermissionRule>,
    pub allow_rules: Vec<PermissionRule>,
}

impl PermissionConfig {
    pub fn from_specs(allow: &[RuleSpec], deny: &[RuleSpec]) -> Self {
        let build = |specs: &[RuleSpec], decision: PermissionDecision| {
            specs
                .iter()
                .map(|s| PermissionRule {
                    tool: s.tool.clone(),
                    decision,
                    args_pattern: s.args_pattern.clone(),
                })
                .collect()
        };
        Self {
            allow_rules: build(allow, PermissionDecision::Allow),
            deny_rules: build(deny, PermissionDecision::Deny),
        }
    }

    pub fn add_allow(&mut self, tool: &str, args_pattern: BTreeMap<String, String>) {
        self.allow_rules.push(PermissionRule {
            tool: tool.into(),
            decision: PermissionDecision::Allow,
            args_pattern,
        });
    }

    pub fn add_deny(&mut self, tool: &str, args_pattern: BTreeMap<String, String>) {
        self.deny_rules.push(PermissionRule {
            tool: tool.into(),
            decision: PermissionDecision::Deny,
            args_pattern,
        });
    }
}

/// Stringify an argument value the way rule patterns expect: bare strings
/// keep their content, everything else uses its JSON form.
fn stringify_arg(value: Option<&Value>) -> String {
    match value {
        None => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(v) => v.to_string(),
    }
}

/// Shell-style glob match supporting `*` (any run) and `?` (one char).
///
/// Iterative with single-star backtracking, so pathological patterns cannot
/// blow the stack.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    let (mut pi, mut ti) = (0usize, 0usize);
    let mut star: Option<(usize, usize)> = None;

    while ti < t.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == t[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some((pi, ti));
            pi += 1;
        } else if let Some((sp, st)) = star {
            pi = sp + 1;
            ti = st + 1;
            star = Some((sp, st + 1));
        } else {
            return false;
        }
    }
    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
