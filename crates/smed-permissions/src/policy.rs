// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde_json::{json, Value};
use thiserror::Error;
use tracing::warn;

use crate::conditions::{evaluate_conditions, Condition};
use crate::rules::{glob_match, PermissionDecision};

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("cannot read policy file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("unsupported policy file extension: {0}")]
    UnsupportedFormat(PathBuf),

    #[error("failed to parse policy file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("unknown policy condition: {0}")]
    UnknownCondition(String),

    #[error("content_matches pattern is {len} chars, limit is {max}")]
    OversizedPattern { len: usize, max: usize },

    #[error("invalid content_matches regex: {0}")]
    InvalidRegex(String),
}

/// A single policy rule.
#[derive(Debug, Clone)]
pub struct PolicyRule {
    pub tool: String,
    pub decision: PermissionDecision,
    pub conditions: Vec<Condition>,
    pub description: String,
}

/// A parsed policy file.
#[derive(Debug, Clone, Default)]
pub struct Policy {
    pub version: u32,
    pub rules: Vec<PolicyRule>,
    pub defaults: Vec<(String, String)>,
    pub inherit_from: Option<String>,
}

/// Loads and evaluates policy-as-code files (YAML or TOML) with
/// inheritance chains and an optional what-if simulation mode.
pub struct PolicyEngine {
    policies: Vec<Policy>,
    simulation_mode: bool,
    audit_log: Vec<Value>,
    loaded_paths: HashSet<PathBuf>,
}

impl PolicyEngine {
    pub fn new(simulation_mode: bool) -> Self {
        Self {
            policies: Vec::new(),
            simulation_mode,
            audit_log: Vec::new(),
            loaded_paths: HashSet::new(),
        }
    }

    pub fn policies(&self) -> &[Policy] {
        &self.policies
    }

    /// Matches recorded during `check` calls, including simulated ones.
    pub fn audit_log(&self) -> &[Value] {
        &self.audit_log
    }

    /// Load a policy file, following its inheritance chain.
    ///
    /// Cycles are broken by tracking absolute paths already loaded; a file
    /// that does not exist is skipped silently so a missing optional policy
    /// does not break the run.
    pub fn load_file(&mut self, path: impl AsRef<Path>) -> Result<(), PolicyError> {
        let path = path.as_ref();
        let abs = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        if !self.loaded_paths.insert(abs.clone()) {
            return Ok(());
        }
        if !path.exists() {
            return Ok(());
        }

        let raw = parse_file(path)?;
        let policy = build_policy(&raw)?;
        let parent = policy.inherit_from.clone();
        self.policies.push(policy);

        if let Some(parent) = parent {
            // Relative parents resolve against the child's directory.
            let parent_path = PathBuf::from(&parent);
            let resolved = if parent_path.is_absolute() {
                parent_path
            } else {
                abs.parent()
                    .map(|d| d.join(&parent_path))
                    .unwrap_or(parent_path)
            };
            self.load_file(resolved)?;
        }
        Ok(())
    }

    pub fn load_files<P: AsRef<Path>>(&mut self, paths: &[P]) -> Result<(), PolicyError> {
        for p in paths {
            self.load_file(p)?;
        }
        Ok(())
    }

    /// Evaluate policies against a tool call.
    ///
    /// Returns a decision when a rule matches, or `None` to fall through to
    /// mode defaults. In simulation mode matches are recorded but never
    /// enforced.
    pub fn check(&mut self, tool_name: &str, args: &Value) -> Option<PermissionDecision> {
        for policy in &self.policies {
            for rule in &policy.rules {
                if !glob_match(&rule.tool, tool_name) {
                    continue;
                }
                if !rule.conditions.is_empty() && !evaluate_conditions(&rule.conditions, args) {
                    continue;
                }

                self.audit_log.push(json!({
                    "tool": tool_name,
                    "rule_tool": rule.tool,
                    "decision": rule.decision.as_str(),
                    "description": rule.description,
                    "simulation": self.simulation_mode,
                }));

                if self.simulation_mode {
                    return None;
                }
                return Some(rule.decision);
            }
        }
        None
    }

    /// What-if analysis: every matching rule, with nothing enforced or
    /// recorded.
    pub fn simulate(&self, tool_name: &str, args: &Value) -> Vec<Value> {
        let mut matches = Vec::new();
        for policy in &self.policies {
            for rule in &policy.rules {
                if !glob_match(&rule.tool, tool_name) {
                    continue;
                }
                if !rule.conditions.is_empty() && !evaluate_conditions(&rule.conditions, args) {
                    continue;
                }
                matches.push(json!({
                    "tool": rule.tool,
                    "decision": rule.decision.as_str(),
                    "conditions": rule
                        .conditions
                        .iter()
                        .map(|c| json!([c.kind.as_str(), c.pattern]))
                        .collect::<Vec<_>>(),
                    "description": rule.description,
                }));
            }
        }
        matches
    }
}

fn parse_file(path: &Path) -> Result<Value, PolicyError> {
    let text = std::fs::read_to_string(path).map_err(|e| PolicyError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();
    match ext.as_str() {
        "yml" | "yaml" => serde_yaml::from_str(&text).map_err(|e| PolicyError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        }),
        "toml" => toml::from_str(&text).map_err(|e| PolicyError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        }),
        _ => Err(PolicyError::UnsupportedFormat(path.to_path_buf())),
    }
}

fn build_policy(raw: &Value) -> Result<Policy, PolicyError> {
    let mut rules = Vec::new();
    if let Some(raw_rules) = raw["rules"].as_array() {
        for rule in raw_rules {
            let tool = rule["tool"].as_str().unwrap_or("*").to_string();
            let decision_str = rule["decision"].as_str().unwrap_or("ask");
            let decision = PermissionDecision::parse(decision_str).unwrap_or_else(|| {
                warn!(decision = decision_str, "unknown policy decision, defaulting to ask");
                PermissionDecision::Ask
            });

            let mut conditions = Vec::new();
            if let Some(when) = rule["when"].as_object() {
                for (field, pattern) in when {
                    let pattern = match pattern {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    match Condition::compile(field, &pattern) {
                        Ok(condition) => conditions.push(condition),
                        // The regex length ceiling is a hard load-time
                        // boundary; dropping the condition would silently
                        // widen the rule instead.
                        Err(e @ PolicyError::OversizedPattern { .. }) => return Err(e),
                        Err(e) => {
                            warn!(field = %field, error = %e, "skipping invalid policy condition");
                        }
                    }
                }
            }

            rules.push(PolicyRule {
                tool,
                decision,
                conditions,
                description: rule["description"].as_str().unwrap_or("").to_string(),
            });
        }
    }

    let defaults = raw["defaults"]
        .as_object()
        .map(|m| {
            m.iter()
                .map(|(k, v)| {
                    let v = match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    (k.clone(), v)
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(Policy {
        version: raw["version"].as_u64().unwrap_or(1) as u32,
        rules,
        defaults,
        inherit_from: raw["inherit_from"].as_str().map(|s| s.to_string()),
    })
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
