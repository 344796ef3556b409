// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use regex::Regex;
use serde_json::Value;

use crate::policy::PolicyError;
use crate::rules::glob_match;

/// Ceiling on `content_matches` regex length, as ReDoS mitigation.
pub const MAX_REGEX_LEN: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionKind {
    CommandMatches,
    PathMatches,
    NotPathMatches,
    ContentMatches,
}

impl ConditionKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "command_matches" => Some(Self::CommandMatches),
            "path_matches" => Some(Self::PathMatches),
            "not_path_matches" => Some(Self::NotPathMatches),
            "content_matches" => Some(Self::ContentMatches),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CommandMatches => "command_matches",
            Self::PathMatches => "path_matches",
            Self::NotPathMatches => "not_path_matches",
            Self::ContentMatches => "content_matches",
        }
    }
}

/// A single condition evaluated against tool-call arguments.
///
/// `content_matches` patterns are regexes, compiled eagerly at policy load
/// so invalid or oversized patterns are rejected before they can be relied
/// on; the other kinds are shell globs.
#[derive(Debug, Clone)]
pub struct Condition {
    pub kind: ConditionKind,
    pub pattern: String,
    compiled: Option<Regex>,
}

impl Condition {
    pub fn compile(field: &str, pattern: &str) -> Result<Self, PolicyError> {
        let kind = ConditionKind::parse(field)
            .ok_or_else(|| PolicyError::UnknownCondition(field.to_string()))?;
        let compiled = if kind == ConditionKind::ContentMatches {
            if pattern.len() > MAX_REGEX_LEN {
                return Err(PolicyError::OversizedPattern {
                    len: pattern.len(),
                    max: MAX_REGEX_LEN,
                });
            }
            Some(Regex::new(pattern).map_err(|e| PolicyError::InvalidRegex(e.to_string()))?)
        } else {
            None
        };
        Ok(Self {
            kind,
            pattern: pattern.to_string(),
            compiled,
        })
    }

    pub fn evaluate(&self, args: &Value) -> bool {
        let arg = |key: &str| {
            args.get(key)
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string()
        };
        match self.kind {
            ConditionKind::CommandMatches => glob_match(&self.pattern, &arg("command")),
            ConditionKind::PathMatches => glob_match(&self.pattern, &arg("file_path")),
            ConditionKind::NotPathMatches => !glob_match(&self.pattern, &arg("file_path")),
            ConditionKind::ContentMatches => match &self.compiled {
                Some(re) => re.is_match(&arg("content")),
                None => false,
            },
        }
    }
}

/// Evaluate all conditions with AND logic.
pub fn evaluate_conditions(conditions: &[Condition], args: &Value) -> bool {
    conditions.iter().all(|c| c.evaluate(args))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn command_matches_globs_command_arg() {
        let c = Condition::compile("command_matches", "rm *").unwrap();
        assert!(c.evaluate(&json!({"command": "rm -rf /"})));
        assert!(!c.evaluate(&json!({"command": "ls"})));
    }

    #[test]
    fn path_matches_and_inverse() {
        let c = Condition::compile("path_matches", "/etc/*").unwrap();
        assert!(c.evaluate(&json!({"file_path": "/etc/hosts"})));
        let inv = Condition::compile("not_path_matches", "/etc/*").unwrap();
        assert!(!inv.evaluate(&json!({"file_path": "/etc/hosts"})));
        assert!(inv.evaluate(&json!({"file_path": "/home/me/x"})));
    }

    #[test]
    fn content_matches_is_regex() {
        let c = Condition::compile("content_matches", r"(?i)api[_-]?key").unwrap();
        assert!(c.evaluate(&json!({"content": "my API_KEY = 123"})));
        assert!(!c.evaluate(&json!({"content": "nothing here"})));
    }

    #[test]
    fn oversized_content_regex_rejected_at_compile() {
        let big = "a".repeat(MAX_REGEX_LEN + 1);
        let err = Condition::compile("content_matches", &big).err().unwrap();
        assert!(matches!(err, PolicyError::OversizedPattern { .. }));
    }

    #[test]
    fn invalid_regex_rejected_at_compile() {
        assert!(matches!(
            Condition::compile("content_matches", "(unclosed"),
            Err(PolicyError::InvalidRegex(_))
        ));
    }

    #[test]
    fn unknown_field_rejected() {
        assert!(matches!(
            Condition::compile("mood_matches", "*"),
            Err(PolicyError::UnknownCondition(_))
        ));
    }

    #[test]
    fn conditions_and_combine() {
        let cs = vec![
            Condition::compile("command_matches", "git *").unwrap(),
            Condition::compile("not_path_matches", "/etc/*").unwrap(),
        ];
        assert!(evaluate_conditions(
            &cs,
            &json!({"command": "git status", "file_path": "/repo/a"})
        ));
        assert!(!evaluate_conditions(
            &cs,
            &json!({"command": "git status", "file_path": "/etc/passwd"})
        ));
        assert!(!evaluate_conditions(
            &cs,
            &json!({"command": "cargo build", "file_path": "/repo/a"})
        ));
    }

    #[test]
    fn missing_args_evaluate_against_empty_string() {
        let c = Condition::compile("command_matches", "*").unwrap();
        assert!(c.evaluate(&json!({})));
        let strict = Condition::compile("command_matches", "rm*").unwrap();
        assert!(!strict.evaluate(&json!({})));
    }
}
