// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::process::Stdio;
use std::time::Duration;

use serde_json::Value;
use tracing::debug;

use smed_config::{HookDef, HookEvent};
use smed_permissions::glob_match;

/// Hook result cap for the `{result}` template variable.
const RESULT_TEMPLATE_CAP: usize = 1000;

/// Context passed to hooks when they fire.
#[derive(Debug, Clone, Default)]
pub struct HookContext {
    pub event: Option<HookEvent>,
    pub tool_name: Option<String>,
    pub tool_args: Value,
    pub result: Option<String>,
    pub is_error: bool,
    pub session_id: String,
    pub cwd: String,
}

impl HookContext {
    pub fn new(event: HookEvent, session_id: &str, cwd: &str) -> Self {
        Self {
            event: Some(event),
            session_id: session_id.to_string(),
            cwd: cwd.to_string(),
            ..Default::default()
        }
    }

    pub fn with_tool(mut self, name: &str, args: &Value) -> Self {
        self.tool_name = Some(name.to_string());
        self.tool_args = args.clone();
        self
    }

    pub fn with_result(mut self, result: &str, is_error: bool) -> Self {
        self.result = Some(result.to_string());
        self.is_error = is_error;
        self
    }
}

/// Result from running one hook.
#[derive(Debug, Clone)]
pub struct HookResult {
    pub success: bool,
    pub output: String,
    pub error: Option<String>,
    /// JSON parsed from the hook's stdout, when it emitted an object.
    pub data: Value,
}

/// Registers and executes hooks for lifecycle events.
pub struct HookManager {
    hooks: Vec<HookDef>,
}

impl HookManager {
    pub fn new(hooks: Vec<HookDef>) -> Self {
        Self { hooks }
    }

    pub fn empty() -> Self {
        Self { hooks: Vec::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    fn matches(hook: &HookDef, ctx: &HookContext) -> bool {
        if Some(hook.event) != ctx.event {
            return false;
        }
        match (&hook.matcher, &ctx.tool_name) {
            (Some(matcher), Some(tool)) => glob_match(matcher, tool),
            (Some(_), None) => false,
            (None, _) => true,
        }
    }

    /// Expand template variables, shell-quoted, into the hook command.
    fn expand_command(command: &str, ctx: &HookContext) -> String {
        let arg = |key: &str| {
            ctx.tool_args
                .get(key)
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string()
        };
        let result_text = ctx
            .result
            .as_deref()
            .map(|r| {
                let cut = r
                    .char_indices()
                    .nth(RESULT_TEMPLATE_CAP)
                    .map(|(i, _)| i)
                    .unwrap_or(r.len());
                r[..cut].to_string()
            })
            .unwrap_or_default();
        let event = ctx.event.map(|e| e.as_str()).unwrap_or("");

        let replacements: [(&str, String); 8] = [
            ("{tool_name}", ctx.tool_name.clone().unwrap_or_default()),
            ("{file_path}", arg("file_path")),
            ("{command}", arg("command")),
            ("{pattern}", arg("pattern")),
            ("{result}", result_text),
            ("{session_id}", ctx.session_id.clone()),
            ("{cwd}", ctx.cwd.clone()),
            ("{event}", event.to_string()),
        ];

        let mut expanded = command.to_string();
        for (key, value) in replacements {
            expanded = expanded.replace(key, &shell_quote(&value));
        }
        expanded
    }

    /// Fire every hook matching the context; results in registration order.
    pub async fn fire(&self, ctx: &HookContext) -> Vec<HookResult> {
        let mut results = Vec::new();
        for hook in &self.hooks {
            if Self::matches(hook, ctx) {
                results.push(Self::execute(hook, ctx).await);
            }
        }
        results
    }

    async fn execute(hook: &HookDef, ctx: &HookContext) -> HookResult {
        let command = Self::expand_command(&hook.command, ctx);
        debug!(command = %command, event = hook.event.as_str(), "firing hook");

        let mut cmd = tokio::process::Command::new("sh");
        cmd.arg("-c")
            .arg(&command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if !ctx.cwd.is_empty() {
            cmd.current_dir(&ctx.cwd);
        }

        let child = match cmd.spawn() {
            Ok(c) => c,
            Err(e) => {
                return HookResult {
                    success: false,
                    output: String::new(),
                    error: Some(format!("Hook failed: {e}")),
                    data: Value::Null,
                }
            }
        };

        let waited = tokio::time::timeout(
            Duration::from_secs(hook.timeout_secs),
            child.wait_with_output(),
        )
        .await;

        match waited {
            Ok(Ok(output)) => {
                let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
                let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
                let success = output.status.success();
                // A JSON object on stdout becomes structured result data.
                let data = if stdout.starts_with('{') {
                    serde_json::from_str(&stdout).unwrap_or(Value::Null)
                } else {
                    Value::Null
                };
                HookResult {
                    success,
                    output: stdout,
                    error: (!success && !stderr.is_empty()).then_some(stderr),
                    data,
                }
            }
            Ok(Err(e)) => HookResult {
                success: false,
                output: String::new(),
                error: Some(format!("Hook failed: {e}")),
                data: Value::Null,
            },
            Err(_) => HookResult {
                success: false,
                output: String::new(),
                error: Some(format!(
                    "Hook timed out after {}s: {command}",
                    hook.timeout_secs
                )),
                data: Value::Null,
            },
        }
    }
}

/// Single-quote `value` for the shell; embedded quotes become `'\''`.
fn shell_quote(value: &str) -> String {
    if value.is_empty() {
        return "''".to_string();
    }
    format!("'{}'", value.replace('\'', r"'\''"))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn hook(event: HookEvent, command: &str, matcher: Option<&str>) -> HookDef {
        HookDef {
            event,
            command: command.into(),
            matcher: matcher.map(|s| s.to_string()),
            timeout_secs: 5,
        }
    }

    #[test]
    fn shell_quote_wraps_and_escapes() {
        assert_eq!(shell_quote(""), "''");
        assert_eq!(shell_quote("plain"), "'plain'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }

    #[test]
    fn matcher_filters_by_tool_glob() {
        let h = hook(HookEvent::PreToolUse, "true", Some("Bash"));
        let ctx = HookContext::new(HookEvent::PreToolUse, "s", "/tmp")
            .with_tool("Bash", &json!({}));
        assert!(HookManager::matches(&h, &ctx));

        let other = HookContext::new(HookEvent::PreToolUse, "s", "/tmp")
            .with_tool("Read", &json!({}));
        assert!(!HookManager::matches(&h, &other));

        // A matcher with no tool in context never fires.
        let bare = HookContext::new(HookEvent::PreToolUse, "s", "/tmp");
        assert!(!HookManager::matches(&h, &bare));
    }

    #[test]
    fn event_mismatch_never_fires() {
        let h = hook(HookEvent::SessionEnd, "true", None);
        let ctx = HookContext::new(HookEvent::SessionStart, "s", "/tmp");
        assert!(!HookManager::matches(&h, &ctx));
    }

    #[test]
    fn template_expansion_quotes_values() {
        let ctx = HookContext::new(HookEvent::PreToolUse, "sess1", "/work")
            .with_tool("Bash", &json!({"command": "echo 'hi'"}));
        let expanded = HookManager::expand_command("log {tool_name} {command} {event}", &ctx);
        assert!(expanded.contains("'Bash'"));
        assert!(expanded.contains(r"'echo '\''hi'\'''"));
        assert!(expanded.contains("'pre_tool_use'"));
    }

    #[test]
    fn result_template_is_capped_at_1000_chars() {
        let long = "r".repeat(5000);
        let ctx = HookContext::new(HookEvent::PostToolUse, "s", "/tmp")
            .with_tool("Bash", &json!({}))
            .with_result(&long, false);
        let expanded = HookManager::expand_command("{result}", &ctx);
        // Quoted cap: 1000 chars plus the two quotes.
        assert_eq!(expanded.len(), 1002);
    }

    #[tokio::test]
    async fn fire_runs_matching_hook_and_captures_stdout() {
        let mgr = HookManager::new(vec![hook(
            HookEvent::SessionStart,
            "echo started-{session_id}",
            None,
        )]);
        let ctx = HookContext::new(HookEvent::SessionStart, "abc", "/tmp");
        let results = mgr.fire(&ctx).await;
        assert_eq!(results.len(), 1);
        assert!(results[0].success);
        // The shell consumes the quoting around the substituted value.
        assert_eq!(results[0].output, "started-abc");
    }

    #[tokio::test]
    async fn json_stdout_becomes_data() {
        let mgr = HookManager::new(vec![hook(
            HookEvent::SessionEnd,
            r#"printf '{"decision": "ok"}'"#,
            None,
        )]);
        let ctx = HookContext::new(HookEvent::SessionEnd, "s", "/tmp");
        let results = mgr.fire(&ctx).await;
        assert_eq!(results[0].data["decision"], "ok");
    }

    #[tokio::test]
    async fn failing_hook_reports_error() {
        let mgr = HookManager::new(vec![hook(
            HookEvent::SessionStart,
            "echo bad >&2; exit 3",
            None,
        )]);
        let ctx = HookContext::new(HookEvent::SessionStart, "s", "/tmp");
        let results = mgr.fire(&ctx).await;
        assert!(!results[0].success);
        assert_eq!(results[0].error.as_deref(), Some("bad"));
    }

    #[tokio::test]
    async fn hook_timeout_is_reported() {
        let mut h = hook(HookEvent::SessionStart, "sleep 20", None);
        h.timeout_secs = 1;
        let mgr = HookManager::new(vec![h]);
        let ctx = HookContext::new(HookEvent::SessionStart, "s", "/tmp");
        let results = mgr.fire(&ctx).await;
        assert!(!results[0].success);
        assert!(results[0].error.as_deref().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn non_matching_hooks_do_not_run() {
        let mgr = HookManager::new(vec![hook(HookEvent::PreToolUse, "true", Some("Write"))]);
        let ctx = HookContext::new(HookEvent::PreToolUse, "s", "/tmp")
            .with_tool("Bash", &json!({}));
        assert!(mgr.fire(&ctx).await.is_empty());
    }
}
