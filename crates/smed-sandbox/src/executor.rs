// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::docker::DockerSandbox;
use crate::policy::{SandboxMode, SandboxPolicy};
use crate::process::ProcessSandbox;

/// Result of one sandboxed command execution.
#[derive(Debug, Clone, Default)]
pub struct ExecutionResult {
    /// Combined stdout + stderr.
    pub stdout: String,
    pub exit_code: i32,
    pub timed_out: bool,
    pub oom_killed: bool,
    /// Set when the command never ran (validation failure, spawn error).
    pub error: Option<String>,
}

impl ExecutionResult {
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            exit_code: -1,
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

#[async_trait]
pub trait SandboxExecutor: Send + Sync {
    fn policy(&self) -> &SandboxPolicy;

    /// Execute a command in the sandbox.
    async fn execute(
        &self,
        command: &str,
        cwd: Option<&Path>,
        timeout_sec: f64,
    ) -> ExecutionResult;

    /// Check a command against the blocked list. Returns an error message
    /// when it must not run.
    ///
    /// Whitespace runs are collapsed before substring matching so that
    /// `rm  -rf  /` cannot slip past a rule written as `rm -rf /`.
    fn validate_command(&self, command: &str) -> Option<String> {
        let normalised = normalise_whitespace(command);
        for blocked in &self.policy().blocked_commands {
            if normalised.contains(&normalise_whitespace(blocked)) {
                return Some(format!(
                    "Command blocked by sandbox policy: contains '{blocked}'"
                ));
            }
        }
        None
    }

    /// Release sandbox resources. Called on every exit path.
    async fn cleanup(&self);
}

fn normalise_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Build the executor matching the policy mode.
pub fn create_executor(policy: SandboxPolicy) -> anyhow::Result<Arc<dyn SandboxExecutor>> {
    match policy.mode {
        SandboxMode::Process => Ok(Arc::new(ProcessSandbox::new(policy))),
        SandboxMode::Docker => Ok(Arc::new(DockerSandbox::new(policy))),
        SandboxMode::None => anyhow::bail!("sandbox mode 'none' has no executor"),
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
