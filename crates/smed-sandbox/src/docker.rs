// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::executor::{ExecutionResult, SandboxExecutor};
use crate::policy::SandboxPolicy;

/// Host directories that must never be bind-mounted into a container,
/// directly or as an ancestor of the requested path.
const DANGEROUS_MOUNT_ROOTS: &[&str] = &[
    "/", "/bin", "/boot", "/dev", "/etc", "/lib", "/lib64", "/proc", "/root", "/run", "/sbin",
    "/sys", "/usr", "/var",
];

/// Sandbox backend that drives the docker CLI (no daemon SDK needed).
///
/// Containers run with `--rm`, a memory cap, `--network=none` unless the
/// policy allows network, and one bind mount per allowed path that survives
/// the safety filter. Still-tracked containers are force-removed on
/// `cleanup`.
pub struct DockerSandbox {
    policy: SandboxPolicy,
    container_names: Mutex<Vec<String>>,
}

impl DockerSandbox {
    pub fn new(policy: SandboxPolicy) -> Self {
        Self {
            policy,
            container_names: Mutex::new(Vec::new()),
        }
    }

    /// Reject paths whose canonicalised form is, or lives under, a
    /// dangerous root. Both the textual and the resolved form are checked
    /// because `/etc` may resolve elsewhere on some hosts.
    fn is_safe_mount(path: &Path) -> bool {
        let textual = PathBuf::from(path);
        let resolved = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        for candidate in [&textual, &resolved] {
            let s = candidate.to_string_lossy();
            let trimmed = if s.len() > 1 {
                s.trim_end_matches('/').to_string()
            } else {
                s.to_string()
            };
            for root in DANGEROUS_MOUNT_ROOTS {
                if trimmed == *root {
                    return false;
                }
                if *root != "/" && trimmed.starts_with(&format!("{root}/")) {
                    return false;
                }
            }
        }
        true
    }

    fn build_docker_args(&self, command: &str, cwd: Option<&Path>) -> (Vec<String>, String) {
        let container_name = format!("smed-sandbox-{}", &uuid::Uuid::new_v4().simple().to_string()[..8]);
        let limits = &self.policy.resource_limits;

        let mut args: Vec<String> = vec![
            "run".into(),
            "--rm".into(),
            format!("--name={container_name}"),
            format!("--memory={}m", limits.max_memory_mb),
            format!("--stop-timeout={}", limits.max_cpu_seconds),
        ];

        if !self.policy.network.allow_network {
            args.push("--network=none".into());
        }

        for path in &self.policy.allowed_paths {
            if Self::is_safe_mount(path) {
                let p = path.to_string_lossy();
                args.push("-v".into());
                args.push(format!("{p}:{p}"));
            } else {
                warn!(path = %path.display(), "dropping dangerous bind mount");
            }
        }

        if let Some(dir) = cwd {
            args.push("-w".into());
            args.push(dir.to_string_lossy().into_owned());
        }

        args.push(self.policy.docker_image.clone());
        args.push("sh".into());
        args.push("-c".into());
        args.push(command.to_string());

        (args, container_name)
    }
}

#[async_trait]
impl SandboxExecutor for DockerSandbox {
    fn policy(&self) -> &SandboxPolicy {
        &self.policy
    }

    async fn execute(
        &self,
        command: &str,
        cwd: Option<&Path>,
        timeout_sec: f64,
    ) -> ExecutionResult {
        if let Some(error) = self.validate_command(command) {
            return ExecutionResult {
                stdout: String::new(),
                exit_code: 1,
                error: Some(error),
                ..Default::default()
            };
        }

        let (docker_args, container_name) = self.build_docker_args(command, cwd);
        self.container_names.lock().await.push(container_name.clone());
        debug!(container = %container_name, "docker sandbox exec");

        let child = Command::new("docker")
            .args(&docker_args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn();
        let child = match child {
            Ok(c) => c,
            Err(e) => return ExecutionResult::failed(format!("Failed to run docker: {e}")),
        };

        // Grace period on top of the requested timeout: docker enforces its
        // own --stop-timeout inside.
        let waited = tokio::time::timeout(
            Duration::from_secs_f64(timeout_sec + 10.0),
            child.wait_with_output(),
        )
        .await;

        let output = match waited {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return ExecutionResult::failed(format!("Failed to collect output: {e}"))
            }
            Err(_) => {
                // The wrapper was killed; cleanup() removes the container.
                return ExecutionResult {
                    stdout: String::new(),
                    exit_code: -1,
                    timed_out: true,
                    ..Default::default()
                };
            }
        };

        let mut stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        stdout.push_str(&String::from_utf8_lossy(&output.stderr));
        let exit_code = output.status.code().unwrap_or(-1);

        // Exited normally: stop tracking.
        self.container_names
            .lock()
            .await
            .retain(|n| n != &container_name);

        ExecutionResult {
            stdout,
            exit_code,
            timed_out: false,
            oom_killed: exit_code == 137,
            error: None,
        }
    }

    async fn cleanup(&self) {
        let names: Vec<String> = self.container_names.lock().await.drain(..).collect();
        for name in names {
            let status = Command::new("docker")
                .args(["rm", "-f", &name])
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .await;
            if let Err(e) = status {
                warn!(container = %name, error = %e, "failed to remove container");
            }
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
