// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::executor::{ExecutionResult, SandboxExecutor};
use crate::policy::SandboxPolicy;

/// Sandbox backend that runs commands as children of the host shell with
/// rlimits installed before exec: address space from `max_memory_mb`, CPU
/// time from `max_cpu_seconds`, process count from `max_processes`. The
/// child gets its own process group so a timeout can kill the whole tree.
pub struct ProcessSandbox {
    policy: SandboxPolicy,
}

impl ProcessSandbox {
    pub fn new(policy: SandboxPolicy) -> Self {
        Self { policy }
    }
}

#[async_trait]
impl SandboxExecutor for ProcessSandbox {
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

        let timeout_sec = if timeout_sec <= 0.0 {
            self.policy.resource_limits.max_cpu_seconds as f64
        } else {
            timeout_sec
        };

        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }

        // Strip credential variables from the inherited environment.
        cmd.env_clear();
        for (key, value) in std::env::vars() {
            if !self.policy.strip_env.iter().any(|s| s == &key) {
                cmd.env(key, value);
            }
        }

        cmd.kill_on_drop(true);
        #[cfg(unix)]
        {
            let limits = self.policy.resource_limits;
            unsafe {
                cmd.pre_exec(move || {
                    // Own process group, so the timeout path can kill the
                    // whole tree with one signal. Limit-install failures are
                    // non-fatal: the limit stays at the inherited value.
                    libc::setpgid(0, 0);

                    let rlim = |value: u64| libc::rlimit {
                        rlim_cur: value,
                        rlim_max: value,
                    };
                    libc::setrlimit(
                        libc::RLIMIT_AS,
                        &rlim(limits.max_memory_mb * 1024 * 1024),
                    );
                    libc::setrlimit(libc::RLIMIT_CPU, &rlim(limits.max_cpu_seconds));
                    #[cfg(target_os = "linux")]
                    libc::setrlimit(libc::RLIMIT_NPROC, &rlim(limits.max_processes));
                    Ok(())
                });
            }
        }

        debug!(command, timeout_sec, "process sandbox exec");

        let child = match cmd.spawn() {
            Ok(c) => c,
            Err(e) => return ExecutionResult::failed(format!("Failed to start process: {e}")),
        };
        let pid = child.id();

        let waited = tokio::time::timeout(
            Duration::from_secs_f64(timeout_sec),
            child.wait_with_output(),
        )
        .await;

        let output = match waited {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return ExecutionResult::failed(format!("Failed to collect output: {e}"))
            }
            Err(_) => {
                // Kill the whole process group, then the direct child as a
                // fallback for platforms without group kill.
                #[cfg(unix)]
                if let Some(pid) = pid {
                    unsafe {
                        libc::kill(-(pid as i32), libc::SIGKILL);
                    }
                }
                return ExecutionResult {
                    stdout: String::new(),
                    exit_code: -1,
                    timed_out: true,
                    error: Some(format!("Command timed out after {timeout_sec}s")),
                    ..Default::default()
                };
            }
        };

        let mut stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.is_empty() {
            stdout.push_str(&stderr);
        }
        let exit_code = output.status.code().unwrap_or(-1);

        ExecutionResult {
            stdout,
            exit_code,
            timed_out: false,
            // Exit 137 = killed by SIGKILL, which on a memory-limited child
            // almost always means the OOM path fired.
            oom_killed: exit_code == 137,
            error: None,
        }
    }

    async fn cleanup(&self) {
        // Nothing persistent to release for the process backend.
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
