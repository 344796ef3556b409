// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SandboxMode {
    None,
    Process,
    Docker,
}

impl Default for SandboxMode {
    fn default() -> Self {
        Self::Process
    }
}

/// Resource limits applied to sandboxed execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    pub max_memory_mb: u64,
    pub max_cpu_seconds: u64,
    pub max_processes: u64,
    pub max_file_size_mb: u64,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_memory_mb: 512,
            max_cpu_seconds: 30,
            max_processes: 64,
            max_file_size_mb: 100,
        }
    }
}

/// Network access policy for sandboxed execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkPolicy {
    pub allow_network: bool,
    #[serde(default)]
    pub allowed_hosts: Vec<String>,
}

/// Complete sandbox policy combining all restrictions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxPolicy {
    pub mode: SandboxMode,
    #[serde(default)]
    pub allowed_paths: Vec<PathBuf>,
    /// Substrings that block a command outright (whitespace-normalised).
    #[serde(default)]
    pub blocked_commands: Vec<String>,
    #[serde(default)]
    pub resource_limits: ResourceLimits,
    #[serde(default)]
    pub network: NetworkPolicy,
    #[serde(default = "default_docker_image")]
    pub docker_image: String,
    /// Environment variables removed before a sandboxed child starts.
    #[serde(default = "default_strip_env")]
    pub strip_env: Vec<String>,
}

fn default_docker_image() -> String {
    "debian:bookworm-slim".into()
}

fn default_strip_env() -> Vec<String> {
    [
        "ANTHROPIC_API_KEY",
        "OPENAI_API_KEY",
        "GOOGLE_API_KEY",
        "AWS_SECRET_ACCESS_KEY",
        "GITHUB_TOKEN",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Default for SandboxPolicy {
    fn default() -> Self {
        Self {
            mode: SandboxMode::Process,
            allowed_paths: Vec::new(),
            blocked_commands: Vec::new(),
            resource_limits: ResourceLimits::default(),
            network: NetworkPolicy::default(),
            docker_image: default_docker_image(),
            strip_env: default_strip_env(),
        }
    }
}
