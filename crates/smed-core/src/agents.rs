// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Sub-agent lifecycle: registry of agent types plus the manager that runs
//! nested loops with a filtered toolset and a fresh session.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::debug;

use smed_audit::AuditLogger;
use smed_config::{AgentDef, PermissionMode, RunConfig};
use smed_model::ProviderAdapter;
use smed_permissions::{PermissionConfig, PermissionManager};
use smed_session::Session;
use smed_tools::ToolRegistry;

use crate::agent::{AgentLoop, LoopParts};
use crate::events::AgentEvent;
use crate::hooks::HookManager;
use crate::prompts;

/// The built-in agent types.
pub fn builtin_agents() -> Vec<AgentDef> {
    vec![
        AgentDef {
            name: "general".into(),
            description: "General-purpose agent with full tool access.".into(),
            model: None,
            tools: ["Read", "Write", "Edit", "Bash", "Glob", "Grep"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            system_prompt: None,
            max_turns: 50,
            read_only: false,
        },
        AgentDef {
            name: "explore".into(),
            description: "Fast read-only agent for codebase exploration.".into(),
            model: None,
            tools: ["Read", "Glob", "Grep"].iter().map(|s| s.to_string()).collect(),
            system_prompt: None,
            max_turns: 20,
            read_only: true,
        },
        AgentDef {
            name: "plan".into(),
            description: "Read-only agent for designing implementation plans.".into(),
            model: None,
            tools: ["Read", "Glob", "Grep"].iter().map(|s| s.to_string()).collect(),
            system_prompt: Some(
                "You are a planning agent. Explore the codebase and design an \
                 implementation plan. Do NOT make any changes — only read and analyze."
                    .into(),
            ),
            max_turns: 30,
            read_only: true,
        },
    ]
}

pub fn get_agent_def(name: &str) -> Option<AgentDef> {
    builtin_agents().into_iter().find(|a| a.name == name)
}

/// Spawns and runs sub-agents: nested agent loops reusing the parent's
/// provider with filtered tools and fresh context.
pub struct AgentManager {
    provider: Arc<dyn ProviderAdapter>,
    tools: Arc<ToolRegistry>,
    cwd: PathBuf,
    context_window: usize,
    sessions_dir: PathBuf,
}

impl AgentManager {
    pub fn new(
        provider: Arc<dyn ProviderAdapter>,
        tools: Arc<ToolRegistry>,
        cwd: PathBuf,
        context_window: usize,
        sessions_dir: PathBuf,
    ) -> Self {
        Self {
            provider,
            tools,
            cwd,
            context_window,
            sessions_dir,
        }
    }

    /// Run one sub-agent to completion; returns its final assistant text.
    pub async fn spawn(&self, agent_name: &str, prompt: &str) -> anyhow::Result<String> {
        let def = get_agent_def(agent_name).ok_or_else(|| {
            let available: Vec<String> =
                builtin_agents().into_iter().map(|a| a.name).collect();
            anyhow::anyhow!(
                "Unknown agent type: '{agent_name}'. Available: {}",
                available.join(", ")
            )
        })?;
        self.run_agent(&def, prompt).await
    }

    /// Run several sub-agents concurrently; results come back in input
    /// order.
    pub async fn spawn_parallel(
        &self,
        tasks: Vec<(String, String)>,
    ) -> anyhow::Result<Vec<String>> {
        let futures: Vec<_> = tasks
            .iter()
            .map(|(name, prompt)| self.spawn(name, prompt))
            .collect();
        futures::future::join_all(futures)
            .await
            .into_iter()
            .collect()
    }

    async fn run_agent(&self, def: &AgentDef, prompt: &str) -> anyhow::Result<String> {
        debug!(agent = %def.name, "spawning sub-agent");

        let filtered = if def.tools.is_empty() {
            self.tools.filter(&self.tools.names())
        } else {
            self.tools.filter(&def.tools)
        };

        // Read-only agents run fenced in plan mode; the rest bypass
        // approval prompts; a sub-agent has no user to ask.
        let permission_mode = if def.read_only {
            PermissionMode::Plan
        } else {
            PermissionMode::Bypass
        };

        let config = RunConfig {
            provider: "inherited".into(),
            model: def.model.clone(),
            tools: filtered.names(),
            permission_mode,
            max_turns: def.max_turns,
            cwd: Some(self.cwd.clone()),
            system_prompt: def.system_prompt.clone(),
            ..Default::default()
        };

        let session = Session::open(&self.sessions_dir, None, &self.cwd.to_string_lossy())?;
        let system = prompts::system_prompt(&self.cwd, def.system_prompt.as_deref());
        let permissions =
            PermissionManager::new(permission_mode, PermissionConfig::default(), None);

        let mut agent_loop = AgentLoop::new(LoopParts {
            provider: Arc::clone(&self.provider),
            tools: Arc::new(filtered),
            config,
            session,
            context_window: self.context_window,
            permissions,
            mcp: None,
            hooks: HookManager::empty(),
            steering: None,
            approval: None,
            audit: AuditLogger::disabled(),
            sandbox: None,
            system,
            extra_tool_defs: Vec::new(),
            cwd: self.cwd.clone(),
        });

        // Drain events concurrently so a chatty sub-agent can never fill the
        // channel and deadlock against its own consumer.
        let (tx, mut rx) = mpsc::channel::<AgentEvent>(256);
        let collector = tokio::spawn(async move {
            let mut final_text = String::new();
            while let Some(event) = rx.recv().await {
                match event {
                    AgentEvent::Text {
                        text,
                        is_partial: false,
                    } => final_text = text,
                    AgentEvent::Result(result) => {
                        if final_text.is_empty() {
                            final_text = result.text;
                        }
                    }
                    _ => {}
                }
            }
            final_text
        });

        agent_loop.run(prompt, tx, None).await;
        let text = collector.await?;

        Ok(if text.is_empty() {
            "(No response from sub-agent)".to_string()
        } else {
            text
        })
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
