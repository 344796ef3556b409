// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Run assembly: build the provider, tools, permissions, sandbox, session,
//! audit and hook plumbing from a [`RunConfig`], drive the loop in a
//! background task, and guarantee teardown on every exit path, including
//! panics inside the loop.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use futures::FutureExt;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, warn};

use smed_audit::AuditLogger;
use smed_config::RunConfig;
use smed_mcp::{McpManager, ToolSearchTool};
use smed_model::{
    catalog, AnthropicAdapter, GoogleAdapter, MockProvider, ModelRouter, OpenAiAdapter,
    ProviderAdapter, RoutingStrategy, TokenBudgetTracker,
};
use smed_permissions::{PermissionConfig, PermissionManager, PolicyEngine};
use smed_sandbox::{create_executor, SandboxExecutor, SandboxMode, SandboxPolicy};
use smed_session::Session;
use smed_tools::{AskUserTool, CheckpointTool, ToolRegistry, UserPrompt, WebFetchTool};

use crate::agent::{AgentLoop, LoopParts};
use crate::agents::AgentManager;
use crate::approval::ApprovalHandler;
use crate::events::{AgentEvent, RunResult};
use crate::hooks::HookManager;
use crate::prompts;
use crate::steering::SteeringReceiver;
use crate::task_tool::TaskTool;

/// Capacity of the output event channel; the producer blocks (back-
/// pressure) when the consumer lags this far behind.
const EVENT_BUFFER: usize = 16;

/// Host-supplied collaborators for one run. Everything is optional.
#[derive(Default)]
pub struct EngineOptions {
    pub approval: Option<Arc<dyn ApprovalHandler>>,
    pub steering: Option<SteeringReceiver>,
    pub cancel: Option<oneshot::Receiver<()>>,
    /// Pre-built provider; skips construction from config.
    pub provider: Option<Arc<dyn ProviderAdapter>>,
    /// Prompt callback backing the AskUser tool.
    pub user_prompt: Option<Arc<dyn UserPrompt>>,
    /// Sandbox policy; `mode: none` (or `None` here) disables sandboxing.
    pub sandbox: Option<SandboxPolicy>,
    pub sessions_dir: Option<PathBuf>,
    pub audit_dir: Option<PathBuf>,
}

/// Start a run. Returns the ordered event stream; the final event is
/// always [`AgentEvent::Result`].
pub async fn run(
    config: RunConfig,
    prompt: &str,
    opts: EngineOptions,
) -> anyhow::Result<mpsc::Receiver<AgentEvent>> {
    anyhow::ensure!(!prompt.trim().is_empty(), "prompt must not be empty");

    let cwd = match &config.cwd {
        Some(dir) => dir.clone(),
        None => std::env::current_dir().context("cannot resolve working directory")?,
    };
    let cwd = cwd
        .canonicalize()
        .with_context(|| format!("working directory does not exist: {}", cwd.display()))?;

    // ── Provider ─────────────────────────────────────────────────────────────
    let provider = match opts.provider {
        Some(p) => p,
        None => build_provider(&config)?,
    };
    let provider: Arc<dyn ProviderAdapter> =
        if config.budget_max_tokens > 0 || config.budget_max_cost > 0.0 {
            Arc::new(ModelRouter::new(
                provider,
                RoutingStrategy::Manual,
                None,
                Arc::new(TokenBudgetTracker::new(
                    config.budget_max_tokens,
                    config.budget_max_cost,
                )),
            ))
        } else {
            provider
        };
    let context_window = catalog::context_window(provider.model_id()) as usize;

    // ── Tools ────────────────────────────────────────────────────────────────
    let mcp = Arc::new(McpManager::from_configs(config.mcp_servers.clone()).await);
    let mcp_tool_defs = mcp.all_tools();

    let mut base = ToolRegistry::new();
    base.register_defaults();
    let mut base = base.filter(&config.tools);
    base.register(WebFetchTool);
    base.register(CheckpointTool);
    base.register(AskUserTool::new(opts.user_prompt));
    if !mcp_tool_defs.is_empty() {
        base.register(ToolSearchTool::new(Arc::clone(&mcp)));
    }
    let base = Arc::new(base);

    // The sub-agent manager gets the registry WITHOUT Task, which bounds
    // nesting to one level.
    let sessions_dir = opts.sessions_dir.unwrap_or_else(smed_session::default_dir);
    let agent_manager = Arc::new(AgentManager::new(
        Arc::clone(&provider),
        Arc::clone(&base),
        cwd.clone(),
        context_window,
        sessions_dir.clone(),
    ));
    let mut tools = base.filter(&base.names());
    tools.register(TaskTool::new(agent_manager));
    let tools = Arc::new(tools);

    // ── Permissions ──────────────────────────────────────────────────────────
    let rule_config = PermissionConfig::from_specs(&config.allow_rules, &config.deny_rules);
    let policy_engine = if config.policy_files.is_empty() {
        None
    } else {
        let mut engine = PolicyEngine::new(false);
        engine
            .load_files(&config.policy_files)
            .context("failed to load policy files")?;
        Some(engine)
    };
    let permissions = PermissionManager::new(config.permission_mode, rule_config, policy_engine);

    // ── Sandbox ──────────────────────────────────────────────────────────────
    let sandbox: Option<Arc<dyn SandboxExecutor>> = match &opts.sandbox {
        Some(policy) if policy.mode != SandboxMode::None => {
            Some(create_executor(policy.clone())?)
        }
        _ => None,
    };

    // ── Session, audit, hooks ────────────────────────────────────────────────
    let mut session = Session::open(
        &sessions_dir,
        config.session_id.as_deref(),
        &cwd.to_string_lossy(),
    )?;
    session.save_metadata(&config.provider, provider.model_id())?;
    let audit = AuditLogger::new(
        &session.session_id,
        opts.audit_dir,
        config.audit_enabled,
        true,
    )?;
    let hooks = HookManager::new(config.hooks.clone());
    let system = prompts::system_prompt(&cwd, config.system_prompt.as_deref());

    let session_id = session.session_id.clone();
    let agent_loop = AgentLoop::new(LoopParts {
        provider,
        tools,
        config,
        session,
        context_window,
        permissions,
        mcp: Some(Arc::clone(&mcp)),
        hooks,
        steering: opts.steering,
        approval: opts.approval,
        audit,
        sandbox: sandbox.clone(),
        system,
        extra_tool_defs: mcp_tool_defs,
        cwd,
    });

    // ── Drive the loop with guaranteed teardown ──────────────────────────────
    let (tx, rx) = mpsc::channel::<AgentEvent>(EVENT_BUFFER);
    let prompt = prompt.to_string();
    let cancel = opts.cancel;
    tokio::spawn(async move {
        let run_tx = tx.clone();
        let outcome = std::panic::AssertUnwindSafe(async move {
            let mut agent_loop = agent_loop;
            agent_loop.run(&prompt, run_tx, cancel).await
        })
        .catch_unwind()
        .await;

        if let Err(panic) = outcome {
            error!("agent loop panicked");
            let text = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "agent loop panicked".to_string());
            let _ = tx
                .send(AgentEvent::Result(RunResult {
                    text,
                    session_id,
                    turns: 0,
                    tool_calls: 0,
                    total_tokens: 0,
                    total_cost: 0.0,
                    stop_reason: "error".into(),
                }))
                .await;
        }

        // Teardown runs on success, error, and panic alike. The session
        // journal needs no flush (every record was written immediately) and
        // the loop closed its own audit handle.
        if let Some(sandbox) = sandbox {
            sandbox.cleanup().await;
        }
        mcp.shutdown_all().await;
    });

    Ok(rx)
}

fn build_provider(config: &RunConfig) -> anyhow::Result<Arc<dyn ProviderAdapter>> {
    let model = config
        .model
        .clone()
        .or_else(|| catalog::default_model(&config.provider).map(|m| m.to_string()));
    let api_key = |env: &str| {
        config
            .api_key
            .clone()
            .or_else(|| std::env::var(env).ok())
    };

    match config.provider.as_str() {
        "anthropic" => {
            let model = model.context("no default model for provider 'anthropic'")?;
            Ok(Arc::new(AnthropicAdapter::new(
                model,
                api_key("ANTHROPIC_API_KEY"),
                config.base_url.clone(),
            )))
        }
        "openai" => {
            let model = model.context("no default model for provider 'openai'")?;
            Ok(Arc::new(OpenAiAdapter::new(
                model,
                api_key("OPENAI_API_KEY"),
                config.base_url.clone(),
            )))
        }
        "google" => {
            let model = model.context("no default model for provider 'google'")?;
            Ok(Arc::new(GoogleAdapter::new(
                model,
                api_key("GOOGLE_API_KEY"),
                config.base_url.clone(),
            )))
        }
        "mock" => Ok(Arc::new(MockProvider)),
        other => {
            warn!(provider = other, "unknown provider name");
            anyhow::bail!("unknown provider: {other}")
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
