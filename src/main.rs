// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod cli;

use std::io::Write;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use smed_config::{PermissionMode, RunConfig};
use smed_core::{engine, AgentEvent, EngineOptions};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();
    init_logging(cli.verbose);

    let prompt = cli.prompt.join(" ");
    let permission_mode = PermissionMode::parse(&cli.permission_mode)
        .with_context(|| format!("unknown permission mode: {}", cli.permission_mode))?;

    let config = RunConfig {
        provider: cli.provider,
        model: cli.model,
        permission_mode,
        session_id: cli.session,
        max_turns: cli.max_turns,
        cwd: cli.cwd,
        policy_files: cli.policy,
        audit_enabled: cli.audit,
        ..Default::default()
    };

    let mut rx = engine::run(config, &prompt, EngineOptions::default()).await?;
    let mut stdout = std::io::stdout();

    while let Some(event) = rx.recv().await {
        match event {
            AgentEvent::Text { text, is_partial } => {
                if is_partial {
                    print!("{text}");
                    let _ = stdout.flush();
                } else {
                    println!();
                }
            }
            AgentEvent::ToolUse { name, args, .. } => {
                eprintln!("→ {}", smed_core::describe_tool_call(&name, &args));
            }
            AgentEvent::ToolResult {
                content, is_error, ..
            } => {
                if is_error {
                    eprintln!("✗ {}", first_line(&content));
                } else {
                    eprintln!("✓ {}", first_line(&content));
                }
            }
            AgentEvent::Compaction {
                tokens_before,
                tokens_after,
                ..
            } => {
                eprintln!("· context compacted {tokens_before} → {tokens_after} tokens");
            }
            AgentEvent::System { .. } => {}
            AgentEvent::Result(result) => {
                eprintln!(
                    "· session {} | {} turns | {} tool calls | {} tokens | ${:.4} | {}",
                    result.session_id,
                    result.turns,
                    result.tool_calls,
                    result.total_tokens,
                    result.total_cost,
                    result.stop_reason,
                );
                if result.stop_reason == "error" {
                    anyhow::bail!("{}", result.text);
                }
            }
        }
    }
    Ok(())
}

fn first_line(s: &str) -> &str {
    s.lines().next().unwrap_or("")
}

fn init_logging(verbose: bool) {
    let default = if verbose { "smed=debug" } else { "smed=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
