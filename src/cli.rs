// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;

use clap::Parser;

/// A multi-provider CLI coding agent runtime.
#[derive(Parser, Debug)]
#[command(name = "smed", version, about)]
pub struct Cli {
    /// The instruction for the agent.
    pub prompt: Vec<String>,

    /// Model provider: anthropic, openai, google, or mock.
    #[arg(long, short = 'p', default_value = "anthropic")]
    pub provider: String,

    /// Model id (defaults to the provider's catalog default).
    #[arg(long, short = 'm')]
    pub model: Option<String>,

    /// Working directory for the run.
    #[arg(long, short = 'C')]
    pub cwd: Option<PathBuf>,

    /// Permission mode: default, accept_edits, plan, or bypass.
    #[arg(long, default_value = "default")]
    pub permission_mode: String,

    /// Resume an existing session by id.
    #[arg(long, short = 's')]
    pub session: Option<String>,

    /// Maximum provider turns before the run stops.
    #[arg(long, default_value_t = 100)]
    pub max_turns: u32,

    /// Policy files evaluated between explicit rules and mode defaults.
    #[arg(long)]
    pub policy: Vec<PathBuf>,

    /// Enable the hash-chained audit log.
    #[arg(long)]
    pub audit: bool,

    /// Print provider/tool events verbosely to stderr.
    #[arg(long, short = 'v')]
    pub verbose: bool,
}
