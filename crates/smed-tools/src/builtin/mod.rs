// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod ask_user;
mod bash;
mod checkpoint;
mod edit;
mod glob;
mod grep;
mod read;
mod web_fetch;
mod write;

pub use ask_user::{AskUserTool, UserPrompt};
pub use bash::BashTool;
pub use checkpoint::CheckpointTool;
pub use edit::EditTool;
pub use glob::GlobTool;
pub use grep::GrepTool;
pub use read::ReadTool;
pub use web_fetch::WebFetchTool;
pub use write::WriteTool;

pub(crate) use glob::glob_to_regex;

/// Directory names skipped during glob and grep traversal.
pub(crate) const IGNORED_DIRS: &[&str] = &[".git", "node_modules", "__pycache__", ".venv"];
