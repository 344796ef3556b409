// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Tool dispatch and the built-in tool set.
//!
//! Tools declare their schema once; the registry validates arguments
//! against it before dispatch, so each tool's `execute` works with a typed
//! view of its inputs and unknown names come back as error results instead
//! of panics.

pub mod builtin;
pub mod registry;
pub mod tool;

pub use builtin::{
    AskUserTool, BashTool, CheckpointTool, EditTool, GlobTool, GrepTool, ReadTool, UserPrompt,
    WebFetchTool, WriteTool,
};
pub use registry::ToolRegistry;
pub use tool::{Tool, ToolContext, ToolResultData};
