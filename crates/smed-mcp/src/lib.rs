// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! MCP client: external tool servers over stdio JSON-RPC.
//!
//! Each configured server runs as a subprocess. After the initialisation
//! handshake its tools are registered under `mcp__<server>__<tool>`; the
//! manager routes calls back by splitting that prefix. When any MCP tools
//! exist, the `ToolSearch` meta-tool lets the model discover them without
//! every definition occupying context.

pub mod client;
pub mod manager;
pub mod protocol;
pub mod tool_search;
pub mod transport;

pub use client::McpClient;
pub use manager::{McpError, McpManager};
pub use tool_search::ToolSearchTool;
pub use transport::{StdioTransport, TransportError};
