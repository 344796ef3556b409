// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;

use serde_json::Value;
use tracing::{info, warn};

use smed_config::McpServerConfig;
use smed_model::ToolDef;
use smed_tools::ToolResultData;

use crate::client::McpClient;
use crate::transport::TransportError;

#[derive(Debug, thiserror::Error)]
pub enum McpError {
    #[error("MCP transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("MCP protocol error: {0}")]
    Protocol(String),
}

/// Holds all MCP server connections and routes prefixed tool calls.
pub struct McpManager {
    clients: HashMap<String, McpClient>,
}

impl McpManager {
    pub fn empty() -> Self {
        Self {
            clients: HashMap::new(),
        }
    }

    /// Connect every configured server. Servers that fail to start are
    /// logged and skipped; a dead optional server must not kill the run.
    pub async fn from_configs(
        configs: impl IntoIterator<Item = (String, McpServerConfig)>,
    ) -> Self {
        let mut clients = HashMap::new();
        for (name, config) in configs {
            info!(server = %name, command = %config.command, "initializing MCP server");
            match McpClient::connect(&name, &config).await {
                Ok(client) => {
                    clients.insert(name, client);
                }
                Err(e) => {
                    warn!(server = %name, error = %e, "failed to initialize MCP server, skipping");
                }
            }
        }
        Self { clients }
    }

    /// All discovered tool definitions across connected servers.
    pub fn all_tools(&self) -> Vec<ToolDef> {
        let mut tools: Vec<ToolDef> = self
            .clients
            .values()
            .filter(|c| c.is_alive())
            .flat_map(|c| c.tools().iter().cloned())
            .collect();
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        tools
    }

    pub fn server_count(&self) -> usize {
        self.clients.len()
    }

    pub fn tool_count(&self) -> usize {
        self.clients
            .values()
            .filter(|c| c.is_alive())
            .map(|c| c.tools().len())
            .sum()
    }

    /// Split `mcp__<server>__<tool>` and find the owning client.
    pub fn route<'a>(&self, tool_name: &'a str) -> Option<(&McpClient, &'a str)> {
        let mut parts = tool_name.splitn(3, "__");
        if parts.next() != Some("mcp") {
            return None;
        }
        let server = parts.next()?;
        let short_name = parts.next()?;
        self.clients.get(server).map(|c| (c, short_name))
    }

    /// Route a prefixed tool call to its server.
    pub async fn call_tool(&self, tool_name: &str, args: Value) -> ToolResultData {
        match self.route(tool_name) {
            Some((client, short_name)) => client.call_tool(short_name, args).await,
            None => ToolResultData::error(format!("No MCP server found for tool: {tool_name}")),
        }
    }

    /// Shut every server down concurrently. Safe to call more than once.
    pub async fn shutdown_all(&self) {
        let shutdowns: Vec<_> = self.clients.values().map(|c| c.disconnect()).collect();
        futures::future::join_all(shutdowns).await;
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
