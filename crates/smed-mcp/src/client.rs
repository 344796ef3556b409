// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use smed_config::McpServerConfig;
use smed_model::{ToolDef, ToolParam};
use smed_tools::ToolResultData;

use crate::manager::McpError;
use crate::protocol::{self, AdvertisedTool};
use crate::transport::StdioTransport;

/// One connected MCP server: transport plus the tools it advertised.
pub struct McpClient {
    pub name: String,
    tools: Vec<ToolDef>,
    transport: StdioTransport,
}

impl McpClient {
    /// Spawn the server, run the initialisation handshake, and discover its
    /// tools.
    pub async fn connect(name: &str, config: &McpServerConfig) -> Result<Self, McpError> {
        let transport = StdioTransport::launch(config)?;

        let init = transport
            .request("initialize", Some(protocol::initialize_params()))
            .await
            .map_err(|e| McpError::Protocol(format!("initialize failed: {e}")))?;
        debug!(
            server = name,
            remote = init["serverInfo"]["name"].as_str().unwrap_or("?"),
            "MCP initialize handshake complete"
        );

        transport.notify("notifications/initialized").await?;

        let tools = match transport.request("tools/list", None).await {
            Ok(listing) => protocol::parse_tool_listing(&listing)
                .iter()
                .map(|t| convert_tool_def(name, t))
                .collect(),
            Err(e) => {
                warn!(server = name, error = %e, "tools/list failed; no tools registered");
                Vec::new()
            }
        };

        info!(server = name, tool_count = tools.len(), "MCP server connected");
        Ok(Self {
            name: name.to_string(),
            tools,
            transport,
        })
    }

    /// Tool definitions, already carrying the `mcp__<server>__` prefix.
    pub fn tools(&self) -> &[ToolDef] {
        &self.tools
    }

    pub fn is_alive(&self) -> bool {
        self.transport.is_alive()
    }

    /// Call a tool by its short (unprefixed) name.
    pub async fn call_tool(&self, short_name: &str, args: Value) -> ToolResultData {
        let params = json!({ "name": short_name, "arguments": args });
        match self.transport.request("tools/call", Some(params)).await {
            Ok(result) => {
                let (content, is_error) = protocol::flatten_call_result(&result);
                ToolResultData {
                    content,
                    is_error,
                    display: None,
                }
            }
            Err(e) => ToolResultData::error(format!("MCP tool error: {e}")),
        }
    }

    pub async fn disconnect(&self) {
        self.transport.shutdown().await;
    }
}

/// Convert an advertised tool into the neutral form, prefixing the name
/// with `mcp__<server>__` and lifting its input schema into parameters.
fn convert_tool_def(server: &str, tool: &AdvertisedTool) -> ToolDef {
    let mut parameters = Vec::new();
    if let Some(properties) = tool.input_schema["properties"].as_object() {
        let required: Vec<&str> = tool.input_schema["required"]
            .as_array()
            .map(|a| a.iter().filter_map(|v| v.as_str()).collect())
            .unwrap_or_default();
        for (pname, pschema) in properties {
            let mut param = ToolParam {
                name: pname.clone(),
                json_type: pschema["type"].as_str().unwrap_or("string").to_string(),
                description: pschema["description"].as_str().unwrap_or("").to_string(),
                required: required.contains(&pname.as_str()),
                enum_values: None,
                default: None,
                items: None,
            };
            if let Some(values) = pschema["enum"].as_array() {
                param.enum_values = Some(
                    values
                        .iter()
                        .filter_map(|v| v.as_str().map(|s| s.to_string()))
                        .collect(),
                );
            }
            if param.json_type == "array" {
                param.items = pschema.get("items").cloned();
            }
            parameters.push(param);
        }
        // serde_json maps sort keys; keep required parameters first for a
        // stable, readable schema.
        parameters.sort_by(|a, b| b.required.cmp(&a.required).then(a.name.cmp(&b.name)));
    }

    let description = if tool.description.is_empty() {
        format!("MCP tool from {server}")
    } else {
        tool.description.clone()
    };
    ToolDef::new(&format!("mcp__{server}__{}", tool.name), &description, parameters)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
