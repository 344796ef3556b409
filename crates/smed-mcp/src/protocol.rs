// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! MCP wire helpers.
//!
//! The wire format is JSON-RPC 2.0, one message per line, and its field
//! names are fixed by the protocol. What lives here is this client's
//! minimal view of it: builders for the outgoing lines we send and parsers
//! for the three payloads the core actually consumes (replies, tool
//! listings, call results). Servers may send richer structures; anything we
//! do not understand degrades to defaults instead of failing the parse.

use serde_json::{json, Value};

/// MCP protocol revision spoken during `initialize`.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

// ─── Outgoing lines ───────────────────────────────────────────────────────────

/// Serialise a request line. Requests carry an `id` and expect a reply.
pub fn request_line(id: u64, method: &str, params: Option<Value>) -> String {
    let mut msg = json!({ "jsonrpc": "2.0", "id": id, "method": method });
    if let Some(params) = params {
        msg["params"] = params;
    }
    msg.to_string()
}

/// Serialise a notification line. No `id`, no reply expected.
pub fn notification_line(method: &str) -> String {
    json!({ "jsonrpc": "2.0", "method": method }).to_string()
}

/// Parameters for the `initialize` handshake request.
pub fn initialize_params() -> Value {
    json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {},
        "clientInfo": {
            "name": "smed",
            "version": env!("CARGO_PKG_VERSION"),
        },
    })
}

// ─── Incoming replies ─────────────────────────────────────────────────────────

/// The error object of a failed reply.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcFailure {
    pub code: i64,
    pub message: String,
}

impl std::fmt::Display for RpcFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "server error {}: {}", self.code, self.message)
    }
}

/// A reply to one of our requests, matched back to the caller by `id`.
#[derive(Debug)]
pub struct RpcReply {
    pub id: u64,
    pub outcome: Result<Value, RpcFailure>,
}

/// Parse one line from the server.
///
/// Returns `None` for everything that is not a reply to one of our
/// requests: notifications, server-initiated requests (they carry both an
/// `id` and a `method`), and plain log noise on stdout. We only ever issue
/// numeric ids, so replies with non-numeric ids cannot be ours either.
pub fn parse_reply(line: &str) -> Option<RpcReply> {
    let msg: Value = serde_json::from_str(line.trim()).ok()?;
    let id = msg.get("id")?.as_u64()?;
    if msg.get("method").is_some() {
        return None;
    }
    let outcome = match msg.get("error") {
        Some(error) => Err(RpcFailure {
            code: error["code"].as_i64().unwrap_or(0),
            message: error["message"].as_str().unwrap_or("").to_string(),
        }),
        None => Ok(msg.get("result").cloned().unwrap_or(Value::Null)),
    };
    Some(RpcReply { id, outcome })
}

// ─── Result payloads ──────────────────────────────────────────────────────────

/// One tool advertised by a server via `tools/list`.
#[derive(Debug, Clone)]
pub struct AdvertisedTool {
    pub name: String,
    pub description: String,
    /// JSON Schema of the arguments object.
    pub input_schema: Value,
}

/// Extract the advertised tools from a `tools/list` result.
///
/// Entries without a name are dropped; a missing description or schema gets
/// an empty default so sparse servers still register.
pub fn parse_tool_listing(result: &Value) -> Vec<AdvertisedTool> {
    let Some(entries) = result["tools"].as_array() else {
        return Vec::new();
    };
    entries
        .iter()
        .filter_map(|entry| {
            let name = entry["name"].as_str()?;
            Some(AdvertisedTool {
                name: name.to_string(),
                description: entry["description"].as_str().unwrap_or("").to_string(),
                input_schema: entry
                    .get("inputSchema")
                    .cloned()
                    .unwrap_or_else(|| json!({ "type": "object", "properties": {} })),
            })
        })
        .collect()
}

/// Flatten a `tools/call` result into `(text, is_error)`.
///
/// The result carries a list of content blocks; the core takes the
/// concatenated text of them and honours the `isError` flag. Non-text
/// blocks are skipped.
pub fn flatten_call_result(result: &Value) -> (String, bool) {
    let is_error = result["isError"].as_bool().unwrap_or(false);
    let text = result["content"]
        .as_array()
        .map(|blocks| {
            blocks
                .iter()
                .filter_map(|block| block["text"].as_str())
                .filter(|t| !t.is_empty())
                .collect::<Vec<_>>()
                .join("\n")
        })
        .unwrap_or_default();
    if text.is_empty() {
        ("No output".to_string(), is_error)
    } else {
        (text, is_error)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
