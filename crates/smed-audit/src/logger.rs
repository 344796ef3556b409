// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::{json, Value};
use sha2::{Digest, Sha256};

/// Genesis value for the first event's `prev_hash`.
const GENESIS_HASH: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditEventType {
    SessionStart,
    SessionEnd,
    ToolCall,
    ToolResult,
    PermissionDecision,
    ProviderCall,
    PiiDetected,
}

impl AuditEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SessionStart => "session_start",
            Self::SessionEnd => "session_end",
            Self::ToolCall => "tool_call",
            Self::ToolResult => "tool_result",
            Self::PermissionDecision => "permission_decision",
            Self::ProviderCall => "provider_call",
            Self::PiiDetected => "pii_detected",
        }
    }
}

/// Append-only audit logger with hash chaining.
///
/// Each event is hashed (SHA-256 over the canonically serialised record
/// without the `hash` field, object keys sorted) and written as one compact
/// JSON line with the hash appended; the next event's `prev_hash` is that
/// hash. The file handle stays open for the lifetime of the logger; call
/// [`AuditLogger::close`] to flush and release it.
pub struct AuditLogger {
    enabled: bool,
    session_id: String,
    log_tool_args: bool,
    prev_hash: String,
    event_count: u64,
    handle: Option<File>,
    path: Option<PathBuf>,
}

impl AuditLogger {
    pub fn new(
        session_id: &str,
        audit_dir: Option<PathBuf>,
        enabled: bool,
        log_tool_args: bool,
    ) -> anyhow::Result<Self> {
        let (handle, path) = if enabled {
            let dir = audit_dir.unwrap_or_else(default_dir);
            std::fs::create_dir_all(&dir)?;
            let path = dir.join(format!("audit-{session_id}.jsonl"));
            let handle = OpenOptions::new().create(true).append(true).open(&path)?;
            (Some(handle), Some(path))
        } else {
            (None, None)
        };
        Ok(Self {
            enabled,
            session_id: session_id.to_string(),
            log_tool_args,
            prev_hash: GENESIS_HASH.to_string(),
            event_count: 0,
            handle,
            path,
        })
    }

    /// A disabled logger: every log call is a no-op.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            session_id: String::new(),
            log_tool_args: false,
            prev_hash: GENESIS_HASH.to_string(),
            event_count: 0,
            handle: None,
            path: None,
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn event_count(&self) -> u64 {
        self.event_count
    }

    pub fn close(&mut self) {
        if let Some(mut handle) = self.handle.take() {
            let _ = handle.flush();
        }
    }

    fn write_event(&mut self, event_type: AuditEventType, data: Value) -> Option<String> {
        let handle = self.handle.as_mut()?;

        let event_id = uuid::Uuid::new_v4().simple().to_string()[..16].to_string();
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let mut event = json!({
            "event_id": event_id,
            "timestamp": timestamp,
            "event_type": event_type.as_str(),
            "session_id": self.session_id,
            "data": data,
            "prev_hash": self.prev_hash,
        });

        let hash = compute_hash(&event);
        event["hash"] = json!(hash);
        self.prev_hash = hash;
        self.event_count += 1;

        let line = canonical_json(&event);
        if handle.write_all(line.as_bytes()).is_err() {
            return None;
        }
        let _ = handle.write_all(b"\n");
        let _ = handle.flush();
        Some(event_id)
    }

    // ── Convenience writers ───────────────────────────────────────────────────

    pub fn log_session_start(&mut self, provider: &str, model: &str) -> Option<String> {
        self.write_event(
            AuditEventType::SessionStart,
            json!({ "provider": provider, "model": model }),
        )
    }

    pub fn log_session_end(
        &mut self,
        turns: u32,
        total_tokens: u64,
        total_cost: f64,
    ) -> Option<String> {
        self.write_event(
            AuditEventType::SessionEnd,
            json!({ "turns": turns, "total_tokens": total_tokens, "total_cost": total_cost }),
        )
    }

    pub fn log_tool_call(&mut self, tool: &str, args: Option<&Value>) -> Option<String> {
        let mut data = json!({ "tool": tool });
        if self.log_tool_args {
            if let Some(args) = args {
                data["args"] = args.clone();
            }
        }
        self.write_event(AuditEventType::ToolCall, data)
    }

    pub fn log_tool_result(
        &mut self,
        tool: &str,
        is_error: bool,
        content_length: usize,
    ) -> Option<String> {
        self.write_event(
            AuditEventType::ToolResult,
            json!({ "tool": tool, "is_error": is_error, "content_length": content_length }),
        )
    }

    pub fn log_permission_decision(
        &mut self,
        tool: &str,
        decision: &str,
        mode: &str,
    ) -> Option<String> {
        self.write_event(
            AuditEventType::PermissionDecision,
            json!({ "tool": tool, "decision": decision, "mode": mode }),
        )
    }

    pub fn log_provider_call(
        &mut self,
        provider: &str,
        model: &str,
        input_tokens: u64,
        output_tokens: u64,
        cost: f64,
    ) -> Option<String> {
        self.write_event(
            AuditEventType::ProviderCall,
            json!({
                "provider": provider,
                "model": model,
                "input_tokens": input_tokens,
                "output_tokens": output_tokens,
                "cost": cost,
            }),
        )
    }

    pub fn log_pii_detected(&mut self, pattern: &str, context: &str) -> Option<String> {
        self.write_event(
            AuditEventType::PiiDetected,
            json!({ "pattern": pattern, "context": context }),
        )
    }
}

impl Drop for AuditLogger {
    fn drop(&mut self) {
        self.close();
    }
}

/// Default audit directory: `~/.smed/audit`.
pub fn default_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".smed")
        .join("audit")
}

/// SHA-256 over the canonical form of `event` with the `hash` field removed.
pub fn compute_hash(event: &Value) -> String {
    let payload = match event {
        Value::Object(map) => {
            let filtered: serde_json::Map<String, Value> = map
                .iter()
                .filter(|(k, _)| k.as_str() != "hash")
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            Value::Object(filtered)
        }
        other => other.clone(),
    };
    let mut hasher = Sha256::new();
    hasher.update(canonical_json(&payload).as_bytes());
    hex::encode(hasher.finalize())
}

/// Deterministic compact JSON: object keys sorted, no insignificant
/// whitespace. Independent of the serializer's map ordering so hashes are
/// stable across serialisations.
pub fn canonical_json(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let fields: Vec<String> = keys
                .into_iter()
                .map(|k| {
                    format!(
                        "{}:{}",
                        serde_json::to_string(k).unwrap_or_default(),
                        canonical_json(&map[k])
                    )
                })
                .collect();
            format!("{{{}}}", fields.join(","))
        }
        Value::Array(items) => {
            let rendered: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", rendered.join(","))
        }
        scalar => serde_json::to_string(scalar).unwrap_or_default(),
    }
}

/// Verify the integrity of an audit log file.
///
/// Re-derives each event's hash and checks the `prev_hash` links starting
/// from the genesis hash. Returns `(valid, errors)`; an unparseable line
/// breaks the chain and stops verification.
pub fn verify_chain(path: &Path) -> (bool, Vec<String>) {
    let mut errors: Vec<String> = Vec::new();
    let text = match std::fs::read_to_string(path) {
        Ok(t) => t,
        Err(e) => return (false, vec![format!("cannot read {}: {e}", path.display())]),
    };

    let mut expected_prev = GENESIS_HASH.to_string();
    for (lineno, line) in text.lines().enumerate() {
        let lineno = lineno + 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let event: Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(e) => {
                errors.push(format!("Line {lineno}: invalid JSON — {e}"));
                break;
            }
        };

        let stored_hash = event["hash"].as_str().unwrap_or("").to_string();
        let recomputed = compute_hash(&event);
        if recomputed != stored_hash {
            errors.push(format!(
                "Line {lineno}: hash mismatch (stored={}… recomputed={}…)",
                &stored_hash.chars().take(12).collect::<String>(),
                &recomputed[..12],
            ));
        }

        let prev = event["prev_hash"].as_str().unwrap_or("");
        if prev != expected_prev {
            errors.push(format!(
                "Line {lineno}: prev_hash mismatch (expected={}… got={}…)",
                &expected_prev[..12],
                &prev.chars().take(12).collect::<String>(),
            ));
        }

        expected_prev = stored_hash;
    }

    (errors.is_empty(), errors)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
