// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Append-only JSONL session persistence.
//!
//! One file per session, `<id>.jsonl`, each line a record tagged
//! `metadata | message | turn`. Records are written immediately, one at a
//! time, so a crash leaves the journal replayable. Loading replays records
//! in order: metadata merges, messages rebuild the list, turns accumulate
//! counters.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use smed_model::ChatMessage;

/// Generate a fresh 12-character opaque session id.
pub fn new_session_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..12].to_string()
}

/// Default session directory: `~/.smed/sessions`.
pub fn default_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".smed")
        .join("sessions")
}

/// Summary of a stored session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub cwd: String,
    pub provider: String,
    pub model: String,
    pub created_at: String,
    pub updated_at: String,
    pub turns: u32,
    pub total_tokens: u64,
    pub total_cost: f64,
    pub parent_id: Option<String>,
}

/// An append-only session journal plus its in-memory replay.
#[derive(Debug)]
pub struct Session {
    pub session_id: String,
    path: PathBuf,
    messages: Vec<ChatMessage>,
    metadata: Map<String, Value>,
    turns: u32,
    total_tokens: u64,
    total_cost: f64,
}

impl Session {
    /// Open a session in `dir`: resume it when `session_id` names an
    /// existing journal, otherwise start a fresh one.
    pub fn open(dir: &Path, session_id: Option<&str>, cwd: &str) -> anyhow::Result<Self> {
        std::fs::create_dir_all(dir)?;
        let id = session_id
            .map(|s| s.to_string())
            .unwrap_or_else(new_session_id);
        let path = dir.join(format!("{id}.jsonl"));

        let mut metadata = Map::new();
        metadata.insert("session_id".into(), json!(id));
        metadata.insert("cwd".into(), json!(cwd));
        metadata.insert("created_at".into(), json!(Utc::now().to_rfc3339()));

        let mut session = Self {
            session_id: id,
            path,
            messages: Vec::new(),
            metadata,
            turns: 0,
            total_tokens: 0,
            total_cost: 0.0,
        };
        if session.path.exists() {
            session.load()?;
        }
        Ok(session)
    }

    fn load(&mut self) -> anyhow::Result<()> {
        let text = std::fs::read_to_string(&self.path)?;
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let entry: Value = serde_json::from_str(line)?;
            match entry["type"].as_str().unwrap_or("") {
                "metadata" => {
                    if let Some(data) = entry["data"].as_object() {
                        for (k, v) in data {
                            self.metadata.insert(k.clone(), v.clone());
                        }
                    }
                }
                "message" => {
                    let msg: ChatMessage = serde_json::from_value(entry["data"].clone())?;
                    self.messages.push(msg);
                }
                "turn" => {
                    self.turns = entry["turn"].as_u64().unwrap_or(self.turns as u64) as u32;
                    self.total_tokens += entry["tokens"].as_u64().unwrap_or(0);
                    self.total_cost += entry["cost"].as_f64().unwrap_or(0.0);
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Append one record and flush. No buffering: every record hits disk
    /// before the call returns.
    fn append(&self, entry: &Value) -> anyhow::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(serde_json::to_string(entry)?.as_bytes())?;
        file.write_all(b"\n")?;
        file.flush()?;
        Ok(())
    }

    pub fn save_metadata(&mut self, provider: &str, model: &str) -> anyhow::Result<()> {
        self.metadata.insert("provider".into(), json!(provider));
        self.metadata.insert("model".into(), json!(model));
        self.metadata
            .insert("updated_at".into(), json!(Utc::now().to_rfc3339()));
        self.append(&json!({ "type": "metadata", "data": Value::Object(self.metadata.clone()) }))
    }

    pub fn add_message(&mut self, msg: ChatMessage) -> anyhow::Result<()> {
        self.append(&json!({ "type": "message", "data": serde_json::to_value(&msg)? }))?;
        self.messages.push(msg);
        Ok(())
    }

    pub fn record_turn(&mut self, tokens: u64, cost: f64) -> anyhow::Result<()> {
        self.turns += 1;
        self.total_tokens += tokens;
        self.total_cost += cost;
        self.append(&json!({
            "type": "turn",
            "turn": self.turns,
            "tokens": tokens,
            "cost": cost,
            "timestamp": Utc::now().to_rfc3339(),
        }))
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Replace the in-memory message list. Used by compaction; the journal
    /// keeps its full append-only history.
    pub fn set_messages(&mut self, messages: Vec<ChatMessage>) {
        self.messages = messages;
    }

    pub fn turns(&self) -> u32 {
        self.turns
    }

    pub fn total_tokens(&self) -> u64 {
        self.total_tokens
    }

    pub fn total_cost(&self) -> f64 {
        self.total_cost
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn info(&self) -> SessionInfo {
        let get = |key: &str| {
            self.metadata
                .get(key)
                .and_then(|v| v.as_str())
                .unwrap_or("unknown")
                .to_string()
        };
        let created = get("created_at");
        SessionInfo {
            session_id: self.session_id.clone(),
            cwd: get("cwd"),
            provider: get("provider"),
            model: get("model"),
            updated_at: self
                .metadata
                .get("updated_at")
                .and_then(|v| v.as_str())
                .unwrap_or(&created)
                .to_string(),
            created_at: created,
            turns: self.turns,
            total_tokens: self.total_tokens,
            total_cost: self.total_cost,
            parent_id: self
                .metadata
                .get("parent_id")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
        }
    }

    /// Fork this session: a fresh id, `parent_id` metadata pointing back
    /// here, and the message prefix up to `up_to` (all messages when
    /// `None`) re-written to the new journal.
    pub fn fork(&self, dir: &Path, up_to: Option<usize>) -> anyhow::Result<Session> {
        std::fs::create_dir_all(dir)?;
        let id = new_session_id();
        let path = dir.join(format!("{id}.jsonl"));

        let end = up_to.unwrap_or(self.messages.len()).min(self.messages.len());
        let mut metadata = Map::new();
        metadata.insert("session_id".into(), json!(id));
        metadata.insert("parent_id".into(), json!(self.session_id));
        metadata.insert(
            "cwd".into(),
            self.metadata.get("cwd").cloned().unwrap_or(json!(".")),
        );
        metadata.insert("created_at".into(), json!(Utc::now().to_rfc3339()));

        let child = Session {
            session_id: id,
            path,
            messages: self.messages[..end].to_vec(),
            metadata,
            turns: 0,
            total_tokens: 0,
            total_cost: 0.0,
        };

        child.append(&json!({
            "type": "metadata",
            "data": Value::Object(child.metadata.clone())
        }))?;
        for msg in &child.messages {
            child.append(&json!({ "type": "message", "data": serde_json::to_value(msg)? }))?;
        }
        Ok(child)
    }
}

/// All stored sessions in `dir`, newest first.
pub fn list_sessions(dir: &Path) -> Vec<SessionInfo> {
    let mut entries: Vec<(std::time::SystemTime, PathBuf)> = match std::fs::read_dir(dir) {
        Ok(rd) => rd
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().is_some_and(|x| x == "jsonl"))
            .filter_map(|e| {
                let mtime = e.metadata().ok()?.modified().ok()?;
                Some((mtime, e.path()))
            })
            .collect(),
        Err(_) => return Vec::new(),
    };
    entries.sort_by(|a, b| b.0.cmp(&a.0));

    entries
        .into_iter()
        .filter_map(|(_, path)| {
            let id = path.file_stem()?.to_str()?.to_string();
            let cwd_placeholder = ".";
            Session::open(dir, Some(&id), cwd_placeholder)
                .ok()
                .map(|s| s.info())
        })
        .collect()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use smed_model::{ContentBlock, MessageContent, Role};

    use super::*;

    #[test]
    fn new_session_gets_12_char_id() {
        let id = new_session_id();
        assert_eq!(id.len(), 12);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn messages_round_trip_through_journal() {
        let dir = tempfile::tempdir().unwrap();
        let id;
        {
            let mut s = Session::open(dir.path(), None, "/work").unwrap();
            id = s.session_id.clone();
            s.save_metadata("anthropic", "claude-sonnet-4-6").unwrap();
            s.add_message(ChatMessage::user("hello")).unwrap();
            s.add_message(ChatMessage::assistant("hi there")).unwrap();
            s.record_turn(25, 0.001).unwrap();
        }

        let reloaded = Session::open(dir.path(), Some(&id), "/work").unwrap();
        assert_eq!(reloaded.messages().len(), 2);
        assert_eq!(reloaded.messages()[0].as_text(), Some("hello"));
        assert_eq!(reloaded.messages()[1].as_text(), Some("hi there"));
        assert_eq!(reloaded.turns(), 1);
        assert_eq!(reloaded.total_tokens(), 25);
        let info = reloaded.info();
        assert_eq!(info.provider, "anthropic");
        assert_eq!(info.cwd, "/work");
    }

    #[test]
    fn block_messages_survive_replay() {
        let dir = tempfile::tempdir().unwrap();
        let id;
        {
            let mut s = Session::open(dir.path(), None, ".").unwrap();
            id = s.session_id.clone();
            s.add_message(ChatMessage::assistant_blocks(vec![
                ContentBlock::Text {
                    text: "calling".into(),
                },
                ContentBlock::ToolUse {
                    id: "t1".into(),
                    name: "Read".into(),
                    input: json!({"file_path": "a.txt"}),
                },
            ]))
            .unwrap();
            s.add_message(ChatMessage {
                role: Role::User,
                content: MessageContent::Blocks(vec![ContentBlock::ToolResult {
                    tool_use_id: "t1".into(),
                    content: "contents".into(),
                    is_error: false,
                    tool_name: None,
                }]),
                tool_use_id: Some("t1".into()),
                tool_name: None,
            })
            .unwrap();
        }

        let reloaded = Session::open(dir.path(), Some(&id), ".").unwrap();
        assert_eq!(reloaded.messages().len(), 2);
        assert_eq!(reloaded.messages()[0].tool_use_ids(), vec!["t1"]);
        assert!(reloaded.messages()[1].has_tool_result());
    }

    #[test]
    fn journal_grows_monotonically_on_resume() {
        let dir = tempfile::tempdir().unwrap();
        let id;
        {
            let mut s = Session::open(dir.path(), None, ".").unwrap();
            id = s.session_id.clone();
            s.add_message(ChatMessage::user("one")).unwrap();
        }
        let len_after_first = std::fs::metadata(dir.path().join(format!("{id}.jsonl")))
            .unwrap()
            .len();
        {
            let mut s = Session::open(dir.path(), Some(&id), ".").unwrap();
            assert_eq!(s.messages().len(), 1);
            s.add_message(ChatMessage::user("two")).unwrap();
        }
        let len_after_second = std::fs::metadata(dir.path().join(format!("{id}.jsonl")))
            .unwrap()
            .len();
        assert!(len_after_second > len_after_first);

        let reloaded = Session::open(dir.path(), Some(&id), ".").unwrap();
        assert_eq!(reloaded.messages().len(), 2);
    }

    #[test]
    fn turn_counters_accumulate_across_records() {
        let dir = tempfile::tempdir().unwrap();
        let id;
        {
            let mut s = Session::open(dir.path(), None, ".").unwrap();
            id = s.session_id.clone();
            s.record_turn(10, 0.5).unwrap();
            s.record_turn(15, 0.25).unwrap();
        }
        let reloaded = Session::open(dir.path(), Some(&id), ".").unwrap();
        assert_eq!(reloaded.turns(), 2);
        assert_eq!(reloaded.total_tokens(), 25);
        assert!((reloaded.total_cost() - 0.75).abs() < 1e-9);
    }

    #[test]
    fn fork_copies_prefix_and_links_parent() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = Session::open(dir.path(), None, "/repo").unwrap();
        for i in 0..4 {
            s.add_message(ChatMessage::user(format!("m{i}"))).unwrap();
        }

        let child = s.fork(dir.path(), Some(2)).unwrap();
        assert_ne!(child.session_id, s.session_id);
        assert_eq!(child.messages().len(), 2);
        assert_eq!(child.messages()[1].as_text(), Some("m1"));
        assert_eq!(child.info().parent_id.as_deref(), Some(s.session_id.as_str()));
        assert_eq!(child.info().cwd, "/repo");

        // The forked journal replays to the same prefix.
        let reloaded = Session::open(dir.path(), Some(&child.session_id), ".").unwrap();
        assert_eq!(reloaded.messages().len(), 2);
        assert_eq!(reloaded.info().parent_id.as_deref(), Some(s.session_id.as_str()));
    }

    #[test]
    fn fork_without_bound_copies_everything() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = Session::open(dir.path(), None, ".").unwrap();
        s.add_message(ChatMessage::user("a")).unwrap();
        s.add_message(ChatMessage::assistant("b")).unwrap();
        let child = s.fork(dir.path(), None).unwrap();
        assert_eq!(child.messages().len(), 2);
        assert_eq!(child.turns(), 0);
    }

    #[test]
    fn list_sessions_returns_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let mut a = Session::open(dir.path(), None, ".").unwrap();
        a.save_metadata("mock", "mock-model").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));
        let mut b = Session::open(dir.path(), None, ".").unwrap();
        b.save_metadata("mock", "mock-model").unwrap();

        let infos = list_sessions(dir.path());
        assert_eq!(infos.len(), 2);
        assert_eq!(infos[0].session_id, b.session_id);
        assert_eq!(infos[1].session_id, a.session_id);
    }

    #[test]
    fn list_sessions_missing_dir_is_empty() {
        assert!(list_sessions(Path::new("/tmp/smed_no_such_sessions_dir")).is_empty());
    }
}
