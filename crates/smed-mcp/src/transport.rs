// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Stdio transport: one child process per MCP server.
//!
//! A dedicated reader task owns the child's stdout and routes each reply to
//! the caller waiting on its request id, so concurrent requests in flight
//! need no serialisation; only writes share the stdin behind a lock. Lines
//! that are not replies to our requests (notifications, server-initiated
//! requests, log noise) are discarded by the reader. When stdout reaches
//! EOF the reader drops every pending waiter, which surfaces as `Closed` at
//! the call sites.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin};
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, warn};

use smed_config::McpServerConfig;

use crate::protocol::{self, RpcReply};

/// Default per-request reply deadline.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// How long `shutdown` waits for a graceful exit before killing.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("cannot start MCP server: {0}")]
    Spawn(std::io::Error),

    #[error("MCP server pipe error: {0}")]
    Pipe(std::io::Error),

    #[error("MCP server connection closed")]
    Closed,

    #[error("no reply from MCP server within {0:?}")]
    Timeout(Duration),

    #[error("MCP {0}")]
    Remote(protocol::RpcFailure),
}

type PendingReplies = Arc<StdMutex<HashMap<u64, oneshot::Sender<RpcReply>>>>;

pub struct StdioTransport {
    /// `None` once shutdown has closed the pipe.
    stdin: Mutex<Option<ChildStdin>>,
    child: Mutex<Option<Child>>,
    /// Callers waiting for a reply, keyed by request id. The reader task
    /// holds the other `Arc` and fulfils or drops these.
    pending: PendingReplies,
    next_id: AtomicU64,
    alive: Arc<AtomicBool>,
    pub(crate) request_timeout: Duration,
}

impl StdioTransport {
    /// Spawn the configured server process and start its reader task.
    pub fn launch(config: &McpServerConfig) -> Result<Self, TransportError> {
        let mut cmd = tokio::process::Command::new(&config.command);
        cmd.args(&config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in &config.env {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn().map_err(TransportError::Spawn)?;
        let stdin = child.stdin.take().ok_or_else(|| {
            TransportError::Spawn(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "child stdin not captured",
            ))
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            TransportError::Spawn(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "child stdout not captured",
            ))
        })?;

        let pending: PendingReplies = Arc::new(StdMutex::new(HashMap::new()));
        let alive = Arc::new(AtomicBool::new(true));

        // Reader task: sole owner of stdout for the life of the process.
        let reader_pending = Arc::clone(&pending);
        let reader_alive = Arc::clone(&alive);
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                match protocol::parse_reply(&line) {
                    Some(reply) => {
                        let waiter = reader_pending.lock().unwrap().remove(&reply.id);
                        match waiter {
                            Some(tx) => {
                                let _ = tx.send(reply);
                            }
                            None => {
                                debug!(id = reply.id, "reply with no waiting caller")
                            }
                        }
                    }
                    None => debug!("discarding non-reply line from MCP server"),
                }
            }
            // EOF: the process is gone. Waking every pending caller by
            // dropping its sender turns their awaits into `Closed`.
            reader_alive.store(false, Ordering::SeqCst);
            reader_pending.lock().unwrap().clear();
            debug!("MCP server stdout closed");
        });

        Ok(Self {
            stdin: Mutex::new(Some(stdin)),
            child: Mutex::new(Some(child)),
            pending,
            next_id: AtomicU64::new(1),
            alive,
            request_timeout: REQUEST_TIMEOUT,
        })
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn write_line(&self, line: &str) -> Result<(), TransportError> {
        let mut guard = self.stdin.lock().await;
        let stdin = guard.as_mut().ok_or(TransportError::Closed)?;
        stdin
            .write_all(line.as_bytes())
            .await
            .map_err(TransportError::Pipe)?;
        stdin.write_all(b"\n").await.map_err(TransportError::Pipe)?;
        stdin.flush().await.map_err(TransportError::Pipe)?;
        Ok(())
    }

    /// Send a request and await its reply.
    ///
    /// The reply is routed back by id, so any number of requests may be in
    /// flight at once. A JSON-RPC error reply comes back as
    /// [`TransportError::Remote`].
    pub async fn request(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<Value, TransportError> {
        if !self.is_alive() {
            return Err(TransportError::Closed);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (reply_tx, reply_rx) = oneshot::channel();
        self.pending.lock().unwrap().insert(id, reply_tx);
        debug!(id, method, "MCP request");

        if let Err(e) = self.write_line(&protocol::request_line(id, method, params)).await {
            self.pending.lock().unwrap().remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(self.request_timeout, reply_rx).await {
            Ok(Ok(reply)) => reply.outcome.map_err(TransportError::Remote),
            // The reader task dropped our sender: stdout hit EOF.
            Ok(Err(_)) => Err(TransportError::Closed),
            Err(_) => {
                self.pending.lock().unwrap().remove(&id);
                Err(TransportError::Timeout(self.request_timeout))
            }
        }
    }

    /// Fire-and-forget notification.
    pub async fn notify(&self, method: &str) -> Result<(), TransportError> {
        debug!(method, "MCP notification");
        self.write_line(&protocol::notification_line(method)).await
    }

    /// Close stdin as the polite exit signal, give the process a grace
    /// period, then kill it.
    pub async fn shutdown(&self) {
        self.alive.store(false, Ordering::SeqCst);
        self.stdin.lock().await.take();

        let mut guard = self.child.lock().await;
        let Some(mut child) = guard.take() else {
            return;
        };
        match tokio::time::timeout(SHUTDOWN_GRACE, child.wait()).await {
            Ok(Ok(status)) => debug!(?status, "MCP server exited"),
            Ok(Err(e)) => warn!(error = %e, "error waiting for MCP server"),
            Err(_) => {
                warn!("MCP server ignored stdin close, killing");
                if let Err(e) = child.kill().await {
                    warn!(error = %e, "failed to kill MCP server");
                }
            }
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
