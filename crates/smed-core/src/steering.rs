// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use tokio::sync::mpsc;

const STEERING_BUFFER: usize = 16;

/// Sender half: the host pushes mid-run user messages here.
#[derive(Clone)]
pub struct SteeringChannel {
    tx: mpsc::Sender<String>,
}

/// Receiver half, polled by the agent loop strictly between turns.
pub struct SteeringReceiver {
    rx: mpsc::Receiver<String>,
}

/// Create a steering channel pair with bounded capacity.
pub fn steering_channel() -> (SteeringChannel, SteeringReceiver) {
    let (tx, rx) = mpsc::channel(STEERING_BUFFER);
    (SteeringChannel { tx }, SteeringReceiver { rx })
}

impl SteeringChannel {
    pub async fn send(&self, message: impl Into<String>) -> bool {
        self.tx.send(message.into()).await.is_ok()
    }

    /// Non-blocking send; false when the buffer is full or the loop is gone.
    pub fn send_nowait(&self, message: impl Into<String>) -> bool {
        self.tx.try_send(message.into()).is_ok()
    }
}

impl SteeringReceiver {
    /// Non-blocking poll. `None` when no message is pending.
    pub fn try_recv(&mut self) -> Option<String> {
        self.rx.try_recv().ok()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
