// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use thiserror::Error;

/// Errors surfaced by provider drivers.
///
/// The taxonomy matters for control flow: transient variants are retried
/// during the connection phase, connection-phase variants may trigger a
/// fallback to the next provider in a chain, and everything else ends the
/// current run with an error result.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("provider overloaded: {0}")]
    Overloaded(String),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("stream error: {0}")]
    Stream(String),

    #[error("budget exhausted: {0}")]
    BudgetExhausted(String),

    #[error("missing API key: {0}")]
    MissingApiKey(String),

    #[error("{0}")]
    Other(String),
}

impl ProviderError {
    /// Classify an HTTP error status into the right variant.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            429 => Self::RateLimited(body),
            529 => Self::Overloaded(body),
            _ => Self::Api {
                status,
                message: body,
            },
        }
    }

    /// Transient errors worth retrying with backoff.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited(_) | Self::Overloaded(_) | Self::Connect(_) => true,
            Self::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Errors that occur before any event was delivered, eligible for
    /// provider fallback.
    pub fn is_connection_phase(&self) -> bool {
        self.is_retryable()
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() || e.is_timeout() {
            Self::Connect(e.to_string())
        } else {
            Self::Other(e.to_string())
        }
    }
}
