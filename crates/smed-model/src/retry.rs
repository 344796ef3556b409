// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::ProviderError;

/// Maximum additional attempts after the first failure.
const MAX_RETRIES: u32 = 3;
/// Initial backoff delay, doubled after every failed attempt.
const BACKOFF_BASE: Duration = Duration::from_secs(1);

/// Run `f` with exponential backoff on transient errors.
///
/// Only the connection phase of a request goes through here: once a stream
/// has started delivering events, mid-stream errors must propagate to the
/// caller instead of being retried.
pub async fn with_backoff<T, F, Fut>(op: &str, mut f: F) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let mut delay = BACKOFF_BASE;
    let mut attempt = 1u32;
    loop {
        match f().await {
            Ok(v) => return Ok(v),
            Err(e) if e.is_retryable() && attempt <= MAX_RETRIES => {
                warn!(
                    op,
                    attempt,
                    max = MAX_RETRIES,
                    delay_s = delay.as_secs_f32(),
                    error = %e,
                    "transient provider error, retrying"
                );
                tokio::time::sleep(delay).await;
                delay *= 2;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
