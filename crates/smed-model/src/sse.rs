// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use futures::{Stream, StreamExt};

use crate::error::ProviderError;

/// Split a streaming HTTP response into SSE `data:` payloads.
///
/// SSE lines can be split across TCP chunks, so a remainder buffer is
/// carried forward. Only complete lines (terminated by '\n') are parsed;
/// anything left over is prepended to the next chunk. Non-`data:` lines
/// (event names, comments, keep-alives) are dropped.
pub(crate) fn data_lines(
    resp: reqwest::Response,
) -> impl Stream<Item = Result<String, ProviderError>> + Send {
    resp.bytes_stream()
        .scan(String::new(), |buf, chunk| {
            let mut out: Vec<Result<String, ProviderError>> = Vec::new();
            match chunk {
                Ok(bytes) => {
                    buf.push_str(&String::from_utf8_lossy(&bytes));
                    while let Some(pos) = buf.find('\n') {
                        let line = buf[..pos].trim_end_matches('\r').to_string();
                        buf.drain(..=pos);
                        if let Some(data) = line.strip_prefix("data:") {
                            let data = data.trim();
                            if !data.is_empty() {
                                out.push(Ok(data.to_string()));
                            }
                        }
                    }
                }
                Err(e) => out.push(Err(ProviderError::Stream(e.to_string()))),
            }
            futures::future::ready(Some(out))
        })
        .flat_map(futures::stream::iter)
}
