// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use smed_model::{ToolDef, ToolParam};

use crate::tool::{Tool, ToolContext, ToolResultData};

const MAX_CONTENT_LENGTH: usize = 50_000;
const FETCH_TIMEOUT_SECS: u64 = 30;

pub struct WebFetchTool;

#[async_trait]
impl Tool for WebFetchTool {
    fn definition(&self) -> ToolDef {
        ToolDef::new(
            "WebFetch",
            "Fetch content from a URL. Returns the page text (HTML converted to \
             plain text). Useful for reading documentation, APIs, or web pages.",
            vec![
                ToolParam::required("url", "string", "The URL to fetch."),
                ToolParam::optional(
                    "max_length",
                    "integer",
                    "Maximum content length to return (default 50000).",
                )
                .with_default(json!(MAX_CONTENT_LENGTH)),
            ],
        )
    }

    async fn execute(&self, args: &Value, _ctx: &ToolContext) -> ToolResultData {
        let url = args["url"].as_str().unwrap_or_default();
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return ToolResultData::error("URL must start with http:// or https://");
        }
        let max_length = args["max_length"]
            .as_u64()
            .map(|v| v as usize)
            .unwrap_or(MAX_CONTENT_LENGTH);

        debug!(url, "WebFetch tool");

        match fetch(url, max_length).await {
            Ok(body) => ToolResultData::ok(body),
            Err(e) => ToolResultData::error(format!("Fetch failed: {e}")),
        }
    }
}

async fn fetch(url: &str, max_length: usize) -> anyhow::Result<String> {
    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(FETCH_TIMEOUT_SECS))
        .redirect(reqwest::redirect::Policy::limited(5))
        .user_agent("smed/0.3")
        .build()?;

    let resp = client.get(url).send().await?.error_for_status()?;
    let content_type = resp
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_lowercase();
    let raw = resp.text().await?;
    let total_chars = raw.len();

    let body = if content_type.contains("html") {
        html_to_text(&raw)
    } else {
        raw
    };

    if body.len() > max_length {
        let cut = floor_char_boundary(&body, max_length);
        Ok(format!(
            "{}\n\n[Truncated — {total_chars} chars total]",
            &body[..cut]
        ))
    } else {
        Ok(body)
    }
}

fn html_to_text(html: &str) -> String {
    html2text::from_read(html.as_bytes(), 100)
}

fn floor_char_boundary(s: &str, mut index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    while index > 0 && !s.is_char_boundary(index) {
        index -= 1;
    }
    index
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
