// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Static model catalog: context windows, output limits, per-Mtok prices.
//!
//! Deliberately small. Models missing from the table cost 0 and fall back
//! to a 200k context window; the full pricing table lives outside the core.

/// Context window assumed for models not in the catalog.
pub const DEFAULT_CONTEXT_WINDOW: u32 = 200_000;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelInfo {
    pub id: &'static str,
    pub provider: &'static str,
    pub context_window: u32,
    pub max_output_tokens: u32,
    pub input_cost_per_mtok: f64,
    pub output_cost_per_mtok: f64,
}

static CATALOG: &[ModelInfo] = &[
    ModelInfo {
        id: "claude-sonnet-4-6",
        provider: "anthropic",
        context_window: 200_000,
        max_output_tokens: 64_000,
        input_cost_per_mtok: 3.0,
        output_cost_per_mtok: 15.0,
    },
    ModelInfo {
        id: "claude-opus-4-1",
        provider: "anthropic",
        context_window: 200_000,
        max_output_tokens: 32_000,
        input_cost_per_mtok: 15.0,
        output_cost_per_mtok: 75.0,
    },
    ModelInfo {
        id: "claude-haiku-4-5",
        provider: "anthropic",
        context_window: 200_000,
        max_output_tokens: 64_000,
        input_cost_per_mtok: 1.0,
        output_cost_per_mtok: 5.0,
    },
    ModelInfo {
        id: "gpt-4o",
        provider: "openai",
        context_window: 128_000,
        max_output_tokens: 16_384,
        input_cost_per_mtok: 2.5,
        output_cost_per_mtok: 10.0,
    },
    ModelInfo {
        id: "gpt-4o-mini",
        provider: "openai",
        context_window: 128_000,
        max_output_tokens: 16_384,
        input_cost_per_mtok: 0.15,
        output_cost_per_mtok: 0.6,
    },
    ModelInfo {
        id: "o3-mini",
        provider: "openai",
        context_window: 200_000,
        max_output_tokens: 100_000,
        input_cost_per_mtok: 1.1,
        output_cost_per_mtok: 4.4,
    },
    ModelInfo {
        id: "gemini-2.0-flash",
        provider: "google",
        context_window: 1_048_576,
        max_output_tokens: 8_192,
        input_cost_per_mtok: 0.1,
        output_cost_per_mtok: 0.4,
    },
    ModelInfo {
        id: "gemini-2.5-pro",
        provider: "google",
        context_window: 1_048_576,
        max_output_tokens: 65_536,
        input_cost_per_mtok: 1.25,
        output_cost_per_mtok: 10.0,
    },
];

pub fn lookup(model_id: &str) -> Option<&'static ModelInfo> {
    CATALOG.iter().find(|m| m.id == model_id)
}

pub fn default_model(provider: &str) -> Option<&'static str> {
    match provider {
        "anthropic" => Some("claude-sonnet-4-6"),
        "openai" => Some("gpt-4o"),
        "google" => Some("gemini-2.0-flash"),
        _ => None,
    }
}

/// Context window for the model, with a conservative default for unknowns.
pub fn context_window(model_id: &str) -> u32 {
    lookup(model_id)
        .map(|m| m.context_window)
        .unwrap_or(DEFAULT_CONTEXT_WINDOW)
}

/// Dollar cost of one turn. Unknown models cost 0.
pub fn turn_cost(model_id: &str, input_tokens: u64, output_tokens: u64) -> f64 {
    match lookup(model_id) {
        Some(info) => {
            (input_tokens as f64 * info.input_cost_per_mtok
                + output_tokens as f64 * info.output_cost_per_mtok)
                / 1_000_000.0
        }
        None => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_finds_known_model() {
        let info = lookup("claude-sonnet-4-6").unwrap();
        assert_eq!(info.provider, "anthropic");
        assert_eq!(info.context_window, 200_000);
    }

    #[test]
    fn lookup_unknown_is_none() {
        assert!(lookup("mystery-model-9000").is_none());
        assert_eq!(context_window("mystery-model-9000"), DEFAULT_CONTEXT_WINDOW);
    }

    #[test]
    fn turn_cost_uses_per_mtok_prices() {
        // 1M input + 1M output of gpt-4o-mini: 0.15 + 0.60 dollars.
        let cost = turn_cost("gpt-4o-mini", 1_000_000, 1_000_000);
        assert!((cost - 0.75).abs() < 1e-9);
    }

    #[test]
    fn turn_cost_unknown_model_is_zero() {
        assert_eq!(turn_cost("mystery-model-9000", 1_000_000, 1_000_000), 0.0);
    }

    #[test]
    fn default_models_per_provider() {
        assert_eq!(default_model("anthropic"), Some("claude-sonnet-4-6"));
        assert_eq!(default_model("nope"), None);
    }
}
