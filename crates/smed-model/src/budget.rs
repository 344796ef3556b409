// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Mutex;

use crate::error::ProviderError;

/// Current budget state. The token budget tracks input + output combined.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BudgetSnapshot {
    pub input_tokens_used: u64,
    pub output_tokens_used: u64,
    pub total_tokens_used: u64,
    pub cost_used: f64,
    pub tokens_remaining: u64,
    pub cost_remaining: f64,
}

#[derive(Debug, Default)]
struct Totals {
    input_tokens: u64,
    output_tokens: u64,
    cost: f64,
}

/// Tracks token usage and cost against configured limits.
///
/// A limit of 0 means unlimited.
pub struct TokenBudgetTracker {
    max_tokens: u64,
    max_cost: f64,
    totals: Mutex<Totals>,
}

impl TokenBudgetTracker {
    pub fn new(max_tokens: u64, max_cost: f64) -> Self {
        Self {
            max_tokens,
            max_cost,
            totals: Mutex::new(Totals::default()),
        }
    }

    pub fn unlimited() -> Self {
        Self::new(0, 0.0)
    }

    pub fn record_usage(&self, input_tokens: u64, output_tokens: u64, cost: f64) -> BudgetSnapshot {
        let mut t = self.totals.lock().unwrap();
        t.input_tokens += input_tokens;
        t.output_tokens += output_tokens;
        t.cost += cost;
        self.snapshot_locked(&t)
    }

    pub fn snapshot(&self) -> BudgetSnapshot {
        self.snapshot_locked(&self.totals.lock().unwrap())
    }

    fn snapshot_locked(&self, t: &Totals) -> BudgetSnapshot {
        let total = t.input_tokens + t.output_tokens;
        BudgetSnapshot {
            input_tokens_used: t.input_tokens,
            output_tokens_used: t.output_tokens,
            total_tokens_used: total,
            cost_used: t.cost,
            tokens_remaining: if self.max_tokens > 0 {
                self.max_tokens.saturating_sub(total)
            } else {
                0
            },
            cost_remaining: if self.max_cost > 0.0 {
                (self.max_cost - t.cost).max(0.0)
            } else {
                0.0
            },
        }
    }

    pub fn is_exhausted(&self) -> bool {
        let t = self.totals.lock().unwrap();
        let total = t.input_tokens + t.output_tokens;
        (self.max_tokens > 0 && total >= self.max_tokens)
            || (self.max_cost > 0.0 && t.cost >= self.max_cost)
    }

    /// Error when any limit has been crossed.
    pub fn check_budget(&self) -> Result<(), ProviderError> {
        if !self.is_exhausted() {
            return Ok(());
        }
        let snap = self.snapshot();
        let mut parts = Vec::new();
        if self.max_tokens > 0 {
            parts.push(format!(
                "tokens: {}/{}",
                snap.total_tokens_used, self.max_tokens
            ));
        }
        if self.max_cost > 0.0 {
            parts.push(format!("cost: ${:.4}/${:.2}", snap.cost_used, self.max_cost));
        }
        Err(ProviderError::BudgetExhausted(parts.join(", ")))
    }

    pub fn reset(&self) {
        *self.totals.lock().unwrap() = Totals::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unlimited_budget_never_exhausts() {
        let b = TokenBudgetTracker::unlimited();
        b.record_usage(1_000_000, 1_000_000, 99.0);
        assert!(!b.is_exhausted());
        assert!(b.check_budget().is_ok());
    }

    #[test]
    fn token_limit_trips_at_threshold() {
        let b = TokenBudgetTracker::new(100, 0.0);
        b.record_usage(60, 39, 0.0);
        assert!(!b.is_exhausted());
        b.record_usage(0, 1, 0.0);
        assert!(b.is_exhausted());
        let err = b.check_budget().err().unwrap();
        assert!(err.to_string().contains("tokens: 100/100"));
    }

    #[test]
    fn cost_limit_trips_independently() {
        let b = TokenBudgetTracker::new(0, 1.0);
        b.record_usage(10, 10, 0.5);
        assert!(b.check_budget().is_ok());
        b.record_usage(10, 10, 0.5);
        assert!(matches!(
            b.check_budget(),
            Err(ProviderError::BudgetExhausted(_))
        ));
    }

    #[test]
    fn snapshot_reports_remaining() {
        let b = TokenBudgetTracker::new(100, 2.0);
        let snap = b.record_usage(30, 20, 0.5);
        assert_eq!(snap.total_tokens_used, 50);
        assert_eq!(snap.tokens_remaining, 50);
        assert!((snap.cost_remaining - 1.5).abs() < 1e-9);
    }

    #[test]
    fn reset_clears_counters() {
        let b = TokenBudgetTracker::new(10, 0.0);
        b.record_usage(10, 0, 0.0);
        assert!(b.is_exhausted());
        b.reset();
        assert!(!b.is_exhausted());
    }
}
