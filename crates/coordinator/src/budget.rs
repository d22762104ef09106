// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Adaptive total LLM budget.
//!
//! Mirrors the per-model limiter but scoped to `totalMaxLlm`: one learned
//! value for the whole process. Consumers read [`AdaptiveTotalBudget::learned_limit`]
//! wherever they would have read the static budget.

use parking_lot::Mutex;
use pi_core::{Clock, RuntimeConfig};
use serde::Serialize;
use tracing::info;

/// The learned budget never shrinks below this fraction of the base.
const MIN_SHRINK_RATIO: f64 = 0.25;

/// Diagnostic snapshot of the budget state.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BudgetSnapshot {
    pub enabled: bool,
    pub base_limit: u32,
    pub learned_limit: u32,
    pub sample_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_reason: Option<String>,
}

struct BudgetState {
    learned_limit: u32,
    sample_count: u64,
    last_429_at: Option<u64>,
    last_recovery_at: Option<u64>,
    last_reason: Option<String>,
}

/// Process-wide adaptive budget over the total LLM concurrency.
pub struct AdaptiveTotalBudget<C: Clock> {
    clock: C,
    enabled: bool,
    base_limit: u32,
    reduction_factor: f64,
    recovery_factor: f64,
    recovery_interval_ms: u64,
    state: Mutex<BudgetState>,
}

impl<C: Clock> AdaptiveTotalBudget<C> {
    pub fn new(config: &RuntimeConfig, clock: C) -> Self {
        Self {
            clock,
            enabled: config.adaptive_enabled,
            base_limit: config.total_max_llm,
            reduction_factor: config.reduction_factor,
            recovery_factor: config.recovery_factor,
            recovery_interval_ms: config.recovery_interval_ms,
            state: Mutex::new(BudgetState {
                learned_limit: config.total_max_llm,
                sample_count: 0,
                last_429_at: None,
                last_recovery_at: None,
                last_reason: None,
            }),
        }
    }

    fn shrink_floor(&self) -> u32 {
        ((f64::from(self.base_limit) * MIN_SHRINK_RATIO).floor() as u32).max(1)
    }

    /// Shrink the global budget after a throttling failure.
    pub fn record_rate_limit(&self, reason: &str) -> u32 {
        if !self.enabled {
            return self.base_limit;
        }
        let now = self.clock.epoch_ms();
        let mut state = self.state.lock();
        state.sample_count += 1;
        state.last_429_at = Some(now);
        state.last_reason = Some(reason.to_string());
        let shrunk = ((f64::from(state.learned_limit) * self.reduction_factor).floor() as u32)
            .max(self.shrink_floor());
        state.learned_limit = shrunk;
        info!(limit = shrunk, reason, "shrinking total LLM budget after rate limit");
        shrunk
    }

    /// Record a successful call; grows after a quiet recovery interval.
    pub fn record_success(&self) {
        if !self.enabled {
            return;
        }
        let now = self.clock.epoch_ms();
        let mut state = self.state.lock();
        state.sample_count += 1;
        if state.learned_limit >= self.base_limit {
            return;
        }
        let quiet_since = state.last_429_at.unwrap_or(0);
        if now.saturating_sub(quiet_since) < self.recovery_interval_ms {
            return;
        }
        if let Some(last_recovery) = state.last_recovery_at {
            if now.saturating_sub(last_recovery) < self.recovery_interval_ms {
                return;
            }
        }
        let grown = ((f64::from(state.learned_limit) * self.recovery_factor).ceil() as u32)
            .min(self.base_limit);
        if grown > state.learned_limit {
            state.learned_limit = grown;
            state.last_recovery_at = Some(now);
            state.last_reason = Some("recovered".to_string());
        }
    }

    /// The budget consumers should enforce right now.
    pub fn learned_limit(&self) -> u32 {
        if !self.enabled {
            return self.base_limit;
        }
        self.state.lock().learned_limit
    }

    pub fn snapshot(&self) -> BudgetSnapshot {
        let state = self.state.lock();
        BudgetSnapshot {
            enabled: self.enabled,
            base_limit: self.base_limit,
            learned_limit: if self.enabled {
                state.learned_limit
            } else {
                self.base_limit
            },
            sample_count: state.sample_count,
            last_reason: state.last_reason.clone(),
        }
    }

    /// Forget learned state, returning to the base limit.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.learned_limit = self.base_limit;
        state.last_429_at = None;
        state.last_recovery_at = None;
        state.last_reason = None;
    }
}

#[cfg(test)]
#[path = "budget_tests.rs"]
mod tests;
