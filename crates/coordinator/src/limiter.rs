// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Learned per-(provider, model) concurrency limits.
//!
//! Starts from the static preset, halves (by `reduction_factor`) on a
//! 429, and grows back slowly after a quiet recovery interval. Learning
//! is process-local on purpose: multiple instances sharing one learned
//! value would oscillate, since each instance's 429s already reflect the
//! combined load.

use parking_lot::Mutex;
use pi_core::{Clock, RuntimeConfig};
use regex::Regex;
use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, info};

/// Lower-cased (provider, model) key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModelKey {
    pub provider: String,
    pub model: String,
}

impl ModelKey {
    pub fn new(provider: &str, model: &str) -> Self {
        Self {
            provider: provider.to_lowercase(),
            model: model.to_lowercase(),
        }
    }
}

impl std::fmt::Display for ModelKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.provider, self.model)
    }
}

/// Learned state for one model.
#[derive(Debug, Clone, Serialize)]
pub struct LearnedLimit {
    pub original_concurrency: u32,
    pub current_concurrency: u32,
    pub last_429_at: Option<u64>,
    pub last_recovery_at: Option<u64>,
    pub rate_limit_count: u32,
    /// Successes observed since the last 429 (or since creation).
    pub success_count: u32,
}

impl LearnedLimit {
    fn fresh(preset: u32) -> Self {
        Self {
            original_concurrency: preset,
            current_concurrency: preset,
            last_429_at: None,
            last_recovery_at: None,
            rate_limit_count: 0,
            success_count: 0,
        }
    }
}

/// Shared classifier for throttling failures.
///
/// The substring list is the canonical definition of "rate-limit error"
/// across the runtime.
pub fn is_rate_limit_error(message: &str) -> bool {
    // The pattern is a fixed literal; it cannot fail to compile.
    #[allow(clippy::unwrap_used)]
    let re = Regex::new(r"(?i)rate.?limit|too many requests|quota|\b429\b").unwrap();
    re.is_match(message)
}

/// Per-model adaptive limiter.
pub struct AdaptiveModelLimiter<C: Clock> {
    clock: C,
    reduction_factor: f64,
    recovery_factor: f64,
    recovery_interval_ms: u64,
    limits: Mutex<HashMap<ModelKey, LearnedLimit>>,
}

impl<C: Clock> AdaptiveModelLimiter<C> {
    pub fn new(config: &RuntimeConfig, clock: C) -> Self {
        Self {
            clock,
            reduction_factor: config.reduction_factor,
            recovery_factor: config.recovery_factor,
            recovery_interval_ms: config.recovery_interval_ms,
            limits: Mutex::new(HashMap::new()),
        }
    }

    /// Shrink after a throttling failure. Returns the new limit.
    pub fn record_rate_limit(&self, provider: &str, model: &str, preset: u32) -> u32 {
        let key = ModelKey::new(provider, model);
        let now = self.clock.epoch_ms();
        let mut limits = self.limits.lock();
        let entry = limits
            .entry(key.clone())
            .or_insert_with(|| LearnedLimit::fresh(preset));
        let shrunk = ((f64::from(entry.current_concurrency) * self.reduction_factor).floor()
            as u32)
            .max(1);
        entry.current_concurrency = shrunk;
        entry.last_429_at = Some(now);
        entry.rate_limit_count += 1;
        entry.success_count = 0;
        info!(model = %key, limit = shrunk, "shrinking model concurrency after rate limit");
        shrunk
    }

    /// Record a successful call; grows the limit when a full recovery
    /// interval has passed with no new 429 and at least one success.
    pub fn record_success(&self, provider: &str, model: &str) {
        let key = ModelKey::new(provider, model);
        let now = self.clock.epoch_ms();
        let mut limits = self.limits.lock();
        let Some(entry) = limits.get_mut(&key) else {
            // Never throttled: nothing learned, nothing to grow.
            return;
        };
        entry.success_count += 1;

        if entry.current_concurrency >= entry.original_concurrency {
            return;
        }
        let quiet_since = entry.last_429_at.unwrap_or(0);
        if now.saturating_sub(quiet_since) < self.recovery_interval_ms {
            return;
        }
        if let Some(last_recovery) = entry.last_recovery_at {
            if now.saturating_sub(last_recovery) < self.recovery_interval_ms {
                return;
            }
        }
        let grown = ((f64::from(entry.current_concurrency) * self.recovery_factor).ceil() as u32)
            .min(entry.original_concurrency);
        if grown > entry.current_concurrency {
            debug!(model = %key, limit = grown, "recovering model concurrency");
            entry.current_concurrency = grown;
            entry.last_recovery_at = Some(now);
        }
    }

    /// Current learned limit, creating the entry from `preset` on first
    /// sight.
    pub fn learned_limit(&self, provider: &str, model: &str, preset: u32) -> u32 {
        let key = ModelKey::new(provider, model);
        let mut limits = self.limits.lock();
        limits
            .entry(key)
            .or_insert_with(|| LearnedLimit::fresh(preset))
            .current_concurrency
    }

    /// The smaller of the learned limit and this instance's share of the
    /// model across the cluster.
    pub fn effective_limit(
        &self,
        provider: &str,
        model: &str,
        preset: u32,
        model_parallel_limit: u32,
    ) -> u32 {
        self.learned_limit(provider, model, preset)
            .min(model_parallel_limit)
            .max(1)
    }

    /// Snapshot for diagnostics.
    pub fn snapshot(&self) -> Vec<(ModelKey, LearnedLimit)> {
        self.limits
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Forget one model's learned state.
    pub fn reset(&self, provider: &str, model: &str) {
        self.limits.lock().remove(&ModelKey::new(provider, model));
    }

    /// Forget everything.
    pub fn reset_all(&self) {
        self.limits.lock().clear();
    }
}

#[cfg(test)]
#[path = "limiter_tests.rs"]
mod tests;
