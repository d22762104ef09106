// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Runtime configuration derived from profile + environment.
//!
//! A `RuntimeConfig` is an immutable value: components hold it (or an `Arc`
//! of it) and never read the environment themselves. Env overrides apply in
//! ascending priority — legacy totals, then `PI_AGENT_MAX_*`, then unified
//! `PI_LIMIT_*` — and are accepted only when parseable and in range. Bad
//! values are logged once and the default kept.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;

/// Process-wide config version counter; bumped on every `load`.
static CONFIG_VERSION: AtomicU64 = AtomicU64::new(0);

/// Runtime profile selecting a tuning preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeProfile {
    Stable,
    Default,
}

impl RuntimeProfile {
    /// Resolve from `PI_RUNTIME_PROFILE` / `STABLE_RUNTIME_PROFILE`.
    pub fn from_env() -> Self {
        if let Ok(value) = std::env::var("PI_RUNTIME_PROFILE") {
            match value.to_lowercase().as_str() {
                "stable" => return Self::Stable,
                "default" => return Self::Default,
                other => warn!(value = other, "unknown PI_RUNTIME_PROFILE, using default"),
            }
        }
        if std::env::var("STABLE_RUNTIME_PROFILE").as_deref() == Ok("true") {
            return Self::Stable;
        }
        Self::Default
    }
}

/// Advisory warning from [`RuntimeConfig::validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigWarning(pub String);

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Profile-derived tunables for the whole runtime.
#[derive(Debug, Clone, Serialize)]
pub struct RuntimeConfig {
    pub profile: RuntimeProfile,
    /// Monotonic version so downstream caches can invalidate on reload.
    pub config_version: u64,
    /// Global LLM concurrency budget shared across instances.
    pub total_max_llm: u32,
    /// Global budget for all provider requests (LLM + embeddings + misc).
    pub total_max_requests: u32,
    pub subagent_parallel: u32,
    pub team_parallel: u32,
    pub teammate_parallel: u32,
    pub orchestration_parallel: u32,
    pub heartbeat_interval_ms: u64,
    pub heartbeat_timeout_ms: u64,
    /// Multiplicative shrink applied to learned limits on a 429.
    pub reduction_factor: f64,
    /// Multiplicative growth applied after a quiet recovery interval.
    pub recovery_factor: f64,
    pub recovery_interval_ms: u64,
    /// Default per-iteration model timeout.
    pub iteration_timeout_ms: u64,
    pub adaptive_enabled: bool,
    pub predictive_enabled: bool,
}

impl RuntimeConfig {
    /// Pure preset for a profile, no environment reads. Used by tests and
    /// as the base layer for [`RuntimeConfig::load`].
    pub fn for_profile(profile: RuntimeProfile) -> Self {
        match profile {
            RuntimeProfile::Default => Self {
                profile,
                config_version: 0,
                total_max_llm: 8,
                total_max_requests: 24,
                subagent_parallel: 4,
                team_parallel: 4,
                teammate_parallel: 3,
                orchestration_parallel: 2,
                heartbeat_interval_ms: 3_000,
                heartbeat_timeout_ms: 15_000,
                reduction_factor: 0.7,
                recovery_factor: 1.1,
                recovery_interval_ms: 60_000,
                iteration_timeout_ms: 120_000,
                adaptive_enabled: true,
                predictive_enabled: false,
            },
            RuntimeProfile::Stable => Self {
                profile,
                config_version: 0,
                total_max_llm: 4,
                total_max_requests: 12,
                subagent_parallel: 2,
                team_parallel: 2,
                teammate_parallel: 2,
                orchestration_parallel: 1,
                heartbeat_interval_ms: 3_000,
                heartbeat_timeout_ms: 15_000,
                reduction_factor: 0.5,
                recovery_factor: 1.05,
                recovery_interval_ms: 120_000,
                iteration_timeout_ms: 60_000,
                adaptive_enabled: true,
                predictive_enabled: false,
            },
        }
    }

    /// Load the config for the env-selected profile, applying overrides.
    pub fn load() -> Self {
        let mut config = Self::for_profile(RuntimeProfile::from_env());

        // Legacy totals (lowest priority).
        apply_u32(&mut config.total_max_llm, "PI_TOTAL_MAX_LLM", 1, 64);
        apply_u64(
            &mut config.heartbeat_interval_ms,
            "PI_HEARTBEAT_INTERVAL_MS",
            250,
            60_000,
        );
        apply_u64(
            &mut config.heartbeat_timeout_ms,
            "PI_HEARTBEAT_TIMEOUT_MS",
            1_000,
            300_000,
        );

        // Per-role limits (medium priority).
        apply_u32(&mut config.total_max_llm, "PI_AGENT_MAX_LLM", 1, 64);
        apply_u32(
            &mut config.total_max_requests,
            "PI_AGENT_MAX_REQUESTS",
            1,
            128,
        );
        apply_u32(&mut config.subagent_parallel, "PI_AGENT_MAX_SUBAGENTS", 1, 32);

        // Unified PI_LIMIT_* names (highest priority).
        apply_u32(&mut config.total_max_llm, "PI_LIMIT_MAX_TOTAL_LLM", 1, 64);
        apply_u32(
            &mut config.total_max_requests,
            "PI_LIMIT_MAX_TOTAL_REQUESTS",
            1,
            128,
        );
        apply_u32(
            &mut config.subagent_parallel,
            "PI_LIMIT_SUBAGENT_PARALLEL",
            1,
            32,
        );
        apply_u32(&mut config.team_parallel, "PI_LIMIT_TEAM_PARALLEL", 1, 32);
        apply_u32(
            &mut config.teammate_parallel,
            "PI_LIMIT_TEAMMATE_PARALLEL",
            1,
            32,
        );
        apply_u32(
            &mut config.orchestration_parallel,
            "PI_LIMIT_ORCHESTRATION_PARALLEL",
            1,
            32,
        );
        apply_bool(&mut config.adaptive_enabled, "PI_LIMIT_ADAPTIVE_ENABLED");
        apply_bool(&mut config.predictive_enabled, "PI_LIMIT_PREDICTIVE_ENABLED");

        config.config_version = CONFIG_VERSION.fetch_add(1, Ordering::SeqCst) + 1;
        config
    }

    /// Advisory consistency checks. Never fatal.
    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();
        if self.subagent_parallel > self.total_max_llm {
            warnings.push(ConfigWarning(format!(
                "subagent parallelism ({}) exceeds total LLM budget ({}); subagents will queue",
                self.subagent_parallel, self.total_max_llm
            )));
        }
        if self.total_max_llm > self.total_max_requests {
            warnings.push(ConfigWarning(format!(
                "total LLM budget ({}) exceeds total request budget ({})",
                self.total_max_llm, self.total_max_requests
            )));
        }
        if let (Ok(legacy), Ok(unified)) = (
            std::env::var("PI_TOTAL_MAX_LLM"),
            std::env::var("PI_LIMIT_MAX_TOTAL_LLM"),
        ) {
            if legacy != unified {
                warnings.push(ConfigWarning(format!(
                    "conflicting env vars: PI_TOTAL_MAX_LLM={legacy} vs PI_LIMIT_MAX_TOTAL_LLM={unified}; PI_LIMIT_MAX_TOTAL_LLM wins"
                )));
            }
        }
        warnings
    }
}

/// Parse an env var as u64 within `[min, max]`; warn and skip otherwise.
fn parse_in_range(name: &str, min: u64, max: u64) -> Option<u64> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse::<u64>() {
        Ok(value) if (min..=max).contains(&value) => Some(value),
        Ok(value) => {
            warn!(var = name, value, min, max, "env override out of range, ignored");
            None
        }
        Err(_) => {
            warn!(var = name, value = %raw, "env override not a number, ignored");
            None
        }
    }
}

fn apply_u32(target: &mut u32, name: &str, min: u32, max: u32) {
    if let Some(value) = parse_in_range(name, u64::from(min), u64::from(max)) {
        *target = value as u32;
    }
}

fn apply_u64(target: &mut u64, name: &str, min: u64, max: u64) {
    if let Some(value) = parse_in_range(name, min, max) {
        *target = value;
    }
}

fn apply_bool(target: &mut bool, name: &str) {
    if let Ok(raw) = std::env::var(name) {
        match raw.to_lowercase().as_str() {
            "true" | "1" | "yes" => *target = true,
            "false" | "0" | "no" => *target = false,
            other => warn!(var = name, value = other, "env override not a boolean, ignored"),
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
