// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Effective per-call model timeout.
//!
//! The result is an absolute timeout for the whole subprocess call (the
//! adapter offers no idle-reset semantics). Thinking depth and known-slow
//! model families scale the user's base timeout; the result is clamped
//! to the same range the loop config allows.

use pi_adapters::ThinkingLevel;

const MIN_TIMEOUT_MS: u64 = 10_000;
const MAX_TIMEOUT_MS: u64 = 600_000;

/// Model id fragments that indicate a slow, deliberate model family.
const SLOW_MODEL_MARKERS: &[&str] = &["opus", "o1", "deep"];

fn thinking_multiplier(level: ThinkingLevel) -> f64 {
    match level {
        ThinkingLevel::Off => 1.0,
        ThinkingLevel::Low => 1.25,
        ThinkingLevel::Medium => 1.5,
        ThinkingLevel::High => 2.0,
    }
}

/// Compute the absolute timeout for one model call.
pub fn compute_model_timeout_ms(
    model_id: &str,
    user_timeout_ms: u64,
    thinking_level: ThinkingLevel,
) -> u64 {
    let id = model_id.to_lowercase();
    let slow = SLOW_MODEL_MARKERS.iter().any(|marker| id.contains(marker));
    let multiplier = thinking_multiplier(thinking_level) * if slow { 1.5 } else { 1.0 };
    ((user_timeout_ms as f64 * multiplier) as u64).clamp(MIN_TIMEOUT_MS, MAX_TIMEOUT_MS)
}

#[cfg(test)]
#[path = "timeout_tests.rs"]
mod tests;
