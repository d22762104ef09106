// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Centralized environment variable access for the engine crate.

use crate::runner::VerifyPolicy;
use tracing::warn;

/// Resolve the verification policy from `PI_LOOP_VERIFY_POLICY` /
/// `PI_LOOP_VERIFY_EVERY_N`. Default: run only on `done`.
pub fn verify_policy() -> VerifyPolicy {
    match std::env::var("PI_LOOP_VERIFY_POLICY")
        .unwrap_or_default()
        .to_lowercase()
        .as_str()
    {
        "always" => VerifyPolicy::Always,
        "every_n" => {
            let n = std::env::var("PI_LOOP_VERIFY_EVERY_N")
                .ok()
                .and_then(|raw| raw.trim().parse::<u32>().ok())
                .filter(|n| *n >= 1)
                .unwrap_or(1);
            VerifyPolicy::EveryN(n)
        }
        "done_only" | "" => VerifyPolicy::DoneOnly,
        other => {
            warn!(value = other, "unknown PI_LOOP_VERIFY_POLICY, using done_only");
            VerifyPolicy::DoneOnly
        }
    }
}

/// Additional allow-list prefixes from
/// `PI_LOOP_VERIFY_ALLOWLIST_ADDITIONAL` (comma-separated commands).
///
/// The deprecated override variable `PI_LOOP_VERIFY_ALLOWLIST` is
/// ignored: the built-in list is immutable.
pub fn allowlist_additional() -> Vec<Vec<String>> {
    if std::env::var("PI_LOOP_VERIFY_ALLOWLIST").is_ok() {
        warn!("PI_LOOP_VERIFY_ALLOWLIST is deprecated and ignored; use PI_LOOP_VERIFY_ALLOWLIST_ADDITIONAL to extend the built-in list");
    }
    std::env::var("PI_LOOP_VERIFY_ALLOWLIST_ADDITIONAL")
        .unwrap_or_default()
        .split(',')
        .filter_map(|prefix| {
            let tokens: Vec<String> = prefix.split_whitespace().map(str::to_string).collect();
            if tokens.is_empty() {
                None
            } else {
                Some(tokens)
            }
        })
        .collect()
}
