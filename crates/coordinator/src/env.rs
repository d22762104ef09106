// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Centralized environment variable access for the coordinator crate.

/// Work stealing is on unless `PI_ENABLE_WORK_STEALING=false`.
pub fn work_stealing_enabled() -> bool {
    match std::env::var("PI_ENABLE_WORK_STEALING") {
        Ok(value) => !matches!(value.to_lowercase().as_str(), "false" | "0" | "no"),
        Err(_) => true,
    }
}

/// `PI_DEBUG_COORDINATOR=1` enables diagnostic logging.
pub fn debug_coordinator() -> bool {
    std::env::var("PI_DEBUG_COORDINATOR").as_deref() == Ok("1")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn stealing_defaults_on() {
        std::env::remove_var("PI_ENABLE_WORK_STEALING");
        assert!(work_stealing_enabled());
    }

    #[test]
    #[serial]
    fn stealing_disabled_by_env() {
        std::env::set_var("PI_ENABLE_WORK_STEALING", "false");
        assert!(!work_stealing_enabled());
        std::env::set_var("PI_ENABLE_WORK_STEALING", "0");
        assert!(!work_stealing_enabled());
        std::env::remove_var("PI_ENABLE_WORK_STEALING");
    }

    #[test]
    #[serial]
    fn debug_flag_requires_exact_one() {
        std::env::remove_var("PI_DEBUG_COORDINATOR");
        assert!(!debug_coordinator());
        std::env::set_var("PI_DEBUG_COORDINATOR", "1");
        assert!(debug_coordinator());
        std::env::remove_var("PI_DEBUG_COORDINATOR");
    }
}
