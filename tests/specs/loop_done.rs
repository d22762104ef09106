//! Scenario: single instance, stable profile, no goal, no references.
//! A well-formed `done` reply completes the run in one iteration.

use crate::prelude::*;
use pi_core::{GoalStatus, LoopStatus, RuntimeConfig, RuntimeProfile};
use pi_engine::{LoopConfig, StopReason};
use serial_test::serial;

#[tokio::test]
#[serial]
async fn stable_profile_done_in_one_iteration() {
    let h = loop_harness();
    let profile = RuntimeConfig::for_profile(RuntimeProfile::Stable);
    let config = LoopConfig {
        max_iterations: 4,
        timeout_ms: profile.iteration_timeout_ms,
        ..LoopConfig::default()
    };

    h.model.push_reply(reply(
        LoopStatus::Done,
        GoalStatus::Met,
        "x",
        "full result body",
        &[],
    ));

    let outcome = h
        .runner
        .run(base_request(&h, "answer the question", config), never_cancelled())
        .await
        .unwrap();

    assert!(outcome.completed);
    assert_eq!(outcome.stop_reason, StopReason::ModelDone);
    assert_eq!(outcome.iterations, 1);
    assert_eq!(outcome.preview, "x");

    // provenance: one run_start, one iteration, one run_done
    let log = std::fs::read_to_string(&outcome.log_path).unwrap();
    let types: Vec<String> = log
        .lines()
        .map(|line| {
            serde_json::from_str::<serde_json::Value>(line).unwrap()["type"]
                .as_str()
                .unwrap()
                .to_string()
        })
        .collect();
    assert_eq!(types, vec!["run_start", "iteration", "run_done"]);
}
