//! Scenario: a declarative task whose replies never change.
//! Declarative tolerance (0.6) sets the repetition threshold at 3, so
//! the run survives to iteration 4 and stops there as stagnation.

use crate::prelude::*;
use pi_core::{GoalStatus, LoopStatus};
use pi_engine::{LoopConfig, StopReason};
use serial_test::serial;

#[tokio::test]
#[serial]
async fn declarative_task_stops_on_third_repetition() {
    let h = loop_harness();
    let config = LoopConfig {
        max_iterations: 4,
        enable_semantic_stagnation: false,
        ..LoopConfig::default()
    };

    for _ in 0..4 {
        h.model.push_reply(reply(
            LoopStatus::Continue,
            GoalStatus::Unknown,
            "looked it up again",
            "the capital is Lisbon",
            &[],
        ));
    }

    let outcome = h
        .runner
        .run(base_request(&h, "find the capital city", config), never_cancelled())
        .await
        .unwrap();

    assert!(!outcome.completed);
    assert_eq!(outcome.stop_reason, StopReason::Stagnation);
    assert_eq!(outcome.iterations, 4);
    // all four scripted replies were consumed: no early stop at 2 or 3
    assert_eq!(h.model.call_count(), 4);
}
