//! Scenario: goal + verification. A `done` whose verification fails is
//! rejected with feedback; the next `done` with a passing verification
//! completes the run.

use crate::prelude::*;
use pi_core::{GoalStatus, LoopStatus};
use pi_engine::LoopConfig;
use serial_test::serial;

#[tokio::test]
#[serial]
async fn failing_verification_rejects_done_until_it_passes() {
    std::env::remove_var("PI_LOOP_VERIFY_POLICY");
    let h = loop_harness();
    let config = LoopConfig {
        max_iterations: 6,
        ..LoopConfig::default()
    };

    for n in 1..=2 {
        h.model.push_reply(reply(
            LoopStatus::Continue,
            GoalStatus::NotMet,
            &format!("progress {n}"),
            &format!("step {n}"),
            &[],
        ));
    }
    h.model.push_reply(reply(
        LoopStatus::Done,
        GoalStatus::Met,
        "should be green",
        "claiming done",
        &[],
    ));
    h.model.push_reply(reply(
        LoopStatus::Done,
        GoalStatus::Met,
        "is green",
        "done for real",
        &[],
    ));
    h.verifier.push_result(false);
    h.verifier.push_result(true);

    let mut request = base_request(&h, "make all tests pass", config);
    request.goal = Some("all tests pass".to_string());
    request.verification_command = Some("npm test".to_string());

    let outcome = h.runner.run(request, never_cancelled()).await.unwrap();

    assert!(outcome.completed);
    assert_eq!(outcome.iterations, 4);
    assert_eq!(outcome.last_verification_passed, Some(true));

    // done_only policy: only the two done declarations verified
    assert_eq!(h.verifier.runs(), vec!["npm test", "npm test"]);

    // the log carries three iteration events before the successful one
    let log = std::fs::read_to_string(&outcome.log_path).unwrap();
    let iterations: Vec<serde_json::Value> = log
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .filter(|event: &serde_json::Value| event["type"] == "iteration")
        .collect();
    assert_eq!(iterations.len(), 4);
    // the rejected done was downgraded and marked
    assert_eq!(iterations[2]["status"], "continue");
    assert!(iterations[2]["summary"]
        .as_str()
        .unwrap()
        .starts_with("rejected by system validation"));
    assert_eq!(iterations[3]["status"], "done");
    assert_eq!(iterations[3]["verification_passed"], true);
}
