//! Scenario: the model cites a reference that was never loaded. The
//! validation error is normalized and leads the next prompt's feedback.

use crate::prelude::*;
use pi_core::{GoalStatus, LoopStatus};
use pi_engine::{LoopConfig, Reference};
use serial_test::serial;

fn reference(n: u32) -> Reference {
    Reference {
        id: format!("R{n}"),
        title: format!("Reference {n}"),
        source: "docs/".to_string(),
        content: "reference text".to_string(),
    }
}

#[tokio::test]
#[serial]
async fn out_of_range_citation_is_fed_back_first() {
    let h = loop_harness();

    h.model.push_reply(reply(
        LoopStatus::Continue,
        GoalStatus::Unknown,
        "quoting a ghost",
        "see R3 for details",
        &["R3"],
    ));
    h.model.push_reply(reply(
        LoopStatus::Done,
        GoalStatus::Met,
        "quoting the pack",
        "see R1",
        &["R1"],
    ));

    let mut request = base_request(
        &h,
        "summarize the references",
        LoopConfig {
            max_iterations: 4,
            ..LoopConfig::default()
        },
    );
    request.references = vec![reference(1), reference(2)];

    let outcome = h.runner.run(request, never_cancelled()).await.unwrap();
    assert!(outcome.completed);
    assert_eq!(outcome.iterations, 2);

    let second_prompt = &h.model.calls()[1].prompt;
    assert!(
        second_prompt.contains("FEEDBACK TO ADDRESS:\n1. Invalid citation IDs: R3."),
        "feedback must lead with the invalid citation: {second_prompt}"
    );
}
