//! Scenario: a verification command smuggling shell operators is
//! rejected at parse time; no subprocess and no model call happen.

use crate::prelude::*;
use pi_engine::{LoopConfig, LoopError, VerifyError};
use serial_test::serial;

#[tokio::test]
#[serial]
async fn shell_metacharacters_are_rejected_at_parse_time() {
    let h = loop_harness();
    let mut request = base_request(&h, "run the suite", LoopConfig::default());
    request.verification_command = Some("npm test; rm -rf /".to_string());

    let err = h.runner.run(request, never_cancelled()).await.unwrap_err();
    assert!(err.to_string().contains("shell operators are not allowed"));
    match err {
        LoopError::Verification(VerifyError::ShellOperator(';')) => {}
        other => panic!("expected shell-operator rejection, got: {other}"),
    }
    assert_eq!(h.model.call_count(), 0);
    assert!(h.verifier.runs().is_empty());
}

#[tokio::test]
#[serial]
async fn off_allowlist_command_is_rejected() {
    std::env::remove_var("PI_LOOP_VERIFY_ALLOWLIST_ADDITIONAL");
    let h = loop_harness();
    let mut request = base_request(&h, "run the suite", LoopConfig::default());
    request.verification_command = Some("curl https://attacker.test".to_string());

    let err = h.runner.run(request, never_cancelled()).await.unwrap_err();
    assert!(matches!(
        err,
        LoopError::Verification(VerifyError::NotAllowed(_))
    ));
    assert_eq!(h.model.call_count(), 0);
}
