//! Shared helpers for the behavioral specs.

use pi_adapters::{
    CancelToken, FakeModelAdapter, FakeNotifySink, ModelHandle, NoopEmbedding, ThinkingLevel,
};
use pi_core::{format_contract, FakeClock, GoalStatus, IterationContract, LoopStatus};
use pi_engine::{FakeVerifier, LoopConfig, LoopRequest, LoopRunner};

pub type SpecRunner =
    LoopRunner<FakeModelAdapter, NoopEmbedding, FakeVerifier, FakeNotifySink, FakeClock>;

pub struct LoopHarness {
    pub model: FakeModelAdapter,
    pub verifier: FakeVerifier,
    pub notify: FakeNotifySink,
    pub runner: SpecRunner,
    pub tmp: tempfile::TempDir,
}

pub fn loop_harness() -> LoopHarness {
    let model = FakeModelAdapter::new();
    let verifier = FakeVerifier::new();
    let notify = FakeNotifySink::new();
    let runner = LoopRunner::new(
        model.clone(),
        NoopEmbedding,
        verifier.clone(),
        notify.clone(),
        FakeClock::at(1_700_000_000_000),
    );
    LoopHarness {
        model,
        verifier,
        notify,
        runner,
        tmp: tempfile::tempdir().unwrap(),
    }
}

pub fn model_handle() -> ModelHandle {
    ModelHandle {
        provider: "anthropic".to_string(),
        id: "claude-x".to_string(),
        thinking_level: ThinkingLevel::Off,
    }
}

pub fn base_request(harness: &LoopHarness, task: &str, config: LoopConfig) -> LoopRequest {
    LoopRequest {
        task: task.to_string(),
        goal: None,
        verification_command: None,
        config,
        references: Vec::new(),
        model: model_handle(),
        cwd: harness.tmp.path().to_path_buf(),
        run_dir: harness.tmp.path().join("runs"),
    }
}

pub fn reply(
    status: LoopStatus,
    goal_status: GoalStatus,
    summary: &str,
    body: &str,
    citations: &[&str],
) -> String {
    let contract = IterationContract {
        status,
        goal_status,
        goal_evidence: String::new(),
        summary: summary.to_string(),
        next_actions: vec!["none".to_string()],
        citations: citations.iter().map(|c| c.to_string()).collect(),
    };
    format!("{}\n<RESULT>\n{body}\n</RESULT>", format_contract(&contract))
}

pub fn never_cancelled() -> CancelToken {
    let (_tx, rx) = tokio::sync::watch::channel(false);
    rx
}
