// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The iteration loop: prompt → model call → parse → validate →
//! verify? → decide.
//!
//! Each iteration is one model subprocess call. The model's structured
//! reply is validated; a `done` that fails validation is downgraded to
//! `continue` with corrective feedback. The loop terminates on a clean
//! `done`, two consecutive call failures, detected stagnation (outside
//! deterministic-goal mode), exhaustion, or cancellation — always
//! writing the run summary on the way out.

use crate::feedback::normalize_feedback;
use crate::prompt::{build_iteration_prompt, PromptInputs, Reference};
use crate::repetition::{
    detect_semantic_repetition, RepetitionCheck, RepetitionOptions, SimilarityMethod,
    TrajectoryTracker, DEFAULT_MAX_TEXT_LENGTH,
};
use crate::run_log::{write_summary, RunEvent, RunLogError, RunLogger, RunSummary, StagnationStats};
use crate::timeout::compute_model_timeout_ms;
use crate::verify::{validate_command, VerifyAdapter, VerifyError};
use pi_adapters::{CancelToken, ModelAdapter, ModelError, ModelHandle, NotifySink};
use pi_coordinator::{is_rate_limit_error, AdaptiveModelLimiter, AdaptiveTotalBudget};
use pi_core::intent::{adjusted_similarity_threshold, IntentBudget, IntentClassifier};
use pi_core::{Clock, GoalStatus, IntentClassification, LoopStatus};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

/// When to run the verification command (besides `done` declarations and
/// the final iteration, which always verify).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyPolicy {
    Always,
    DoneOnly,
    EveryN(u32),
}

/// Why a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    ModelDone,
    Stagnation,
    IterationError,
    MaxIterations,
    Cancelled,
}

/// User-tunable loop configuration. Out-of-range values clamp silently.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoopConfig {
    pub max_iterations: u32,
    pub timeout_ms: u64,
    pub verification_timeout_ms: u64,
    pub require_citation: bool,
    pub enable_semantic_stagnation: bool,
    pub semantic_repetition_threshold: f64,
    pub classify_intent: bool,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_iterations: 8,
            timeout_ms: 120_000,
            verification_timeout_ms: 30_000,
            require_citation: false,
            enable_semantic_stagnation: false,
            semantic_repetition_threshold: 0.85,
            classify_intent: true,
        }
    }
}

impl LoopConfig {
    /// Clamp every field into its allowed range.
    pub fn clamped(mut self) -> Self {
        self.max_iterations = self.max_iterations.clamp(1, 16);
        self.timeout_ms = self.timeout_ms.clamp(10_000, 600_000);
        self.verification_timeout_ms = self.verification_timeout_ms.clamp(1_000, 120_000);
        self.semantic_repetition_threshold = self.semantic_repetition_threshold.clamp(0.7, 0.95);
        self
    }
}

/// Clamp the loop to an intent budget.
pub fn apply_intent_limits(config: &mut LoopConfig, budget: &IntentBudget) {
    config.max_iterations = config.max_iterations.min(budget.max_iterations);
    config.timeout_ms =
        ((config.timeout_ms as f64 * budget.timeout_multiplier) as u64).clamp(10_000, 600_000);
}

/// Consecutive repetitions tolerated before stagnation, by intent
/// tolerance: `max(1, round(base · (2 + tolerance)))`.
pub fn stagnation_threshold(base: u32, tolerance: f64) -> u32 {
    ((f64::from(base) * (2.0 + tolerance)).round() as u32).max(1)
}

/// One loop run request.
#[derive(Debug, Clone)]
pub struct LoopRequest {
    pub task: String,
    pub goal: Option<String>,
    pub verification_command: Option<String>,
    pub config: LoopConfig,
    pub references: Vec<Reference>,
    pub model: ModelHandle,
    pub cwd: PathBuf,
    pub run_dir: PathBuf,
}

/// Final run outcome (also persisted as the summary).
#[derive(Debug, Clone)]
pub struct LoopOutcome {
    pub run_id: String,
    pub completed: bool,
    pub stop_reason: StopReason,
    pub iterations: u32,
    pub last_verification_passed: Option<bool>,
    pub preview: String,
    pub log_path: PathBuf,
    pub summary_path: PathBuf,
    pub intent: Option<IntentClassification>,
}

/// Errors that abort a run before or outside the iteration loop.
#[derive(Debug, Error)]
pub enum LoopError {
    #[error("invalid verification command: {0}")]
    Verification(#[from] VerifyError),
    #[error("run artifact error: {0}")]
    Artifacts(#[from] RunLogError),
}

/// Adaptive limiters the runner reports model outcomes to.
pub struct LoopLimiters<C: Clock> {
    pub model: Arc<AdaptiveModelLimiter<C>>,
    pub total: Arc<AdaptiveTotalBudget<C>>,
    /// Static preset concurrency for the model in use.
    pub preset: u32,
}

impl<C: Clock> Clone for LoopLimiters<C> {
    fn clone(&self) -> Self {
        Self {
            model: Arc::clone(&self.model),
            total: Arc::clone(&self.total),
            preset: self.preset,
        }
    }
}

/// The loop engine, generic over its collaborators.
pub struct LoopRunner<M, E, V, N, C: Clock> {
    model: M,
    embedder: E,
    verifier: V,
    notify: N,
    clock: C,
    limiters: Option<LoopLimiters<C>>,
}

impl<M, E, V, N, C> LoopRunner<M, E, V, N, C>
where
    M: ModelAdapter,
    E: pi_adapters::EmbeddingProvider,
    V: VerifyAdapter,
    N: NotifySink,
    C: Clock,
{
    pub fn new(model: M, embedder: E, verifier: V, notify: N, clock: C) -> Self {
        Self {
            model,
            embedder,
            verifier,
            notify,
            clock,
            limiters: None,
        }
    }

    /// Attach adaptive limiters; model outcomes will be reported to them.
    pub fn with_limiters(mut self, limiters: LoopLimiters<C>) -> Self {
        self.limiters = Some(limiters);
        self
    }

    /// Execute a full run. Returns `Err` only for an invalid
    /// verification command or artifact IO failure; every other ending
    /// is an outcome.
    pub async fn run(
        &self,
        request: LoopRequest,
        cancel: CancelToken,
    ) -> Result<LoopOutcome, LoopError> {
        let mut config = request.config.clone().clamped();

        // Reject a bad verification command before any subprocess exists.
        if let Some(command) = &request.verification_command {
            validate_command(command)?;
        }

        let intent = if config.classify_intent {
            Some(IntentClassifier::new().classify(&request.task, request.goal.as_deref()))
        } else {
            None
        };
        let tolerance = intent
            .as_ref()
            .map(|c| c.intent.budget().repetition_tolerance)
            .unwrap_or(0.5);
        if let Some(classification) = &intent {
            apply_intent_limits(&mut config, &classification.intent.budget());
        }
        let repeat_threshold = stagnation_threshold(1, tolerance);
        let similarity_threshold =
            adjusted_similarity_threshold(config.semantic_repetition_threshold, tolerance);
        let verify_policy = crate::env::verify_policy();
        let deterministic_mode =
            request.goal.is_some() || request.verification_command.is_some();

        let run_id = uuid::Uuid::new_v4().to_string();
        info!(run_id = %run_id, task = %request.task, max_iterations = config.max_iterations, "run starting");

        let mut logger = RunLogger::create(&request.run_dir, &run_id)?;
        logger.append(&RunEvent::RunStart {
            run_id: run_id.clone(),
            task: request.task.clone(),
            provider: request.model.provider.clone(),
            model: request.model.id.clone(),
            max_iterations: config.max_iterations,
            timestamp_ms: self.clock.epoch_ms(),
        })?;

        let mut previous_output = String::new();
        let mut feedback: Vec<String> = Vec::new();
        let mut consecutive_failures = 0u32;
        let mut repeated_count = 0u32;
        let mut tracker = TrajectoryTracker::default();
        let mut last_verification_passed: Option<bool> = None;
        let mut completed = false;
        let mut stop_reason = StopReason::MaxIterations;
        let mut iterations_run = 0u32;
        let mut preview = String::new();

        for iteration in 1..=config.max_iterations {
            if *cancel.borrow() {
                stop_reason = StopReason::Cancelled;
                break;
            }
            iterations_run = iteration;

            let prompt = build_iteration_prompt(&PromptInputs {
                iteration,
                max_iterations: config.max_iterations,
                task: &request.task,
                goal: request.goal.as_deref(),
                verification_command: request.verification_command.as_deref(),
                references: &request.references,
                previous_output: &previous_output,
                feedback: &feedback,
            });
            let timeout = Duration::from_millis(compute_model_timeout_ms(
                &request.model.id,
                config.timeout_ms,
                request.model.thinking_level,
            ));

            let output = match self
                .model
                .call(&request.model, &prompt, timeout, cancel.clone())
                .await
            {
                Ok(output) => {
                    consecutive_failures = 0;
                    self.report_success(&request.model);
                    output
                }
                Err(error) => {
                    let message = error.to_string();
                    if is_rate_limit_error(&message) {
                        self.report_rate_limit(&request.model, &message).await;
                    }
                    if error == ModelError::Aborted {
                        logger.append(&RunEvent::IterationError {
                            iteration,
                            message,
                            consecutive_failures,
                        })?;
                        stop_reason = StopReason::Cancelled;
                        break;
                    }
                    consecutive_failures += 1;
                    warn!(iteration, error = %message, "iteration failed");
                    logger.append(&RunEvent::IterationError {
                        iteration,
                        message: message.clone(),
                        consecutive_failures,
                    })?;
                    if consecutive_failures >= 2 {
                        stop_reason = StopReason::IterationError;
                        break;
                    }
                    previous_output.clear();
                    feedback =
                        normalize_feedback(&[format!("Previous iteration failed: {message}.")]);
                    continue;
                }
            };

            let parsed = pi_core::parse_model_reply(&output);
            let mut errors = parsed.parse_errors.clone();
            let contract = parsed.contract.clone();
            let mut status = contract
                .as_ref()
                .map(|c| c.status)
                .unwrap_or(LoopStatus::Continue);
            let goal_status = contract
                .as_ref()
                .map(|c| c.goal_status)
                .unwrap_or(GoalStatus::Unknown);

            if let Some(contract) = &contract {
                let reference_count = request.references.len();
                if reference_count > 0 && config.require_citation && contract.citations.is_empty()
                {
                    errors.push(
                        "At least one citation is required; cite references as [R#].".to_string(),
                    );
                }
                let out_of_range: Vec<String> = contract
                    .citations
                    .iter()
                    .filter(|c| {
                        citation_index(c)
                            .map(|n| n == 0 || n > reference_count)
                            .unwrap_or(true)
                    })
                    .cloned()
                    .collect();
                if !out_of_range.is_empty() {
                    errors.push(format!("Invalid citation IDs: {}.", out_of_range.join(", ")));
                }
            }

            if request.goal.is_some()
                && status == LoopStatus::Done
                && goal_status != GoalStatus::Met
            {
                errors.push(
                    "Done declared but the goal is not met; continue until GOAL_STATUS=met."
                        .to_string(),
                );
            }

            let mut verification_passed = None;
            if let Some(command) = &request.verification_command {
                let policy_says = match verify_policy {
                    VerifyPolicy::Always => true,
                    VerifyPolicy::DoneOnly => false,
                    VerifyPolicy::EveryN(n) => iteration % n == 0,
                };
                if policy_says
                    || status == LoopStatus::Done
                    || iteration == config.max_iterations
                {
                    let outcome = self
                        .verifier
                        .run(
                            command,
                            &request.cwd,
                            Duration::from_millis(config.verification_timeout_ms),
                            cancel.clone(),
                        )
                        .await?;
                    verification_passed = Some(outcome.passed);
                    last_verification_passed = Some(outcome.passed);
                    if !outcome.passed {
                        if outcome.timed_out {
                            errors.push(format!(
                                "Verification command timed out after {} ms; eliminate the hang.",
                                config.verification_timeout_ms
                            ));
                        } else {
                            errors.push(format!(
                                "Verification command failed (exit code {}); fix and re-run.",
                                outcome
                                    .exit_code
                                    .map(|code| code.to_string())
                                    .unwrap_or_else(|| "unknown".to_string())
                            ));
                        }
                    }
                }
            }

            // A done that fails validation is never accepted.
            let downgraded = status == LoopStatus::Done && !errors.is_empty();
            if downgraded {
                status = LoopStatus::Continue;
            }

            let current_body = if parsed.result_body.trim().is_empty() {
                output.clone()
            } else {
                parsed.result_body.clone()
            };
            let check = if previous_output.is_empty() {
                RepetitionCheck {
                    is_repeated: false,
                    similarity: 0.0,
                    method: SimilarityMethod::Unavailable,
                }
            } else {
                detect_semantic_repetition(
                    &current_body,
                    &previous_output,
                    &RepetitionOptions {
                        threshold: similarity_threshold,
                        use_embedding: config.enable_semantic_stagnation,
                        max_text_length: DEFAULT_MAX_TEXT_LENGTH,
                    },
                    &self.embedder,
                )
                .await
            };
            match (check.is_repeated, check.method) {
                (true, _) => repeated_count += 1,
                // A definitive "different" resets the streak; an
                // unavailable classification leaves it untouched.
                (false, SimilarityMethod::Embedding) => repeated_count = 0,
                (false, _) => {}
            }
            tracker.record(check);

            let contract_summary = contract
                .as_ref()
                .map(|c| c.summary.clone())
                .unwrap_or_default();
            let logged_summary = if downgraded {
                format!("rejected by system validation: {contract_summary}")
            } else {
                contract_summary.clone()
            };
            logger.append(&RunEvent::Iteration {
                iteration,
                status: match status {
                    LoopStatus::Continue => "continue".to_string(),
                    LoopStatus::Done => "done".to_string(),
                },
                summary: logged_summary,
                validation_errors: errors.clone(),
                verification_passed,
                repeated: check.is_repeated,
                similarity: check.similarity,
                method: check.method,
            })?;

            preview = if contract_summary.trim().is_empty() {
                current_body.chars().take(200).collect()
            } else {
                contract_summary
            };

            if status == LoopStatus::Done && errors.is_empty() {
                completed = true;
                stop_reason = StopReason::ModelDone;
                break;
            }
            if !deterministic_mode && repeated_count >= repeat_threshold {
                info!(iteration, repeated_count, "stagnation detected");
                stop_reason = StopReason::Stagnation;
                break;
            }

            previous_output = current_body;
            feedback = normalize_feedback(&errors);
        }

        logger.append(&RunEvent::RunDone {
            completed,
            stop_reason,
            iterations: iterations_run,
            timestamp_ms: self.clock.epoch_ms(),
        })?;

        let log_path = logger.path().to_path_buf();
        let summary = RunSummary {
            run_id: run_id.clone(),
            task: request.task.clone(),
            completed,
            stop_reason,
            iterations: iterations_run,
            provider: request.model.provider.clone(),
            model: request.model.id.clone(),
            config: config.clone(),
            log_path: log_path.display().to_string(),
            summary_path: request
                .run_dir
                .join(format!("{run_id}.summary.json"))
                .display()
                .to_string(),
            preview: preview.clone(),
            intent: intent.clone(),
            stagnation: Some(StagnationStats {
                repeated_count,
                trend: tracker.trend(),
                is_stuck: tracker.is_stuck(),
            }),
            last_verification_passed,
            created_at: chrono::Utc::now(),
        };
        let run_dir = request.run_dir.clone();
        let summary_path = tokio::task::spawn_blocking(move || write_summary(&run_dir, &summary))
            .await
            .map_err(|e| {
                RunLogError::Io(std::io::Error::other(format!("summary task failed: {e}")))
            })??;

        info!(run_id = %run_id, completed, ?stop_reason, iterations = iterations_run, "run finished");
        Ok(LoopOutcome {
            run_id,
            completed,
            stop_reason,
            iterations: iterations_run,
            last_verification_passed,
            preview,
            log_path,
            summary_path,
            intent,
        })
    }

    fn report_success(&self, model: &ModelHandle) {
        if let Some(limiters) = &self.limiters {
            limiters.model.record_success(&model.provider, &model.id);
            limiters.total.record_success();
        }
    }

    async fn report_rate_limit(&self, model: &ModelHandle, message: &str) {
        if let Some(limiters) = &self.limiters {
            limiters
                .model
                .record_rate_limit(&model.provider, &model.id, limiters.preset);
            limiters.total.record_rate_limit(message);
        }
        self.notify
            .notify(
                "Rate limited",
                &format!("{}/{}: {message}", model.provider, model.id),
            )
            .await;
    }
}

/// Parse the numeric index out of a normalized `R{n}` citation.
fn citation_index(citation: &str) -> Option<usize> {
    citation.strip_prefix('R')?.parse().ok()
}

#[cfg(test)]
#[path = "runner_tests.rs"]
mod tests;
