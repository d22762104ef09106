// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Allow-listed verification command execution.
//!
//! The user-declared command is parsed without a shell: simple quoted
//! tokenization, shell operators rejected outright. The parsed tokens
//! must match a built-in allow-list of test-runner prefixes; environment
//! configuration may only add prefixes, never replace the list. Output
//! is capped and passed through secret redaction before anyone sees it.

use async_trait::async_trait;
use pi_adapters::{cancelled, terminate, CancelToken};
use regex::Regex;
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{debug, info};

/// Cap on captured stdout/stderr, each.
const OUTPUT_CAP_BYTES: usize = 64 * 1024;

/// Grace period between SIGTERM and SIGKILL on cancellation.
const KILL_GRACE: Duration = Duration::from_secs(2);

/// Command prefixes that may be executed. Immutable by design.
const BUILTIN_ALLOWLIST: &[&[&str]] = &[
    &["npm", "test"],
    &["npx", "jest"],
    &["npx", "vitest"],
    &["pnpm", "test"],
    &["yarn", "test"],
    &["pytest"],
    &["python", "-m", "pytest"],
    &["python3", "-m", "pytest"],
    &["cargo", "test"],
    &["go", "test"],
    &["make", "test"],
    &["ctest"],
    &["gradle", "test"],
    &["mvn", "test"],
];

/// Shell metacharacters that end parsing immediately.
const SHELL_OPERATORS: &[char] = &['|', '&', ';', '<', '>', '(', ')', '$', '`'];

/// Errors rejecting a verification command before anything runs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerifyError {
    #[error("shell operators are not allowed in verification commands: '{0}'")]
    ShellOperator(char),
    #[error("unterminated quote in verification command")]
    UnterminatedQuote,
    #[error("verification command is empty")]
    EmptyCommand,
    #[error("verification command not on the allow-list: {0}")]
    NotAllowed(String),
}

/// Result of one verification run.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationOutcome {
    pub passed: bool,
    pub timed_out: bool,
    pub exit_code: Option<i32>,
    pub duration_ms: u64,
    pub stdout: String,
    pub stderr: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Tokenize a single-line command without invoking a shell.
///
/// Double and single quotes group words; no expansion of any kind is
/// performed. Any shell operator anywhere in the line is rejected.
pub fn tokenize_command(line: &str) -> Result<Vec<String>, VerifyError> {
    if let Some(operator) = line.chars().find(|c| SHELL_OPERATORS.contains(c)) {
        return Err(VerifyError::ShellOperator(operator));
    }

    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    for c in line.chars() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => current.push(c),
            None if c == '"' || c == '\'' => quote = Some(c),
            None if c.is_whitespace() => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            None => current.push(c),
        }
    }
    if quote.is_some() {
        return Err(VerifyError::UnterminatedQuote);
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    if tokens.is_empty() {
        return Err(VerifyError::EmptyCommand);
    }
    Ok(tokens)
}

/// Check tokens against the built-in allow-list plus env additions.
pub fn is_allowed(tokens: &[String]) -> bool {
    let matches_prefix = |prefix: &[String]| {
        tokens.len() >= prefix.len() && tokens[..prefix.len()] == prefix[..]
    };
    let builtin = BUILTIN_ALLOWLIST.iter().any(|prefix| {
        let prefix: Vec<String> = prefix.iter().map(|s| s.to_string()).collect();
        matches_prefix(&prefix)
    });
    builtin
        || crate::env::allowlist_additional()
            .iter()
            .any(|prefix| matches_prefix(prefix))
}

/// Parse + allow-list check in one step; the gate every command must
/// pass before a subprocess exists.
pub fn validate_command(line: &str) -> Result<Vec<String>, VerifyError> {
    let tokens = tokenize_command(line)?;
    if !is_allowed(&tokens) {
        return Err(VerifyError::NotAllowed(tokens.join(" ")));
    }
    Ok(tokens)
}

/// Replace secret-looking values in captured output.
///
/// Anything shaped like `keyword[=:]value` for the secret keywords is
/// collapsed to `keyword=[redacted]`; space-separated `Bearer <token>`
/// headers are covered by a second pass.
pub fn redact_secrets(text: &str) -> String {
    // Fixed literals; the patterns cannot fail to compile.
    #[allow(clippy::unwrap_used)]
    let assignment =
        Regex::new(r"(?i)(api[_-]?key|token|password|secret|bearer)\s*[=:]\s*\S+").unwrap();
    #[allow(clippy::unwrap_used)]
    let bearer_header = Regex::new(r"(?i)\bbearer\s+[A-Za-z0-9._~+/-]+=*").unwrap();
    let redacted = assignment.replace_all(text, "$1=[redacted]");
    bearer_header
        .replace_all(&redacted, "bearer [redacted]")
        .into_owned()
}

/// Runs verification commands; a trait so the loop engine can be tested
/// without spawning real test suites.
#[async_trait]
pub trait VerifyAdapter: Send + Sync {
    async fn run(
        &self,
        command: &str,
        cwd: &Path,
        timeout: Duration,
        cancel: CancelToken,
    ) -> Result<VerificationOutcome, VerifyError>;
}

/// Production verifier: validates, spawns, caps and redacts output.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandVerifier;

#[async_trait]
impl VerifyAdapter for CommandVerifier {
    async fn run(
        &self,
        command: &str,
        cwd: &Path,
        timeout: Duration,
        mut cancel: CancelToken,
    ) -> Result<VerificationOutcome, VerifyError> {
        let tokens = validate_command(command)?;
        info!(command, "running verification");
        let started = Instant::now();

        let mut cmd = Command::new(&tokens[0]);
        cmd.args(&tokens[1..])
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                return Ok(VerificationOutcome {
                    passed: false,
                    timed_out: false,
                    exit_code: None,
                    duration_ms: started.elapsed().as_millis() as u64,
                    stdout: String::new(),
                    stderr: String::new(),
                    error: Some(format!("spawn failed: {e}")),
                })
            }
        };
        let child_pid = child.id();

        let mut stdout_pipe = child.stdout.take();
        let mut stderr_pipe = child.stderr.take();
        let wait = async {
            // Drain both pipes concurrently so neither can back-pressure
            // the child while we wait on the other.
            let stdout_read = async {
                let mut buffer = Vec::new();
                if let Some(pipe) = stdout_pipe.as_mut() {
                    let _ = pipe.read_to_end(&mut buffer).await;
                }
                buffer
            };
            let stderr_read = async {
                let mut buffer = Vec::new();
                if let Some(pipe) = stderr_pipe.as_mut() {
                    let _ = pipe.read_to_end(&mut buffer).await;
                }
                buffer
            };
            let (stdout, stderr) = tokio::join!(stdout_read, stderr_read);
            let status = child.wait().await;
            (status, stdout, stderr)
        };
        tokio::pin!(wait);

        let (status, stdout, stderr) = tokio::select! {
            result = tokio::time::timeout(timeout, &mut wait) => match result {
                Ok(done) => done,
                Err(_elapsed) => {
                    terminate(child_pid, KILL_GRACE).await;
                    return Ok(VerificationOutcome {
                        passed: false,
                        timed_out: true,
                        exit_code: None,
                        duration_ms: started.elapsed().as_millis() as u64,
                        stdout: String::new(),
                        stderr: String::new(),
                        error: Some(format!("timed out after {} ms", timeout.as_millis())),
                    });
                }
            },
            _ = cancelled(&mut cancel) => {
                terminate(child_pid, KILL_GRACE).await;
                return Ok(VerificationOutcome {
                    passed: false,
                    timed_out: false,
                    exit_code: None,
                    duration_ms: started.elapsed().as_millis() as u64,
                    stdout: String::new(),
                    stderr: String::new(),
                    error: Some("cancelled".to_string()),
                });
            }
        };

        let exit_code = status.as_ref().ok().and_then(|s| s.code());
        let passed = status.as_ref().map(|s| s.success()).unwrap_or(false);
        let outcome = VerificationOutcome {
            passed,
            timed_out: false,
            exit_code,
            duration_ms: started.elapsed().as_millis() as u64,
            stdout: redact_secrets(&cap_output(stdout)),
            stderr: redact_secrets(&cap_output(stderr)),
            error: status.err().map(|e| e.to_string()),
        };
        debug!(passed = outcome.passed, exit_code = ?outcome.exit_code, "verification finished");
        Ok(outcome)
    }
}

fn cap_output(bytes: Vec<u8>) -> String {
    let mut text = String::from_utf8_lossy(&bytes).into_owned();
    if text.len() > OUTPUT_CAP_BYTES {
        let mut cut = OUTPUT_CAP_BYTES;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text.truncate(cut);
    }
    text
}

/// Scripted verifier for tests: validates for real, then returns queued
/// outcomes instead of spawning.
#[cfg(any(test, feature = "test-support"))]
#[derive(Clone, Default)]
pub struct FakeVerifier {
    outcomes: std::sync::Arc<parking_lot::Mutex<std::collections::VecDeque<VerificationOutcome>>>,
    runs: std::sync::Arc<parking_lot::Mutex<Vec<String>>>,
}

#[cfg(any(test, feature = "test-support"))]
impl FakeVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_outcome(&self, outcome: VerificationOutcome) {
        self.outcomes.lock().push_back(outcome);
    }

    pub fn push_result(&self, passed: bool) {
        self.push_outcome(VerificationOutcome {
            passed,
            timed_out: false,
            exit_code: Some(if passed { 0 } else { 1 }),
            duration_ms: 10,
            stdout: String::new(),
            stderr: String::new(),
            error: None,
        });
    }

    /// Commands actually executed (post-validation).
    pub fn runs(&self) -> Vec<String> {
        self.runs.lock().clone()
    }
}

#[cfg(any(test, feature = "test-support"))]
#[async_trait]
impl VerifyAdapter for FakeVerifier {
    async fn run(
        &self,
        command: &str,
        _cwd: &Path,
        _timeout: Duration,
        _cancel: CancelToken,
    ) -> Result<VerificationOutcome, VerifyError> {
        validate_command(command)?;
        self.runs.lock().push(command.to_string());
        Ok(self.outcomes.lock().pop_front().unwrap_or(VerificationOutcome {
            passed: true,
            timed_out: false,
            exit_code: Some(0),
            duration_ms: 1,
            stdout: String::new(),
            stderr: String::new(),
            error: None,
        }))
    }
}

#[cfg(test)]
#[path = "verify_tests.rs"]
mod tests;
