// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Model invocation via a provider CLI subprocess.
//!
//! One call = one subprocess: the prompt goes in on stdin, the reply
//! comes back on stdout. The timeout is absolute for the whole call.
//! Cancellation follows the universal protocol: SIGTERM, a short grace
//! period, then SIGKILL.

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::{debug, warn};

/// Receiver half of a cancellation signal; `true` means "stop now".
pub type CancelToken = tokio::sync::watch::Receiver<bool>;

/// Grace period between SIGTERM and SIGKILL.
const KILL_GRACE: Duration = Duration::from_secs(2);

/// Identity of the model to invoke.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelHandle {
    pub provider: String,
    pub id: String,
    pub thinking_level: ThinkingLevel,
}

/// Requested reasoning depth, forwarded to the provider CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ThinkingLevel {
    #[default]
    Off,
    Low,
    Medium,
    High,
}

impl ThinkingLevel {
    pub fn as_arg(self) -> &'static str {
        match self {
            ThinkingLevel::Off => "off",
            ThinkingLevel::Low => "low",
            ThinkingLevel::Medium => "medium",
            ThinkingLevel::High => "high",
        }
    }
}

/// Classified model invocation failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    #[error("model call timed out after {0} ms")]
    Timeout(u64),
    #[error("model exited with status {code}: {stderr}")]
    NonZeroExit { code: i32, stderr: String },
    #[error("model produced empty output")]
    EmptyOutput,
    #[error("model call aborted")]
    Aborted,
    #[error("spawn failed: {0}")]
    Spawn(String),
    #[error("model io error: {0}")]
    Io(String),
}

/// Anything that can run one model call to completion.
#[async_trait]
pub trait ModelAdapter: Send + Sync + 'static {
    async fn call(
        &self,
        handle: &ModelHandle,
        prompt: &str,
        timeout: Duration,
        cancel: CancelToken,
    ) -> Result<String, ModelError>;
}

/// Production adapter shelling out to the provider CLI.
#[derive(Debug, Clone)]
pub struct SubprocessModelAdapter {
    /// Binary to execute (e.g. `pi-llm`).
    pub program: String,
    /// Arguments placed before the generated `--provider/--model` flags.
    pub base_args: Vec<String>,
    /// Working directory for the child, when set.
    pub working_dir: Option<PathBuf>,
    /// Skip the provider/model/thinking flags (used when `program` is a
    /// self-contained wrapper script).
    pub pass_model_flags: bool,
    /// Grace period between SIGTERM and SIGKILL.
    pub grace: Duration,
}

impl SubprocessModelAdapter {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            base_args: Vec::new(),
            working_dir: None,
            pass_model_flags: true,
            grace: KILL_GRACE,
        }
    }
}

#[async_trait]
impl ModelAdapter for SubprocessModelAdapter {
    async fn call(
        &self,
        handle: &ModelHandle,
        prompt: &str,
        timeout: Duration,
        mut cancel: CancelToken,
    ) -> Result<String, ModelError> {
        if *cancel.borrow() {
            return Err(ModelError::Aborted);
        }

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.base_args);
        if self.pass_model_flags {
            cmd.args(["--provider", &handle.provider])
                .args(["--model", &handle.id])
                .args(["--thinking", handle.thinking_level.as_arg()]);
        }
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| ModelError::Spawn(e.to_string()))?;
        let child_pid = child.id();
        debug!(program = %self.program, model = %handle.id, pid = ?child_pid, "model subprocess spawned");

        let mut stdin_pipe = child.stdin.take();
        let mut stdout_pipe = child.stdout.take();
        let mut stderr_pipe = child.stderr.take();
        let wait = async {
            // Feed stdin and drain both output pipes concurrently so no
            // pipe can back-pressure the child while we wait on another.
            // A failed stdin write (child exited early) is not itself an
            // error; the exit status decides.
            let stdin_write = async {
                if let Some(mut stdin) = stdin_pipe.take() {
                    let _ = stdin.write_all(prompt.as_bytes()).await;
                }
            };
            let stdout_read = async {
                let mut buffer = String::new();
                if let Some(pipe) = stdout_pipe.as_mut() {
                    let _ = pipe.read_to_string(&mut buffer).await;
                }
                buffer
            };
            let stderr_read = async {
                let mut buffer = String::new();
                if let Some(pipe) = stderr_pipe.as_mut() {
                    let _ = pipe.read_to_string(&mut buffer).await;
                }
                buffer
            };
            let ((), stdout, stderr) = tokio::join!(stdin_write, stdout_read, stderr_read);
            let status = child
                .wait()
                .await
                .map_err(|e| ModelError::Io(e.to_string()))?;
            Ok::<_, ModelError>((status, stdout, stderr))
        };
        tokio::pin!(wait);

        let (status, stdout, stderr) = tokio::select! {
            result = tokio::time::timeout(timeout, &mut wait) => match result {
                Ok(done) => done?,
                Err(_elapsed) => {
                    terminate(child_pid, self.grace).await;
                    return Err(ModelError::Timeout(timeout.as_millis() as u64));
                }
            },
            _ = cancelled(&mut cancel) => {
                terminate(child_pid, self.grace).await;
                return Err(ModelError::Aborted);
            }
        };

        if !status.success() {
            return Err(ModelError::NonZeroExit {
                code: status.code().unwrap_or(-1),
                stderr: stderr.chars().take(2_000).collect(),
            });
        }
        if stdout.trim().is_empty() {
            return Err(ModelError::EmptyOutput);
        }
        Ok(stdout)
    }
}

/// Resolve when the token flips to `true`. A dropped sender means
/// cancellation can never arrive; park forever instead of firing.
pub async fn cancelled(cancel: &mut CancelToken) {
    loop {
        if *cancel.borrow() {
            return;
        }
        if cancel.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// SIGTERM, grace, SIGKILL.
pub async fn terminate(pid: Option<u32>, grace: Duration) {
    let Some(pid) = pid else { return };
    signal(pid, "-15");
    tokio::time::sleep(grace).await;
    signal(pid, "-9");
}

fn signal(pid: u32, sig: &str) {
    let result = std::process::Command::new("kill")
        .args([sig, &pid.to_string()])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
    if let Err(e) = result {
        warn!(pid, sig, error = %e, "kill failed");
    }
}

#[cfg(test)]
#[path = "model_tests.rs"]
mod tests;
