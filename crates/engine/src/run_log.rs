// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! On-disk provenance for loop runs.
//!
//! `{runDir}/{runId}.jsonl` is an append-only NDJSON event log;
//! `{runId}.summary.json` and `latest-summary.json` are whole-file
//! snapshots written atomically. `latest-summary.json` is shared between
//! runs, so it is additionally guarded by the file lock.

use crate::repetition::{SimilarityMethod, SimilarityTrend};
use crate::runner::{LoopConfig, StopReason};
use chrono::{DateTime, Utc};
use pi_coordinator::{atomic_write_text, with_file_lock, FileLockOptions, FsLockError};
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors from run artifact IO.
#[derive(Debug, Error)]
pub enum RunLogError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("lock error: {0}")]
    Lock(#[from] FsLockError),
}

/// One NDJSON event in the run log.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    RunStart {
        run_id: String,
        task: String,
        provider: String,
        model: String,
        max_iterations: u32,
        timestamp_ms: u64,
    },
    Iteration {
        iteration: u32,
        status: String,
        summary: String,
        validation_errors: Vec<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        verification_passed: Option<bool>,
        repeated: bool,
        similarity: f64,
        method: SimilarityMethod,
    },
    IterationError {
        iteration: u32,
        message: String,
        consecutive_failures: u32,
    },
    RunDone {
        completed: bool,
        stop_reason: StopReason,
        iterations: u32,
        timestamp_ms: u64,
    },
}

/// Append-only writer for one run's JSONL log.
pub struct RunLogger {
    path: PathBuf,
    file: File,
}

impl RunLogger {
    /// Create `{run_dir}/{run_id}.jsonl` (and the directory if needed).
    pub fn create(run_dir: &Path, run_id: &str) -> Result<Self, RunLogError> {
        std::fs::create_dir_all(run_dir)?;
        let path = run_dir.join(format!("{run_id}.jsonl"));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one event as a single JSON line and flush.
    pub fn append(&mut self, event: &RunEvent) -> Result<(), RunLogError> {
        let line = serde_json::to_string(event)?;
        self.file.write_all(line.as_bytes())?;
        self.file.write_all(b"\n")?;
        self.file.flush()?;
        Ok(())
    }
}

/// Repetition statistics embedded in the summary.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StagnationStats {
    pub repeated_count: u32,
    pub trend: SimilarityTrend,
    pub is_stuck: bool,
}

/// Machine-readable run summary.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub run_id: String,
    pub task: String,
    pub completed: bool,
    pub stop_reason: StopReason,
    pub iterations: u32,
    pub provider: String,
    pub model: String,
    pub config: LoopConfig,
    pub log_path: String,
    pub summary_path: String,
    pub preview: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intent: Option<pi_core::IntentClassification>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stagnation: Option<StagnationStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_verification_passed: Option<bool>,
    pub created_at: DateTime<Utc>,
}

/// Write `{runId}.summary.json` atomically, then snapshot it into
/// `latest-summary.json` under the shared file lock.
///
/// Blocking (lock + rename); call via `spawn_blocking` from async code.
pub fn write_summary(run_dir: &Path, summary: &RunSummary) -> Result<PathBuf, RunLogError> {
    std::fs::create_dir_all(run_dir)?;
    let json = serde_json::to_string_pretty(summary)?;

    let summary_path = run_dir.join(format!("{}.summary.json", summary.run_id));
    atomic_write_text(&summary_path, &json)?;

    let latest = run_dir.join("latest-summary.json");
    with_file_lock(&latest, &FileLockOptions::default(), || {
        atomic_write_text(&latest, &json)
    })??;

    Ok(summary_path)
}

#[cfg(test)]
#[path = "run_log_tests.rs"]
mod tests;
