// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! On-disk instance record types.
//!
//! One record per registered process, written only by its owner. Field
//! names are the wire contract — other instances (and humans) read these
//! files directly.

use serde::{Deserialize, Serialize};

/// A (provider, model) pair an instance is actively driving.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveModel {
    pub provider: String,
    pub model: String,
    /// Epoch ms when the instance started using this model.
    pub since: u64,
}

/// Per-process heartbeat record, stored as
/// `instances/{instanceId}.lock` (JSON by convention, not an OS lock).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceRecord {
    pub instance_id: String,
    pub pid: u32,
    pub session_id: String,
    pub started_at: u64,
    pub last_heartbeat: u64,
    pub cwd: String,
    #[serde(default)]
    pub active_models: Vec<ActiveModel>,
    #[serde(default)]
    pub active_request_count: u32,
    #[serde(default)]
    pub active_llm_count: u32,
    #[serde(default)]
    pub pending_task_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_latency_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_task_completed_at: Option<u64>,
}

impl InstanceRecord {
    /// An instance contends for the shared budget when it has any active
    /// or pending work.
    pub fn is_contending(&self) -> bool {
        !self.active_models.is_empty()
            || self.active_request_count > 0
            || self.active_llm_count > 0
            || self.pending_task_count > 0
    }
}

#[cfg(test)]
#[path = "instance_tests.rs"]
mod tests;
