// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Broadcast of per-instance workload snapshots via files.
//!
//! Every instance periodically publishes `queue-states/{instanceId}.json`
//! with its pending work and up to [`MAX_STEALABLE_ENTRIES`] entries it is
//! willing to hand off. Consumers read everyone else's file, ignoring
//! snapshots older than twice the heartbeat interval.

use crate::fslock::atomic_write_text;
use crate::paths::RuntimeDir;
use pi_core::Clock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Snapshot cap for stealable entries.
pub const MAX_STEALABLE_ENTRIES: usize = 20;

/// Priority of a stealable entry. Sort order is steal order: `Critical`
/// first, `Background` last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StealPriority {
    Critical,
    High,
    Normal,
    Low,
    Background,
}

/// A queued task its owner is willing to let a peer take.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StealableEntry {
    pub id: String,
    pub tool_name: String,
    pub priority: StealPriority,
    pub enqueued_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_rounds: Option<u32>,
}

/// One instance's published workload snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStateRecord {
    pub instance_id: String,
    pub timestamp: u64,
    pub pending_task_count: u32,
    pub active_orchestrations: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_latency_ms: Option<f64>,
    #[serde(default)]
    pub stealable_entries: Vec<StealableEntry>,
}

/// Publisher/consumer handle for the queue-state directory.
#[derive(Clone)]
pub struct QueueStateBus<C: Clock> {
    dir: RuntimeDir,
    clock: C,
    heartbeat_interval_ms: u64,
}

impl<C: Clock> QueueStateBus<C> {
    pub fn new(dir: RuntimeDir, clock: C, heartbeat_interval_ms: u64) -> Self {
        Self {
            dir,
            clock,
            heartbeat_interval_ms,
        }
    }

    /// Publish our snapshot. Entries are sorted by priority and capped;
    /// the timestamp is stamped here.
    pub fn publish(
        &self,
        instance_id: &str,
        pending_task_count: u32,
        active_orchestrations: u32,
        avg_latency_ms: Option<f64>,
        mut stealable_entries: Vec<StealableEntry>,
    ) -> std::io::Result<()> {
        stealable_entries.sort_by(|a, b| a.priority.cmp(&b.priority).then(a.enqueued_at.cmp(&b.enqueued_at)));
        stealable_entries.truncate(MAX_STEALABLE_ENTRIES);
        let record = QueueStateRecord {
            instance_id: instance_id.to_string(),
            timestamp: self.clock.epoch_ms(),
            pending_task_count,
            active_orchestrations,
            avg_latency_ms,
            stealable_entries,
        };
        let json = serde_json::to_string_pretty(&record).unwrap_or_default();
        atomic_write_text(&self.dir.queue_state_file(instance_id), &json)
    }

    /// Read peers' snapshots: our own file is skipped, snapshots older
    /// than `2 × heartbeatInterval` are ignored, corrupt files unlinked.
    pub fn read_peers(&self, self_instance_id: &str) -> Vec<QueueStateRecord> {
        let now = self.clock.epoch_ms();
        let max_age = self.heartbeat_interval_ms * 2;
        let mut peers = Vec::new();

        let entries = match std::fs::read_dir(self.dir.queue_states_dir()) {
            Ok(entries) => entries,
            Err(_) => return peers,
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let record: QueueStateRecord = match std::fs::read_to_string(&path)
                .map_err(|e| e.to_string())
                .and_then(|content| serde_json::from_str(&content).map_err(|e| e.to_string()))
            {
                Ok(record) => record,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "removing corrupt queue state");
                    let _ = std::fs::remove_file(&path);
                    continue;
                }
            };
            if record.instance_id == self_instance_id {
                continue;
            }
            if now.saturating_sub(record.timestamp) > max_age {
                debug!(instance_id = %record.instance_id, "ignoring stale queue state");
                continue;
            }
            peers.push(record);
        }
        peers
    }

    /// True iff some peer has no pending work and fewer than two active
    /// orchestrations — the cluster has spare cycles.
    pub fn check_remote_capacity(&self, self_instance_id: &str) -> bool {
        self.read_peers(self_instance_id)
            .iter()
            .any(|peer| peer.pending_task_count == 0 && peer.active_orchestrations < 2)
    }
}

#[cfg(test)]
#[path = "queue_state_tests.rs"]
mod tests;
