// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Instance registry: per-process heartbeat records, liveness, and the
//! fair-share math that partitions the global LLM budget.
//!
//! Each process writes exactly one record under `instances/`; everyone
//! reads all of them. A record is alive iff its pid answers signal 0 and
//! its heartbeat is fresh. Dead or corrupt records are reaped by whoever
//! sees them first — cleanup must never block a healthy instance.

use crate::dlock::LockManager;
use crate::fslock::{atomic_write_text, process_exists};
use crate::instance::{ActiveModel, InstanceRecord};
use crate::paths::RuntimeDir;
use parking_lot::Mutex;
use pi_core::{Clock, RuntimeConfig};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Heartbeat file writes are debounced to at most one per this interval;
/// the in-memory timestamp still updates every tick.
const HEARTBEAT_WRITE_DEBOUNCE_MS: u64 = 5_000;

/// Errors from registry lifecycle operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Optional operator overrides from `coordinator.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoordinatorOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_max_llm: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heartbeat_interval_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heartbeat_timeout_ms: Option<u64>,
}

impl CoordinatorOverrides {
    /// Read overrides from the runtime directory; a corrupt or missing
    /// file yields no overrides.
    pub fn load(dir: &RuntimeDir) -> Self {
        match std::fs::read_to_string(dir.coordinator_file()) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                warn!(error = %e, "corrupt coordinator.json ignored");
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }
}

struct HeartbeatHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

struct Inner {
    record: Option<InstanceRecord>,
    last_file_write_ms: u64,
    heartbeat: Option<HeartbeatHandle>,
}

/// Handle on this process's registration in the shared runtime directory.
///
/// Cheap to clone; all clones share the same registration.
pub struct InstanceRegistry<C: Clock> {
    dir: RuntimeDir,
    config: RuntimeConfig,
    clock: C,
    locks: LockManager<C>,
    inner: Arc<Mutex<Inner>>,
}

impl<C: Clock> Clone for InstanceRegistry<C> {
    fn clone(&self) -> Self {
        Self {
            dir: self.dir.clone(),
            config: self.config.clone(),
            clock: self.clock.clone(),
            locks: self.locks.clone(),
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: Clock> InstanceRegistry<C> {
    /// Build a registry handle. `coordinator.json` overrides (if present)
    /// are merged over `config` here, once.
    pub fn new(dir: RuntimeDir, config: RuntimeConfig, clock: C) -> Self {
        let mut config = config;
        let overrides = CoordinatorOverrides::load(&dir);
        if let Some(total) = overrides.total_max_llm {
            config.total_max_llm = total.clamp(1, 64);
        }
        if let Some(interval) = overrides.heartbeat_interval_ms {
            config.heartbeat_interval_ms = interval.clamp(250, 60_000);
        }
        if let Some(timeout) = overrides.heartbeat_timeout_ms {
            config.heartbeat_timeout_ms = timeout.clamp(1_000, 300_000);
        }
        Self {
            locks: LockManager::new(dir.clone(), clock.clone()),
            dir,
            config,
            clock,
            inner: Arc::new(Mutex::new(Inner {
                record: None,
                last_file_write_ms: 0,
                heartbeat: None,
            })),
        }
    }

    /// Effective config after overrides.
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn runtime_dir(&self) -> &RuntimeDir {
        &self.dir
    }

    /// This process's instance id, if registered.
    pub fn instance_id(&self) -> Option<String> {
        self.inner.lock().record.as_ref().map(|r| r.instance_id.clone())
    }

    /// Snapshot of our own record, if registered.
    pub fn my_record(&self) -> Option<InstanceRecord> {
        self.inner.lock().record.clone()
    }

    /// Register this process and start the heartbeat ticker.
    ///
    /// Idempotent: a second call returns the existing record without
    /// spawning another ticker.
    pub async fn register(
        &self,
        session_id: &str,
        cwd: &str,
    ) -> Result<InstanceRecord, RegistryError> {
        self.dir.ensure()?;

        {
            let inner = self.inner.lock();
            if let Some(record) = &inner.record {
                return Ok(record.clone());
            }
        }

        let now = self.clock.epoch_ms();
        let record = InstanceRecord {
            instance_id: pi_core::instance_id(session_id, std::process::id(), now),
            pid: std::process::id(),
            session_id: session_id.to_string(),
            started_at: now,
            last_heartbeat: now,
            cwd: cwd.to_string(),
            active_models: Vec::new(),
            active_request_count: 0,
            active_llm_count: 0,
            pending_task_count: 0,
            avg_latency_ms: None,
            last_task_completed_at: None,
        };
        self.write_record(&record)?;

        let registry = self.clone();
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let interval = Duration::from_millis(self.config.heartbeat_interval_ms);
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        registry.heartbeat_tick().await;
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        });

        let mut inner = self.inner.lock();
        inner.record = Some(record.clone());
        inner.last_file_write_ms = now;
        inner.heartbeat = Some(HeartbeatHandle {
            shutdown: shutdown_tx,
            task,
        });
        debug!(instance_id = %record.instance_id, "registered instance");
        Ok(record)
    }

    /// Stop the ticker and remove our files.
    pub async fn unregister(&self) {
        let (record, heartbeat) = {
            let mut inner = self.inner.lock();
            (inner.record.take(), inner.heartbeat.take())
        };
        if let Some(handle) = heartbeat {
            let _ = handle.shutdown.send(true);
            let _ = handle.task.await;
        }
        if let Some(record) = record {
            remove_quiet(&self.dir.instance_file(&record.instance_id));
            remove_quiet(&self.dir.queue_state_file(&record.instance_id));
            debug!(instance_id = %record.instance_id, "unregistered instance");
        }
    }

    /// One heartbeat: refresh the in-memory timestamp, rewrite the file if
    /// the debounce window elapsed, and run the cleanup sweeps.
    pub async fn heartbeat_tick(&self) {
        let now = self.clock.epoch_ms();
        let to_write = {
            let mut inner = self.inner.lock();
            let Some(record) = inner.record.as_mut() else {
                return;
            };
            record.last_heartbeat = now;
            if now.saturating_sub(inner.last_file_write_ms) >= HEARTBEAT_WRITE_DEBOUNCE_MS {
                inner.last_file_write_ms = now;
                inner.record.clone()
            } else {
                None
            }
        };
        if let Some(record) = to_write {
            if let Err(e) = self.write_record(&record) {
                warn!(error = %e, "heartbeat write failed");
            }
        }
        if crate::env::debug_coordinator() {
            let active = self.get_active_instances();
            debug!(
                instances = active.len(),
                contending = self.get_contending_instance_count(),
                "coordinator heartbeat"
            );
        }
        self.cleanup_dead_instances();
        self.cleanup_queue_states();
        self.locks.cleanup_expired();
    }

    /// Mutate our record and write it through.
    ///
    /// Every visible state change also advances the heartbeat, so peers
    /// observing the new state always see a fresh timestamp.
    fn update_record(&self, mutate: impl FnOnce(&mut InstanceRecord)) {
        let now = self.clock.epoch_ms();
        let to_write = {
            let mut inner = self.inner.lock();
            let Some(record) = inner.record.as_mut() else {
                return;
            };
            mutate(record);
            record.last_heartbeat = now;
            inner.last_file_write_ms = now;
            inner.record.clone()
        };
        if let Some(record) = to_write {
            if let Err(e) = self.write_record(&record) {
                warn!(error = %e, "instance record write failed");
            }
        }
    }

    fn write_record(&self, record: &InstanceRecord) -> Result<(), RegistryError> {
        let json = serde_json::to_string_pretty(record)?;
        atomic_write_text(&self.dir.instance_file(&record.instance_id), &json)?;
        Ok(())
    }

    /// Mark a (provider, model) pair active. Keys are lower-cased and
    /// deduped.
    pub fn set_active_model(&self, provider: &str, model: &str) {
        let provider = provider.to_lowercase();
        let model = model.to_lowercase();
        let since = self.clock.epoch_ms();
        self.update_record(|record| {
            let exists = record
                .active_models
                .iter()
                .any(|m| m.provider == provider && m.model == model);
            if !exists {
                record.active_models.push(ActiveModel {
                    provider,
                    model,
                    since,
                });
            }
        });
    }

    pub fn clear_active_model(&self, provider: &str, model: &str) {
        let provider = provider.to_lowercase();
        let model = model.to_lowercase();
        self.update_record(|record| {
            record
                .active_models
                .retain(|m| !(m.provider == provider && m.model == model));
        });
    }

    pub fn add_active_llm(&self, delta: i32) {
        self.update_record(|record| {
            record.active_llm_count = saturating_add_i32(record.active_llm_count, delta);
        });
    }

    pub fn add_active_requests(&self, delta: i32) {
        self.update_record(|record| {
            record.active_request_count = saturating_add_i32(record.active_request_count, delta);
        });
    }

    pub fn set_pending_task_count(&self, count: u32) {
        self.update_record(|record| record.pending_task_count = count);
    }

    pub fn set_avg_latency(&self, latency_ms: f64) {
        self.update_record(|record| record.avg_latency_ms = Some(latency_ms));
    }

    pub fn mark_task_completed(&self) {
        let now = self.clock.epoch_ms();
        self.update_record(|record| {
            record.last_task_completed_at = Some(now);
            record.pending_task_count = record.pending_task_count.saturating_sub(1);
        });
    }

    /// All records whose pid is alive and heartbeat fresh. Dead and
    /// corrupt records are reaped as a side effect.
    pub fn get_active_instances(&self) -> Vec<InstanceRecord> {
        let now = self.clock.epoch_ms();
        let timeout = self.config.heartbeat_timeout_ms;
        let mut alive = Vec::new();

        let entries = match std::fs::read_dir(self.dir.instances_dir()) {
            Ok(entries) => entries,
            Err(_) => return alive,
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("lock") {
                continue;
            }
            let record: InstanceRecord = match std::fs::read_to_string(&path)
                .map_err(|e| e.to_string())
                .and_then(|content| serde_json::from_str(&content).map_err(|e| e.to_string()))
            {
                Ok(record) => record,
                Err(e) => {
                    // Torn or corrupt: unlink to unwedge the cluster.
                    warn!(path = %path.display(), error = %e, "removing corrupt instance record");
                    remove_quiet(&path);
                    continue;
                }
            };
            let fresh = now.saturating_sub(record.last_heartbeat) < timeout;
            if fresh && process_exists(record.pid) {
                alive.push(record);
            } else {
                debug!(instance_id = %record.instance_id, "reaping dead instance record");
                remove_quiet(&path);
            }
        }
        alive
    }

    /// Sweep dead records (the read path already reaps; this is the
    /// explicit heartbeat-driven sweep).
    pub fn cleanup_dead_instances(&self) {
        let _ = self.get_active_instances();
    }

    /// Remove queue-state snapshots old enough that their writer must be
    /// gone.
    pub fn cleanup_queue_states(&self) {
        let now = self.clock.epoch_ms();
        let timeout = self.config.heartbeat_timeout_ms;
        let entries = match std::fs::read_dir(self.dir.queue_states_dir()) {
            Ok(entries) => entries,
            Err(_) => return,
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let stale = std::fs::read_to_string(&path)
                .ok()
                .and_then(|content| serde_json::from_str::<serde_json::Value>(&content).ok())
                .and_then(|value| value.get("timestamp").and_then(|t| t.as_u64()))
                .map(|ts| now.saturating_sub(ts) > timeout)
                // unreadable or timestamp-less: garbage
                .unwrap_or(true);
            if stale {
                remove_quiet(&path);
            }
        }
    }

    /// Count of instances contending for the shared budget. Self is
    /// always part of the denominator.
    pub fn get_contending_instance_count(&self) -> u32 {
        let my_id = self.instance_id();
        let others = self
            .get_active_instances()
            .into_iter()
            .filter(|r| Some(&r.instance_id) != my_id.as_ref())
            .filter(InstanceRecord::is_contending)
            .count() as u32;
        others + 1
    }

    /// Even split of the total budget among contending instances.
    pub fn get_my_parallel_limit(&self) -> u32 {
        let contending = self.get_contending_instance_count();
        (self.config.total_max_llm / contending).max(1)
    }

    /// Workload-weighted split: lightly-loaded instances get more slots.
    ///
    /// share = (1/(myPending+1)) / Σ(1/(peerPending+1)), slot =
    /// max(1, min(round(total · share), total)).
    pub fn get_dynamic_parallel_limit(&self, my_pending: u32) -> u32 {
        let my_id = self.instance_id();
        let total = self.config.total_max_llm;
        let my_weight = 1.0 / (f64::from(my_pending) + 1.0);
        let peer_weight: f64 = self
            .get_active_instances()
            .iter()
            .filter(|r| Some(&r.instance_id) != my_id.as_ref())
            .map(|r| 1.0 / (f64::from(r.pending_task_count) + 1.0))
            .sum();
        let share = my_weight / (my_weight + peer_weight);
        let slot = (f64::from(total) * share).round() as u32;
        slot.clamp(1, total)
    }

    /// Active instances driving a matching (provider, model).
    pub fn get_active_instances_for_model(&self, provider: &str, model: &str) -> u32 {
        let provider = provider.to_lowercase();
        let model = model.to_lowercase();
        self.get_active_instances()
            .iter()
            .filter(|r| {
                r.active_models
                    .iter()
                    .any(|m| m.provider == provider && model_matches(&m.model, &model))
            })
            .count() as u32
    }

    /// Per-model share of a base limit across instances using the model.
    pub fn get_model_parallel_limit(&self, provider: &str, model: &str, base_limit: u32) -> u32 {
        let users = self.get_active_instances_for_model(provider, model).max(1);
        (base_limit / users).max(1)
    }
}

/// Model name match: exact, prefix in either direction, or glob when the
/// query carries `*` (escaped-then-wildcarded regex).
pub(crate) fn model_matches(candidate: &str, query: &str) -> bool {
    if candidate == query || candidate.starts_with(query) || query.starts_with(candidate) {
        return true;
    }
    if query.contains('*') {
        let pattern = format!("^{}$", regex::escape(query).replace(r"\*", ".*"));
        if let Ok(re) = regex::Regex::new(&pattern) {
            return re.is_match(candidate);
        }
    }
    false
}

fn saturating_add_i32(value: u32, delta: i32) -> u32 {
    if delta >= 0 {
        value.saturating_add(delta as u32)
    } else {
        value.saturating_sub(delta.unsigned_abs())
    }
}

fn remove_quiet(path: &std::path::Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            debug!(path = %path.display(), error = %e, "cleanup unlink failed");
        }
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
