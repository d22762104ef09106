// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Work stealing across instances.
//!
//! An idle instance takes the highest-priority stealable entry from the
//! most-loaded peer, guarded by a short-lived `steal:{instanceId}` lock.
//! Hand-off is cooperative: the victim observes the steal and dequeues
//! the entry on its next heartbeat; the stealer never writes peer state.

use crate::dlock::LockManager;
use crate::queue_state::{QueueStateBus, StealableEntry};
use crate::registry::InstanceRegistry;
use parking_lot::Mutex;
use pi_core::Clock;
use std::collections::VecDeque;
use std::time::Duration;
use tracing::{debug, info};

/// TTL on the per-victim steal lock.
const STEAL_LOCK_TTL: Duration = Duration::from_secs(30);

/// Peers with this many pending tasks or fewer are left alone.
const MIN_STEALABLE_PENDING: u32 = 2;

/// Rolling window for the latency average.
const LATENCY_WINDOW: usize = 100;

/// Stealing statistics for diagnostics.
#[derive(Debug, Default)]
pub struct StealStats {
    pub attempts: u64,
    pub successes: u64,
    latencies_ms: VecDeque<f64>,
}

impl StealStats {
    fn record_latency(&mut self, latency_ms: f64) {
        if self.latencies_ms.len() == LATENCY_WINDOW {
            self.latencies_ms.pop_front();
        }
        self.latencies_ms.push_back(latency_ms);
    }

    /// Average steal latency over the last [`LATENCY_WINDOW`] samples.
    pub fn avg_latency_ms(&self) -> Option<f64> {
        if self.latencies_ms.is_empty() {
            return None;
        }
        Some(self.latencies_ms.iter().sum::<f64>() / self.latencies_ms.len() as f64)
    }
}

/// A task taken from a peer, pending local enqueue.
#[derive(Debug, Clone, PartialEq)]
pub struct StolenTask {
    pub from_instance: String,
    pub entry: StealableEntry,
}

/// Candidate selection + lock-guarded hand-off.
pub struct WorkStealer<C: Clock> {
    registry: InstanceRegistry<C>,
    bus: QueueStateBus<C>,
    locks: LockManager<C>,
    clock: C,
    stats: Mutex<StealStats>,
}

impl<C: Clock> WorkStealer<C> {
    pub fn new(registry: InstanceRegistry<C>, bus: QueueStateBus<C>, clock: C) -> Self {
        let locks = LockManager::new(registry.runtime_dir().clone(), clock.clone());
        Self {
            registry,
            bus,
            locks,
            clock,
            stats: Mutex::new(StealStats::default()),
        }
    }

    /// True when we have no pending tasks and no active models.
    pub fn is_idle(&self) -> bool {
        match self.registry.my_record() {
            Some(record) => record.pending_task_count == 0 && record.active_models.is_empty(),
            None => false,
        }
    }

    /// The alive peer with the most pending work above the threshold.
    pub fn find_steal_candidate(&self) -> Option<String> {
        let my_id = self.registry.instance_id();
        self.registry
            .get_active_instances()
            .into_iter()
            .filter(|r| Some(&r.instance_id) != my_id.as_ref())
            .filter(|r| r.pending_task_count > MIN_STEALABLE_PENDING)
            .max_by_key(|r| r.pending_task_count)
            .map(|r| r.instance_id)
    }

    /// Attempt one steal. Returns the taken entry, or `None` when
    /// stealing is disabled, no candidate qualifies, or the victim's
    /// steal lock is held.
    pub async fn safe_steal_work(&self) -> Option<StolenTask> {
        if !crate::env::work_stealing_enabled() {
            debug!("work stealing disabled via PI_ENABLE_WORK_STEALING");
            return None;
        }
        let my_id = self.registry.instance_id()?;
        let candidate = self.find_steal_candidate()?;

        let started = self.clock.epoch_ms();
        self.stats.lock().attempts += 1;

        let lock = self
            .locks
            .try_acquire(&format!("steal:{candidate}"), STEAL_LOCK_TTL, 3)
            .await?;

        let stolen = self
            .bus
            .read_peers(&my_id)
            .into_iter()
            .find(|peer| peer.instance_id == candidate)
            .and_then(|peer| peer.stealable_entries.into_iter().min_by_key(|e| e.priority))
            .map(|entry| StolenTask {
                from_instance: candidate.clone(),
                entry,
            });

        if let Some(task) = &stolen {
            let mut stats = self.stats.lock();
            stats.successes += 1;
            stats.record_latency(self.clock.epoch_ms().saturating_sub(started) as f64);
            info!(
                from = %task.from_instance,
                task = %task.entry.id,
                priority = ?task.entry.priority,
                "stole task from loaded peer"
            );
        }

        self.locks.release(&lock);
        stolen
    }

    /// Run a closure against the stats under the lock.
    pub fn with_stats<T>(&self, f: impl FnOnce(&StealStats) -> T) -> T {
        f(&self.stats.lock())
    }
}

#[cfg(test)]
#[path = "stealer_tests.rs"]
mod tests;
