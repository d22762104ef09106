// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! pi-coordinator: cross-instance coordination over a shared runtime
//! directory.
//!
//! Several agent processes on one workstation share a single LLM
//! concurrency budget. Each registers an instance record, heartbeats it,
//! publishes workload snapshots, and learns per-model limits from 429s.
//! The only cross-process primitives are exclusive-create lock files and
//! atomic temp-rename writes; torn or corrupt state files are treated as
//! garbage and unlinked.

pub mod budget;
pub mod dlock;
pub mod env;
pub mod fslock;
pub mod instance;
pub mod limiter;
pub mod paths;
pub mod queue_state;
pub mod registry;
pub mod stealer;

pub use budget::{AdaptiveTotalBudget, BudgetSnapshot};
pub use dlock::{DistributedLock, LockManager};
pub use fslock::{atomic_write_text, process_exists, with_file_lock, FileLockOptions, FsLockError};
pub use instance::{ActiveModel, InstanceRecord};
pub use limiter::{is_rate_limit_error, AdaptiveModelLimiter, LearnedLimit, ModelKey};
pub use paths::RuntimeDir;
pub use queue_state::{QueueStateBus, QueueStateRecord, StealPriority, StealableEntry};
pub use registry::{CoordinatorOverrides, InstanceRegistry, RegistryError};
pub use stealer::{StealStats, StolenTask, WorkStealer};
