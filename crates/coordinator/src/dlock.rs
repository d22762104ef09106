// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Short-lived mutual exclusion across processes.
//!
//! A lock is a JSON file under `locks/` created with exclusive-create
//! semantics. Expiry is authoritative: a contender may take over an
//! expired lock, but only through rename-then-unlink so it can never
//! yank a lock that was refreshed underneath it. Locks are advisory —
//! holders re-check expiry before long-running work.

use crate::paths::RuntimeDir;
use pi_core::Clock;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, warn};

/// Backoff between acquisition retries, capped.
const BACKOFF_BASE_MS: u64 = 5;
const BACKOFF_CAP_MS: u64 = 100;

/// On-disk lock record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DistributedLock {
    pub lock_id: String,
    pub acquired_at: u64,
    pub expires_at: u64,
    pub resource: String,
}

impl DistributedLock {
    /// Holders must consult this before starting (or continuing) work.
    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms >= self.expires_at
    }
}

/// Factory for distributed locks under one runtime directory.
#[derive(Clone)]
pub struct LockManager<C: Clock> {
    dir: RuntimeDir,
    clock: C,
}

impl<C: Clock> LockManager<C> {
    pub fn new(dir: RuntimeDir, clock: C) -> Self {
        Self { dir, clock }
    }

    fn lock_file(&self, resource: &str) -> PathBuf {
        self.dir
            .locks_dir()
            .join(format!("{}.lock", escape_resource(resource)))
    }

    /// Try to acquire `resource` for `ttl`. Returns `None` when a live
    /// holder kept the lock through `max_retries` attempts.
    pub async fn try_acquire(
        &self,
        resource: &str,
        ttl: Duration,
        max_retries: u32,
    ) -> Option<DistributedLock> {
        let path = self.lock_file(resource);
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }

        for attempt in 0..=max_retries {
            let now = self.clock.epoch_ms();
            let lock = DistributedLock {
                lock_id: uuid::Uuid::new_v4().to_string(),
                acquired_at: now,
                expires_at: now + ttl.as_millis() as u64,
                resource: resource.to_string(),
            };

            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    // Contents cannot fail to serialize; write errors mean
                    // the lock is unusable, so give the slot up.
                    let json = match serde_json::to_string_pretty(&lock) {
                        Ok(json) => json,
                        Err(_) => return None,
                    };
                    if file.write_all(json.as_bytes()).is_err() {
                        let _ = std::fs::remove_file(&path);
                        return None;
                    }
                    debug!(resource, lock_id = %lock.lock_id, "acquired lock");
                    return Some(lock);
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    self.try_reap_expired(&path, now);
                }
                Err(e) => {
                    warn!(resource, error = %e, "lock create failed");
                    return None;
                }
            }

            if attempt < max_retries {
                let backoff = (BACKOFF_BASE_MS << attempt).min(BACKOFF_CAP_MS);
                tokio::time::sleep(Duration::from_millis(backoff)).await;
            }
        }
        None
    }

    /// Reap the lock at `path` iff its record is expired (or corrupt).
    ///
    /// Takeover is rename-then-unlink, never a direct unlink: if the
    /// holder refreshed concurrently, our rename source is gone and the
    /// live lock survives untouched.
    fn try_reap_expired(&self, path: &std::path::Path, now: u64) {
        let expired = match std::fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str::<DistributedLock>(&content) {
                Ok(existing) => existing.is_expired(now),
                // Corrupt lock file: treat as garbage.
                Err(_) => true,
            },
            Err(_) => return,
        };
        if !expired {
            return;
        }
        let mut graveyard = path.as_os_str().to_os_string();
        graveyard.push(format!(
            ".expired-{}-{}",
            std::process::id(),
            pi_core::short_rand(4)
        ));
        let graveyard = PathBuf::from(graveyard);
        if std::fs::rename(path, &graveyard).is_ok() {
            remove_quiet(&graveyard);
            debug!(path = %path.display(), "reaped expired lock");
        }
    }

    /// Release a held lock. A non-owner call (lock id mismatch) or an
    /// already-removed file is a no-op.
    pub fn release(&self, lock: &DistributedLock) {
        let path = self.lock_file(&lock.resource);
        let Ok(content) = std::fs::read_to_string(&path) else {
            return;
        };
        match serde_json::from_str::<DistributedLock>(&content) {
            Ok(on_disk) if on_disk.lock_id == lock.lock_id => {
                remove_quiet(&path);
                debug!(resource = %lock.resource, lock_id = %lock.lock_id, "released lock");
            }
            Ok(_) => {
                debug!(resource = %lock.resource, "release skipped: not the owner");
            }
            Err(_) => {}
        }
    }

    /// Sweep the locks directory, reaping every expired record.
    pub fn cleanup_expired(&self) {
        let now = self.clock.epoch_ms();
        let entries = match std::fs::read_dir(self.dir.locks_dir()) {
            Ok(entries) => entries,
            Err(_) => return,
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("lock") {
                self.try_reap_expired(&path, now);
            }
        }
    }
}

/// Make a resource name filesystem-safe.
fn escape_resource(resource: &str) -> String {
    resource
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | ' ' => '_',
            other => other,
        })
        .collect()
}

fn remove_quiet(path: &std::path::Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            debug!(path = %path.display(), error = %e, "lock unlink failed");
        }
    }
}

#[cfg(test)]
#[path = "dlock_tests.rs"]
mod tests;
