// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Synchronous exclusive file lock + atomic text write.
//!
//! These two primitives underpin every multi-writer file in the runtime
//! directory. The lock is an adjacent `{path}.lock` file created with
//! exclusive-create semantics; contention is resolved by bounded polling
//! with stale-lock clearing. Writes go through a temp file and a rename
//! so readers never observe a truncated file.
//!
//! Both functions block the calling thread. From async code, call them
//! via `tokio::task::spawn_blocking`.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::{debug, warn};

/// Distinguishes temp files written by concurrent threads of one process.
static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Errors from file lock acquisition.
#[derive(Debug, Error)]
pub enum FsLockError {
    #[error("file lock timeout: {path}")]
    Timeout { path: PathBuf },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Tuning for [`with_file_lock`].
#[derive(Debug, Clone, Copy)]
pub struct FileLockOptions {
    /// Give up after this long.
    pub max_wait: Duration,
    /// Sleep between acquisition attempts.
    pub poll: Duration,
    /// A lock file older than this is presumed abandoned.
    pub stale: Duration,
}

impl Default for FileLockOptions {
    fn default() -> Self {
        Self {
            max_wait: Duration::from_secs(5),
            poll: Duration::from_millis(50),
            stale: Duration::from_secs(30),
        }
    }
}

/// Check whether a pid is alive (`kill -0`).
pub fn process_exists(pid: u32) -> bool {
    Command::new("kill")
        .args(["-0", &pid.to_string()])
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Run `f` while holding an exclusive lock on `{path}.lock`.
///
/// Lock contents are `"{pid}:{acquiredAtMs}\n"`. A contended lock is
/// cleared when its mtime exceeds `opts.stale` or its recorded pid is no
/// longer alive; otherwise the caller sleeps `opts.poll` and retries
/// until `opts.max_wait` elapses.
pub fn with_file_lock<T>(
    path: &Path,
    opts: &FileLockOptions,
    f: impl FnOnce() -> T,
) -> Result<T, FsLockError> {
    let lock_path = lock_path_for(path);
    if let Some(parent) = lock_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let deadline = Instant::now() + opts.max_wait;
    loop {
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&lock_path)
        {
            Ok(mut file) => {
                let _ = writeln!(file, "{}:{}", std::process::id(), epoch_ms_now());
                let guard = LockGuard {
                    path: lock_path.clone(),
                };
                let result = f();
                drop(guard);
                return Ok(result);
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                if clear_if_stale(&lock_path, opts.stale) {
                    continue;
                }
                if Instant::now() >= deadline {
                    return Err(FsLockError::Timeout {
                        path: path.to_path_buf(),
                    });
                }
                std::thread::sleep(opts.poll);
            }
            Err(e) => return Err(FsLockError::Io(e)),
        }
    }
}

/// Write `content` atomically: temp file in the same directory, then rename.
///
/// The temp name embeds pid, a random tag, and a process-local counter so
/// concurrent writers never collide. On rename failure the temp is removed.
pub fn atomic_write_text(path: &Path, content: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let counter = TMP_COUNTER.fetch_add(1, Ordering::SeqCst);
    let mut tmp_name = path.as_os_str().to_os_string();
    tmp_name.push(format!(
        ".tmp-{}-{}-{}",
        std::process::id(),
        pi_core::short_rand(4),
        counter
    ));
    let tmp = PathBuf::from(tmp_name);
    std::fs::write(&tmp, content)?;
    match std::fs::rename(&tmp, path) {
        Ok(()) => Ok(()),
        Err(e) => {
            let _ = std::fs::remove_file(&tmp);
            Err(e)
        }
    }
}

fn lock_path_for(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".lock");
    PathBuf::from(name)
}

/// Clear a contended lock if abandoned. Returns true when cleared.
fn clear_if_stale(lock_path: &Path, stale: Duration) -> bool {
    let stale_by_age = std::fs::metadata(lock_path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|mtime| mtime.elapsed().ok())
        .map(|age| age > stale)
        .unwrap_or(false);

    let owner_dead = match std::fs::read_to_string(lock_path) {
        Ok(content) => content
            .split(':')
            .next()
            .and_then(|pid| pid.trim().parse::<u32>().ok())
            .map(|pid| !process_exists(pid))
            .unwrap_or(false),
        // Vanished between create attempt and read: retry the create.
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return true,
        Err(_) => false,
    };

    if stale_by_age || owner_dead {
        debug!(path = %lock_path.display(), stale_by_age, owner_dead, "clearing stale lock");
        match std::fs::remove_file(lock_path) {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
            Err(e) => {
                warn!(path = %lock_path.display(), error = %e, "failed to clear stale lock");
                false
            }
        }
    } else {
        false
    }
}

fn epoch_ms_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Removes the lock file when the critical section ends.
struct LockGuard {
    path: PathBuf,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "failed to release file lock");
            }
        }
    }
}

#[cfg(test)]
#[path = "fslock_tests.rs"]
mod tests;
