// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Runtime directory layout.
//!
//! ```text
//! ~/.pi/runtime/
//!   instances/{instanceId}.lock     # per-process record (JSON, not an OS lock)
//!   queue-states/{instanceId}.json  # per-process workload snapshot
//!   locks/{resource}.lock           # distributed locks
//!   coordinator.json                # optional overrides
//! ```

use std::path::{Path, PathBuf};

/// Handle on the shared runtime root.
#[derive(Debug, Clone)]
pub struct RuntimeDir {
    root: PathBuf,
}

impl RuntimeDir {
    /// Use an explicit root (tests point this at a tempdir).
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve from `PI_RUNTIME_DIR` (accepts `~` and `~/...`), falling
    /// back to `~/.pi/runtime`.
    pub fn resolve() -> Self {
        if let Ok(dir) = std::env::var("PI_RUNTIME_DIR") {
            if !dir.trim().is_empty() {
                return Self::new(expand_tilde(dir.trim()));
            }
        }
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        Self::new(home.join(".pi").join("runtime"))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn instances_dir(&self) -> PathBuf {
        self.root.join("instances")
    }

    pub fn instance_file(&self, instance_id: &str) -> PathBuf {
        self.instances_dir().join(format!("{instance_id}.lock"))
    }

    pub fn queue_states_dir(&self) -> PathBuf {
        self.root.join("queue-states")
    }

    pub fn queue_state_file(&self, instance_id: &str) -> PathBuf {
        self.queue_states_dir().join(format!("{instance_id}.json"))
    }

    pub fn locks_dir(&self) -> PathBuf {
        self.root.join("locks")
    }

    pub fn coordinator_file(&self) -> PathBuf {
        self.root.join("coordinator.json")
    }

    /// Create the directory tree if missing.
    pub fn ensure(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(self.instances_dir())?;
        std::fs::create_dir_all(self.queue_states_dir())?;
        std::fs::create_dir_all(self.locks_dir())?;
        Ok(())
    }
}

fn expand_tilde(path: &str) -> PathBuf {
    if path == "~" {
        return dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
    }
    if let Some(rest) = path.strip_prefix("~/") {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        return home.join(rest);
    }
    PathBuf::from(path)
}

#[cfg(test)]
#[path = "paths_tests.rs"]
mod tests;
