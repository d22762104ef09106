// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Push-only notification sink.
//!
//! The core only pushes events toward the session/UI layer; it never
//! reads UI state back. The default sink writes structured log lines.

use async_trait::async_trait;

/// Receives user-facing notifications and progress updates.
#[async_trait]
pub trait NotifySink: Send + Sync {
    /// A discrete, user-visible notification (e.g. "rate limited").
    async fn notify(&self, title: &str, body: &str);

    /// A transient progress line for the current operation.
    async fn progress(&self, message: &str);
}

/// Sink that routes notifications into the tracing log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifySink;

#[async_trait]
impl NotifySink for TracingNotifySink {
    async fn notify(&self, title: &str, body: &str) {
        tracing::info!(title, body, "notification");
    }

    async fn progress(&self, message: &str) {
        tracing::debug!(message, "progress");
    }
}
