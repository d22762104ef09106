// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scripted fakes for tests.

use crate::embedding::EmbeddingProvider;
use crate::model::{CancelToken, ModelAdapter, ModelError, ModelHandle};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

/// One recorded model invocation.
#[derive(Debug, Clone)]
pub struct ModelCall {
    pub handle: ModelHandle,
    pub prompt: String,
    pub timeout: Duration,
}

/// Model adapter returning scripted replies in order.
///
/// When the script is exhausted, calls fail with [`ModelError::EmptyOutput`].
#[derive(Clone, Default)]
pub struct FakeModelAdapter {
    replies: Arc<Mutex<VecDeque<Result<String, ModelError>>>>,
    calls: Arc<Mutex<Vec<ModelCall>>>,
}

impl FakeModelAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful reply.
    pub fn push_reply(&self, reply: impl Into<String>) {
        self.replies.lock().push_back(Ok(reply.into()));
    }

    /// Queue a failure.
    pub fn push_error(&self, error: ModelError) {
        self.replies.lock().push_back(Err(error));
    }

    /// All calls made so far.
    pub fn calls(&self) -> Vec<ModelCall> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl ModelAdapter for FakeModelAdapter {
    async fn call(
        &self,
        handle: &ModelHandle,
        prompt: &str,
        timeout: Duration,
        cancel: CancelToken,
    ) -> Result<String, ModelError> {
        if *cancel.borrow() {
            return Err(ModelError::Aborted);
        }
        self.calls.lock().push(ModelCall {
            handle: handle.clone(),
            prompt: prompt.to_string(),
            timeout,
        });
        self.replies
            .lock()
            .pop_front()
            .unwrap_or(Err(ModelError::EmptyOutput))
    }
}

/// Embedding provider with canned vectors per text.
#[derive(Clone, Default)]
pub struct FakeEmbeddingProvider {
    vectors: Arc<Mutex<HashMap<String, Vec<f32>>>>,
}

impl FakeEmbeddingProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_vector(&self, text: impl Into<String>, vector: Vec<f32>) {
        self.vectors.lock().insert(text.into(), vector);
    }
}

#[async_trait]
impl EmbeddingProvider for FakeEmbeddingProvider {
    async fn embed(&self, text: &str) -> Option<Vec<f32>> {
        self.vectors.lock().get(text).cloned()
    }

    fn available(&self) -> bool {
        true
    }
}

/// Notify sink recording every message.
#[derive(Clone, Default)]
pub struct FakeNotifySink {
    notifications: Arc<Mutex<Vec<(String, String)>>>,
    progress: Arc<Mutex<Vec<String>>>,
}

impl FakeNotifySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notifications(&self) -> Vec<(String, String)> {
        self.notifications.lock().clone()
    }

    pub fn progress_messages(&self) -> Vec<String> {
        self.progress.lock().clone()
    }
}

#[async_trait]
impl crate::notify::NotifySink for FakeNotifySink {
    async fn notify(&self, title: &str, body: &str) {
        self.notifications
            .lock()
            .push((title.to_string(), body.to_string()));
    }

    async fn progress(&self, message: &str) {
        self.progress.lock().push(message.to_string());
    }
}
