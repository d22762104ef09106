// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! pi-adapters: collaborator interfaces for the loop engine.
//!
//! The engine never talks to a provider SDK, an embedding service, or a
//! UI directly; it goes through the traits here. Production
//! implementations shell out to the provider CLI; fakes (behind the
//! `test-support` feature) script every interaction.

pub mod embedding;
pub mod model;
pub mod notify;

pub use embedding::{cosine_similarity, EmbeddingProvider, NoopEmbedding};
pub use model::{
    cancelled, terminate, CancelToken, ModelAdapter, ModelError, ModelHandle,
    SubprocessModelAdapter, ThinkingLevel,
};
pub use notify::{NotifySink, TracingNotifySink};

// Test support - only compiled for tests or when explicitly requested
#[cfg(any(test, feature = "test-support"))]
mod fake;
#[cfg(any(test, feature = "test-support"))]
pub use fake::{FakeEmbeddingProvider, FakeModelAdapter, FakeNotifySink, ModelCall};
