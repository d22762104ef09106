// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Exact and embedding-based repetition detection between consecutive
//! iteration outputs, plus a trajectory tracker for run-level stats.

use pi_adapters::{cosine_similarity, EmbeddingProvider};
use serde::Serialize;
use std::collections::VecDeque;

/// Default similarity threshold; must stay inside the clamp range.
pub const DEFAULT_THRESHOLD: f64 = 0.85;
const THRESHOLD_MIN: f64 = 0.7;
const THRESHOLD_MAX: f64 = 0.95;

/// Default cap on text fed into normalization and embedding.
pub const DEFAULT_MAX_TEXT_LENGTH: usize = 2_000;

/// How the similarity verdict was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SimilarityMethod {
    Exact,
    Embedding,
    Unavailable,
}

/// Verdict for one pair of consecutive outputs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RepetitionCheck {
    pub is_repeated: bool,
    pub similarity: f64,
    pub method: SimilarityMethod,
}

/// Tuning for [`detect_semantic_repetition`].
#[derive(Debug, Clone, Copy)]
pub struct RepetitionOptions {
    /// Cosine similarity above which two outputs count as repeated.
    /// Clamped to `[0.7, 0.95]`.
    pub threshold: f64,
    pub use_embedding: bool,
    pub max_text_length: usize,
}

impl Default for RepetitionOptions {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            use_embedding: false,
            max_text_length: DEFAULT_MAX_TEXT_LENGTH,
        }
    }
}

/// Trim, collapse whitespace runs, clip to `max_len` characters.
pub fn normalize_text(text: &str, max_len: usize) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .chars()
        .take(max_len)
        .collect()
}

/// Compare two outputs.
///
/// Fast path: exact normalized equality. Otherwise, when embeddings are
/// enabled and a provider is available, cosine similarity decides; when
/// they are not, the method is `Unavailable` and similarity 0 — callers
/// must not count that as a repetition.
pub async fn detect_semantic_repetition(
    current: &str,
    previous: &str,
    opts: &RepetitionOptions,
    embedder: &dyn EmbeddingProvider,
) -> RepetitionCheck {
    let threshold = opts.threshold.clamp(THRESHOLD_MIN, THRESHOLD_MAX);
    let current = normalize_text(current, opts.max_text_length);
    let previous = normalize_text(previous, opts.max_text_length);

    if !current.is_empty() && current == previous {
        return RepetitionCheck {
            is_repeated: true,
            similarity: 1.0,
            method: SimilarityMethod::Exact,
        };
    }

    if opts.use_embedding && embedder.available() {
        if let (Some(a), Some(b)) = (embedder.embed(&current).await, embedder.embed(&previous).await)
        {
            let similarity = cosine_similarity(&a, &b);
            return RepetitionCheck {
                is_repeated: similarity >= threshold,
                similarity,
                method: SimilarityMethod::Embedding,
            };
        }
    }

    RepetitionCheck {
        is_repeated: false,
        similarity: 0.0,
        method: SimilarityMethod::Unavailable,
    }
}

/// Direction of the recent similarity trend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SimilarityTrend {
    Increasing,
    Decreasing,
    Stable,
}

/// Rolling record of repetition checks across a run.
#[derive(Debug)]
pub struct TrajectoryTracker {
    steps: VecDeque<RepetitionCheck>,
    capacity: usize,
}

impl Default for TrajectoryTracker {
    fn default() -> Self {
        Self::new(100)
    }
}

impl TrajectoryTracker {
    pub fn new(capacity: usize) -> Self {
        Self {
            steps: VecDeque::with_capacity(capacity.min(128)),
            capacity: capacity.max(1),
        }
    }

    pub fn record(&mut self, check: RepetitionCheck) {
        if self.steps.len() == self.capacity {
            self.steps.pop_front();
        }
        self.steps.push_back(check);
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Moving trend over the last six similarity samples.
    pub fn trend(&self) -> SimilarityTrend {
        let recent: Vec<f64> = self
            .steps
            .iter()
            .rev()
            .take(6)
            .map(|s| s.similarity)
            .collect();
        if recent.len() < 2 {
            return SimilarityTrend::Stable;
        }
        // recent is newest-first; compare newer half against older half
        let half = recent.len() / 2;
        let newer: f64 = recent[..half].iter().sum::<f64>() / half as f64;
        let older: f64 = recent[half..].iter().sum::<f64>() / (recent.len() - half) as f64;
        let delta = newer - older;
        if delta > 0.05 {
            SimilarityTrend::Increasing
        } else if delta < -0.05 {
            SimilarityTrend::Decreasing
        } else {
            SimilarityTrend::Stable
        }
    }

    /// True when at least three of the last five steps were repeated.
    pub fn is_stuck(&self) -> bool {
        self.steps
            .iter()
            .rev()
            .take(5)
            .filter(|s| s.is_repeated)
            .count()
            >= 3
    }
}

#[cfg(test)]
#[path = "repetition_tests.rs"]
mod tests;
