// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use pi_adapters::{FakeEmbeddingProvider, NoopEmbedding};
use yare::parameterized;

#[parameterized(
    collapses_whitespace = { "a   b\n\nc", 100, "a b c" },
    trims = { "  hello  ", 100, "hello" },
    clips = { "abcdef", 3, "abc" },
    empty = { "", 100, "" },
)]
fn normalize_cases(input: &str, max_len: usize, expected: &str) {
    assert_eq!(normalize_text(input, max_len), expected);
}

#[tokio::test]
async fn exact_match_short_circuits() {
    let check = detect_semantic_repetition(
        "same  answer",
        "same answer",
        &RepetitionOptions::default(),
        &NoopEmbedding,
    )
    .await;
    assert!(check.is_repeated);
    assert_eq!(check.similarity, 1.0);
    assert_eq!(check.method, SimilarityMethod::Exact);
}

#[tokio::test]
async fn empty_current_never_repeats() {
    let check =
        detect_semantic_repetition("", "", &RepetitionOptions::default(), &NoopEmbedding).await;
    assert!(!check.is_repeated);
}

#[tokio::test]
async fn different_text_without_embeddings_is_unavailable() {
    let check = detect_semantic_repetition(
        "first answer",
        "second answer",
        &RepetitionOptions::default(),
        &NoopEmbedding,
    )
    .await;
    assert!(!check.is_repeated);
    assert_eq!(check.similarity, 0.0);
    assert_eq!(check.method, SimilarityMethod::Unavailable);
}

#[tokio::test]
async fn embedding_path_compares_cosine() {
    let embedder = FakeEmbeddingProvider::new();
    embedder.set_vector("first answer", vec![1.0, 0.0]);
    embedder.set_vector("nearly first answer", vec![0.99, 0.14]);

    let opts = RepetitionOptions {
        use_embedding: true,
        ..RepetitionOptions::default()
    };
    let check =
        detect_semantic_repetition("nearly first answer", "first answer", &opts, &embedder).await;
    assert_eq!(check.method, SimilarityMethod::Embedding);
    assert!(check.similarity > 0.85);
    assert!(check.is_repeated);
}

#[tokio::test]
async fn embedding_below_threshold_is_not_repeated() {
    let embedder = FakeEmbeddingProvider::new();
    embedder.set_vector("alpha", vec![1.0, 0.0]);
    embedder.set_vector("omega", vec![0.0, 1.0]);

    let opts = RepetitionOptions {
        use_embedding: true,
        ..RepetitionOptions::default()
    };
    let check = detect_semantic_repetition("alpha", "omega", &opts, &embedder).await;
    assert_eq!(check.method, SimilarityMethod::Embedding);
    assert!(!check.is_repeated);
}

#[tokio::test]
async fn missing_vector_falls_back_to_unavailable() {
    let embedder = FakeEmbeddingProvider::new();
    embedder.set_vector("known", vec![1.0]);

    let opts = RepetitionOptions {
        use_embedding: true,
        ..RepetitionOptions::default()
    };
    let check = detect_semantic_repetition("known", "unknown", &opts, &embedder).await;
    assert_eq!(check.method, SimilarityMethod::Unavailable);
    assert!(!check.is_repeated);
}

#[tokio::test]
async fn threshold_is_clamped_into_valid_range() {
    let embedder = FakeEmbeddingProvider::new();
    embedder.set_vector("a", vec![1.0, 0.0]);
    embedder.set_vector("b", vec![0.8, 0.6]); // cosine 0.8

    // absurdly low threshold clamps to 0.7, so 0.8 still repeats
    let opts = RepetitionOptions {
        threshold: 0.1,
        use_embedding: true,
        ..RepetitionOptions::default()
    };
    let check = detect_semantic_repetition("a", "b", &opts, &embedder).await;
    assert!(check.is_repeated);

    // absurdly high threshold clamps to 0.95, so 0.8 does not
    let opts = RepetitionOptions {
        threshold: 0.999,
        use_embedding: true,
        ..RepetitionOptions::default()
    };
    let check = detect_semantic_repetition("a", "b", &opts, &embedder).await;
    assert!(!check.is_repeated);
}

fn repeated(similarity: f64) -> RepetitionCheck {
    RepetitionCheck {
        is_repeated: true,
        similarity,
        method: SimilarityMethod::Exact,
    }
}

fn fresh(similarity: f64) -> RepetitionCheck {
    RepetitionCheck {
        is_repeated: false,
        similarity,
        method: SimilarityMethod::Embedding,
    }
}

#[test]
fn tracker_caps_at_capacity() {
    let mut tracker = TrajectoryTracker::new(3);
    for _ in 0..5 {
        tracker.record(fresh(0.1));
    }
    assert_eq!(tracker.len(), 3);
}

#[test]
fn tracker_stuck_requires_three_of_last_five() {
    let mut tracker = TrajectoryTracker::default();
    tracker.record(repeated(1.0));
    tracker.record(repeated(1.0));
    assert!(!tracker.is_stuck());
    tracker.record(repeated(1.0));
    assert!(tracker.is_stuck());
}

#[test]
fn tracker_stuck_ignores_old_history() {
    let mut tracker = TrajectoryTracker::default();
    for _ in 0..3 {
        tracker.record(repeated(1.0));
    }
    for _ in 0..5 {
        tracker.record(fresh(0.1));
    }
    assert!(!tracker.is_stuck());
}

#[test]
fn trend_increasing_when_similarity_climbs() {
    let mut tracker = TrajectoryTracker::default();
    for s in [0.1, 0.2, 0.3, 0.6, 0.7, 0.8] {
        tracker.record(fresh(s));
    }
    assert_eq!(tracker.trend(), SimilarityTrend::Increasing);
}

#[test]
fn trend_decreasing_when_similarity_falls() {
    let mut tracker = TrajectoryTracker::default();
    for s in [0.9, 0.8, 0.7, 0.3, 0.2, 0.1] {
        tracker.record(fresh(s));
    }
    assert_eq!(tracker.trend(), SimilarityTrend::Decreasing);
}

#[test]
fn trend_stable_for_flat_or_short_history() {
    let mut tracker = TrajectoryTracker::default();
    assert_eq!(tracker.trend(), SimilarityTrend::Stable);
    tracker.record(fresh(0.5));
    assert_eq!(tracker.trend(), SimilarityTrend::Stable);
    for _ in 0..5 {
        tracker.record(fresh(0.5));
    }
    assert_eq!(tracker.trend(), SimilarityTrend::Stable);
}
