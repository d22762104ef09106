// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Task intent classification and per-intent budgets.
//!
//! Iteration loops behave differently for lookup-style tasks than for
//! multi-step builds or open-ended analysis. Classification is a cheap
//! keyword vote; the resulting budget scales iteration count, timeouts,
//! parallelism, and how much textual repetition the loop tolerates.

use regex::Regex;
use serde::Serialize;

/// Coarse task category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskIntent {
    Declarative,
    Procedural,
    Reasoning,
}

/// Classification result with confidence in `[0, 0.9]`.
#[derive(Debug, Clone, Serialize)]
pub struct IntentClassification {
    pub intent: TaskIntent,
    pub confidence: f64,
}

/// Iteration budget attached to an intent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntentBudget {
    pub max_iterations: u32,
    pub timeout_multiplier: f64,
    pub parallelism_multiplier: f64,
    pub repetition_tolerance: f64,
}

impl TaskIntent {
    /// Fixed budget for this intent.
    pub fn budget(self) -> IntentBudget {
        match self {
            TaskIntent::Declarative => IntentBudget {
                max_iterations: 6,
                timeout_multiplier: 1.0,
                parallelism_multiplier: 1.0,
                repetition_tolerance: 0.6,
            },
            TaskIntent::Procedural => IntentBudget {
                max_iterations: 10,
                timeout_multiplier: 1.5,
                parallelism_multiplier: 0.8,
                repetition_tolerance: 0.4,
            },
            TaskIntent::Reasoning => IntentBudget {
                max_iterations: 12,
                timeout_multiplier: 2.0,
                parallelism_multiplier: 1.2,
                repetition_tolerance: 0.3,
            },
        }
    }
}

const DECLARATIVE_KEYWORDS: &[&str] = &[
    "find", "what is", "lookup", "look up", "list", "show", "locate", "search", "which", "where",
];

const PROCEDURAL_KEYWORDS: &[&str] = &[
    "implement", "deploy", "refactor", "build", "create", "fix", "install", "migrate", "write",
    "add", "configure", "update",
];

const REASONING_KEYWORDS: &[&str] = &[
    "analyze",
    "analyse",
    "compare",
    "why",
    "trade-off",
    "tradeoff",
    "evaluate",
    "explain",
    "assess",
    "investigate",
];

/// Keyword-vote intent classifier.
///
/// Patterns are compiled once at construction; classification itself is
/// allocation-light and infallible.
pub struct IntentClassifier {
    declarative: Regex,
    procedural: Regex,
    reasoning: Regex,
}

impl IntentClassifier {
    pub fn new() -> Self {
        Self {
            declarative: group_regex(DECLARATIVE_KEYWORDS),
            procedural: group_regex(PROCEDURAL_KEYWORDS),
            reasoning: group_regex(REASONING_KEYWORDS),
        }
    }

    /// Classify a task (plus optional goal text).
    ///
    /// Intent is the argmax of keyword hits; zero hits default to
    /// declarative with confidence 0.4. Otherwise confidence is
    /// `min(0.9, wins/total + 0.3)`.
    pub fn classify(&self, task: &str, goal: Option<&str>) -> IntentClassification {
        let mut text = task.to_lowercase();
        if let Some(goal) = goal {
            text.push(' ');
            text.push_str(&goal.to_lowercase());
        }

        let declarative = self.declarative.find_iter(&text).count();
        let procedural = self.procedural.find_iter(&text).count();
        let reasoning = self.reasoning.find_iter(&text).count();
        let total = declarative + procedural + reasoning;

        if total == 0 {
            return IntentClassification {
                intent: TaskIntent::Declarative,
                confidence: 0.4,
            };
        }

        let (intent, wins) = if reasoning > declarative && reasoning > procedural {
            (TaskIntent::Reasoning, reasoning)
        } else if procedural > declarative && procedural >= reasoning {
            (TaskIntent::Procedural, procedural)
        } else {
            (TaskIntent::Declarative, declarative)
        };

        IntentClassification {
            intent,
            confidence: (wins as f64 / total as f64 + 0.3).min(0.9),
        }
    }
}

impl Default for IntentClassifier {
    fn default() -> Self {
        Self::new()
    }
}

// Keywords are known-good literals; the pattern cannot fail to compile.
#[allow(clippy::unwrap_used)]
fn group_regex(keywords: &[&str]) -> Regex {
    let alternation = keywords
        .iter()
        .map(|k| regex::escape(k))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!(r"\b(?:{alternation})\b")).unwrap()
}

/// Adjust a similarity threshold by an intent's repetition tolerance.
///
/// Tolerant intents (declarative) raise the bar for calling two outputs
/// "the same"; strict intents lower it.
pub fn adjusted_similarity_threshold(base: f64, tolerance: f64) -> f64 {
    base + (tolerance - 0.5) * 0.2
}

#[cfg(test)]
#[path = "intent_tests.rs"]
mod tests;
