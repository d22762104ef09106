// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The machine contract every model reply must carry.
//!
//! Replies end with a `<LOOP_JSON>{...}</LOOP_JSON>` block and a
//! `<RESULT>...</RESULT>` body. Parsing is two-stage: extract + strict
//! field validation first, collecting granular errors instead of failing;
//! a legacy line-anchored fallback (`STATUS:`, `GOAL_STATUS:`,
//! `CITATIONS:`) is retained as a secondary path and always records that
//! the block was missing. Parse errors are never fatal — the loop engine
//! turns them into corrective feedback.

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Whether the model wants another iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoopStatus {
    Continue,
    Done,
}

/// The model's claim about the user-declared goal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalStatus {
    Met,
    NotMet,
    Unknown,
}

/// Structured contract produced by the model each iteration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IterationContract {
    pub status: LoopStatus,
    pub goal_status: GoalStatus,
    #[serde(default)]
    pub goal_evidence: String,
    pub summary: String,
    pub next_actions: Vec<String>,
    #[serde(default)]
    pub citations: Vec<String>,
}

/// Result of parsing one model reply.
#[derive(Debug, Clone)]
pub struct ParsedReply {
    /// Best-effort contract; present whenever any structured fields were
    /// recoverable. Check `parse_errors` before trusting it.
    pub contract: Option<IterationContract>,
    /// The `<RESULT>` body, or the reply minus contract markup.
    pub result_body: String,
    pub parse_errors: Vec<String>,
}

/// Normalize a citation token to canonical `R{n}` form.
///
/// Accepts `R3`, `r3`, `[R3]`, `[r03]`; anything else is rejected.
pub fn normalize_citation(raw: &str) -> Option<String> {
    let trimmed = raw
        .trim()
        .trim_start_matches('[')
        .trim_end_matches(']')
        .trim();
    let rest = trimmed.strip_prefix(['r', 'R'])?;
    if rest.is_empty() || !rest.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let n: u64 = rest.parse().ok()?;
    if n == 0 {
        return None;
    }
    Some(format!("R{n}"))
}

/// Render a contract as the tagged block the model is asked to emit.
///
/// `parse_model_reply(format_contract(c))` recovers `c` exactly.
pub fn format_contract(contract: &IterationContract) -> String {
    // IterationContract contains only string-like fields; serialization
    // cannot fail.
    #[allow(clippy::unwrap_used)]
    let json = serde_json::to_string(contract).unwrap();
    format!("<LOOP_JSON>{json}</LOOP_JSON>")
}

// The patterns below are fixed literals; they cannot fail to compile.
#[allow(clippy::unwrap_used)]
fn loop_json_regex() -> Regex {
    Regex::new(r"(?s)<LOOP_JSON>\s*(?:```(?:json)?\s*)?(\{.*?\})\s*(?:```\s*)?</LOOP_JSON>")
        .unwrap()
}

#[allow(clippy::unwrap_used)]
fn result_regex() -> Regex {
    Regex::new(r"(?s)<RESULT>\s*(.*?)\s*</RESULT>").unwrap()
}

/// Parse a full model reply into contract + result body + errors.
pub fn parse_model_reply(text: &str) -> ParsedReply {
    let mut errors = Vec::new();

    let result_body = match result_regex().captures(text) {
        Some(captures) => captures[1].to_string(),
        None => strip_markup(text),
    };

    let contract = match loop_json_regex().captures(text) {
        Some(captures) => Some(parse_contract_json(&captures[1], &mut errors)),
        None => {
            errors.push("missing <LOOP_JSON> block".to_string());
            parse_legacy_lines(text, &mut errors)
        }
    };

    ParsedReply {
        contract,
        result_body,
        parse_errors: errors,
    }
}

/// Strict field-by-field parse of the JSON block, accumulating errors and
/// recovering what it can.
fn parse_contract_json(json: &str, errors: &mut Vec<String>) -> IterationContract {
    let value: serde_json::Value = match serde_json::from_str(json) {
        Ok(value) => value,
        Err(e) => {
            errors.push(format!("LOOP_JSON is not valid JSON: {e}"));
            serde_json::Value::Null
        }
    };

    let status = match value.get("status").and_then(|v| v.as_str()) {
        Some(s) => match s.to_lowercase().as_str() {
            "continue" => LoopStatus::Continue,
            "done" => LoopStatus::Done,
            other => {
                errors.push(format!("status must be continue or done, got \"{other}\""));
                LoopStatus::Continue
            }
        },
        None => {
            errors.push("status is required".to_string());
            LoopStatus::Continue
        }
    };

    let goal_status = match value.get("goal_status").and_then(|v| v.as_str()) {
        Some(s) => match s.to_lowercase().replace(' ', "_").as_str() {
            "met" => GoalStatus::Met,
            "not_met" => GoalStatus::NotMet,
            "unknown" => GoalStatus::Unknown,
            other => {
                errors.push(format!(
                    "goal_status must be met, not_met, or unknown, got \"{other}\""
                ));
                GoalStatus::Unknown
            }
        },
        None => GoalStatus::Unknown,
    };

    let goal_evidence = value
        .get("goal_evidence")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();

    let summary = value
        .get("summary")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    if summary.trim().is_empty() {
        errors.push("summary must be a non-empty string".to_string());
    }

    let next_actions: Vec<String> = value
        .get("next_actions")
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    if next_actions.is_empty() {
        errors.push("next_actions must be a non-empty list".to_string());
    }

    let mut citations = Vec::new();
    if let Some(raw) = value.get("citations").and_then(|v| v.as_array()) {
        for item in raw {
            match item.as_str().map(str::trim) {
                Some(token) if !token.is_empty() => match normalize_citation(token) {
                    Some(normalized) => citations.push(normalized),
                    None => errors.push(format!("malformed citation: \"{token}\"")),
                },
                _ => errors.push("citations must be strings".to_string()),
            }
        }
    }

    IterationContract {
        status,
        goal_status,
        goal_evidence,
        summary,
        next_actions,
        citations,
    }
}

/// Legacy fallback: line-anchored `STATUS:` / `GOAL_STATUS:` / `CITATIONS:`.
fn parse_legacy_lines(text: &str, errors: &mut Vec<String>) -> Option<IterationContract> {
    #[allow(clippy::unwrap_used)]
    let status_re = Regex::new(r"(?mi)^\s*STATUS:\s*(\w+)").unwrap();
    #[allow(clippy::unwrap_used)]
    let goal_re = Regex::new(r"(?mi)^\s*GOAL_STATUS:\s*([\w ]+)").unwrap();
    #[allow(clippy::unwrap_used)]
    let citations_re = Regex::new(r"(?mi)^\s*CITATIONS:\s*(.+)$").unwrap();

    let status = match status_re.captures(text) {
        Some(captures) => match captures[1].to_lowercase().as_str() {
            "done" => LoopStatus::Done,
            _ => LoopStatus::Continue,
        },
        None => return None,
    };

    let goal_status = goal_re
        .captures(text)
        .map(|captures| {
            match captures[1].trim().to_lowercase().replace(' ', "_").as_str() {
                "met" => GoalStatus::Met,
                "not_met" => GoalStatus::NotMet,
                _ => GoalStatus::Unknown,
            }
        })
        .unwrap_or(GoalStatus::Unknown);

    let mut citations = Vec::new();
    if let Some(captures) = citations_re.captures(text) {
        for token in captures[1].split(',') {
            match normalize_citation(token) {
                Some(normalized) => citations.push(normalized),
                None if token.trim().is_empty() => {}
                None => errors.push(format!("malformed citation: \"{}\"", token.trim())),
            }
        }
    }

    let summary: String = strip_markup(text).chars().take(200).collect();
    if summary.trim().is_empty() {
        errors.push("summary must be a non-empty string".to_string());
    }

    Some(IterationContract {
        status,
        goal_status,
        goal_evidence: String::new(),
        summary,
        next_actions: Vec::new(),
        citations,
    })
}

/// Drop contract markup from a reply, leaving prose.
fn strip_markup(text: &str) -> String {
    loop_json_regex().replace_all(text, "").trim().to_string()
}

#[cfg(test)]
#[path = "contract_tests.rs"]
mod tests;
