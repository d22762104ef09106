// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Iteration prompt construction.
//!
//! Pure string building: header, task/goal/verification declaration,
//! contract rules, the reference pack, the previous iteration body, and
//! normalized validation feedback, closing with the exact reply template.

/// A loaded reference document, already assigned a normalized id (`R1`,
/// `R2`, ...).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub id: String,
    pub title: String,
    pub source: String,
    pub content: String,
}

/// Previous-iteration text is truncated to this many characters.
pub const PREVIOUS_OUTPUT_MAX_CHARS: usize = 9_000;

/// At most this many feedback items reach the prompt.
pub const MAX_FEEDBACK_ITEMS: usize = 4;

/// Everything that varies per iteration.
#[derive(Debug, Clone)]
pub struct PromptInputs<'a> {
    pub iteration: u32,
    pub max_iterations: u32,
    pub task: &'a str,
    pub goal: Option<&'a str>,
    pub verification_command: Option<&'a str>,
    pub references: &'a [Reference],
    pub previous_output: &'a str,
    pub feedback: &'a [String],
}

/// Build the full prompt for one iteration.
pub fn build_iteration_prompt(inputs: &PromptInputs<'_>) -> String {
    let mut prompt = String::new();
    prompt.push_str(&format!(
        "You are iteration {}/{} of an autonomous task loop.\n\n",
        inputs.iteration, inputs.max_iterations
    ));
    prompt.push_str(&format!("TASK: {}\n", inputs.task));
    if let Some(goal) = inputs.goal {
        prompt.push_str(&format!("GOAL: {goal}\n"));
    }
    if let Some(command) = inputs.verification_command {
        prompt.push_str(&format!(
            "VERIFICATION: `{command}` will be executed to check your work.\n"
        ));
    }

    prompt.push_str("\nRULES:\n");
    prompt.push_str("- Set STATUS to done only if the task is complete.\n");
    if inputs.goal.is_some() {
        prompt.push_str("- A goal is declared: done requires GOAL_STATUS=met with evidence.\n");
    }
    if !inputs.references.is_empty() {
        prompt.push_str("- Cite the references you used as [R#] in the citations list.\n");
    }

    if !inputs.references.is_empty() {
        prompt.push_str("\nREFERENCES:\n");
        for reference in inputs.references {
            prompt.push_str(&format!(
                "[{}] {}\nSource: {}\n{}\n\n",
                reference.id, reference.title, reference.source, reference.content
            ));
        }
    }

    if !inputs.previous_output.is_empty() {
        let truncated: String = inputs
            .previous_output
            .chars()
            .take(PREVIOUS_OUTPUT_MAX_CHARS)
            .collect();
        prompt.push_str("\nPREVIOUS ITERATION:\n");
        prompt.push_str(&truncated);
        prompt.push('\n');
    }

    if !inputs.feedback.is_empty() {
        prompt.push_str("\nFEEDBACK TO ADDRESS:\n");
        for (index, item) in inputs.feedback.iter().take(MAX_FEEDBACK_ITEMS).enumerate() {
            prompt.push_str(&format!("{}. {}\n", index + 1, item));
        }
    }

    prompt.push_str(concat!(
        "\nEnd your reply with exactly this structure:\n",
        "<LOOP_JSON>{\"status\":\"continue|done\",\"goal_status\":\"met|not_met|unknown\",",
        "\"goal_evidence\":\"...\",\"summary\":\"...\",\"next_actions\":[\"...\"],",
        "\"citations\":[\"R1\"]}</LOOP_JSON>\n",
        "<RESULT>\n",
        "...your full answer for this iteration...\n",
        "</RESULT>\n",
    ));
    prompt
}

#[cfg(test)]
#[path = "prompt_tests.rs"]
mod tests;
