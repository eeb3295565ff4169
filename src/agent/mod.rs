//! Quality-gated retrieval agent.
//!
//! - [`SessionContext`] / [`Query`]: immutable per-turn input
//! - [`ReasoningLoop`]: bounded Thought → Action → Observation loop over the tool registry
//! - [`AnswerGrader`]: five-dimension rubric with hard thresholds
//! - [`QueryRefiner`]: alternative search strings after a failed attempt
//! - [`RetryController`]: runs attempts with escalating breadth until one passes
//!
//! The generative pieces sit behind the [`Reasoner`], [`Grader`] and
//! [`Refiner`] traits so the control logic can be exercised with stubs.

mod context;
mod controller;
mod grader;
mod reasoning;
mod refiner;

pub use context::*;
pub use controller::*;
pub use grader::*;
pub use reasoning::*;
pub use refiner::*;

/// Answer returned when no evidence was ever obtained.
pub const REFUSAL_ANSWER: &str =
    "I could not find evidence in the knowledge base to answer this question.";

/// Extract JSON from a completion string, handling markdown code blocks.
///
/// Tries, in order: the trimmed text itself, a ```json fenced block, any
/// fenced block, then the span from the first `{` to the last `}`.
pub(crate) fn extract_json_from_completion(completion: &str) -> Result<&str, String> {
    let trimmed = completion.trim();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        return Ok(trimmed);
    }

    if completion.contains("```json") {
        return completion
            .split("```json")
            .nth(1)
            .and_then(|s| s.split("```").next())
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| "Found ```json block but content was empty or malformed".to_string());
    }

    if completion.contains("```") {
        return completion
            .split("```")
            .nth(1)
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| "Found ``` block but content was empty or malformed".to_string());
    }

    if let (Some(start), Some(end)) = (completion.find('{'), completion.rfind('}')) {
        if end > start {
            return Ok(&completion[start..=end]);
        }
    }

    Err(format!(
        "No JSON found in response. First 100 chars: '{}'",
        completion.chars().take(100).collect::<String>()
    ))
}
