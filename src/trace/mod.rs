//! Execution tracing.
//!
//! A [`SessionTracer`] is owned by one session's retry controller and records
//! every reasoning step, tool call, grading and refinement into a
//! [`TraceDocument`]. It never influences control flow. Persistence happens
//! once, at session end, through a [`crate::storage::TraceStore`].

mod document;
mod tracer;

pub use document::*;
pub use tracer::*;

/// Character cap for recorded tool output.
pub const MAX_OUTPUT_CHARS: usize = 1000;

/// Character cap for observation text in reasoning steps and result samples.
pub const MAX_OBSERVATION_CHARS: usize = 500;

/// Character cap for the answer recorded as grader input.
pub const MAX_GRADER_ANSWER_CHARS: usize = 500;

/// Above this many results a tool call stores a count and a sample.
pub const FULL_RESULTS_LIMIT: usize = 10;

/// Items kept in the sample of a large result set.
pub const RESULT_SAMPLE_SIZE: usize = 5;

/// Truncate to `max` characters, marking the cut with `...`.
pub fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((byte_idx, _)) => format!("{}...", &text[..byte_idx]),
        None => text.to_string(),
    }
}
