use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::agent::GradingResult;
use crate::tools::EvidenceItem;

/// Persisted record of one session.
///
/// Readers ignore fields they do not know, and every field added after the
/// first version carries a serde default, so older and newer documents both load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceDocument {
    pub trace_id: String,
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub config: TraceRunConfig,
    pub attempts: Vec<AttemptRecord>,
    pub final_response: String,
    pub total_duration_ms: u64,
    pub passed: bool,
    #[serde(default)]
    pub best_effort: bool,
    #[serde(default)]
    pub timed_out: bool,
    pub created_at: DateTime<Utc>,
}

/// Model and bound settings the session ran with.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TraceRunConfig {
    pub reasoner_pipe: String,
    pub grader_pipe: String,
    pub refiner_pipe: String,
    pub max_retries: u32,
    #[serde(default)]
    pub breadth_schedule: Vec<usize>,
}

/// One attempt: reasoning, tool calls, grading and (on failure) refinement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub attempt: u32,
    pub breadth: usize,
    /// Question text as presented to the reasoner, including any retry note.
    pub query_text: String,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCallRecord>,
    #[serde(default)]
    pub reasoning: Vec<ReasoningStepRecord>,
    #[serde(default)]
    pub response: Option<String>,
    #[serde(default)]
    pub termination: Option<String>,
    #[serde(default)]
    pub low_confidence: bool,
    #[serde(default)]
    pub grading: Option<GradingRecord>,
    #[serde(default)]
    pub refiner: Option<RefinerRecord>,
    /// Set when the session deadline cut this attempt short.
    #[serde(default)]
    pub aborted: bool,
}

/// One reasoning-stream increment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningStepRecord {
    pub turn: u32,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub thought: String,
    #[serde(default)]
    pub action: Option<String>,
    /// Raw reasoner output, truncated.
    #[serde(default)]
    pub raw: String,
    #[serde(default)]
    pub note: Option<String>,
}

/// One tool call and what it returned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub index: usize,
    pub tool: String,
    pub args: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    pub duration_ms: u64,
    pub results_count: usize,
    /// All results when there are few, otherwise a leading sample.
    #[serde(default)]
    pub results: Vec<EvidenceItem>,
    #[serde(default)]
    pub sampled: bool,
    #[serde(default)]
    pub output: String,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
}

/// Grader call: what it saw and what it concluded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradingRecord {
    pub input: GraderInputRecord,
    pub output: GradingResult,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraderInputRecord {
    pub question: String,
    pub answer: String,
    pub tool_call_count: usize,
}

/// Refiner call after a failed grading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefinerRecord {
    pub question: String,
    pub suggestion: String,
    #[serde(default)]
    pub queries: Vec<String>,
    #[serde(default)]
    pub error: Option<String>,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
}

/// Listing row for stored traces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceSummary {
    pub trace_id: String,
    pub query: String,
    pub passed: bool,
    pub attempts: usize,
    pub total_duration_ms: u64,
    pub created_at: DateTime<Utc>,
}

impl TraceDocument {
    pub fn summary(&self) -> TraceSummary {
        TraceSummary {
            trace_id: self.trace_id.clone(),
            query: self.query.clone(),
            passed: self.passed,
            attempts: self.attempts.len(),
            total_duration_ms: self.total_duration_ms,
            created_at: self.created_at,
        }
    }

    /// Attempts that reached grading.
    pub fn graded_attempts(&self) -> impl Iterator<Item = &AttemptRecord> {
        self.attempts.iter().filter(|a| a.grading.is_some())
    }
}
