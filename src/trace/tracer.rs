use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::time::{Duration, Instant};
use tracing::debug;
use uuid::Uuid;

use super::{
    truncate_chars, AttemptRecord, GraderInputRecord, GradingRecord, ReasoningStepRecord,
    RefinerRecord, ToolCallRecord, TraceDocument, TraceRunConfig, FULL_RESULTS_LIMIT,
    MAX_GRADER_ANSWER_CHARS, MAX_OBSERVATION_CHARS, MAX_OUTPUT_CHARS, RESULT_SAMPLE_SIZE,
};
use crate::agent::GradingResult;
use crate::tools::{EvidenceItem, Observation};

/// Build a trace id: `{YYYYMMDD-HHMMSS}-{6 hex of the query digest}-{8 hex of nonce}`.
///
/// The nonce segment keeps ids distinct when the same question is asked
/// twice within one second.
pub fn generate_trace_id(query: &str, at: DateTime<Utc>, nonce: Uuid) -> String {
    let digest = Sha256::digest(query.as_bytes());
    let short: String = digest.iter().take(3).map(|b| format!("{:02x}", b)).collect();
    let nonce = nonce.simple().to_string();
    format!("{}-{}-{}", at.format("%Y%m%d-%H%M%S"), short, &nonce[..8])
}

/// Passive recorder for one session.
///
/// Every `record_*` call applies to the most recently begun attempt and is a
/// no-op if none has begun. Nothing here returns an error.
#[derive(Debug)]
pub struct SessionTracer {
    doc: TraceDocument,
    started: Instant,
}

impl SessionTracer {
    pub fn new(query: &str, config: TraceRunConfig) -> Self {
        let now = Utc::now();
        Self {
            doc: TraceDocument {
                trace_id: generate_trace_id(query, now, Uuid::new_v4()),
                query: query.to_string(),
                session_id: None,
                config,
                attempts: Vec::new(),
                final_response: String::new(),
                total_duration_ms: 0,
                passed: false,
                best_effort: false,
                timed_out: false,
                created_at: now,
            },
            started: Instant::now(),
        }
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.doc.session_id = Some(session_id.into());
        self
    }

    pub fn trace_id(&self) -> &str {
        &self.doc.trace_id
    }

    pub fn attempt_count(&self) -> usize {
        self.doc.attempts.len()
    }

    /// Read-only view of what has been recorded so far.
    pub fn document(&self) -> &TraceDocument {
        &self.doc
    }

    pub fn begin_attempt(&mut self, attempt: u32, breadth: usize, query_text: &str) {
        debug!(trace_id = %self.doc.trace_id, attempt, breadth, "Trace attempt started");
        self.doc.attempts.push(AttemptRecord {
            attempt,
            breadth,
            query_text: query_text.to_string(),
            started_at: Utc::now(),
            ended_at: None,
            tool_calls: Vec::new(),
            reasoning: Vec::new(),
            response: None,
            termination: None,
            low_confidence: false,
            grading: None,
            refiner: None,
            aborted: false,
        });
    }

    pub fn record_step(
        &mut self,
        turn: u32,
        thought: &str,
        action: Option<String>,
        raw: &str,
        note: Option<&str>,
    ) {
        if let Some(current) = self.doc.attempts.last_mut() {
            current.reasoning.push(ReasoningStepRecord {
                turn,
                timestamp: Utc::now(),
                thought: truncate_chars(thought, MAX_OUTPUT_CHARS),
                action,
                raw: truncate_chars(raw, MAX_OUTPUT_CHARS),
                note: note.map(str::to_string),
            });
        }
    }

    pub fn record_tool_call(
        &mut self,
        tool: &str,
        args: &serde_json::Value,
        observation: &Observation,
        duration: Duration,
    ) {
        let Some(current) = self.doc.attempts.last_mut() else {
            return;
        };

        let results_count = observation.items.len();
        let sampled = results_count > FULL_RESULTS_LIMIT;
        let keep = if sampled { RESULT_SAMPLE_SIZE } else { results_count };
        let results: Vec<EvidenceItem> = observation
            .items
            .iter()
            .take(keep)
            .map(|item| EvidenceItem {
                text: truncate_chars(&item.text, MAX_OBSERVATION_CHARS),
                source_locator: item.source_locator.clone(),
                score: item.score,
            })
            .collect();

        let output = observation
            .items
            .iter()
            .map(|item| format!("[{}] {}", item.source_locator, item.text))
            .collect::<Vec<_>>()
            .join("\n");

        current.tool_calls.push(ToolCallRecord {
            index: current.tool_calls.len(),
            tool: tool.to_string(),
            args: args.clone(),
            timestamp: Utc::now(),
            duration_ms: duration.as_millis() as u64,
            results_count,
            results,
            sampled,
            output: truncate_chars(&output, MAX_OUTPUT_CHARS),
            error: observation.error.clone(),
            note: observation.note.clone(),
        });
    }

    pub fn record_draft(&mut self, response: &str, termination: &str, low_confidence: bool) {
        if let Some(current) = self.doc.attempts.last_mut() {
            current.response = Some(response.to_string());
            current.termination = Some(termination.to_string());
            current.low_confidence = low_confidence;
        }
    }

    pub fn record_grading(
        &mut self,
        question: &str,
        answer: &str,
        tool_call_count: usize,
        result: &GradingResult,
        duration: Duration,
    ) {
        if let Some(current) = self.doc.attempts.last_mut() {
            current.grading = Some(GradingRecord {
                input: GraderInputRecord {
                    question: question.to_string(),
                    answer: truncate_chars(answer, MAX_GRADER_ANSWER_CHARS),
                    tool_call_count,
                },
                output: result.clone(),
                duration_ms: duration.as_millis() as u64,
                timestamp: Utc::now(),
            });
        }
    }

    /// Record a refiner call; `outcome` is the accepted queries or the failure message.
    pub fn record_refinement(
        &mut self,
        question: &str,
        suggestion: &str,
        outcome: Result<&[String], String>,
        duration: Duration,
    ) {
        if let Some(current) = self.doc.attempts.last_mut() {
            let (queries, error) = match outcome {
                Ok(queries) => (queries.to_vec(), None),
                Err(message) => (Vec::new(), Some(message)),
            };
            current.refiner = Some(RefinerRecord {
                question: question.to_string(),
                suggestion: suggestion.to_string(),
                queries,
                error,
                duration_ms: duration.as_millis() as u64,
                timestamp: Utc::now(),
            });
        }
    }

    /// Flag the current attempt as cut short by the session deadline.
    pub fn mark_aborted(&mut self) {
        if let Some(current) = self.doc.attempts.last_mut() {
            current.aborted = true;
            current.ended_at = Some(Utc::now());
        }
    }

    pub fn end_attempt(&mut self) {
        if let Some(current) = self.doc.attempts.last_mut() {
            if current.ended_at.is_none() {
                current.ended_at = Some(Utc::now());
            }
        }
    }

    /// Close the trace and hand back the finished document.
    pub fn finish(
        mut self,
        final_response: &str,
        passed: bool,
        best_effort: bool,
        timed_out: bool,
    ) -> TraceDocument {
        self.end_attempt();
        self.doc.final_response = final_response.to_string();
        self.doc.passed = passed;
        self.doc.best_effort = best_effort;
        self.doc.timed_out = timed_out;
        self.doc.total_duration_ms = self.started.elapsed().as_millis() as u64;
        self.doc
    }
}
