//! Deterministic collaborators shared by the controller test suites.

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use graded_retrieval::agent::{CallLogEntry, DimensionScores, Grader, GradingResult, QuestionType, Reasoner};
use graded_retrieval::config::GradingThresholds;
use graded_retrieval::error::{AgentError, RetrievalError, RetrievalResult};
use graded_retrieval::langbase::{Message, MessageRole};
use graded_retrieval::tools::{EvidenceItem, KnowledgeQuery, KnowledgeSource};

/// Calls `search_memory` a fixed number of times per attempt, then answers.
///
/// Records every opening prompt so tests can inspect the question text each
/// attempt was given.
pub struct SearchingReasoner {
    searches_per_attempt: usize,
    openings: Mutex<Vec<String>>,
}

impl SearchingReasoner {
    pub fn new(searches_per_attempt: usize) -> Self {
        Self {
            searches_per_attempt,
            openings: Mutex::new(Vec::new()),
        }
    }

    pub fn openings(&self) -> Vec<String> {
        self.openings.lock().unwrap().clone()
    }
}

#[async_trait]
impl Reasoner for SearchingReasoner {
    async fn next_step(&self, transcript: &[Message]) -> Result<String, AgentError> {
        let attempt = {
            let mut openings = self.openings.lock().unwrap();
            if transcript.len() == 1 {
                openings.push(transcript[0].content.clone());
            }
            openings.len()
        };

        let searches_done = transcript
            .iter()
            .filter(|m| m.role == MessageRole::Assistant)
            .count();
        if searches_done < self.searches_per_attempt {
            Ok(json!({
                "thought": "Need passages.",
                "action": {"tool": "search_memory", "args": {"query": format!("search {}", searches_done + 1)}}
            })
            .to_string())
        } else {
            Ok(json!({
                "thought": "Done.",
                "final_answer": format!("answer from attempt {}", attempt)
            })
            .to_string())
        }
    }
}

/// Returns `items` evidence records per call and records every query.
/// Calls listed in `fail_calls` (1-based) fail instead.
pub struct RecordingSource {
    items: usize,
    fail_calls: Vec<usize>,
    calls: AtomicUsize,
    queries: Mutex<Vec<KnowledgeQuery>>,
}

impl RecordingSource {
    pub fn new(items: usize) -> Self {
        Self {
            items,
            fail_calls: Vec::new(),
            calls: AtomicUsize::new(0),
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_on(mut self, calls: &[usize]) -> Self {
        self.fail_calls = calls.to_vec();
        self
    }

    pub fn limits(&self) -> Vec<usize> {
        self.queries
            .lock()
            .unwrap()
            .iter()
            .filter_map(|q| match q {
                KnowledgeQuery::Passages { limit, .. } => Some(*limit),
                _ => None,
            })
            .collect()
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KnowledgeSource for RecordingSource {
    async fn fetch(&self, query: &KnowledgeQuery) -> RetrievalResult<Vec<EvidenceItem>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.queries.lock().unwrap().push(query.clone());
        if self.fail_calls.contains(&call) {
            return Err(RetrievalError::Api {
                status: 503,
                message: "index unavailable".to_string(),
            });
        }
        Ok((0..self.items)
            .map(|i| EvidenceItem {
                text: format!("evidence {} of call {}", i, call),
                source_locator: format!("ch{}:p{}", call, i),
                score: 0.9,
            })
            .collect())
    }
}

/// Grading result with the given dimension scores and reported aggregate.
pub fn grading(
    [tool_usage, grounding, completeness, citation, depth]: [u32; 5],
    aggregate: u32,
    thresholds: &GradingThresholds,
) -> GradingResult {
    GradingResult::evaluate(
        QuestionType::Relationship,
        DimensionScores {
            tool_usage,
            grounding,
            completeness,
            citation,
            depth,
        },
        aggregate,
        thresholds,
        "stub rationale",
        "",
    )
}

/// Grader that replays a fixed script of results, repeating the last one.
pub struct ScriptedGrader {
    script: Vec<GradingResult>,
    calls: AtomicUsize,
}

impl ScriptedGrader {
    pub fn new(script: Vec<GradingResult>) -> Self {
        Self {
            script,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Grader for ScriptedGrader {
    async fn grade(&self, _question: &str, _answer: &str, _call_log: &[CallLogEntry]) -> GradingResult {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let idx = call.min(self.script.len().saturating_sub(1));
        self.script[idx].clone()
    }
}
