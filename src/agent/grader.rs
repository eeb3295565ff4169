use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use super::{extract_json_from_completion, CallLogEntry};
use crate::config::{GradingThresholds, AGGREGATE_SCALE, DIMENSION_SCALE};
use crate::error::GraderError;
use crate::langbase::{Message, PipeRequest, PipeRunner};
use crate::prompts::GRADER_PROMPT;
use crate::trace::truncate_chars;

/// Characters of each tool output shown to the grader.
const TOOL_OUTPUT_PREVIEW_CHARS: usize = 200;

/// Coarse question category reported by the grader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    Relationship,
    Fact,
    Journey,
    Detail,
    Unknown,
}

impl QuestionType {
    /// Lenient parse of the grader's label.
    pub fn from_label(label: &str) -> Self {
        let label = label.trim().to_lowercase();
        if label.starts_with("relation") {
            QuestionType::Relationship
        } else if label.starts_with("fact") {
            QuestionType::Fact
        } else if label.starts_with("journey") || label.starts_with("history") {
            QuestionType::Journey
        } else if label.starts_with("detail") {
            QuestionType::Detail
        } else {
            QuestionType::Unknown
        }
    }
}

/// Per-dimension scores, each on `0..=DIMENSION_SCALE`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimensionScores {
    pub tool_usage: u32,
    pub grounding: u32,
    pub completeness: u32,
    pub citation: u32,
    pub depth: u32,
}

impl DimensionScores {
    pub fn sum(&self) -> u32 {
        self.tool_usage + self.grounding + self.completeness + self.citation + self.depth
    }

    fn clamped(self) -> Self {
        Self {
            tool_usage: self.tool_usage.min(DIMENSION_SCALE),
            grounding: self.grounding.min(DIMENSION_SCALE),
            completeness: self.completeness.min(DIMENSION_SCALE),
            citation: self.citation.min(DIMENSION_SCALE),
            depth: self.depth.min(DIMENSION_SCALE),
        }
    }
}

/// Scored evaluation of one attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GradingResult {
    pub question_type: QuestionType,
    pub scores: DimensionScores,
    pub aggregate: u32,
    pub passed: bool,
    pub rationale: String,
    /// Always non-empty; names the deficiency to fix on a retry.
    pub suggestion: String,
    /// Every threshold this result violates.
    #[serde(default)]
    pub fail_reasons: Vec<String>,
}

impl GradingResult {
    /// Apply the hard thresholds. A pass needs every dimension minimum and
    /// the aggregate minimum; any single miss fails.
    pub fn evaluate(
        question_type: QuestionType,
        scores: DimensionScores,
        aggregate: u32,
        thresholds: &GradingThresholds,
        rationale: impl Into<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        let scores = scores.clamped();
        let aggregate = aggregate.min(AGGREGATE_SCALE);

        let checks = [
            ("depth", scores.depth, thresholds.min_depth),
            ("grounding", scores.grounding, thresholds.min_grounding),
            ("citation", scores.citation, thresholds.min_citation),
            ("tool_usage", scores.tool_usage, thresholds.min_tool_usage),
            ("completeness", scores.completeness, thresholds.min_completeness),
            ("aggregate", aggregate, thresholds.min_aggregate),
        ];

        let failed: Vec<&str> = checks
            .iter()
            .filter(|(_, value, min)| value < min)
            .map(|(name, _, _)| *name)
            .collect();
        let fail_reasons: Vec<String> = checks
            .iter()
            .filter(|(_, value, min)| value < min)
            .map(|(name, value, min)| format!("{} {} < {}", name, value, min))
            .collect();

        let suggestion = suggestion.into();
        let suggestion = if !suggestion.trim().is_empty() {
            suggestion
        } else if let Some(first) = failed.first() {
            default_suggestion(first).to_string()
        } else {
            "No deficiency found.".to_string()
        };

        Self {
            question_type,
            scores,
            aggregate,
            passed: fail_reasons.is_empty(),
            rationale: rationale.into(),
            suggestion,
            fail_reasons,
        }
    }

    /// Fail result used when the grader output cannot be interpreted.
    pub fn automatic_fail(reason: impl Into<String>, thresholds: &GradingThresholds) -> Self {
        let reason = reason.into();
        let mut result = Self::evaluate(
            QuestionType::Unknown,
            DimensionScores::default(),
            0,
            thresholds,
            format!("Automatic fail: {}", reason),
            "Grading failed; gather concrete, cited evidence with search_memory before answering.",
        );
        result.passed = false;
        result.fail_reasons.insert(0, format!("grader: {}", reason));
        result
    }

    /// Re-check this result against `thresholds`. A pass that violates any
    /// threshold becomes a fail.
    pub fn enforce(self, thresholds: &GradingThresholds) -> Self {
        let checked = Self::evaluate(
            self.question_type,
            self.scores,
            self.aggregate,
            thresholds,
            self.rationale,
            self.suggestion,
        );
        let passed = self.passed && checked.passed;
        let mut fail_reasons = self.fail_reasons;
        for reason in &checked.fail_reasons {
            if !fail_reasons.contains(reason) {
                fail_reasons.push(reason.clone());
            }
        }
        Self {
            passed,
            fail_reasons,
            ..checked
        }
    }
}

fn default_suggestion(dimension: &str) -> &'static str {
    match dimension {
        "depth" => "Missing concrete event detail; retrieve the actual scenes with search_memory.",
        "grounding" => "Claims are not supported by the retrieved evidence; answer from observations only.",
        "citation" => "Cite the source locators of the evidence used.",
        "tool_usage" => "Verify the entities with the retrieval tools before answering.",
        "completeness" => "Answer every part of the question.",
        _ => "Overall quality is below threshold; add specific, cited supporting detail.",
    }
}

/// Scores an attempt's answer.
///
/// Infallible by contract: implementations turn their own failures into an
/// automatic fail.
#[async_trait]
pub trait Grader: Send + Sync {
    async fn grade(&self, question: &str, answer: &str, call_log: &[CallLogEntry]) -> GradingResult;
}

#[derive(Deserialize)]
struct RawGrade {
    #[serde(default)]
    question_type: Option<String>,
    scores: RawScores,
    #[serde(default)]
    score: Option<f64>,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    suggestion: Option<String>,
}

#[derive(Deserialize)]
struct RawScores {
    #[serde(default)]
    tool_usage: f64,
    #[serde(default, alias = "evidence")]
    grounding: f64,
    #[serde(default)]
    completeness: f64,
    #[serde(default)]
    citation: f64,
    #[serde(default)]
    depth: f64,
}

fn to_score(value: f64) -> u32 {
    if value.is_finite() && value > 0.0 {
        value.round() as u32
    } else {
        0
    }
}

/// Parse grader output and apply `thresholds`.
///
/// The aggregate is the grader's reported total when present, otherwise the
/// sum of the dimensions.
pub fn parse_grading(completion: &str, thresholds: &GradingThresholds) -> Result<GradingResult, GraderError> {
    let json = extract_json_from_completion(completion).map_err(|message| GraderError::Parse { message })?;
    let raw: RawGrade = serde_json::from_str(json).map_err(|e| GraderError::Parse {
        message: format!("Invalid grading JSON: {}", e),
    })?;

    let scores = DimensionScores {
        tool_usage: to_score(raw.scores.tool_usage),
        grounding: to_score(raw.scores.grounding),
        completeness: to_score(raw.scores.completeness),
        citation: to_score(raw.scores.citation),
        depth: to_score(raw.scores.depth),
    };
    let aggregate = raw
        .score
        .map(to_score)
        .unwrap_or_else(|| scores.clamped().sum());

    Ok(GradingResult::evaluate(
        raw.question_type
            .as_deref()
            .map(QuestionType::from_label)
            .unwrap_or(QuestionType::Unknown),
        scores,
        aggregate,
        thresholds,
        raw.reason.unwrap_or_default(),
        raw.suggestion.unwrap_or_default(),
    ))
}

/// LLM-backed [`Grader`] running the grader pipe.
pub struct AnswerGrader {
    runner: Arc<dyn PipeRunner>,
    pipe_name: String,
    thresholds: GradingThresholds,
}

impl AnswerGrader {
    pub fn new(runner: Arc<dyn PipeRunner>, pipe_name: impl Into<String>, thresholds: GradingThresholds) -> Self {
        Self {
            runner,
            pipe_name: pipe_name.into(),
            thresholds,
        }
    }

    async fn try_grade(
        &self,
        question: &str,
        answer: &str,
        call_log: &[CallLogEntry],
    ) -> Result<GradingResult, GraderError> {
        let messages = vec![
            Message::system(GRADER_PROMPT),
            Message::user(build_grader_input(question, answer, call_log)),
        ];
        let response = self
            .runner
            .run_pipe(PipeRequest::new(self.pipe_name.as_str(), messages))
            .await?;
        parse_grading(&response.completion, &self.thresholds)
    }
}

#[async_trait]
impl Grader for AnswerGrader {
    async fn grade(&self, question: &str, answer: &str, call_log: &[CallLogEntry]) -> GradingResult {
        match self.try_grade(question, answer, call_log).await {
            Ok(result) => {
                debug!(
                    aggregate = result.aggregate,
                    passed = result.passed,
                    depth = result.scores.depth,
                    "Answer graded"
                );
                result
            }
            Err(e) => {
                warn!(error = %e, "Grader failed, treating as automatic fail");
                GradingResult::automatic_fail(e.to_string(), &self.thresholds)
            }
        }
    }
}

fn build_grader_input(question: &str, answer: &str, call_log: &[CallLogEntry]) -> String {
    let calls = if call_log.is_empty() {
        "(no tools were called)".to_string()
    } else {
        call_log
            .iter()
            .map(|entry| {
                let output = match &entry.observation.error {
                    Some(error) => format!("failed: {}", error),
                    None => {
                        let joined = entry
                            .observation
                            .items
                            .iter()
                            .map(|item| format!("[{}] {}", item.source_locator, item.text))
                            .collect::<Vec<_>>()
                            .join(" | ");
                        format!(
                            "{} results: {}",
                            entry.observation.items.len(),
                            truncate_chars(&joined, TOOL_OUTPUT_PREVIEW_CHARS)
                        )
                    }
                };
                format!("- {}({}) -> {}", entry.call.tool, entry.call.args, output)
            })
            .collect::<Vec<_>>()
            .join("\n")
    };

    format!(
        "## Question\n{}\n\n## Answer\n{}\n\n## Tool calls\n{}",
        question, answer, calls
    )
}
