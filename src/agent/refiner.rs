use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use super::extract_json_from_completion;
use crate::error::RefinerError;
use crate::langbase::{Message, PipeRequest, PipeRunner};
use crate::prompts::REFINER_PROMPT;

/// Most search strings a hint keeps.
pub const MAX_HINTS: usize = 3;

/// Alternative search vocabulary for the next attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefinementHint {
    queries: Vec<String>,
}

impl RefinementHint {
    /// Keep the first [`MAX_HINTS`] distinct, non-blank strings.
    pub fn from_candidates<I, S>(candidates: I) -> Result<Self, RefinerError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut queries: Vec<String> = Vec::new();
        for candidate in candidates {
            let candidate = candidate.as_ref().trim();
            if candidate.is_empty() || queries.iter().any(|q| q.eq_ignore_ascii_case(candidate)) {
                continue;
            }
            queries.push(candidate.to_string());
            if queries.len() == MAX_HINTS {
                break;
            }
        }

        if queries.is_empty() {
            return Err(RefinerError::Empty);
        }
        Ok(Self { queries })
    }

    pub fn queries(&self) -> &[String] {
        &self.queries
    }

    pub fn into_queries(self) -> Vec<String> {
        self.queries
    }
}

/// Turns a failed attempt's critique into search strings.
#[async_trait]
pub trait Refiner: Send + Sync {
    async fn refine(&self, question: &str, suggestion: &str) -> Result<RefinementHint, RefinerError>;
}

/// Parse refiner output: a JSON array of strings, or an object with a `queries` array.
pub fn parse_refinement(completion: &str) -> Result<RefinementHint, RefinerError> {
    let json = extract_json_from_completion(completion).map_err(|message| RefinerError::Parse { message })?;
    let value: Value = serde_json::from_str(json).map_err(|e| RefinerError::Parse {
        message: format!("Invalid refiner JSON: {}", e),
    })?;

    let items = match &value {
        Value::Array(items) => items,
        Value::Object(map) => match map.get("queries") {
            Some(Value::Array(items)) => items,
            _ => {
                return Err(RefinerError::Parse {
                    message: "Expected a JSON array of search strings".to_string(),
                })
            }
        },
        _ => {
            return Err(RefinerError::Parse {
                message: "Expected a JSON array of search strings".to_string(),
            })
        }
    };

    RefinementHint::from_candidates(items.iter().filter_map(Value::as_str))
}

/// LLM-backed [`Refiner`] running the refiner pipe.
pub struct QueryRefiner {
    runner: Arc<dyn PipeRunner>,
    pipe_name: String,
}

impl QueryRefiner {
    pub fn new(runner: Arc<dyn PipeRunner>, pipe_name: impl Into<String>) -> Self {
        Self {
            runner,
            pipe_name: pipe_name.into(),
        }
    }
}

#[async_trait]
impl Refiner for QueryRefiner {
    async fn refine(&self, question: &str, suggestion: &str) -> Result<RefinementHint, RefinerError> {
        let suggestion = if suggestion.trim().is_empty() {
            "The answer needs more specific detail."
        } else {
            suggestion
        };
        let messages = vec![
            Message::system(REFINER_PROMPT),
            Message::user(format!(
                "## Question\n{}\n\n## Why the previous answer fell short\n{}",
                question, suggestion
            )),
        ];

        let response = self
            .runner
            .run_pipe(PipeRequest::new(self.pipe_name.as_str(), messages))
            .await?;
        let hint = parse_refinement(&response.completion)?;
        debug!(queries = ?hint.queries(), "Refined search strings");
        Ok(hint)
    }
}
