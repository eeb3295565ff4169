use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout_at;
use tracing::{error, info, warn};

use super::{
    AnswerGrader, AttemptInput, DraftAnswer, Grader, GradingResult, LoopLimits, PipeReasoner,
    Query, QueryRefiner, Reasoner, ReasoningLoop, Refiner, RetryNote, Termination, REFUSAL_ANSWER,
};
use crate::config::{AgentConfig, Config, GradingThresholds, PipeConfig};
use crate::error::{AgentError, AppResult};
use crate::langbase::PipeRunner;
use crate::storage::{NoopTraceStore, TraceStore};
use crate::tools::ToolRegistry;
use crate::trace::{SessionTracer, TraceRunConfig};

/// The collaborators a controller drives.
pub struct AgentParts {
    pub registry: Arc<ToolRegistry>,
    pub reasoner: Arc<dyn Reasoner>,
    pub grader: Arc<dyn Grader>,
    pub refiner: Arc<dyn Refiner>,
}

/// Per-attempt summary returned to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptSummary {
    pub attempt: u32,
    pub breadth: usize,
    pub tool_calls: usize,
    pub termination: Termination,
    pub aggregate: u32,
    pub passed: bool,
}

/// Final result of one session. Always carries an answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionOutcome {
    pub trace_id: String,
    pub answer: String,
    pub passed: bool,
    /// Returned without passing grading.
    pub best_effort: bool,
    pub low_confidence: bool,
    pub timed_out: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotation: Option<String>,
    /// Attempts that were started, including one cut short by the deadline.
    pub attempts_started: u32,
    /// Attempts that reached grading, in order.
    pub attempts: Vec<AttemptSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grading: Option<GradingResult>,
    pub total_duration_ms: u64,
}

struct CompletedAttempt {
    attempt: u32,
    breadth: usize,
    draft: DraftAnswer,
    grading: GradingResult,
}

impl CompletedAttempt {
    fn summary(&self) -> AttemptSummary {
        AttemptSummary {
            attempt: self.attempt,
            breadth: self.breadth,
            tool_calls: self.draft.call_log.len(),
            termination: self.draft.termination,
            aggregate: self.grading.aggregate,
            passed: self.grading.passed,
        }
    }
}

/// Outer loop: attempt, grade, refine, repeat.
///
/// Runs at most `max_retries + 1` attempts with non-decreasing breadth,
/// stops at the first pass, and returns the last attempt as best-effort when
/// none passes. A session deadline can cut any step short; the best completed
/// attempt is returned in that case. The tracer belongs to the session and is
/// persisted once at the end.
pub struct RetryController {
    config: AgentConfig,
    thresholds: GradingThresholds,
    reasoning: ReasoningLoop,
    grader: Arc<dyn Grader>,
    refiner: Arc<dyn Refiner>,
    store: Arc<dyn TraceStore>,
    run_config: TraceRunConfig,
}

impl RetryController {
    /// Validate bounds and assemble the controller. Configuration errors are
    /// the only way a session can fail to start.
    pub fn new(config: AgentConfig, thresholds: GradingThresholds, parts: AgentParts) -> AppResult<Self> {
        config.validate()?;
        thresholds.validate()?;

        let reasoning = ReasoningLoop::new(parts.registry, parts.reasoner, LoopLimits::from(&config));
        let run_config = TraceRunConfig {
            max_retries: config.max_retries,
            breadth_schedule: config.breadth_schedule.clone(),
            ..TraceRunConfig::default()
        };

        Ok(Self {
            config,
            thresholds,
            reasoning,
            grader: parts.grader,
            refiner: parts.refiner,
            store: Arc::new(NoopTraceStore),
            run_config,
        })
    }

    /// Controller over Langbase pipes and the given tools.
    pub fn from_config(
        config: &Config,
        runner: Arc<dyn PipeRunner>,
        registry: Arc<ToolRegistry>,
        store: Arc<dyn TraceStore>,
    ) -> AppResult<Self> {
        let parts = AgentParts {
            registry,
            reasoner: Arc::new(PipeReasoner::new(runner.clone(), config.pipes.reasoner.as_str())),
            grader: Arc::new(AnswerGrader::new(runner.clone(), config.pipes.grader.as_str(), config.grading)),
            refiner: Arc::new(QueryRefiner::new(runner, config.pipes.refiner.as_str())),
        };
        Ok(Self::new(config.agent.clone(), config.grading, parts)?
            .with_trace_store(store)
            .with_pipe_names(&config.pipes))
    }

    pub fn with_trace_store(mut self, store: Arc<dyn TraceStore>) -> Self {
        self.store = store;
        self
    }

    /// Record pipe names in each trace's config section.
    pub fn with_pipe_names(mut self, pipes: &PipeConfig) -> Self {
        self.run_config.reasoner_pipe = pipes.reasoner.clone();
        self.run_config.grader_pipe = pipes.grader.clone();
        self.run_config.refiner_pipe = pipes.refiner.clone();
        self
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        self.reasoning.registry()
    }

    pub fn trace_store(&self) -> &Arc<dyn TraceStore> {
        &self.store
    }

    pub fn max_attempts(&self) -> u32 {
        self.config.max_retries + 1
    }

    /// Run one session to completion. Never fails.
    pub async fn run(&self, query: &Query) -> SessionOutcome {
        let started = Instant::now();
        let budget_ms = self.config.session_timeout_ms;
        let deadline = tokio::time::Instant::now() + Duration::from_millis(budget_ms);
        let max_attempts = self.max_attempts();

        let mut tracer = SessionTracer::new(&query.text, self.run_config.clone())
            .with_session_id(query.context.session_id());
        let mut completed: Vec<CompletedAttempt> = Vec::new();
        let mut note: Option<RetryNote> = None;
        let mut timed_out = false;
        let mut attempts_started = 0u32;

        info!(
            trace_id = %tracer.trace_id(),
            max_attempts,
            "Session started"
        );

        for attempt in 1..=max_attempts {
            let breadth = self.config.breadth_for(attempt);
            let input = AttemptInput {
                query,
                attempt,
                breadth,
                note: note.take(),
            };
            attempts_started = attempt;
            tracer.begin_attempt(attempt, breadth, &input.question_text());
            info!(attempt, breadth, refined = input.note.is_some(), "Attempt started");

            let draft = match timeout_at(deadline, self.reasoning.run(&input, &mut tracer)).await {
                Ok(draft) => draft,
                Err(_) => {
                    tracer.mark_aborted();
                    timed_out = true;
                    break;
                }
            };
            tracer.record_draft(&draft.text, draft.termination.as_str(), draft.low_confidence);

            let grade_started = Instant::now();
            let grading = match timeout_at(
                deadline,
                self.grader.grade(&query.text, &draft.text, &draft.call_log),
            )
            .await
            {
                Ok(grading) => grading.enforce(&self.thresholds),
                Err(_) => {
                    tracer.mark_aborted();
                    timed_out = true;
                    break;
                }
            };
            tracer.record_grading(
                &query.text,
                &draft.text,
                draft.call_log.len(),
                &grading,
                grade_started.elapsed(),
            );
            info!(
                attempt,
                aggregate = grading.aggregate,
                passed = grading.passed,
                fail_reasons = ?grading.fail_reasons,
                "Attempt graded"
            );

            let passed = grading.passed;
            let suggestion = grading.suggestion.clone();
            completed.push(CompletedAttempt {
                attempt,
                breadth,
                draft,
                grading,
            });

            if passed || attempt == max_attempts {
                break;
            }

            let refine_started = Instant::now();
            match timeout_at(deadline, self.refiner.refine(&query.text, &suggestion)).await {
                Err(_) => {
                    timed_out = true;
                    break;
                }
                Ok(Ok(hint)) => {
                    tracer.record_refinement(
                        &query.text,
                        &suggestion,
                        Ok(hint.queries()),
                        refine_started.elapsed(),
                    );
                    note = Some(RetryNote {
                        attempt: attempt + 1,
                        max_attempts,
                        suggestion,
                        hints: hint.into_queries(),
                        breadth: self.config.breadth_for(attempt + 1),
                    });
                }
                Ok(Err(e)) => {
                    warn!(attempt, error = %e, "Refinement failed, retrying with wider breadth only");
                    tracer.record_refinement(
                        &query.text,
                        &suggestion,
                        Err(e.to_string()),
                        refine_started.elapsed(),
                    );
                }
            }
            tracer.end_attempt();
        }

        if timed_out {
            let timeout = AgentError::SessionTimeout { budget_ms };
            warn!(
                trace_id = %tracer.trace_id(),
                error = %timeout,
                completed = completed.len(),
                "Session deadline reached"
            );
        }

        let outcome = self.conclude(&tracer, completed, attempts_started, timed_out, started);
        let document = tracer.finish(&outcome.answer, outcome.passed, outcome.best_effort, timed_out);
        if let Err(e) = self.store.save(&document).await {
            warn!(trace_id = %document.trace_id, error = %e, "Failed to persist trace");
        }

        info!(
            trace_id = %outcome.trace_id,
            passed = outcome.passed,
            attempts = outcome.attempts.len(),
            duration_ms = outcome.total_duration_ms,
            "Session finished"
        );
        outcome
    }

    fn conclude(
        &self,
        tracer: &SessionTracer,
        completed: Vec<CompletedAttempt>,
        attempts_started: u32,
        timed_out: bool,
        started: Instant,
    ) -> SessionOutcome {
        let attempts: Vec<AttemptSummary> = completed.iter().map(CompletedAttempt::summary).collect();
        let chosen = if timed_out {
            best_completed(&completed)
        } else {
            completed.last()
        };

        let base = SessionOutcome {
            trace_id: tracer.trace_id().to_string(),
            answer: REFUSAL_ANSWER.to_string(),
            passed: false,
            best_effort: true,
            low_confidence: true,
            timed_out,
            annotation: None,
            attempts_started,
            attempts,
            grading: None,
            total_duration_ms: started.elapsed().as_millis() as u64,
        };

        let Some(chosen) = chosen else {
            error!(trace_id = %tracer.trace_id(), "No attempt completed, returning refusal");
            return SessionOutcome {
                annotation: Some("No attempt completed before the session deadline.".to_string()),
                ..base
            };
        };

        let passed = chosen.grading.passed;
        let annotation = if passed {
            None
        } else if timed_out {
            Some(format!(
                "Best-effort answer from attempt {}: the session deadline was reached before an answer passed review ({}).",
                chosen.attempt,
                chosen.grading.fail_reasons.join("; ")
            ))
        } else {
            Some(format!(
                "Best-effort answer: no attempt passed review after {} attempt(s) ({}).",
                completed.len(),
                chosen.grading.fail_reasons.join("; ")
            ))
        };

        SessionOutcome {
            answer: chosen.draft.text.clone(),
            passed,
            best_effort: !passed,
            low_confidence: chosen.draft.low_confidence || !passed,
            annotation,
            grading: Some(chosen.grading.clone()),
            ..base
        }
    }
}

/// Passing attempts first, then highest aggregate, latest on ties.
fn best_completed(completed: &[CompletedAttempt]) -> Option<&CompletedAttempt> {
    completed
        .iter()
        .max_by_key(|a| (a.grading.passed, a.grading.aggregate, a.attempt))
}
