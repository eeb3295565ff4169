use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use super::{extract_json_from_completion, AttemptInput, REFUSAL_ANSWER};
use crate::config::AgentConfig;
use crate::error::AgentError;
use crate::langbase::{Message, PipeRequest, PipeRunner};
use crate::prompts::REASONER_PROMPT;
use crate::tools::{Observation, ToolRegistry};
use crate::trace::{truncate_chars, SessionTracer, MAX_OBSERVATION_CHARS};

const FINALIZE_INSTRUCTION: &str = "Stop calling tools. Give your final answer now using only \
     the evidence gathered so far, as {\"thought\": ..., \"final_answer\": ...}.";

const NO_EVIDENCE_INSTRUCTION: &str =
    "No evidence has been gathered yet. Call a tool before giving a final answer.";

/// Produces the next reasoning step from the transcript so far.
#[async_trait]
pub trait Reasoner: Send + Sync {
    async fn next_step(&self, transcript: &[Message]) -> Result<String, AgentError>;
}

/// [`Reasoner`] backed by a Langbase pipe.
pub struct PipeReasoner {
    runner: Arc<dyn PipeRunner>,
    pipe_name: String,
}

impl PipeReasoner {
    pub fn new(runner: Arc<dyn PipeRunner>, pipe_name: impl Into<String>) -> Self {
        Self {
            runner,
            pipe_name: pipe_name.into(),
        }
    }
}

#[async_trait]
impl Reasoner for PipeReasoner {
    async fn next_step(&self, transcript: &[Message]) -> Result<String, AgentError> {
        let mut messages = Vec::with_capacity(transcript.len() + 1);
        messages.push(Message::system(REASONER_PROMPT));
        messages.extend_from_slice(transcript);

        let response = self
            .runner
            .run_pipe(PipeRequest::new(self.pipe_name.as_str(), messages))
            .await
            .map_err(|e| AgentError::Reasoner {
                message: e.to_string(),
            })?;
        Ok(response.completion)
    }
}

/// A parsed reasoner step. Anything that is not exactly one of these is rejected.
#[derive(Debug, Clone, PartialEq)]
pub enum ReasonerStep {
    Act {
        thought: String,
        tool: String,
        args: Value,
    },
    Finalize {
        thought: String,
        answer: String,
    },
}

#[derive(Deserialize)]
struct RawStep {
    #[serde(default)]
    thought: String,
    #[serde(default)]
    action: Option<RawAction>,
    #[serde(default)]
    final_answer: Option<String>,
}

#[derive(Deserialize)]
struct RawAction {
    tool: String,
    #[serde(default)]
    args: Value,
}

impl ReasonerStep {
    pub fn parse(completion: &str) -> Result<Self, String> {
        let json = extract_json_from_completion(completion)?;
        let raw: RawStep =
            serde_json::from_str(json).map_err(|e| format!("Invalid step JSON: {}", e))?;

        match (raw.action, raw.final_answer) {
            (Some(_), Some(_)) => Err("Step has both an action and a final_answer".to_string()),
            (None, None) => Err("Step has neither an action nor a final_answer".to_string()),
            (Some(action), None) => {
                if action.tool.trim().is_empty() {
                    return Err("Action names no tool".to_string());
                }
                Ok(ReasonerStep::Act {
                    thought: raw.thought,
                    tool: action.tool.trim().to_string(),
                    args: action.args,
                })
            }
            (None, Some(answer)) => {
                if answer.trim().is_empty() {
                    return Err("final_answer is empty".to_string());
                }
                Ok(ReasonerStep::Finalize {
                    thought: raw.thought,
                    answer,
                })
            }
        }
    }
}

/// One tool invocation chosen by the reasoner.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolCall {
    pub tool: String,
    pub args: Value,
    pub invoked_at: DateTime<Utc>,
}

/// A tool call paired with what it returned.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallLogEntry {
    pub call: ToolCall,
    pub observation: Observation,
}

/// How an attempt's reasoning ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// The reasoner finalized on its own.
    Done,
    /// The turn cap forced a finalize.
    MaxTurnsReached,
    /// Too many consecutive tool failures forced a finalize.
    ToolErrorLimit,
    /// The reasoner itself failed; the answer was assembled from evidence.
    ReasonerFailed,
}

impl Termination {
    pub fn as_str(&self) -> &'static str {
        match self {
            Termination::Done => "done",
            Termination::MaxTurnsReached => "max_turns_reached",
            Termination::ToolErrorLimit => "tool_error_limit",
            Termination::ReasonerFailed => "reasoner_failed",
        }
    }
}

impl std::fmt::Display for Termination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Output of one pass of the reasoning loop.
#[derive(Debug, Clone, PartialEq)]
pub struct DraftAnswer {
    pub text: String,
    pub termination: Termination,
    pub low_confidence: bool,
    pub call_log: Vec<CallLogEntry>,
    pub turns: u32,
}

impl DraftAnswer {
    pub fn has_evidence(&self) -> bool {
        has_evidence(&self.call_log)
    }
}

fn has_evidence(call_log: &[CallLogEntry]) -> bool {
    call_log.iter().any(|entry| !entry.observation.is_empty())
}

/// Bounds on a single attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopLimits {
    pub max_turns: u32,
    pub max_consecutive_tool_errors: u32,
}

impl From<&AgentConfig> for LoopLimits {
    fn from(config: &AgentConfig) -> Self {
        Self {
            max_turns: config.max_turns,
            max_consecutive_tool_errors: config.max_consecutive_tool_errors,
        }
    }
}

enum LoopState {
    Thinking,
    Acting(ToolCall),
    Observing(CallLogEntry),
    Finalizing(Termination),
}

/// Bounded Thought → Action → Observation state machine.
///
/// Exactly one tool call happens per acting step, in order. Tool failures
/// become empty observations with an error note; the loop keeps going until
/// the reasoner finalizes, the turn cap is hit, or too many calls in a row fail.
#[derive(Clone)]
pub struct ReasoningLoop {
    registry: Arc<ToolRegistry>,
    reasoner: Arc<dyn Reasoner>,
    limits: LoopLimits,
}

impl ReasoningLoop {
    pub fn new(registry: Arc<ToolRegistry>, reasoner: Arc<dyn Reasoner>, limits: LoopLimits) -> Self {
        Self {
            registry,
            reasoner,
            limits,
        }
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Run one attempt. Never fails: the worst outcome is a low-confidence draft.
    pub async fn run(&self, input: &AttemptInput<'_>, tracer: &mut SessionTracer) -> DraftAnswer {
        let mut transcript = vec![Message::user(self.opening_prompt(input))];
        let mut call_log: Vec<CallLogEntry> = Vec::new();
        let mut turns = 0u32;
        let mut consecutive_errors = 0u32;
        let mut state = LoopState::Thinking;

        loop {
            state = match state {
                LoopState::Thinking => {
                    if turns >= self.limits.max_turns {
                        LoopState::Finalizing(Termination::MaxTurnsReached)
                    } else {
                        turns += 1;
                        match self.reasoner.next_step(&transcript).await {
                            Err(e) => {
                                warn!(attempt = input.attempt, turn = turns, error = %e, "Reasoner call failed");
                                tracer.record_step(turns, "", None, "", Some(&e.to_string()));
                                LoopState::Finalizing(Termination::ReasonerFailed)
                            }
                            Ok(raw) => {
                                transcript.push(Message::assistant(raw.as_str()));
                                match ReasonerStep::parse(&raw) {
                                    Err(reason) => {
                                        warn!(attempt = input.attempt, turn = turns, reason = %reason, "Rejected reasoner output");
                                        tracer.record_step(turns, "", None, &raw, Some(&reason));
                                        transcript.push(Message::user(format!(
                                            "Your reply could not be used: {}. Respond with exactly one JSON object \
                                             containing either \"action\" or \"final_answer\".",
                                            reason
                                        )));
                                        LoopState::Thinking
                                    }
                                    Ok(ReasonerStep::Act { thought, tool, args }) => {
                                        debug!(attempt = input.attempt, turn = turns, tool = %tool, "Reasoner chose tool");
                                        tracer.record_step(turns, &thought, Some(tool.clone()), &raw, None);
                                        LoopState::Acting(ToolCall {
                                            tool,
                                            args,
                                            invoked_at: Utc::now(),
                                        })
                                    }
                                    Ok(ReasonerStep::Finalize { thought, answer }) => {
                                        let evidence = has_evidence(&call_log);
                                        if !evidence && turns < self.limits.max_turns {
                                            tracer.record_step(
                                                turns,
                                                &thought,
                                                None,
                                                &raw,
                                                Some("finalize rejected: no evidence gathered"),
                                            );
                                            transcript.push(Message::user(NO_EVIDENCE_INSTRUCTION));
                                            LoopState::Thinking
                                        } else {
                                            tracer.record_step(
                                                turns,
                                                &thought,
                                                Some("final_answer".to_string()),
                                                &raw,
                                                None,
                                            );
                                            info!(
                                                attempt = input.attempt,
                                                turns,
                                                tool_calls = call_log.len(),
                                                "Reasoning finished"
                                            );
                                            return DraftAnswer {
                                                text: answer,
                                                termination: Termination::Done,
                                                low_confidence: !evidence,
                                                call_log,
                                                turns,
                                            };
                                        }
                                    }
                                }
                            }
                        }
                    }
                }
                LoopState::Acting(call) => {
                    let started = Instant::now();
                    let observation = match self
                        .registry
                        .invoke(&call.tool, &call.args, input.breadth)
                        .await
                    {
                        Ok(observation) => {
                            consecutive_errors = 0;
                            observation
                        }
                        Err(e) => {
                            consecutive_errors += 1;
                            warn!(
                                attempt = input.attempt,
                                tool = %call.tool,
                                error = %e,
                                consecutive_errors,
                                "Tool call failed"
                            );
                            Observation::failed(e.to_string())
                        }
                    };
                    tracer.record_tool_call(&call.tool, &call.args, &observation, started.elapsed());
                    LoopState::Observing(CallLogEntry { call, observation })
                }
                LoopState::Observing(entry) => {
                    transcript.push(Message::user(render_observation(&entry)));
                    call_log.push(entry);
                    if consecutive_errors >= self.limits.max_consecutive_tool_errors {
                        LoopState::Finalizing(Termination::ToolErrorLimit)
                    } else {
                        LoopState::Thinking
                    }
                }
                LoopState::Finalizing(termination) => {
                    return self
                        .force_finalize(termination, transcript, call_log, turns, tracer)
                        .await;
                }
            };
        }
    }

    /// One last reasoner call asking for an answer; falls back to the evidence itself.
    async fn force_finalize(
        &self,
        termination: Termination,
        mut transcript: Vec<Message>,
        call_log: Vec<CallLogEntry>,
        turns: u32,
        tracer: &mut SessionTracer,
    ) -> DraftAnswer {
        let evidence = has_evidence(&call_log);
        info!(termination = %termination, turns, evidence, "Forcing finalize");

        let mut answer = None;
        if termination != Termination::ReasonerFailed {
            transcript.push(Message::user(FINALIZE_INSTRUCTION));
            match self.reasoner.next_step(&transcript).await {
                Ok(raw) => match ReasonerStep::parse(&raw) {
                    Ok(ReasonerStep::Finalize { thought, answer: text }) => {
                        tracer.record_step(
                            turns + 1,
                            &thought,
                            Some("final_answer".to_string()),
                            &raw,
                            Some("forced finalize"),
                        );
                        answer = Some(text);
                    }
                    _ => {
                        tracer.record_step(turns + 1, "", None, &raw, Some("forced finalize output unusable"));
                    }
                },
                Err(e) => {
                    warn!(error = %e, "Reasoner failed during forced finalize");
                    tracer.record_step(turns + 1, "", None, "", Some(&e.to_string()));
                }
            }
        }

        let low_confidence = !evidence
            || matches!(
                termination,
                Termination::ToolErrorLimit | Termination::ReasonerFailed
            );

        DraftAnswer {
            text: answer.unwrap_or_else(|| fallback_answer(&call_log)),
            termination,
            low_confidence,
            call_log,
            turns,
        }
    }

    fn opening_prompt(&self, input: &AttemptInput<'_>) -> String {
        let tools = serde_json::to_string_pretty(&self.registry.descriptors()).unwrap_or_default();
        let mut sections = vec![format!("TOOLS:\n{}", tools)];
        if let Some(context) = input.query.context.render() {
            sections.push(format!("CONTEXT:\n{}", context));
        }
        sections.push(format!(
            "Each tool call returns at most {} results. You have {} steps.",
            input.breadth, self.limits.max_turns
        ));
        sections.push(format!("QUESTION:\n{}", input.question_text()));
        sections.join("\n\n")
    }
}

fn render_observation(entry: &CallLogEntry) -> String {
    let observation = &entry.observation;
    let mut out = format!("OBSERVATION from {}:", entry.call.tool);
    if let Some(error) = &observation.error {
        out.push_str(&format!("\nThe call failed: {}", error));
    } else if observation.is_empty() {
        out.push_str("\n(no results)");
    }
    for (i, item) in observation.items.iter().enumerate() {
        out.push_str(&format!(
            "\n{}. [{}] {}",
            i + 1,
            item.source_locator,
            truncate_chars(&item.text, MAX_OBSERVATION_CHARS)
        ));
    }
    if let Some(note) = &observation.note {
        out.push_str(&format!("\nNote: {}", note));
    }
    out
}

/// Answer assembled without the reasoner: the top evidence, or a refusal.
fn fallback_answer(call_log: &[CallLogEntry]) -> String {
    let lines: Vec<String> = call_log
        .iter()
        .flat_map(|entry| entry.observation.items.iter())
        .take(3)
        .map(|item| format!("- {} [{}]", truncate_chars(&item.text, MAX_OBSERVATION_CHARS), item.source_locator))
        .collect();

    if lines.is_empty() {
        REFUSAL_ANSWER.to_string()
    } else {
        format!("Based on the retrieved evidence:\n{}", lines.join("\n"))
    }
}
