use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use super::SharedState;
use crate::agent::{Query, SessionContext, SessionOutcome};
use crate::error::{McpError, McpResult, StorageError};
use crate::tools::ToolDescriptor;
use crate::trace::TraceSummary;

/// Default number of summaries returned by `agent_trace_list`.
pub const DEFAULT_TRACE_LIST_LIMIT: usize = 20;
/// Upper bound on `agent_trace_list` page size.
pub const MAX_TRACE_LIST_LIMIT: usize = 200;

/// Route tool calls to appropriate handlers
pub async fn handle_tool_call(
    state: &SharedState,
    tool_name: &str,
    arguments: Option<Value>,
) -> McpResult<Value> {
    info!(tool = %tool_name, "Routing tool call");

    match tool_name {
        "agent_ask" => handle_ask(state, arguments).await,
        "agent_trace_get" => handle_trace_get(state, arguments).await,
        "agent_trace_list" => handle_trace_list(state, arguments).await,
        "agent_tools_list" => handle_tools_list(state).await,
        _ => Err(McpError::UnknownTool {
            tool_name: tool_name.to_string(),
        }),
    }
}

/// Parameters for `agent_ask`.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AskParams {
    /// The question to answer.
    pub question: String,
    /// Continue an earlier conversation. A new session is started when absent.
    pub session_id: Option<String>,
    /// Replaces the session topic for this and later turns.
    pub topic: Option<String>,
    /// Entities to push onto the session's focus stack.
    #[serde(default)]
    pub entities: Vec<String>,
}

/// Response for `agent_ask`.
#[derive(Debug, Clone, Serialize)]
pub struct AskResponse {
    pub session_id: String,
    #[serde(flatten)]
    pub outcome: SessionOutcome,
}

/// Parameters for `agent_trace_get`.
#[derive(Debug, Clone, Deserialize)]
pub struct TraceGetParams {
    pub trace_id: String,
}

/// Parameters for `agent_trace_list`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TraceListParams {
    pub limit: Option<usize>,
}

/// Response for `agent_trace_list`.
#[derive(Debug, Clone, Serialize)]
pub struct TraceListResponse {
    pub traces: Vec<TraceSummary>,
    pub count: usize,
}

/// Response for `agent_tools_list`.
#[derive(Debug, Clone, Serialize)]
pub struct ToolsListResponse {
    pub tools: Vec<ToolDescriptor>,
    pub count: usize,
}

/// Handle agent_ask tool call
async fn handle_ask(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    let params: AskParams = parse_arguments("agent_ask", arguments)?;
    if params.question.trim().is_empty() {
        return Err(McpError::InvalidParameters {
            tool_name: "agent_ask".to_string(),
            message: "question must not be empty".to_string(),
        });
    }

    let mut context = match &params.session_id {
        Some(id) => state.session(id).await,
        None => SessionContext::fresh(),
    };
    if let Some(topic) = &params.topic {
        context = context.with_topic(topic.as_str());
    }
    if !params.entities.is_empty() {
        context = context.with_entities(params.entities.iter().map(String::as_str));
    }

    info!(
        session_id = %context.session_id(),
        history = context.history().len(),
        "Answering question"
    );

    let query = Query::new(params.question.as_str(), context.clone());
    let outcome = state.controller.run(&query).await;

    state
        .remember(context.with_turn(params.question.as_str(), outcome.answer.as_str()))
        .await;

    let response = AskResponse {
        session_id: context.session_id().to_string(),
        outcome,
    };
    serde_json::to_value(response).map_err(McpError::Json)
}

/// Handle agent_trace_get tool call
async fn handle_trace_get(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    let params: TraceGetParams = parse_arguments("agent_trace_get", arguments)?;

    let trace = state
        .traces
        .get(&params.trace_id)
        .await
        .map_err(|e| match e {
            StorageError::TraceNotFound { trace_id } => McpError::InvalidParameters {
                tool_name: "agent_trace_get".to_string(),
                message: format!("Trace not found: {}", trace_id),
            },
            other => McpError::ExecutionFailed {
                message: other.to_string(),
            },
        })?;

    serde_json::to_value(trace).map_err(McpError::Json)
}

/// Handle agent_trace_list tool call
async fn handle_trace_list(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    let params: TraceListParams = match arguments {
        Some(args) => parse_arguments("agent_trace_list", Some(args))?,
        None => TraceListParams::default(),
    };
    let limit = params
        .limit
        .unwrap_or(DEFAULT_TRACE_LIST_LIMIT)
        .clamp(1, MAX_TRACE_LIST_LIMIT);

    let traces = state
        .traces
        .list_recent(limit)
        .await
        .map_err(|e| McpError::ExecutionFailed {
            message: e.to_string(),
        })?;

    let response = TraceListResponse {
        count: traces.len(),
        traces,
    };
    serde_json::to_value(response).map_err(McpError::Json)
}

/// Handle agent_tools_list tool call
async fn handle_tools_list(state: &SharedState) -> McpResult<Value> {
    let tools = state.controller.registry().descriptors();
    let response = ToolsListResponse {
        count: tools.len(),
        tools,
    };
    serde_json::to_value(response).map_err(McpError::Json)
}

/// Helper to parse arguments with consistent error handling
fn parse_arguments<T: serde::de::DeserializeOwned>(
    tool_name: &str,
    arguments: Option<Value>,
) -> McpResult<T> {
    match arguments {
        Some(args) => serde_json::from_value(args).map_err(|e| McpError::InvalidParameters {
            tool_name: tool_name.to_string(),
            message: e.to_string(),
        }),
        None => Err(McpError::InvalidParameters {
            tool_name: tool_name.to_string(),
            message: "Missing arguments".to_string(),
        }),
    }
}
