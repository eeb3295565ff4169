//! Unit tests for MCP protocol implementation.
//!
//! Tests JSON-RPC 2.0 request/response handling, tool definitions,
//! and dispatch into the agent handlers.

use super::*;
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;

use crate::agent::{
    AgentParts, CallLogEntry, Grader, GradingResult, Reasoner, RefinementHint, Refiner,
    RetryController, REFUSAL_ANSWER,
};
use crate::config::{AgentConfig, GradingThresholds};
use crate::error::{AgentError, RefinerError};
use crate::langbase::Message;
use crate::server::AppState;
use crate::tools::ToolRegistry;

struct OfflineReasoner;

#[async_trait]
impl Reasoner for OfflineReasoner {
    async fn next_step(&self, _transcript: &[Message]) -> Result<String, AgentError> {
        Err(AgentError::Reasoner {
            message: "pipe offline".to_string(),
        })
    }
}

struct FailingGrader;

#[async_trait]
impl Grader for FailingGrader {
    async fn grade(&self, _q: &str, _a: &str, _log: &[CallLogEntry]) -> GradingResult {
        GradingResult::automatic_fail("no evidence", &GradingThresholds::default())
    }
}

struct EmptyRefiner;

#[async_trait]
impl Refiner for EmptyRefiner {
    async fn refine(&self, _q: &str, _s: &str) -> Result<RefinementHint, RefinerError> {
        Err(RefinerError::Empty)
    }
}

fn create_test_server() -> McpServer {
    let parts = AgentParts {
        registry: Arc::new(ToolRegistry::new()),
        reasoner: Arc::new(OfflineReasoner),
        grader: Arc::new(FailingGrader),
        refiner: Arc::new(EmptyRefiner),
    };
    let config = AgentConfig::default().with_max_retries(0);
    let controller = RetryController::new(config, GradingThresholds::default(), parts).unwrap();
    McpServer::new(Arc::new(AppState::new(Arc::new(controller))))
}

fn tool_call_text(response: &JsonRpcResponse) -> String {
    response.result.as_ref().unwrap()["content"][0]["text"]
        .as_str()
        .unwrap()
        .to_string()
}

// ============================================================================
// JsonRpcResponse tests
// ============================================================================

#[test]
fn test_jsonrpc_response_success_with_id() {
    let response = JsonRpcResponse::success(Some(json!(1)), json!({"result": "ok"}));

    assert_eq!(response.jsonrpc, "2.0");
    assert_eq!(response.id, json!(1));
    assert!(response.error.is_none());
    assert_eq!(response.result.unwrap()["result"], "ok");
}

#[test]
fn test_jsonrpc_response_error_without_id() {
    let response = JsonRpcResponse::error(None, -32700, "Parse error");

    assert_eq!(response.id, Value::Null);
    assert!(response.result.is_none());
    assert_eq!(response.error.unwrap().code, -32700);
}

#[test]
fn test_jsonrpc_response_serialization_omits_error() {
    let response = JsonRpcResponse::success(Some(json!(1)), json!({"test": true}));
    let serialized = serde_json::to_string(&response).unwrap();

    assert!(serialized.contains("\"jsonrpc\":\"2.0\""));
    assert!(serialized.contains("\"result\""));
    assert!(!serialized.contains("\"error\""));
}

#[test]
fn test_jsonrpc_notification_has_no_id() {
    let request: JsonRpcRequest =
        serde_json::from_str(r#"{"jsonrpc":"2.0","method":"initialized"}"#).unwrap();

    assert!(request.id.is_none());
    assert!(request.params.is_none());
}

#[test]
fn test_tool_call_result_with_error_flag() {
    let result = ToolCallResult {
        content: vec![ToolResultContent {
            content_type: "text".to_string(),
            text: "Error: boom".to_string(),
        }],
        is_error: Some(true),
    };
    let value = serde_json::to_value(result).unwrap();

    assert_eq!(value["isError"], true);
    assert_eq!(value["content"][0]["type"], "text");
}

// ============================================================================
// Tool definitions
// ============================================================================

#[test]
fn test_tool_definitions_names() {
    let names: Vec<String> = tool_definitions().into_iter().map(|t| t.name).collect();
    assert_eq!(
        names,
        vec![
            "agent_ask",
            "agent_trace_get",
            "agent_trace_list",
            "agent_tools_list"
        ]
    );
}

#[test]
fn test_all_tools_have_object_schemas_without_extra_properties() {
    for tool in tool_definitions() {
        assert_eq!(tool.input_schema["type"], "object", "{}", tool.name);
        assert_eq!(
            tool.input_schema["additionalProperties"], false,
            "{}",
            tool.name
        );
        assert!(!tool.description.is_empty());
    }
}

#[test]
fn test_ask_tool_requires_question() {
    let tool = get_ask_tool();
    assert_eq!(tool.input_schema["required"], json!(["question"]));
    assert_eq!(tool.input_schema["properties"]["entities"]["type"], "array");
}

#[test]
fn test_tool_serialization_uses_input_schema_field_name() {
    let value = serde_json::to_value(get_trace_get_tool()).unwrap();
    assert!(value.get("inputSchema").is_some());
    assert!(value.get("input_schema").is_none());
}

// ============================================================================
// Request dispatch
// ============================================================================

#[tokio::test]
async fn test_initialize_reports_protocol_and_package() {
    let server = create_test_server();
    let response = server
        .handle_line(r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#)
        .await
        .unwrap();

    let result = response.result.unwrap();
    assert_eq!(result["protocolVersion"], PROTOCOL_VERSION);
    assert_eq!(result["serverInfo"]["name"], env!("CARGO_PKG_NAME"));
    assert_eq!(result["capabilities"]["tools"]["listChanged"], false);
}

#[tokio::test]
async fn test_notifications_get_no_response() {
    let server = create_test_server();
    assert!(server
        .handle_line(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#)
        .await
        .is_none());
    assert!(server
        .handle_line(r#"{"jsonrpc":"2.0","method":"something/else"}"#)
        .await
        .is_none());
    assert!(server.handle_line("   \n").await.is_none());
}

#[tokio::test]
async fn test_parse_error_and_unknown_method() {
    let server = create_test_server();

    let response = server.handle_line("{not json").await.unwrap();
    assert_eq!(response.error.unwrap().code, -32700);

    let response = server
        .handle_line(r#"{"jsonrpc":"2.0","id":3,"method":"resources/list"}"#)
        .await
        .unwrap();
    assert_eq!(response.id, json!(3));
    assert_eq!(response.error.unwrap().code, -32601);
}

#[tokio::test]
async fn test_tools_call_without_params() {
    let server = create_test_server();
    let response = server
        .handle_line(r#"{"jsonrpc":"2.0","id":4,"method":"tools/call"}"#)
        .await
        .unwrap();
    assert_eq!(response.error.unwrap().code, -32602);
}

#[tokio::test]
async fn test_unknown_tool_is_reported_as_tool_error() {
    let server = create_test_server();
    let response = server
        .handle_line(
            r#"{"jsonrpc":"2.0","id":5,"method":"tools/call","params":{"name":"reasoning_linear"}}"#,
        )
        .await
        .unwrap();

    assert_eq!(response.result.as_ref().unwrap()["isError"], true);
    assert!(tool_call_text(&response).contains("Unknown tool: reasoning_linear"));
}

#[tokio::test]
async fn test_agent_ask_returns_refusal_when_reasoner_is_down() {
    let server = create_test_server();
    let request = json!({
        "jsonrpc": "2.0",
        "id": 6,
        "method": "tools/call",
        "params": {
            "name": "agent_ask",
            "arguments": {"question": "Who is Ana?", "session_id": "s-1"}
        }
    });
    let response = server.handle_line(&request.to_string()).await.unwrap();

    assert!(response.result.as_ref().unwrap().get("isError").is_none());
    let outcome: Value = serde_json::from_str(&tool_call_text(&response)).unwrap();
    assert_eq!(outcome["session_id"], "s-1");
    assert_eq!(outcome["answer"], REFUSAL_ANSWER);
    assert_eq!(outcome["passed"], false);
    assert_eq!(outcome["attempts_started"], 1);
    assert_eq!(server.state.session_count().await, 1);
}

#[tokio::test]
async fn test_agent_ask_rejects_blank_question() {
    let server = create_test_server();
    let request = json!({
        "jsonrpc": "2.0",
        "id": 7,
        "method": "tools/call",
        "params": {"name": "agent_ask", "arguments": {"question": "  "}}
    });
    let response = server.handle_line(&request.to_string()).await.unwrap();

    assert_eq!(response.result.as_ref().unwrap()["isError"], true);
    assert!(tool_call_text(&response).contains("question must not be empty"));
}

#[tokio::test]
async fn test_trace_get_missing_trace() {
    let server = create_test_server();
    let request = json!({
        "jsonrpc": "2.0",
        "id": 8,
        "method": "tools/call",
        "params": {"name": "agent_trace_get", "arguments": {"trace_id": "20250101-000000-000000"}}
    });
    let response = server.handle_line(&request.to_string()).await.unwrap();

    assert_eq!(response.result.as_ref().unwrap()["isError"], true);
    assert!(tool_call_text(&response).contains("Trace not found"));
}

#[tokio::test]
async fn test_tools_list_and_trace_list_through_tool_calls() {
    let server = create_test_server();

    let request = json!({
        "jsonrpc": "2.0",
        "id": 9,
        "method": "tools/call",
        "params": {"name": "agent_tools_list", "arguments": {}}
    });
    let response = server.handle_line(&request.to_string()).await.unwrap();
    let body: Value = serde_json::from_str(&tool_call_text(&response)).unwrap();
    assert_eq!(body["count"], 0);

    let request = json!({
        "jsonrpc": "2.0",
        "id": 10,
        "method": "tools/call",
        "params": {"name": "agent_trace_list"}
    });
    let response = server.handle_line(&request.to_string()).await.unwrap();
    let body: Value = serde_json::from_str(&tool_call_text(&response)).unwrap();
    assert_eq!(body["traces"], json!([]));
}

#[tokio::test]
async fn test_serve_writes_one_line_per_request() {
    let server = create_test_server();
    let input = concat!(
        r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#,
        "\n",
        r#"{"jsonrpc":"2.0","method":"initialized"}"#,
        "\n",
        r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#,
        "\n"
    );
    let mut output = Vec::new();

    server
        .serve(tokio::io::BufReader::new(input.as_bytes()), &mut output)
        .await
        .unwrap();

    let text = String::from_utf8(output).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 2);
    let tools: Value = serde_json::from_str(lines[1]).unwrap();
    assert_eq!(tools["result"]["tools"].as_array().unwrap().len(), 4);
}
