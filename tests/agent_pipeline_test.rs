//! End-to-end tests of the retry controller over real HTTP clients.
//!
//! Langbase pipes and the knowledge service are both served by wiremock, so the
//! whole path (reasoner pipe, tool registry, grader pipe, refiner pipe, trace
//! store) runs exactly as in production.

use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;
use wiremock::{
    matchers::{body_partial_json, method, path},
    Mock, MockServer, ResponseTemplate,
};

use graded_retrieval::agent::{Query, RetryController, SessionContext, Termination};
use graded_retrieval::config::{
    AgentConfig, Config, GradingThresholds, LangbaseConfig, LogFormat, LoggingConfig, PipeConfig,
    RequestConfig, RetrievalConfig, TraceBackend, TraceConfig,
};
use graded_retrieval::langbase::LangbaseClient;
use graded_retrieval::storage::{JsonFileTraceStore, TraceStore};
use graded_retrieval::tools::{HttpKnowledgeSource, ToolRegistry};

fn create_config(langbase_url: &str, knowledge_url: &str, trace_dir: &TempDir) -> Config {
    Config {
        langbase: LangbaseConfig {
            api_key: "test-api-key".to_string(),
            base_url: langbase_url.to_string(),
        },
        request: RequestConfig {
            timeout_ms: 2000,
            max_retries: 0,
            retry_delay_ms: 10,
        },
        pipes: PipeConfig::default(),
        retrieval: RetrievalConfig {
            base_url: knowledge_url.to_string(),
            timeout_ms: 2000,
        },
        agent: AgentConfig::default(),
        grading: GradingThresholds::default(),
        trace: TraceConfig {
            backend: TraceBackend::Json,
            database_path: trace_dir.path().join("unused.db"),
            max_connections: 1,
            trace_dir: trace_dir.path().to_path_buf(),
        },
        logging: LoggingConfig {
            level: "debug".to_string(),
            format: LogFormat::Pretty,
        },
    }
}

fn completion(text: impl Into<String>) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "success": true,
        "completion": text.into(),
        "threadId": null
    }))
}

fn search_step(query: &str) -> String {
    json!({
        "thought": "Look for passages first.",
        "action": {"tool": "search_memory", "args": {"query": query}}
    })
    .to_string()
}

fn final_step(answer: &str) -> String {
    json!({"thought": "Enough evidence.", "final_answer": answer}).to_string()
}

fn grade(scores: [u32; 5], reason: &str, suggestion: &str) -> String {
    let [tool_usage, grounding, completeness, citation, depth] = scores;
    json!({
        "question_type": "fact",
        "scores": {
            "tool_usage": tool_usage,
            "grounding": grounding,
            "completeness": completeness,
            "citation": citation,
            "depth": depth
        },
        "score": tool_usage + grounding + completeness + citation + depth,
        "reason": reason,
        "suggestion": suggestion
    })
    .to_string()
}

async fn mount_pipe_once(server: &MockServer, pipe: &str, body: String) {
    Mock::given(method("POST"))
        .and(path("/v1/pipes/run"))
        .and(body_partial_json(json!({ "name": pipe })))
        .respond_with(completion(body))
        .up_to_n_times(1)
        .mount(server)
        .await;
}

fn passages(texts: &[&str]) -> Value {
    let items: Vec<Value> = texts
        .iter()
        .enumerate()
        .map(|(i, text)| json!({"text": text, "source_locator": format!("ch2:p{}", i), "score": 0.9}))
        .collect();
    json!({ "items": items })
}

async fn build_controller(config: &Config) -> RetryController {
    let langbase = LangbaseClient::new(&config.langbase, config.request.clone()).unwrap();
    let source = HttpKnowledgeSource::new(&config.retrieval).unwrap();
    let registry = Arc::new(ToolRegistry::with_builtin_tools(Arc::new(source)));
    let store = Arc::new(JsonFileTraceStore::new(&config.trace.trace_dir));
    RetryController::from_config(config, Arc::new(langbase), registry, store).unwrap()
}

#[tokio::test]
async fn test_failed_attempt_is_refined_and_retried_with_wider_breadth() {
    let langbase = MockServer::start().await;
    let knowledge = MockServer::start().await;
    let trace_dir = TempDir::new().unwrap();
    let config = create_config(&langbase.uri(), &knowledge.uri(), &trace_dir);
    let pipes = config.pipes.clone();

    // Attempt 1: one search at breadth 3, shallow answer.
    mount_pipe_once(&langbase, &pipes.reasoner, search_step("Ana birthplace")).await;
    mount_pipe_once(&langbase, &pipes.reasoner, final_step("Ana was born on the coast.")).await;
    // Attempt 2: refined search at breadth 5, grounded answer.
    mount_pipe_once(&langbase, &pipes.reasoner, search_step("Ana childhood village")).await;
    mount_pipe_once(
        &langbase,
        &pipes.reasoner,
        final_step("Ana was born in Porto Velho, the fishing village in chapter 2 [ch2:p0]."),
    )
    .await;

    mount_pipe_once(
        &langbase,
        &pipes.grader,
        grade([16, 18, 16, 15, 5], "Too shallow", "Name the village and cite the passage."),
    )
    .await;
    mount_pipe_once(
        &langbase,
        &pipes.grader,
        grade([18, 18, 16, 15, 14], "Grounded and cited", "None"),
    )
    .await;
    mount_pipe_once(
        &langbase,
        &pipes.refiner,
        json!(["Ana childhood village", "Ana birthplace chapter 2"]).to_string(),
    )
    .await;

    Mock::given(method("POST"))
        .and(path("/v1/passages/search"))
        .and(body_partial_json(json!({"limit": 3})))
        .respond_with(ResponseTemplate::new(200).set_body_json(passages(&["She grew up by the sea."])))
        .expect(1)
        .mount(&knowledge)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/passages/search"))
        .and(body_partial_json(json!({"limit": 5})))
        .respond_with(ResponseTemplate::new(200).set_body_json(passages(&[
            "Porto Velho, where Ana was born, smelled of salt.",
            "The village of Porto Velho lay at the river mouth.",
        ])))
        .expect(1)
        .mount(&knowledge)
        .await;

    let controller = build_controller(&config).await;
    let query = Query::new(
        "Where was Ana born?",
        SessionContext::new("session-e2e").with_topic("Ana's early life"),
    );
    let outcome = controller.run(&query).await;

    assert!(outcome.passed);
    assert!(!outcome.best_effort);
    assert!(outcome.answer.contains("Porto Velho"));
    assert_eq!(outcome.attempts.len(), 2);
    assert_eq!(outcome.attempts[0].breadth, 3);
    assert!(!outcome.attempts[0].passed);
    assert_eq!(outcome.attempts[1].breadth, 5);
    assert_eq!(outcome.attempts[1].termination, Termination::Done);
    assert_eq!(outcome.grading.as_ref().unwrap().aggregate, 81);

    let store = JsonFileTraceStore::new(trace_dir.path());
    let trace = store.get(&outcome.trace_id).await.unwrap();
    assert_eq!(trace.session_id.as_deref(), Some("session-e2e"));
    assert_eq!(trace.attempts.len(), 2);
    assert_eq!(trace.attempts[0].query_text, "Where was Ana born?");
    assert!(trace.attempts[1].query_text.contains("[Retry 2/4]"));
    assert!(trace.attempts[1].query_text.contains("Ana childhood village"));
    assert_eq!(
        trace.attempts[0].refiner.as_ref().unwrap().queries,
        vec!["Ana childhood village", "Ana birthplace chapter 2"]
    );
    assert!(trace.passed);
}

#[tokio::test]
async fn test_grader_outage_fails_attempt_without_crashing() {
    let langbase = MockServer::start().await;
    let knowledge = MockServer::start().await;
    let trace_dir = TempDir::new().unwrap();
    let mut config = create_config(&langbase.uri(), &knowledge.uri(), &trace_dir);
    config.agent = config.agent.with_max_retries(0);
    let pipes = config.pipes.clone();

    mount_pipe_once(&langbase, &pipes.reasoner, search_step("Ana")).await;
    mount_pipe_once(&langbase, &pipes.reasoner, final_step("Ana is a pilot [ch2:p0].")).await;
    Mock::given(method("POST"))
        .and(path("/v1/pipes/run"))
        .and(body_partial_json(json!({ "name": pipes.grader })))
        .respond_with(ResponseTemplate::new(500).set_body_string("grader down"))
        .mount(&langbase)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/passages/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(passages(&["Ana flew the night mail."])))
        .mount(&knowledge)
        .await;

    let controller = build_controller(&config).await;
    let outcome = controller.run(&Query::standalone("What does Ana do?")).await;

    assert!(!outcome.passed);
    assert!(outcome.best_effort);
    assert_eq!(outcome.attempts_started, 1);
    assert_eq!(outcome.answer, "Ana is a pilot [ch2:p0].");
    let grading = outcome.grading.unwrap();
    assert_eq!(grading.aggregate, 0);
    assert!(!grading.suggestion.is_empty());
}

#[tokio::test]
async fn test_knowledge_service_errors_end_in_low_confidence_draft() {
    let langbase = MockServer::start().await;
    let knowledge = MockServer::start().await;
    let trace_dir = TempDir::new().unwrap();
    let mut config = create_config(&langbase.uri(), &knowledge.uri(), &trace_dir);
    config.agent = config.agent.with_max_retries(0);
    let pipes = config.pipes.clone();

    for _ in 0..3 {
        mount_pipe_once(&langbase, &pipes.reasoner, search_step("Ana")).await;
    }
    mount_pipe_once(
        &langbase,
        &pipes.reasoner,
        final_step("I could not verify anything about Ana."),
    )
    .await;
    mount_pipe_once(
        &langbase,
        &pipes.grader,
        grade([5, 0, 2, 0, 0], "No evidence", "Retrieve passages about Ana."),
    )
    .await;
    Mock::given(method("POST"))
        .and(path("/v1/passages/search"))
        .respond_with(ResponseTemplate::new(503).set_body_string("index rebuilding"))
        .expect(3)
        .mount(&knowledge)
        .await;

    let controller = build_controller(&config).await;
    let outcome = controller.run(&Query::standalone("Who is Ana?")).await;

    assert!(!outcome.passed);
    assert!(outcome.low_confidence);
    assert_eq!(outcome.attempts[0].termination, Termination::ToolErrorLimit);
    assert_eq!(outcome.attempts[0].tool_calls, 3);

    let trace = JsonFileTraceStore::new(trace_dir.path())
        .get(&outcome.trace_id)
        .await
        .unwrap();
    let calls = &trace.attempts[0].tool_calls;
    assert_eq!(calls.len(), 3);
    assert!(calls.iter().all(|c| c.error.is_some() && c.results_count == 0));
}
