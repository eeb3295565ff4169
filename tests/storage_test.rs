//! Integration tests for the trace stores
//!
//! Each test gets its own temporary directory so SQLite files and JSON trace
//! files never leak between runs.

use chrono::{TimeZone, Utc};
use serde_json::json;
use std::time::Duration;
use tempfile::TempDir;

use graded_retrieval::agent::{DimensionScores, GradingResult, QuestionType};
use graded_retrieval::config::{GradingThresholds, TraceBackend, TraceConfig};
use graded_retrieval::error::StorageError;
use graded_retrieval::storage::{open_trace_store, JsonFileTraceStore, SqliteTraceStore, TraceStore};
use graded_retrieval::tools::{EvidenceItem, Observation};
use graded_retrieval::trace::{SessionTracer, TraceDocument, TraceRunConfig};

fn sample_trace(trace_id: &str, query: &str, passed: bool, minute: u32) -> TraceDocument {
    let mut tracer = SessionTracer::new(query, TraceRunConfig::default()).with_session_id("session-1");
    tracer.begin_attempt(1, 3, query);
    tracer.record_tool_call(
        "search_memory",
        &json!({"query": query}),
        &Observation::new(vec![EvidenceItem {
            text: "The keeper lit the lamp at dusk.".to_string(),
            source_locator: "ch1:p4".to_string(),
            score: 0.5,
        }]),
        Duration::from_millis(12),
    );
    tracer.record_draft("The keeper lit the lamp [ch1:p4].", "done", false);
    let grading = GradingResult::evaluate(
        QuestionType::Fact,
        DimensionScores {
            tool_usage: 18,
            grounding: 16,
            completeness: 16,
            citation: 12,
            depth: 14,
        },
        76,
        &GradingThresholds::default(),
        "grounded",
        "",
    );
    tracer.record_grading(query, "The keeper lit the lamp [ch1:p4].", 1, &grading, Duration::from_millis(5));

    let mut doc = tracer.finish("The keeper lit the lamp [ch1:p4].", passed, !passed, false);
    doc.trace_id = trace_id.to_string();
    doc.created_at = Utc.with_ymd_and_hms(2025, 6, 1, 12, minute, 0).unwrap();
    doc
}

async fn sqlite_store(dir: &TempDir) -> SqliteTraceStore {
    SqliteTraceStore::new(&dir.path().join("nested").join("traces.db"), 1)
        .await
        .expect("Failed to open sqlite trace store")
}

#[cfg(test)]
mod sqlite_tests {
    use super::*;

    #[tokio::test]
    async fn test_save_and_get() {
        let dir = TempDir::new().unwrap();
        let store = sqlite_store(&dir).await;

        let trace = sample_trace("20250601-120000-aaaaaa", "Who lit the lamp?", true, 0);
        store.save(&trace).await.unwrap();

        let loaded = store.get(&trace.trace_id).await.unwrap();
        assert_eq!(loaded, trace);
        assert_eq!(loaded.session_id.as_deref(), Some("session-1"));
        assert_eq!(loaded.attempts[0].tool_calls[0].results_count, 1);
    }

    #[tokio::test]
    async fn test_missing_trace() {
        let dir = TempDir::new().unwrap();
        let store = sqlite_store(&dir).await;

        let err = store.get("20250601-120000-ffffff").await.unwrap_err();
        assert!(matches!(err, StorageError::TraceNotFound { ref trace_id } if trace_id == "20250601-120000-ffffff"));
    }

    #[tokio::test]
    async fn test_save_replaces_existing_trace() {
        let dir = TempDir::new().unwrap();
        let store = sqlite_store(&dir).await;

        let first = sample_trace("20250601-120000-bbbbbb", "Who lit the lamp?", false, 0);
        store.save(&first).await.unwrap();

        let mut second = first.clone();
        second.passed = true;
        second.final_response = "Revised".to_string();
        store.save(&second).await.unwrap();

        let loaded = store.get(&first.trace_id).await.unwrap();
        assert!(loaded.passed);
        assert_eq!(loaded.final_response, "Revised");
        assert_eq!(store.list_recent(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_list_recent_orders_newest_first() {
        let dir = TempDir::new().unwrap();
        let store = sqlite_store(&dir).await;

        for (i, minute) in [5u32, 30, 15].iter().enumerate() {
            let trace = sample_trace(
                &format!("20250601-12{:02}00-00000{}", minute, i),
                &format!("question {}", i),
                i % 2 == 0,
                *minute,
            );
            store.save(&trace).await.unwrap();
        }

        let summaries = store.list_recent(2).await.unwrap();
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].query, "question 1");
        assert_eq!(summaries[1].query, "question 2");
        assert_eq!(summaries[0].attempts, 1);
        assert!(!summaries[0].passed);
    }

    #[tokio::test]
    async fn test_data_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let trace = sample_trace("20250601-120000-cccccc", "Who lit the lamp?", true, 0);
        {
            let store = sqlite_store(&dir).await;
            store.save(&trace).await.unwrap();
        }

        let reopened = sqlite_store(&dir).await;
        assert_eq!(reopened.get(&trace.trace_id).await.unwrap().query, "Who lit the lamp?");
    }
}

#[cfg(test)]
mod json_tests {
    use super::*;

    #[tokio::test]
    async fn test_save_writes_one_file_per_trace() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileTraceStore::new(dir.path().join("traces"));

        let trace = sample_trace("20250601-120000-dddddd", "Who lit the lamp?", true, 0);
        store.save(&trace).await.unwrap();

        let path = store.dir().join("20250601-120000-dddddd.json");
        let raw = std::fs::read_to_string(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["trace_id"], "20250601-120000-dddddd");
        assert_eq!(value["attempts"][0]["breadth"], 3);

        assert_eq!(store.get(&trace.trace_id).await.unwrap(), trace);
    }

    #[tokio::test]
    async fn test_invalid_id_is_rejected() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileTraceStore::new(dir.path());

        let trace = sample_trace("../escape", "q", true, 0);
        assert!(matches!(store.save(&trace).await, Err(StorageError::Query { .. })));
        assert!(matches!(
            store.get("../escape").await,
            Err(StorageError::TraceNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_list_recent_skips_unreadable_files() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileTraceStore::new(dir.path());

        store
            .save(&sample_trace("20250601-120100-000001", "older", true, 1))
            .await
            .unwrap();
        store
            .save(&sample_trace("20250601-124500-000002", "newer", false, 45))
            .await
            .unwrap();
        std::fs::write(dir.path().join("broken.json"), "{ not json").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let summaries = store.list_recent(10).await.unwrap();
        let queries: Vec<_> = summaries.iter().map(|s| s.query.as_str()).collect();
        assert_eq!(queries, vec!["newer", "older"]);
    }
}

#[cfg(test)]
mod backend_selection_tests {
    use super::*;

    fn trace_config(backend: TraceBackend, dir: &TempDir) -> TraceConfig {
        TraceConfig {
            backend,
            database_path: dir.path().join("traces.db"),
            max_connections: 1,
            trace_dir: dir.path().join("json"),
        }
    }

    #[tokio::test]
    async fn test_open_each_backend() {
        let trace = sample_trace("20250601-120000-eeeeee", "Who lit the lamp?", true, 0);

        let dir = TempDir::new().unwrap();
        let sqlite = open_trace_store(&trace_config(TraceBackend::Sqlite, &dir)).await.unwrap();
        sqlite.save(&trace).await.unwrap();
        assert!(dir.path().join("traces.db").exists());
        assert_eq!(sqlite.list_recent(5).await.unwrap().len(), 1);

        let dir = TempDir::new().unwrap();
        let json = open_trace_store(&trace_config(TraceBackend::Json, &dir)).await.unwrap();
        json.save(&trace).await.unwrap();
        assert!(dir.path().join("json").join("20250601-120000-eeeeee.json").exists());

        let dir = TempDir::new().unwrap();
        let none = open_trace_store(&trace_config(TraceBackend::None, &dir)).await.unwrap();
        none.save(&trace).await.unwrap();
        assert!(matches!(
            none.get(&trace.trace_id).await,
            Err(StorageError::TraceNotFound { .. })
        ));
    }
}
