//! # Graded Retrieval
//!
//! A quality-gated retrieval agent. A reasoning loop answers questions by
//! calling a fixed set of knowledge-base tools; every draft is scored by an
//! LLM grader against a five-dimension rubric, and failed drafts are retried
//! with refined search strings and wider result breadth.
//!
//! ## Architecture
//!
//! ```text
//! MCP Client / CLI → RetryController → ReasoningLoop ↔ ToolRegistry → Knowledge API (HTTP)
//!                          ↓                 ↓
//!                   Grader / Refiner    Langbase Pipes (HTTP)
//!                          ↓
//!                   SessionTracer → TraceStore (SQLite | JSON files)
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use graded_retrieval::agent::{Query, RetryController};
//! use graded_retrieval::langbase::LangbaseClient;
//! use graded_retrieval::storage::open_trace_store;
//! use graded_retrieval::tools::{HttpKnowledgeSource, ToolRegistry};
//! use graded_retrieval::Config;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let langbase = LangbaseClient::new(&config.langbase, config.request.clone())?;
//!     let source = HttpKnowledgeSource::new(&config.retrieval)?;
//!     let registry = Arc::new(ToolRegistry::with_builtin_tools(Arc::new(source)));
//!     let store = open_trace_store(&config.trace).await?;
//!     let controller = RetryController::from_config(&config, Arc::new(langbase), registry, store)?;
//!
//!     let outcome = controller.run(&Query::standalone("Where was Ana born?")).await;
//!     println!("{}", outcome.answer);
//!     Ok(())
//! }
//! ```

/// Reasoning loop, grader, refiner and retry controller.
pub mod agent;
/// Configuration management.
pub mod config;
/// Error types and result aliases for the application.
pub mod error;
/// Langbase API client and types for pipe communication.
pub mod langbase;
/// System prompts for Langbase pipes.
pub mod prompts;
/// MCP server implementation and request handling.
pub mod server;
/// Trace persistence backends.
pub mod storage;
/// Retrieval tools and their registry.
pub mod tools;
/// Structured execution traces.
pub mod trace;

pub use agent::{Query, RetryController, SessionContext, SessionOutcome};
pub use config::Config;
pub use error::{AppError, AppResult};
pub use server::{AppState, McpServer, SharedState};
