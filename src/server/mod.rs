//! Server module for MCP protocol handling.
//!
//! This module provides:
//! - MCP server implementation over stdio
//! - Tool call handlers and routing
//! - Shared application state, including per-session conversation context

mod handlers;
mod mcp;

pub use handlers::*;
pub use mcp::*;

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::agent::{RetryController, SessionContext};
use crate::storage::TraceStore;

/// Default number of sessions whose context is kept in memory.
pub const DEFAULT_SESSION_CAPACITY: usize = 1024;

/// Application state shared across handlers.
pub struct AppState {
    /// Orchestrator that answers questions.
    pub controller: Arc<RetryController>,
    /// Where finished traces are read back from.
    pub traces: Arc<dyn TraceStore>,
    sessions: RwLock<SessionMemory>,
}

/// Latest context per session id, bounded. The least recently answered
/// session is evicted first.
struct SessionMemory {
    capacity: usize,
    contexts: HashMap<String, SessionContext>,
    recency: VecDeque<String>,
}

impl SessionMemory {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            contexts: HashMap::new(),
            recency: VecDeque::new(),
        }
    }

    fn insert(&mut self, context: SessionContext) {
        let id = context.session_id().to_string();
        if self.contexts.insert(id.clone(), context).is_some() {
            self.recency.retain(|existing| existing != &id);
        }
        self.recency.push_back(id);

        while self.contexts.len() > self.capacity {
            match self.recency.pop_front() {
                Some(oldest) => {
                    self.contexts.remove(&oldest);
                    debug!(session_id = %oldest, "Evicted session context");
                }
                None => break,
            }
        }
    }
}

impl AppState {
    /// Create new application state
    pub fn new(controller: Arc<RetryController>) -> Self {
        Self::with_session_capacity(controller, DEFAULT_SESSION_CAPACITY)
    }

    /// Create state that remembers at most `capacity` sessions.
    pub fn with_session_capacity(controller: Arc<RetryController>, capacity: usize) -> Self {
        let traces = Arc::clone(controller.trace_store());
        Self {
            controller,
            traces,
            sessions: RwLock::new(SessionMemory::new(capacity)),
        }
    }

    /// Context for `session_id`, or a new empty one.
    pub async fn session(&self, session_id: &str) -> SessionContext {
        self.sessions
            .read()
            .await
            .contexts
            .get(session_id)
            .cloned()
            .unwrap_or_else(|| SessionContext::new(session_id))
    }

    /// Store the context to use for the next turn of a session.
    pub async fn remember(&self, context: SessionContext) {
        self.sessions.write().await.insert(context);
    }

    /// Number of sessions with remembered context.
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.contexts.len()
    }
}

/// Shared application state handle
pub type SharedState = Arc<AppState>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{
        AgentParts, CallLogEntry, Grader, GradingResult, Reasoner, RefinementHint, Refiner,
    };
    use crate::config::{AgentConfig, GradingThresholds};
    use crate::error::{AgentError, RefinerError};
    use crate::langbase::Message;
    use crate::tools::ToolRegistry;
    use async_trait::async_trait;

    struct SilentReasoner;

    #[async_trait]
    impl Reasoner for SilentReasoner {
        async fn next_step(&self, _transcript: &[Message]) -> Result<String, AgentError> {
            Err(AgentError::Reasoner {
                message: "offline".to_string(),
            })
        }
    }

    struct FailingGrader;

    #[async_trait]
    impl Grader for FailingGrader {
        async fn grade(&self, _q: &str, _a: &str, _log: &[CallLogEntry]) -> GradingResult {
            GradingResult::automatic_fail("offline", &GradingThresholds::default())
        }
    }

    struct EmptyRefiner;

    #[async_trait]
    impl Refiner for EmptyRefiner {
        async fn refine(&self, _q: &str, _s: &str) -> Result<RefinementHint, RefinerError> {
            Err(RefinerError::Empty)
        }
    }

    fn create_test_controller() -> Arc<RetryController> {
        let parts = AgentParts {
            registry: Arc::new(ToolRegistry::new()),
            reasoner: Arc::new(SilentReasoner),
            grader: Arc::new(FailingGrader),
            refiner: Arc::new(EmptyRefiner),
        };
        let controller =
            RetryController::new(AgentConfig::default(), GradingThresholds::default(), parts)
                .unwrap();
        Arc::new(controller)
    }

    fn create_test_state() -> AppState {
        AppState::new(create_test_controller())
    }

    #[tokio::test]
    async fn test_unknown_session_starts_empty() {
        let state = create_test_state();
        let context = state.session("s-1").await;

        assert_eq!(context.session_id(), "s-1");
        assert!(context.history().is_empty());
        assert_eq!(state.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_remember_replaces_session_context() {
        let state = create_test_state();
        let first = state.session("s-1").await.with_turn("Who is Ana?", "A pilot.");
        state.remember(first).await;

        let second = state
            .session("s-1")
            .await
            .with_turn("Where does she live?", "Lisbon.");
        state.remember(second).await;

        let context = state.session("s-1").await;
        assert_eq!(context.history().len(), 2);
        assert_eq!(state.session_count().await, 1);
    }

    #[tokio::test]
    async fn test_session_memory_evicts_least_recent() {
        let state = AppState::with_session_capacity(create_test_controller(), 2);
        state.remember(state.session("a").await.with_turn("q1", "a1")).await;
        state.remember(state.session("b").await.with_turn("q2", "a2")).await;
        // Answering "a" again makes "b" the oldest.
        state.remember(state.session("a").await.with_turn("q3", "a3")).await;
        state.remember(state.session("c").await.with_turn("q4", "a4")).await;

        assert_eq!(state.session_count().await, 2);
        assert_eq!(state.session("a").await.history().len(), 2);
        assert!(state.session("b").await.history().is_empty());
        assert_eq!(state.session("c").await.history().len(), 1);
    }

    #[tokio::test]
    async fn test_shared_state_type() {
        let shared: SharedState = Arc::new(create_test_state());
        let shared2 = Arc::clone(&shared);
        assert_eq!(Arc::strong_count(&shared), 2);
        drop(shared2);
        assert_eq!(Arc::strong_count(&shared), 1);
    }
}
