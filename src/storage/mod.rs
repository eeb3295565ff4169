//! Trace persistence.
//!
//! Finished [`TraceDocument`]s are written once per session through a
//! [`TraceStore`]. Backends: SQLite (default), one JSON file per trace, or
//! nothing at all.

mod json;
mod sqlite;

pub use json::JsonFileTraceStore;
pub use sqlite::SqliteTraceStore;

use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use crate::config::{TraceBackend, TraceConfig};
use crate::error::{StorageError, StorageResult};
use crate::trace::{TraceDocument, TraceSummary};

/// Storage backend for session traces.
#[async_trait]
pub trait TraceStore: Send + Sync {
    /// Insert or replace a trace.
    async fn save(&self, trace: &TraceDocument) -> StorageResult<()>;

    /// Load one trace; [`StorageError::TraceNotFound`] if absent.
    async fn get(&self, trace_id: &str) -> StorageResult<TraceDocument>;

    /// Most recent traces first.
    async fn list_recent(&self, limit: usize) -> StorageResult<Vec<TraceSummary>>;
}

/// Discards every trace.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTraceStore;

#[async_trait]
impl TraceStore for NoopTraceStore {
    async fn save(&self, _trace: &TraceDocument) -> StorageResult<()> {
        Ok(())
    }

    async fn get(&self, trace_id: &str) -> StorageResult<TraceDocument> {
        Err(StorageError::TraceNotFound {
            trace_id: trace_id.to_string(),
        })
    }

    async fn list_recent(&self, _limit: usize) -> StorageResult<Vec<TraceSummary>> {
        Ok(Vec::new())
    }
}

/// Open the backend selected by `config`.
pub async fn open_trace_store(config: &TraceConfig) -> StorageResult<Arc<dyn TraceStore>> {
    let store: Arc<dyn TraceStore> = match config.backend {
        TraceBackend::Sqlite => Arc::new(SqliteTraceStore::new(&config.database_path, config.max_connections).await?),
        TraceBackend::Json => Arc::new(JsonFileTraceStore::new(&config.trace_dir)),
        TraceBackend::None => Arc::new(NoopTraceStore),
    };
    info!(backend = ?config.backend, "Trace store ready");
    Ok(store)
}
