use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

use super::TraceStore;
use crate::error::{StorageError, StorageResult};
use crate::trace::{TraceDocument, TraceSummary};

/// Static migrator that embeds migrations at compile time
static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// SQLite-backed trace store
#[derive(Clone)]
pub struct SqliteTraceStore {
    pool: SqlitePool,
}

impl SqliteTraceStore {
    /// Open (creating if needed) the database at `path` and run migrations.
    pub async fn new(path: &Path, max_connections: u32) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::Connection {
                message: format!("Failed to create database directory: {}", e),
            })?;
        }

        let database_url = format!("sqlite://{}?mode=rwc", path.display());

        let options = SqliteConnectOptions::from_str(&database_url)
            .map_err(|e| StorageError::Connection {
                message: format!("Invalid database URL: {}", e),
            })?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection {
                message: format!("Failed to connect to database: {}", e),
            })?;

        let store = Self { pool };
        store.run_migrations().await?;

        Ok(store)
    }

    async fn run_migrations(&self) -> StorageResult<()> {
        info!("Running database migrations...");

        MIGRATOR.run(&self.pool).await.map_err(|e| StorageError::Migration {
            message: format!("Failed to run migrations: {}", e),
        })?;

        info!("Database migrations completed successfully");
        Ok(())
    }

    /// Get the underlying pool for advanced queries
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl TraceStore for SqliteTraceStore {
    async fn save(&self, trace: &TraceDocument) -> StorageResult<()> {
        let document = serde_json::to_string(trace)?;

        sqlx::query(
            r#"
            INSERT INTO traces (trace_id, session_id, query, passed, attempts, total_duration_ms, created_at, document)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(trace_id) DO UPDATE SET
                session_id = excluded.session_id,
                query = excluded.query,
                passed = excluded.passed,
                attempts = excluded.attempts,
                total_duration_ms = excluded.total_duration_ms,
                created_at = excluded.created_at,
                document = excluded.document
            "#,
        )
        .bind(&trace.trace_id)
        .bind(&trace.session_id)
        .bind(&trace.query)
        .bind(trace.passed)
        .bind(trace.attempts.len() as i64)
        .bind(trace.total_duration_ms as i64)
        .bind(trace.created_at.to_rfc3339())
        .bind(&document)
        .execute(&self.pool)
        .await?;

        debug!(trace_id = %trace.trace_id, "Trace saved");
        Ok(())
    }

    async fn get(&self, trace_id: &str) -> StorageResult<TraceDocument> {
        let row: Option<(String,)> = sqlx::query_as(
            r#"
            SELECT document
            FROM traces
            WHERE trace_id = ?
            "#,
        )
        .bind(trace_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some((document,)) => Ok(serde_json::from_str(&document)?),
            None => Err(StorageError::TraceNotFound {
                trace_id: trace_id.to_string(),
            }),
        }
    }

    async fn list_recent(&self, limit: usize) -> StorageResult<Vec<TraceSummary>> {
        let rows: Vec<TraceSummaryRow> = sqlx::query_as(
            r#"
            SELECT trace_id, query, passed, attempts, total_duration_ms, created_at
            FROM traces
            ORDER BY created_at DESC, trace_id DESC
            LIMIT ?
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }
}

// Internal row type for SQLx mapping
#[derive(sqlx::FromRow)]
struct TraceSummaryRow {
    trace_id: String,
    query: String,
    passed: bool,
    attempts: i64,
    total_duration_ms: i64,
    created_at: String,
}

impl From<TraceSummaryRow> for TraceSummary {
    fn from(row: TraceSummaryRow) -> Self {
        Self {
            trace_id: row.trace_id,
            query: row.query,
            passed: row.passed,
            attempts: row.attempts.max(0) as usize,
            total_duration_ms: row.total_duration_ms.max(0) as u64,
            created_at: DateTime::parse_from_rfc3339(&row.created_at)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
        }
    }
}
