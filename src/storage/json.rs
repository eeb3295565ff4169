use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::TraceStore;
use crate::error::{StorageError, StorageResult};
use crate::trace::{TraceDocument, TraceSummary};

/// Writes each trace to `{dir}/{trace_id}.json`, pretty-printed.
#[derive(Debug, Clone)]
pub struct JsonFileTraceStore {
    dir: PathBuf,
}

impl JsonFileTraceStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File path for a trace id, or `None` if the id could escape the directory.
    fn path_for(&self, trace_id: &str) -> Option<PathBuf> {
        let valid = !trace_id.is_empty()
            && trace_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        valid.then(|| self.dir.join(format!("{}.json", trace_id)))
    }
}

#[async_trait]
impl TraceStore for JsonFileTraceStore {
    async fn save(&self, trace: &TraceDocument) -> StorageResult<()> {
        let path = self.path_for(&trace.trace_id).ok_or_else(|| StorageError::Query {
            message: format!("Invalid trace id: {}", trace.trace_id),
        })?;

        tokio::fs::create_dir_all(&self.dir).await?;
        let body = serde_json::to_vec_pretty(trace)?;

        // Write then rename so readers never see a partial file.
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, &path).await?;

        debug!(path = %path.display(), "Trace written");
        Ok(())
    }

    async fn get(&self, trace_id: &str) -> StorageResult<TraceDocument> {
        let not_found = || StorageError::TraceNotFound {
            trace_id: trace_id.to_string(),
        };
        let path = self.path_for(trace_id).ok_or_else(not_found)?;

        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(not_found()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_recent(&self, limit: usize) -> StorageResult<Vec<TraceSummary>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut summaries = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let parsed = tokio::fs::read(&path)
                .await
                .map_err(StorageError::from)
                .and_then(|bytes| serde_json::from_slice::<TraceDocument>(&bytes).map_err(StorageError::from));
            match parsed {
                Ok(doc) => summaries.push(doc.summary()),
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable trace file"),
            }
        }

        summaries.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.trace_id.cmp(&a.trace_id))
        });
        summaries.truncate(limit);
        Ok(summaries)
    }
}
