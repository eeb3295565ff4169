use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::debug;

use super::EvidenceItem;
use crate::config::RetrievalConfig;
use crate::error::{RetrievalError, RetrievalResult};

/// A read against the vector index or the knowledge graph.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum KnowledgeQuery {
    /// Semantic passage search over the narrative text.
    Passages {
        query: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        characters: Option<String>,
        sort_by: String,
        limit: usize,
    },
    /// Static facts and relations of an entity.
    Facts {
        entity: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        relation: Option<String>,
        limit: usize,
    },
    /// Shortest relation path between two entities.
    Connection {
        source: String,
        target: String,
        max_hops: u32,
    },
    /// Chronological relation changes of an entity.
    Journey {
        entity: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        target: Option<String>,
        limit: usize,
    },
    /// Major events in an entity's history.
    Events {
        entity: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        event_type: Option<String>,
        limit: usize,
    },
}

impl KnowledgeQuery {
    /// Path segment on the retrieval service.
    pub fn endpoint(&self) -> &'static str {
        match self {
            KnowledgeQuery::Passages { .. } => "passages/search",
            KnowledgeQuery::Facts { .. } => "graph/facts",
            KnowledgeQuery::Connection { .. } => "graph/path",
            KnowledgeQuery::Journey { .. } => "graph/journey",
            KnowledgeQuery::Events { .. } => "graph/events",
        }
    }
}

/// The external store the built-in tools read from.
#[async_trait]
pub trait KnowledgeSource: Send + Sync {
    async fn fetch(&self, query: &KnowledgeQuery) -> RetrievalResult<Vec<EvidenceItem>>;
}

#[derive(Debug, Deserialize)]
struct KnowledgeResponse {
    #[serde(default)]
    items: Vec<EvidenceItem>,
}

/// [`KnowledgeSource`] backed by a JSON-over-HTTP retrieval service.
///
/// Each query is a `POST {base_url}/v1/{endpoint}` whose body is the query and
/// whose response is `{"items": [...]}`. A 404 means "nothing found" and
/// yields an empty list.
#[derive(Clone)]
pub struct HttpKnowledgeSource {
    client: Client,
    base_url: String,
    timeout_ms: u64,
}

impl HttpKnowledgeSource {
    pub fn new(config: &RetrievalConfig) -> RetrievalResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            timeout_ms: config.timeout_ms,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl KnowledgeSource for HttpKnowledgeSource {
    async fn fetch(&self, query: &KnowledgeQuery) -> RetrievalResult<Vec<EvidenceItem>> {
        let url = format!("{}/v1/{}", self.base_url, query.endpoint());
        let start = Instant::now();

        let response = self
            .client
            .post(&url)
            .json(query)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    RetrievalError::Timeout {
                        timeout_ms: self.timeout_ms,
                    }
                } else {
                    RetrievalError::Http(e)
                }
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RetrievalError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        let parsed: KnowledgeResponse =
            response
                .json()
                .await
                .map_err(|e| RetrievalError::InvalidResponse {
                    message: format!("Failed to parse retrieval response: {}", e),
                })?;

        debug!(
            endpoint = query.endpoint(),
            items = parsed.items.len(),
            latency_ms = start.elapsed().as_millis(),
            "Knowledge source returned"
        );

        Ok(parsed.items)
    }
}
