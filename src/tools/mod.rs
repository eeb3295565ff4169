//! Retrieval tool registry.
//!
//! Tools are named, schema-checked retrieval capabilities. Each one is a pure
//! function of its arguments and the attempt's search breadth; retries,
//! caching and scoring live elsewhere. The registry is immutable once built
//! and is shared across sessions behind an `Arc`.

mod builtin;
mod registry;
mod schema;
mod source;

pub use builtin::*;
pub use registry::*;
pub use schema::*;
pub use source::*;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ToolResult;

/// Hard cap on results any single tool call may return.
pub const MAX_BREADTH: usize = 20;

/// One ranked piece of evidence returned by a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceItem {
    pub text: String,
    /// Where the evidence came from (chapter, record id, graph edge).
    #[serde(default)]
    pub source_locator: String,
    #[serde(default)]
    pub score: f64,
}

/// Result of one tool call.
///
/// Empty `items` is a valid "not found" answer. `error` is set only when the
/// call itself failed and the loop recorded the failure in place of a result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub items: Vec<EvidenceItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl Observation {
    pub fn new(items: Vec<EvidenceItem>) -> Self {
        Self {
            items,
            error: None,
            note: None,
        }
    }

    /// An empty observation standing in for a failed call.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            items: Vec::new(),
            error: Some(error.into()),
            note: None,
        }
    }

    /// Attach a hint for the reasoner, typically which tool to try next.
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// A retrieval capability the reasoner can call by name.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name used in reasoner actions.
    fn name(&self) -> &str;

    /// Description shown to the reasoner.
    fn description(&self) -> &str;

    /// Declared arguments. The registry validates against this before `invoke`.
    fn schema(&self) -> &ArgSchema;

    /// Run the tool with already-validated arguments and a result-count limit.
    async fn invoke(&self, args: &ToolArgs, breadth: usize) -> ToolResult<Observation>;
}

/// Serializable view of a tool for prompts and the MCP surface.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}
