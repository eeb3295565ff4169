use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use super::{
    CharacterEventsTool, FindConnectionTool, KnowledgeSource, LookupKnowledgeTool, Observation,
    SearchMemoryTool, Tool, ToolDescriptor, TrackJourneyTool, MAX_BREADTH,
};
use crate::error::{ToolError, ToolResult};

/// Named set of tools, ordered by name so prompt listings are stable.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the five built-in retrieval tools over `source`.
    pub fn with_builtin_tools(source: Arc<dyn KnowledgeSource>) -> Self {
        let mut registry = Self::new();
        registry.register(SearchMemoryTool::new(source.clone()));
        registry.register(LookupKnowledgeTool::new(source.clone()));
        registry.register(FindConnectionTool::new(source.clone()));
        registry.register(TrackJourneyTool::new(source.clone()));
        registry.register(CharacterEventsTool::new(source));
        registry
    }

    /// Register a tool, replacing any tool with the same name.
    pub fn register(&mut self, tool: impl Tool + 'static) {
        let name = tool.name().to_string();
        self.tools.insert(name, Arc::new(tool));
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.tools
            .values()
            .map(|tool| ToolDescriptor {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                parameters: tool.schema().to_json_schema(),
            })
            .collect()
    }

    /// Validate `args` against the tool's schema, then run it.
    ///
    /// Breadth is clamped to `1..=MAX_BREADTH` and the result truncated to it.
    /// Schema violations fail before the tool is touched.
    pub async fn invoke(&self, name: &str, args: &Value, breadth: usize) -> ToolResult<Observation> {
        let tool = self.get(name).ok_or_else(|| ToolError::UnknownTool {
            tool_name: name.to_string(),
        })?;

        let validated = tool.schema().validate(name, args)?;
        let breadth = breadth.clamp(1, MAX_BREADTH);

        debug!(tool = %name, breadth, "Invoking tool");
        let mut observation = tool.invoke(&validated, breadth).await?;
        observation.items.truncate(breadth);
        Ok(observation)
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}
