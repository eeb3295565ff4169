//! Built-in retrieval tools over a [`KnowledgeSource`].

use async_trait::async_trait;
use std::sync::Arc;

use super::{ArgSchema, FieldType, KnowledgeQuery, KnowledgeSource, Observation, Tool, ToolArgs};
use crate::error::{ToolError, ToolResult};

/// Maximum hops `find_connection` explores.
pub const MAX_CONNECTION_HOPS: u32 = 4;

pub const SORT_ORDERS: &[&str] = &["relevance", "time"];

pub const EVENT_TYPES: &[&str] = &[
    "sacrifice",
    "transformation",
    "acquisition",
    "loss",
    "encounter",
    "conflict",
    "revelation",
    "milestone",
];

/// Run one query and wrap the result, attaching `empty_note` when nothing came back.
async fn observe(
    tool: &str,
    source: &dyn KnowledgeSource,
    query: KnowledgeQuery,
    empty_note: String,
) -> ToolResult<Observation> {
    let items = source
        .fetch(&query)
        .await
        .map_err(|e| ToolError::Retrieval {
            tool: tool.to_string(),
            message: e.to_string(),
        })?;

    let observation = Observation::new(items);
    if observation.is_empty() {
        Ok(observation.with_note(empty_note))
    } else {
        Ok(observation)
    }
}

/// Semantic passage search. The only tool that returns narrative text.
pub struct SearchMemoryTool {
    source: Arc<dyn KnowledgeSource>,
    schema: ArgSchema,
}

impl SearchMemoryTool {
    pub fn new(source: Arc<dyn KnowledgeSource>) -> Self {
        Self {
            source,
            schema: ArgSchema::new()
                .required("query", FieldType::String, "Natural-language description of the scene or dialogue")
                .optional("characters", FieldType::String, "Comma-separated character names to filter by")
                .optional("sort_by", FieldType::Choice(SORT_ORDERS), "relevance (default) or time (chronological)"),
        }
    }
}

#[async_trait]
impl Tool for SearchMemoryTool {
    fn name(&self) -> &str {
        "search_memory"
    }

    fn description(&self) -> &str {
        "Retrieve passages of the text: dialogue, scene descriptions, concrete events. \
         Use for quotes and for what actually happened between characters."
    }

    fn schema(&self) -> &ArgSchema {
        &self.schema
    }

    async fn invoke(&self, args: &ToolArgs, breadth: usize) -> ToolResult<Observation> {
        let query = args.get_required("query");
        observe(
            self.name(),
            self.source.as_ref(),
            KnowledgeQuery::Passages {
                query: query.to_string(),
                characters: args.get("characters").map(str::to_string),
                sort_by: args.get("sort_by").unwrap_or("relevance").to_string(),
                limit: breadth,
            },
            format!(
                "No passages matched '{}'. Rephrase with character names, or use lookup_knowledge to confirm the entity exists.",
                query
            ),
        )
        .await
    }
}

/// Static facts and relations of one entity.
pub struct LookupKnowledgeTool {
    source: Arc<dyn KnowledgeSource>,
    schema: ArgSchema,
}

impl LookupKnowledgeTool {
    pub fn new(source: Arc<dyn KnowledgeSource>) -> Self {
        Self {
            source,
            schema: ArgSchema::new()
                .required("entity", FieldType::String, "Entity name, e.g. a character or organization")
                .optional("relation", FieldType::String, "Relation type filter, e.g. FRIEND_OF"),
        }
    }
}

#[async_trait]
impl Tool for LookupKnowledgeTool {
    fn name(&self) -> &str {
        "lookup_knowledge"
    }

    fn description(&self) -> &str {
        "Look up static facts and relationships of an entity (who is X, what is X's role). \
         Not for plot details."
    }

    fn schema(&self) -> &ArgSchema {
        &self.schema
    }

    async fn invoke(&self, args: &ToolArgs, breadth: usize) -> ToolResult<Observation> {
        let entity = args.get_required("entity");
        observe(
            self.name(),
            self.source.as_ref(),
            KnowledgeQuery::Facts {
                entity: entity.to_string(),
                relation: args.get("relation").map(str::to_string),
                limit: breadth,
            },
            format!(
                "No facts recorded for '{}'. Check the spelling or use search_memory to find mentions.",
                entity
            ),
        )
        .await
    }
}

/// Shortest relation path between two entities.
pub struct FindConnectionTool {
    source: Arc<dyn KnowledgeSource>,
    schema: ArgSchema,
}

impl FindConnectionTool {
    pub fn new(source: Arc<dyn KnowledgeSource>) -> Self {
        Self {
            source,
            schema: ArgSchema::new()
                .required("entity1", FieldType::String, "Start entity")
                .required("entity2", FieldType::String, "Target entity"),
        }
    }
}

#[async_trait]
impl Tool for FindConnectionTool {
    fn name(&self) -> &str {
        "find_connection"
    }

    fn description(&self) -> &str {
        "Find how two entities are connected in the knowledge graph (up to 4 hops). \
         Follow up with search_memory to get the events behind the connection."
    }

    fn schema(&self) -> &ArgSchema {
        &self.schema
    }

    async fn invoke(&self, args: &ToolArgs, breadth: usize) -> ToolResult<Observation> {
        let source_entity = args.get_required("entity1");
        let target_entity = args.get_required("entity2");
        let mut observation = observe(
            self.name(),
            self.source.as_ref(),
            KnowledgeQuery::Connection {
                source: source_entity.to_string(),
                target: target_entity.to_string(),
                max_hops: MAX_CONNECTION_HOPS,
            },
            format!(
                "No connection within {} hops. Try search_memory with \"{} {}\" to find shared scenes.",
                MAX_CONNECTION_HOPS, source_entity, target_entity
            ),
        )
        .await?;
        observation.items.truncate(breadth);
        Ok(observation)
    }
}

/// Chronological changes in an entity's relations.
pub struct TrackJourneyTool {
    source: Arc<dyn KnowledgeSource>,
    schema: ArgSchema,
}

impl TrackJourneyTool {
    pub fn new(source: Arc<dyn KnowledgeSource>) -> Self {
        Self {
            source,
            schema: ArgSchema::new()
                .required("entity", FieldType::String, "Entity whose development to track")
                .optional("target", FieldType::String, "Only track the relationship with this entity"),
        }
    }
}

#[async_trait]
impl Tool for TrackJourneyTool {
    fn name(&self) -> &str {
        "track_journey"
    }

    fn description(&self) -> &str {
        "Track how an entity or one of its relationships changed over time, in chapter order."
    }

    fn schema(&self) -> &ArgSchema {
        &self.schema
    }

    async fn invoke(&self, args: &ToolArgs, breadth: usize) -> ToolResult<Observation> {
        let entity = args.get_required("entity");
        observe(
            self.name(),
            self.source.as_ref(),
            KnowledgeQuery::Journey {
                entity: entity.to_string(),
                target: args.get("target").map(str::to_string),
                limit: breadth,
            },
            format!(
                "No recorded changes for '{}'. Use get_character_events or search_memory sorted by time.",
                entity
            ),
        )
        .await
    }
}

/// Major events in a character's history, optionally of one type.
pub struct CharacterEventsTool {
    source: Arc<dyn KnowledgeSource>,
    schema: ArgSchema,
}

impl CharacterEventsTool {
    pub fn new(source: Arc<dyn KnowledgeSource>) -> Self {
        Self {
            source,
            schema: ArgSchema::new()
                .required("entity", FieldType::String, "Character name")
                .optional("event_type", FieldType::Choice(EVENT_TYPES), "Restrict to one kind of event"),
        }
    }
}

#[async_trait]
impl Tool for CharacterEventsTool {
    fn name(&self) -> &str {
        "get_character_events"
    }

    fn description(&self) -> &str {
        "List major events of a character (sacrifice, transformation, acquisition, loss, \
         encounter, conflict, revelation, milestone)."
    }

    fn schema(&self) -> &ArgSchema {
        &self.schema
    }

    async fn invoke(&self, args: &ToolArgs, breadth: usize) -> ToolResult<Observation> {
        let entity = args.get_required("entity");
        let event_type = args.get("event_type");
        observe(
            self.name(),
            self.source.as_ref(),
            KnowledgeQuery::Events {
                entity: entity.to_string(),
                event_type: event_type.map(str::to_string),
                limit: breadth,
            },
            format!(
                "No events recorded. Try search_memory with \"{} {}\".",
                entity,
                event_type.unwrap_or("story")
            ),
        )
        .await
    }
}
