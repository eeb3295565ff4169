use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Turns of history a context keeps.
pub const MAX_HISTORY_TURNS: usize = 10;

/// One prior question and its answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub question: String,
    pub answer: String,
}

/// Conversation state for one session.
///
/// Values are never mutated in place: each builder returns a new context, and
/// the same instance is threaded unchanged through every attempt of a turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionContext {
    session_id: String,
    topic: Option<String>,
    entity_stack: Vec<String>,
    history: Vec<Turn>,
}

impl SessionContext {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            topic: None,
            entity_stack: Vec::new(),
            history: Vec::new(),
        }
    }

    /// A context with a freshly generated session id.
    pub fn fresh() -> Self {
        Self::new(Uuid::new_v4().to_string())
    }

    pub fn with_topic(&self, topic: impl Into<String>) -> Self {
        Self {
            topic: Some(topic.into()),
            ..self.clone()
        }
    }

    /// Push entities onto the stack, most recent last, skipping ones already present.
    pub fn with_entities<I, S>(&self, entities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut entity_stack = self.entity_stack.clone();
        for entity in entities {
            let entity = entity.into();
            if entity.trim().is_empty() {
                continue;
            }
            entity_stack.retain(|e| e != &entity);
            entity_stack.push(entity);
        }
        Self {
            entity_stack,
            ..self.clone()
        }
    }

    /// Append a finished turn, dropping the oldest beyond [`MAX_HISTORY_TURNS`].
    pub fn with_turn(&self, question: impl Into<String>, answer: impl Into<String>) -> Self {
        let mut history = self.history.clone();
        history.push(Turn {
            question: question.into(),
            answer: answer.into(),
        });
        if history.len() > MAX_HISTORY_TURNS {
            let excess = history.len() - MAX_HISTORY_TURNS;
            history.drain(..excess);
        }
        Self {
            history,
            ..self.clone()
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn topic(&self) -> Option<&str> {
        self.topic.as_deref()
    }

    pub fn entity_stack(&self) -> &[String] {
        &self.entity_stack
    }

    pub fn history(&self) -> &[Turn] {
        &self.history
    }

    /// Prompt section describing the context, or `None` when there is nothing to say.
    pub fn render(&self) -> Option<String> {
        let mut lines = Vec::new();
        if let Some(topic) = &self.topic {
            lines.push(format!("Topic: {}", topic));
        }
        if !self.entity_stack.is_empty() {
            lines.push(format!(
                "Entities in focus (most recent last): {}",
                self.entity_stack.join(", ")
            ));
        }
        if !self.history.is_empty() {
            lines.push("Earlier turns:".to_string());
            for turn in &self.history {
                lines.push(format!("- Q: {}\n  A: {}", turn.question, turn.answer));
            }
        }
        if lines.is_empty() {
            None
        } else {
            Some(lines.join("\n"))
        }
    }
}

/// A user question plus the context it was asked in. Immutable once dispatched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    pub text: String,
    pub context: SessionContext,
}

impl Query {
    pub fn new(text: impl Into<String>, context: SessionContext) -> Self {
        Self {
            text: text.into(),
            context,
        }
    }

    /// A query with a fresh, empty context.
    pub fn standalone(text: impl Into<String>) -> Self {
        Self::new(text, SessionContext::fresh())
    }
}

/// Annotation carried into a retry after a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryNote {
    pub attempt: u32,
    pub max_attempts: u32,
    pub suggestion: String,
    pub hints: Vec<String>,
    pub breadth: usize,
}

/// What one attempt of the reasoning loop works on.
#[derive(Debug, Clone)]
pub struct AttemptInput<'a> {
    pub query: &'a Query,
    pub attempt: u32,
    pub breadth: usize,
    pub note: Option<RetryNote>,
}

impl AttemptInput<'_> {
    /// Question text shown to the reasoner. Without a retry note this is the
    /// original question, unchanged.
    pub fn question_text(&self) -> String {
        match &self.note {
            None => self.query.text.clone(),
            Some(note) => {
                let hints = note
                    .hints
                    .iter()
                    .map(|h| format!("  - {}", h))
                    .collect::<Vec<_>>()
                    .join("\n");
                format!(
                    "{}\n\n[Retry {}/{}] The previous answer failed review: {}\n\
                     Suggested searches:\n{}\n\
                     Tools now return up to {} results.",
                    self.query.text, note.attempt, note.max_attempts, note.suggestion, hints, note.breadth
                )
            }
        }
    }
}
