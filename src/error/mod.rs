use thiserror::Error;

/// Application-level errors
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Langbase error: {0}")]
    Langbase(#[from] LangbaseError),

    #[error("MCP protocol error: {0}")]
    Mcp(#[from] McpError),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl AppError {
    /// Shorthand for a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        AppError::Config {
            message: message.into(),
        }
    }
}

/// Storage layer errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database connection failed: {message}")]
    Connection { message: String },

    #[error("Query failed: {message}")]
    Query { message: String },

    #[error("Trace not found: {trace_id}")]
    TraceNotFound { trace_id: String },

    #[error("Migration failed: {message}")]
    Migration { message: String },

    #[error("Trace serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

/// Langbase API errors
#[derive(Debug, Error)]
pub enum LangbaseError {
    #[error("Langbase unavailable: {message} (retries: {retries})")]
    Unavailable { message: String, retries: u32 },

    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Invalid response: {message}")]
    InvalidResponse { message: String },

    #[error("Request timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// MCP protocol errors
#[derive(Debug, Error)]
pub enum McpError {
    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("Unknown tool: {tool_name}")]
    UnknownTool { tool_name: String },

    #[error("Invalid parameters for {tool_name}: {message}")]
    InvalidParameters { tool_name: String, message: String },

    #[error("Tool execution failed: {message}")]
    ExecutionFailed { message: String },

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Malformed tool arguments. Fatal to the call, never to the session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("{tool}: arguments must be a JSON object")]
    NotAnObject { tool: String },

    #[error("{tool}: missing required field '{field}'")]
    MissingField { tool: String, field: String },

    #[error("{tool}: field '{field}' must be {expected}")]
    InvalidType {
        tool: String,
        field: String,
        expected: String,
    },

    #[error("{tool}: field '{field}' must be one of [{allowed}], got '{value}'")]
    InvalidChoice {
        tool: String,
        field: String,
        allowed: String,
        value: String,
    },

    #[error("{tool}: unknown field '{field}'")]
    UnknownField { tool: String, field: String },
}

/// Errors from invoking a registered retrieval tool.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Schema violation: {0}")]
    Schema(#[from] SchemaError),

    #[error("Unknown tool: {tool_name}")]
    UnknownTool { tool_name: String },

    #[error("Retrieval failed in {tool}: {message}")]
    Retrieval { tool: String, message: String },
}

impl ToolError {
    /// Whether the failure came from argument validation rather than the backend.
    pub fn is_schema(&self) -> bool {
        matches!(self, ToolError::Schema(_) | ToolError::UnknownTool { .. })
    }
}

/// Errors from the knowledge-source collaborator behind the tools.
#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("Retrieval backend error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Invalid retrieval response: {message}")]
    InvalidResponse { message: String },

    #[error("Retrieval request timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Grader failures. Always converted into an automatic fail, never propagated.
#[derive(Debug, Error)]
pub enum GraderError {
    #[error("Grader output could not be parsed: {message}")]
    Parse { message: String },

    #[error("Grader pipe failed: {0}")]
    Langbase(#[from] LangbaseError),
}

/// Refiner failures. The controller falls back to breadth escalation only.
#[derive(Debug, Error)]
pub enum RefinerError {
    #[error("Refiner output could not be parsed: {message}")]
    Parse { message: String },

    #[error("Refiner returned no usable search strings")]
    Empty,

    #[error("Refiner pipe failed: {0}")]
    Langbase(#[from] LangbaseError),
}

/// Orchestration-level conditions handled inside the retry controller.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Session deadline of {budget_ms}ms exceeded")]
    SessionTimeout { budget_ms: u64 },

    #[error("Reasoner failed: {message}")]
    Reasoner { message: String },
}

impl From<ToolError> for AppError {
    fn from(err: ToolError) -> Self {
        AppError::Internal {
            message: err.to_string(),
        }
    }
}

impl From<AppError> for McpError {
    fn from(err: AppError) -> Self {
        McpError::ExecutionFailed {
            message: err.to_string(),
        }
    }
}

/// Result type alias for application errors
pub type AppResult<T> = Result<T, AppError>;

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Result type alias for Langbase operations
pub type LangbaseResult<T> = Result<T, LangbaseError>;

/// Result type alias for MCP operations
pub type McpResult<T> = Result<T, McpError>;

/// Result type alias for tool invocations
pub type ToolResult<T> = Result<T, ToolError>;

/// Result type alias for knowledge-source calls
pub type RetrievalResult<T> = Result<T, RetrievalError>;
