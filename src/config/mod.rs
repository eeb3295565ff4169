use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Hard ceiling on configured retries.
pub const MAX_RETRIES_CEILING: u32 = 10;

/// Upper bound on any single dimension score.
pub const DIMENSION_SCALE: u32 = 20;

/// Upper bound on the aggregate score.
pub const AGGREGATE_SCALE: u32 = 100;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub langbase: LangbaseConfig,
    pub request: RequestConfig,
    pub pipes: PipeConfig,
    pub retrieval: RetrievalConfig,
    pub agent: AgentConfig,
    pub grading: GradingThresholds,
    pub trace: TraceConfig,
    pub logging: LoggingConfig,
}

/// Langbase API configuration
#[derive(Debug, Clone)]
pub struct LangbaseConfig {
    pub api_key: String,
    pub base_url: String,
}

/// HTTP request configuration for LLM pipe calls
#[derive(Debug, Clone)]
pub struct RequestConfig {
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

/// Langbase pipe names for the three generative roles
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipeConfig {
    pub reasoner: String,
    pub grader: String,
    pub refiner: String,
}

/// Knowledge-source (vector + graph retrieval service) configuration
#[derive(Debug, Clone)]
pub struct RetrievalConfig {
    pub base_url: String,
    pub timeout_ms: u64,
}

/// Retry controller and reasoning loop bounds
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentConfig {
    /// Retries after the first attempt; a session runs at most `max_retries + 1` attempts.
    pub max_retries: u32,
    /// Result-count limit per attempt index; the last entry repeats.
    pub breadth_schedule: Vec<usize>,
    /// Thinking steps per attempt before a forced finalize.
    pub max_turns: u32,
    /// Consecutive failed tool calls that short-circuit to finalizing.
    pub max_consecutive_tool_errors: u32,
    /// Wall-clock budget for one session.
    pub session_timeout_ms: u64,
}

/// Rubric hard thresholds. Every minimum must hold, plus the aggregate minimum.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct GradingThresholds {
    pub min_aggregate: u32,
    pub min_tool_usage: u32,
    pub min_grounding: u32,
    pub min_completeness: u32,
    pub min_citation: u32,
    pub min_depth: u32,
}

/// Where finished traces are persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceBackend {
    Sqlite,
    Json,
    None,
}

/// Trace persistence configuration
#[derive(Debug, Clone)]
pub struct TraceConfig {
    pub backend: TraceBackend,
    pub database_path: PathBuf,
    pub max_connections: u32,
    pub trace_dir: PathBuf,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log output format
#[derive(Debug, Clone, PartialEq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, AppError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let langbase = LangbaseConfig {
            api_key: env::var("LANGBASE_API_KEY")
                .map_err(|_| AppError::config("LANGBASE_API_KEY is required"))?,
            base_url: env::var("LANGBASE_BASE_URL")
                .unwrap_or_else(|_| "https://api.langbase.com".to_string()),
        };

        let request = RequestConfig {
            timeout_ms: parse_or("REQUEST_TIMEOUT_MS", 30000),
            max_retries: parse_or("REQUEST_MAX_RETRIES", 2),
            retry_delay_ms: parse_or("RETRY_DELAY_MS", 1000),
        };

        let pipes = PipeConfig {
            reasoner: env::var("PIPE_REASONER").unwrap_or_else(|_| "retrieval-reasoner-v1".to_string()),
            grader: env::var("PIPE_GRADER").unwrap_or_else(|_| "answer-grader-v1".to_string()),
            refiner: env::var("PIPE_REFINER").unwrap_or_else(|_| "query-refiner-v1".to_string()),
        };

        let retrieval = RetrievalConfig {
            base_url: env::var("RETRIEVAL_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:8080".to_string()),
            timeout_ms: parse_or("RETRIEVAL_TIMEOUT_MS", 15000),
        };

        let defaults = AgentConfig::default();
        let breadth_schedule = match env::var("AGENT_BREADTH_SCHEDULE") {
            Ok(raw) => parse_schedule(&raw)?,
            Err(_) => defaults.breadth_schedule.clone(),
        };
        let agent = AgentConfig {
            max_retries: parse_or("AGENT_MAX_RETRIES", defaults.max_retries),
            breadth_schedule,
            max_turns: parse_or("AGENT_MAX_TURNS", defaults.max_turns),
            max_consecutive_tool_errors: parse_or(
                "AGENT_MAX_CONSECUTIVE_TOOL_ERRORS",
                defaults.max_consecutive_tool_errors,
            ),
            session_timeout_ms: parse_or("AGENT_SESSION_TIMEOUT_MS", defaults.session_timeout_ms),
        };

        let base = GradingThresholds::default();
        let grading = GradingThresholds {
            min_aggregate: parse_or("GRADER_MIN_AGGREGATE", base.min_aggregate),
            min_tool_usage: parse_or("GRADER_MIN_TOOL_USAGE", base.min_tool_usage),
            min_grounding: parse_or("GRADER_MIN_GROUNDING", base.min_grounding),
            min_completeness: parse_or("GRADER_MIN_COMPLETENESS", base.min_completeness),
            min_citation: parse_or("GRADER_MIN_CITATION", base.min_citation),
            min_depth: parse_or("GRADER_MIN_DEPTH", base.min_depth),
        };

        let trace = TraceConfig {
            backend: env::var("TRACE_BACKEND")
                .ok()
                .map(|v| v.parse::<TraceBackend>())
                .transpose()?
                .unwrap_or(TraceBackend::Sqlite),
            database_path: PathBuf::from(
                env::var("TRACE_DATABASE_PATH").unwrap_or_else(|_| "./data/traces.db".to_string()),
            ),
            max_connections: parse_or("TRACE_DATABASE_MAX_CONNECTIONS", 5),
            trace_dir: PathBuf::from(env::var("TRACE_DIR").unwrap_or_else(|_| "./traces".to_string())),
        };

        let logging = LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "pretty".to_string())
                .to_lowercase()
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
        };

        Ok(Config {
            langbase,
            request,
            pipes,
            retrieval,
            agent,
            grading,
            trace,
            logging,
        })
    }
}

fn parse_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

/// Parse a comma-separated breadth schedule such as `3,5,8`.
pub fn parse_schedule(raw: &str) -> Result<Vec<usize>, AppError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<usize>()
                .map_err(|_| AppError::config(format!("Invalid breadth value '{}'", s)))
        })
        .collect()
}

impl AgentConfig {
    /// Check the bounds the retry controller depends on.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.max_retries > MAX_RETRIES_CEILING {
            return Err(AppError::config(format!(
                "max_retries must be at most {}, got {}",
                MAX_RETRIES_CEILING, self.max_retries
            )));
        }
        if self.breadth_schedule.is_empty() {
            return Err(AppError::config("breadth_schedule must not be empty"));
        }
        if self.breadth_schedule.iter().any(|&b| b == 0) {
            return Err(AppError::config("breadth_schedule entries must be positive"));
        }
        if self.breadth_schedule.windows(2).any(|w| w[1] < w[0]) {
            return Err(AppError::config(format!(
                "breadth_schedule must be non-decreasing, got {:?}",
                self.breadth_schedule
            )));
        }
        if self.max_turns == 0 {
            return Err(AppError::config("max_turns must be positive"));
        }
        if self.max_consecutive_tool_errors == 0 {
            return Err(AppError::config("max_consecutive_tool_errors must be positive"));
        }
        if self.session_timeout_ms == 0 {
            return Err(AppError::config("session_timeout_ms must be positive"));
        }
        Ok(())
    }

    /// Search breadth for a 1-based attempt index.
    pub fn breadth_for(&self, attempt: u32) -> usize {
        let idx = (attempt.max(1) - 1) as usize;
        self.breadth_schedule
            .get(idx)
            .or_else(|| self.breadth_schedule.last())
            .copied()
            .unwrap_or(1)
    }

    /// Set the retry count.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the breadth schedule.
    pub fn with_breadth_schedule(mut self, schedule: Vec<usize>) -> Self {
        self.breadth_schedule = schedule;
        self
    }

    /// Set the per-attempt turn cap.
    pub fn with_max_turns(mut self, max_turns: u32) -> Self {
        self.max_turns = max_turns;
        self
    }

    /// Set the session deadline.
    pub fn with_session_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.session_timeout_ms = timeout_ms;
        self
    }
}

impl GradingThresholds {
    /// Reject minimums that can never be met on the rubric scale.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.min_aggregate > AGGREGATE_SCALE {
            return Err(AppError::config(format!(
                "min_aggregate must be at most {}, got {}",
                AGGREGATE_SCALE, self.min_aggregate
            )));
        }
        let dims = [
            ("min_tool_usage", self.min_tool_usage),
            ("min_grounding", self.min_grounding),
            ("min_completeness", self.min_completeness),
            ("min_citation", self.min_citation),
            ("min_depth", self.min_depth),
        ];
        for (name, value) in dims {
            if value > DIMENSION_SCALE {
                return Err(AppError::config(format!(
                    "{} must be at most {}, got {}",
                    name, DIMENSION_SCALE, value
                )));
            }
        }
        Ok(())
    }
}

impl FromStr for TraceBackend {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "sqlite" => Ok(TraceBackend::Sqlite),
            "json" | "file" => Ok(TraceBackend::Json),
            "none" | "off" => Ok(TraceBackend::None),
            other => Err(AppError::config(format!("Unknown trace backend: {}", other))),
        }
    }
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30000,
            max_retries: 2,
            retry_delay_ms: 1000,
        }
    }
}

impl Default for PipeConfig {
    fn default() -> Self {
        Self {
            reasoner: "retrieval-reasoner-v1".to_string(),
            grader: "answer-grader-v1".to_string(),
            refiner: "query-refiner-v1".to_string(),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            breadth_schedule: vec![3, 5, 8, 12, 20],
            max_turns: 5,
            max_consecutive_tool_errors: 3,
            session_timeout_ms: 120_000,
        }
    }
}

impl Default for GradingThresholds {
    fn default() -> Self {
        Self {
            min_aggregate: 70,
            min_tool_usage: 0,
            min_grounding: 10,
            min_completeness: 0,
            min_citation: 5,
            min_depth: 10,
        }
    }
}
