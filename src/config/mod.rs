use std::env;
use std::path::PathBuf;

use crate::error::AppError;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub llm: LlmConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub request: RequestConfig,
    pub engine: EngineConfig,
}

/// LLM completion service configuration
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub max_connections: u32,
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

/// HTTP request configuration
#[derive(Debug, Clone)]
pub struct RequestConfig {
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

/// Turn-pipeline tuning knobs
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How many prior turns are replayed into the prompt.
    pub history_window: usize,
    /// Top-K knowledge chunks retrieved per open-ended question.
    pub knowledge_top_k: usize,
    /// Delay before a scheduled check-in fires.
    pub follow_up_delay_ms: u64,
    /// Minimum age accepted by the circumcision pre-screening flow.
    pub min_circumcision_age: u32,
    /// Completion sampling temperature (short, directive replies).
    pub temperature: f64,
    /// Completion output cap in tokens.
    pub max_tokens: u32,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, AppError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let llm = LlmConfig {
            api_key: env::var("LLM_API_KEY").map_err(|_| AppError::Config {
                message: "LLM_API_KEY is required".to_string(),
            })?,
            base_url: env::var("LLM_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com".to_string()),
            model: env::var("LLM_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()),
        };

        let database = DatabaseConfig {
            path: PathBuf::from(
                env::var("DATABASE_PATH").unwrap_or_else(|_| "./data/care.db".to_string()),
            ),
            max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(5),
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

        let request = RequestConfig {
            timeout_ms: env::var("REQUEST_TIMEOUT_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(15000),
            max_retries: env::var("MAX_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(2),
            retry_delay_ms: env::var("RETRY_DELAY_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(500),
        };

        let engine = EngineConfig {
            history_window: env::var("HISTORY_WINDOW")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(6),
            knowledge_top_k: env::var("KNOWLEDGE_TOP_K")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(3),
            follow_up_delay_ms: env::var("FOLLOW_UP_DELAY_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(30000),
            min_circumcision_age: env::var("MIN_CIRCUMCISION_AGE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(15),
            temperature: env::var("LLM_TEMPERATURE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(0.4),
            max_tokens: env::var("LLM_MAX_TOKENS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(400),
        };

        Ok(Config {
            llm,
            database,
            logging,
            request,
            engine,
        })
    }
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 15000,
            max_retries: 2,
            retry_delay_ms: 500,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            history_window: 6,
            knowledge_top_k: 3,
            follow_up_delay_ms: 30000,
            min_circumcision_age: 15,
            temperature: 0.4,
            max_tokens: 400,
        }
    }
}
