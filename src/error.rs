use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Upstream not found: {0}")]
    UpstreamNotFound(String),

    #[error("Failed to parse {source_name}: {reason}")]
    Parse { source_name: String, reason: String },

    #[error("Empty result: {0}")]
    EmptyResult(String),

    #[error("Schema regression: missing columns {missing:?}")]
    SchemaRegression {
        missing: Vec<String>,
        extra: Vec<String>,
    },

    #[error("QUALITY CHECK FAILED:\n- {}", .violations.join("\n- "))]
    ThresholdViolation { violations: Vec<String> },

    #[error("API error: {message}")]
    Api { message: String },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON deserialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl PipelineError {
    pub fn parse(source_name: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Parse {
            source_name: source_name.into(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
