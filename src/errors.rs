use thiserror::Error;

/// Errors raised while translating request parameters into a query descriptor.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("invalid integer for `{param}`: {value:?}")]
    InvalidInteger { param: &'static str, value: String },

    #[error("invalid flag for `{param}`: {value:?}")]
    InvalidFlag { param: &'static str, value: String },

    #[error("distinct query requires exactly one target field")]
    MissingDistinctField,

    #[error("map-reduce requires both `map` and `reduce`")]
    IncompleteMapReduce,

    #[error("empty program text for `{0}`")]
    EmptyProgram(&'static str),

    #[error("invalid scope: {0}")]
    InvalidScope(String),

    #[error("invalid percent-encoding in `{0}`")]
    InvalidEncoding(&'static str),
}

impl From<serde_json::Error> for ParseError {
    fn from(e: serde_json::Error) -> Self {
        Self::InvalidScope(e.to_string())
    }
}

/// Errors reported by a storage collaborator. The dispatcher forwards these untouched.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("operation exceeded time limit of {max_time_ms}ms")]
    Timeout { max_time_ms: u64 },

    #[error("unsupported pipeline stage: {0}")]
    UnsupportedStage(String),

    #[error("unsupported operation: {0}")]
    Unsupported(String),

    #[error("invalid filter: {0}")]
    InvalidFilter(String),

    #[error("{0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("logging setup: {0}")]
    Logging(String),
}
