//! Error types for baseline persistence

/// Errors raised while recording, saving, or loading baselines
#[derive(Debug, thiserror::Error)]
pub enum BaselineError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse baseline {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("unsupported baseline schema version '{found}' (expected \"1\")")]
    SchemaVersion { found: String },
}

/// Result type alias for baseline operations
pub type BaselineResult<T> = Result<T, BaselineError>;
