//! Error types for trace decoding

/// Errors raised while loading or decoding trace files
#[derive(Debug, thiserror::Error)]
pub enum TraceError {
    #[error("failed to read trace file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse trace data in {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to parse span timestamp '{value}'")]
    Timestamp { value: String },

    #[error("trace contains no spans")]
    Empty,
}

/// Result type alias for trace operations
pub type TraceResult<T> = Result<T, TraceError>;
