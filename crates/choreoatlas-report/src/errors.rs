//! Error types for report writing

/// Errors raised while rendering or writing reports
#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("failed to write report {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize report: {source}")]
    Json {
        #[source]
        source: serde_json::Error,
    },
}

/// Result type alias for report operations
pub type ReportResult<T> = Result<T, ReportError>;
