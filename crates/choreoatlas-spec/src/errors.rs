//! Error types for spec loading and structural validation

/// Errors raised while loading or validating FlowSpec/ServiceSpec documents
#[derive(Debug, thiserror::Error)]
pub enum SpecError {
    #[error("failed to read spec file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Yaml {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("flowspec cannot have both 'graph' and 'flow' fields")]
    BothFlowAndGraph,

    #[error("flowspec must have either 'graph' or 'flow' field")]
    MissingFlowOrGraph,

    #[error("node ID cannot be empty")]
    EmptyNodeId,

    #[error("duplicate node ID: {0}")]
    DuplicateNodeId(String),

    #[error("edge references non-existent node: {0}")]
    EdgeUnknownNode(String),

    #[error("cycle detected in graph")]
    CycleDetected,

    #[error("DAG must have at least one entry node (in-degree 0)")]
    NoEntryNode,

    #[error("node {0} is not reachable from entry nodes")]
    UnreachableNode(String),

    #[error("failed to load service '{alias}' spec: {source}")]
    ServiceLoad {
        alias: String,
        #[source]
        source: Box<SpecError>,
    },
}

/// Result type alias for spec operations
pub type SpecResult<T> = Result<T, SpecError>;
