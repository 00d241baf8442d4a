//! Native trace JSON decoder

use std::path::Path;

use crate::errors::{TraceError, TraceResult};
use crate::span::Trace;

/// Load a trace from a native `{ "spans": [...] }` JSON file
pub fn load_trace(path: impl AsRef<Path>) -> TraceResult<Trace> {
    let path = path.as_ref();
    let bytes = std::fs::read(path).map_err(|source| TraceError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let trace: Trace = serde_json::from_slice(&bytes).map_err(|source| TraceError::Json {
        path: path.display().to_string(),
        source,
    })?;
    if trace.spans.is_empty() {
        return Err(TraceError::Empty);
    }
    Ok(trace)
}
