//! ServiceSpec: per-service operation contracts
//!
//! Each service declares its operations together with named pre- and
//! postconditions written in the CEL-style expression dialect. The
//! conditions are kept as strings here; evaluation happens in the
//! validation engine.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::errors::{SpecError, SpecResult};

/// A service specification document (one file, multiple operations)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServiceSpecFile {
    pub service: String,
    #[serde(default)]
    pub operations: Vec<ServiceOperation>,
}

/// One operation of a service
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceOperation {
    pub operation_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Named precondition expressions
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub preconditions: BTreeMap<String, String>,
    /// Named postcondition expressions
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub postconditions: BTreeMap<String, String>,
}

/// Load a service specification from a YAML file
pub fn load_service_spec(path: impl AsRef<Path>) -> SpecResult<ServiceSpecFile> {
    let path = path.as_ref();
    let bytes = std::fs::read(path).map_err(|source| SpecError::Io {
        path: path.display().to_string(),
        source,
    })?;
    serde_yaml::from_slice(&bytes).map_err(|source| SpecError::Yaml {
        path: path.display().to_string(),
        source,
    })
}
