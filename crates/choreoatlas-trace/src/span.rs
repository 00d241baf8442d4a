//! Span and trace records

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A captured distributed transaction: spans ordered by start time
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Trace {
    #[serde(default)]
    pub spans: Vec<Span>,
}

/// One observed service operation
///
/// Attribute keys prefixed `otlp.` carry causal metadata populated by
/// the OTLP decoder (`otlp.trace_id`, `otlp.span_id`,
/// `otlp.parent_span_id`, `otlp.status.code`, `otlp.status.message`).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Span {
    pub name: String,
    /// Service alias or real name; matched against FlowSpec service keys
    pub service: String,
    #[serde(default)]
    pub start_nanos: i64,
    #[serde(default)]
    pub end_nanos: i64,
    #[serde(default)]
    pub attributes: BTreeMap<String, Value>,
}

impl Span {
    /// The span id from OTLP metadata, or a synthetic
    /// `"{service}:{name}:{startNanos}"` id for graph purposes.
    pub fn span_id(&self) -> String {
        match self.attr_str("otlp.span_id") {
            Some(id) => id.to_string(),
            None => self.synthetic_id(),
        }
    }

    /// The synthetic id used to key matched spans
    pub fn synthetic_id(&self) -> String {
        format!("{}:{}:{}", self.service, self.name, self.start_nanos)
    }

    /// The trace id from OTLP metadata, if any
    pub fn trace_id(&self) -> String {
        self.attr_str("otlp.trace_id")
            .unwrap_or("unknown-trace")
            .to_string()
    }

    /// The parent span id from OTLP metadata, if any
    pub fn parent_span_id(&self) -> Option<&str> {
        self.attr_str("otlp.parent_span_id")
    }

    fn attr_str(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(|v| v.as_str())
    }
}

impl Trace {
    /// True when any span carries OTLP parent-child metadata
    pub fn has_otlp_metadata(&self) -> bool {
        self.spans
            .iter()
            .any(|s| s.attributes.contains_key("otlp.parent_span_id"))
    }
}
