//! OTLP-JSON trace decoder
//!
//! Converts the standard `resourceSpans[].scopeSpans[].spans[]` shape
//! into the internal trace model. String-typed numeric timestamps are
//! parsed to i64 nanos, attribute values are projected to native JSON
//! types, and the OTLP ids are copied under `otlp.*` attribute keys.

use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::Path;

use crate::errors::{TraceError, TraceResult};
use crate::span::{Span, Trace};

const OTLP_STATUS_OK: i64 = 1;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OtlpTrace {
    #[serde(default)]
    resource_spans: Vec<OtlpResourceSpans>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OtlpResourceSpans {
    #[serde(default)]
    resource: OtlpResource,
    #[serde(default)]
    scope_spans: Vec<OtlpScopeSpans>,
}

#[derive(Debug, Default, Deserialize)]
struct OtlpResource {
    #[serde(default)]
    attributes: Vec<OtlpAttribute>,
}

#[derive(Debug, Default, Deserialize)]
struct OtlpScopeSpans {
    #[serde(default)]
    spans: Vec<OtlpSpan>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OtlpSpan {
    #[serde(default)]
    trace_id: String,
    #[serde(default)]
    span_id: String,
    #[serde(default)]
    parent_span_id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    start_time_unix_nano: String,
    #[serde(default)]
    end_time_unix_nano: String,
    #[serde(default)]
    attributes: Vec<OtlpAttribute>,
    #[serde(default)]
    status: OtlpStatus,
}

#[derive(Debug, Default, Deserialize)]
struct OtlpAttribute {
    key: String,
    #[serde(default)]
    value: OtlpValue,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OtlpValue {
    string_value: Option<String>,
    int_value: Option<String>,
    double_value: Option<String>,
    bool_value: Option<bool>,
    array_value: Option<Value>,
    kvlist_value: Option<Value>,
    bytes_value: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct OtlpStatus {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

/// Load a trace from an OTLP-JSON file
pub fn load_otlp_trace(path: impl AsRef<Path>) -> TraceResult<Trace> {
    let path = path.as_ref();
    let bytes = std::fs::read(path).map_err(|source| TraceError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let otlp: OtlpTrace = serde_json::from_slice(&bytes).map_err(|source| TraceError::Json {
        path: path.display().to_string(),
        source,
    })?;
    convert(otlp)
}

fn convert(otlp: OtlpTrace) -> TraceResult<Trace> {
    let mut spans = Vec::new();
    for resource_spans in otlp.resource_spans {
        let resource_service = extract_service_name(&resource_spans.resource);
        for scope_spans in resource_spans.scope_spans {
            for otlp_span in scope_spans.spans {
                spans.push(convert_span(otlp_span, resource_service.as_deref())?);
            }
        }
    }
    if spans.is_empty() {
        return Err(TraceError::Empty);
    }
    Ok(Trace { spans })
}

fn convert_span(otlp_span: OtlpSpan, resource_service: Option<&str>) -> TraceResult<Span> {
    let start_nanos = parse_nanos(&otlp_span.start_time_unix_nano)?;
    let end_nanos = parse_nanos(&otlp_span.end_time_unix_nano)?;

    let mut attributes = BTreeMap::new();
    for attr in otlp_span.attributes {
        attributes.insert(attr.key, project_value(attr.value));
    }

    attributes.insert("otlp.trace_id".into(), json!(otlp_span.trace_id));
    attributes.insert("otlp.span_id".into(), json!(otlp_span.span_id));
    if !otlp_span.parent_span_id.is_empty() {
        attributes.insert("otlp.parent_span_id".into(), json!(otlp_span.parent_span_id));
    }
    if otlp_span.status.code != 0 {
        attributes.insert("otlp.status.code".into(), json!(otlp_span.status.code));
    }
    if !otlp_span.status.message.is_empty() {
        attributes.insert("otlp.status.message".into(), json!(otlp_span.status.message));
    }

    // Map to response.status so condition expressions see a status even
    // when only OTLP-level status is recorded
    if let Some(code) = attributes.get("http.status_code").cloned() {
        attributes.insert("response.status".into(), code);
    } else if otlp_span.status.code == OTLP_STATUS_OK {
        let status = if is_creation_operation(&otlp_span.name) {
            201
        } else {
            200
        };
        attributes.insert("response.status".into(), json!(status));
    }

    let mut service = resource_service.unwrap_or_default().to_string();
    if let Some(Value::String(s)) = attributes.get("service.name") {
        service = s.clone();
    }
    if service.is_empty() {
        service = "unknown-service".into();
    }

    Ok(Span {
        name: otlp_span.name,
        service,
        start_nanos,
        end_nanos,
        attributes,
    })
}

fn parse_nanos(value: &str) -> TraceResult<i64> {
    value.parse::<i64>().map_err(|_| TraceError::Timestamp {
        value: value.to_string(),
    })
}

fn project_value(value: OtlpValue) -> Value {
    if let Some(s) = value.string_value {
        if !s.is_empty() {
            return Value::String(s);
        }
    }
    if let Some(i) = value.int_value {
        if !i.is_empty() {
            return match i.parse::<i64>() {
                Ok(n) => json!(n),
                Err(_) => Value::String(i),
            };
        }
    }
    if let Some(d) = value.double_value {
        if !d.is_empty() {
            return match d.parse::<f64>() {
                Ok(n) => json!(n),
                Err(_) => Value::String(d),
            };
        }
    }
    if let Some(true) = value.bool_value {
        return Value::Bool(true);
    }
    if let Some(a) = value.array_value {
        return a;
    }
    if let Some(kv) = value.kvlist_value {
        return kv;
    }
    if let Some(b) = value.bytes_value {
        if !b.is_empty() {
            return Value::String(b);
        }
    }
    Value::String(String::new())
}

fn extract_service_name(resource: &OtlpResource) -> Option<String> {
    resource
        .attributes
        .iter()
        .find(|a| a.key == "service.name")
        .and_then(|a| a.value.string_value.clone())
        .filter(|s| !s.is_empty())
}

fn is_creation_operation(operation_name: &str) -> bool {
    let lower = operation_name.to_lowercase();
    ["create", "post", "insert", "add"]
        .iter()
        .any(|verb| lower.contains(verb))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_temp(name: &str, content: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("ca-otlp-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    fn sample_otlp() -> &'static str {
        r#"{
  "resourceSpans": [
    {
      "resource": {
        "attributes": [
          {"key": "service.name", "value": {"stringValue": "orderService"}}
        ]
      },
      "scopeSpans": [
        {
          "spans": [
            {
              "traceId": "t1",
              "spanId": "s1",
              "name": "createOrder",
              "startTimeUnixNano": "1000",
              "endTimeUnixNano": "2000",
              "attributes": [
                {"key": "http.method", "value": {"stringValue": "POST"}},
                {"key": "retries", "value": {"intValue": "3"}}
              ],
              "status": {"code": 1}
            },
            {
              "traceId": "t1",
              "spanId": "s2",
              "parentSpanId": "s1",
              "name": "getInventory",
              "startTimeUnixNano": "1100",
              "endTimeUnixNano": "1900",
              "attributes": [
                {"key": "http.status_code", "value": {"intValue": "200"}}
              ],
              "status": {"code": 1}
            }
          ]
        }
      ]
    }
  ]
}"#
    }

    #[test]
    fn test_decode_otlp_trace() {
        let path = write_temp("trace.otlp.json", sample_otlp());
        let trace = load_otlp_trace(&path).unwrap();
        assert_eq!(trace.spans.len(), 2);

        let first = &trace.spans[0];
        assert_eq!(first.service, "orderService");
        assert_eq!(first.name, "createOrder");
        assert_eq!(first.start_nanos, 1000);
        assert_eq!(first.attributes.get("otlp.span_id"), Some(&json!("s1")));
        assert_eq!(first.attributes.get("retries"), Some(&json!(3)));

        let second = &trace.spans[1];
        assert_eq!(second.parent_span_id(), Some("s1"));
    }

    #[test]
    fn test_status_synthesis_for_creation_operation() {
        let path = write_temp("create.otlp.json", sample_otlp());
        let trace = load_otlp_trace(&path).unwrap();
        // createOrder has no http.status_code but OK status: inferred 201
        assert_eq!(
            trace.spans[0].attributes.get("response.status"),
            Some(&json!(201))
        );
        // getInventory copies its http.status_code
        assert_eq!(
            trace.spans[1].attributes.get("response.status"),
            Some(&json!(200))
        );
    }

    #[test]
    fn test_rejects_unparseable_timestamp() {
        let path = write_temp(
            "bad-ts.otlp.json",
            r#"{
  "resourceSpans": [
    {
      "resource": {"attributes": []},
      "scopeSpans": [
        {"spans": [{"traceId": "t", "spanId": "s", "name": "op",
          "startTimeUnixNano": "not-a-number", "endTimeUnixNano": "2"}]}
      ]
    }
  ]
}"#,
        );
        assert!(matches!(
            load_otlp_trace(&path),
            Err(TraceError::Timestamp { .. })
        ));
    }

    #[test]
    fn test_rejects_zero_spans() {
        let path = write_temp("empty.otlp.json", r#"{"resourceSpans": []}"#);
        assert!(matches!(load_otlp_trace(&path), Err(TraceError::Empty)));
    }

    #[test]
    fn test_unknown_service_fallback() {
        let path = write_temp(
            "nosvc.otlp.json",
            r#"{
  "resourceSpans": [
    {
      "resource": {"attributes": []},
      "scopeSpans": [
        {"spans": [{"traceId": "t", "spanId": "s", "name": "op",
          "startTimeUnixNano": "1", "endTimeUnixNano": "2"}]}
      ]
    }
  ]
}"#,
        );
        let trace = load_otlp_trace(&path).unwrap();
        assert_eq!(trace.spans[0].service, "unknown-service");
    }
}
