//! Baseline records: a snapshot of a previous run's coverage

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::Path;

use choreoatlas_spec::FlowSpec;
use choreoatlas_validate::StepResult;

use crate::errors::{BaselineError, BaselineResult};

const SCHEMA_VERSION: &str = "1";

/// A recorded baseline for relative gate comparison
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BaselineRecord {
    pub schema_version: String,
    pub flow_id: String,
    /// `sha256:<hex>` over the raw bytes of the flow file
    pub flow_hash: String,
    pub generated_at: DateTime<Utc>,
    pub steps_total: usize,
    /// Names of steps that PASSed
    pub covered_steps: Vec<String>,
    /// Per-step condition outcomes, keyed `"{kind}:{name}"`
    pub conditions: BTreeMap<String, BTreeMap<String, bool>>,
}

/// Build a baseline from validation results.
///
/// The flow file is re-read so the hash covers exactly the bytes the
/// run was validated against.
pub fn record_baseline(
    flow: &FlowSpec,
    results: &[StepResult],
    flow_path: impl AsRef<Path>,
) -> BaselineResult<BaselineRecord> {
    let flow_path = flow_path.as_ref();
    let flow_bytes = std::fs::read(flow_path).map_err(|source| BaselineError::Io {
        path: flow_path.display().to_string(),
        source,
    })?;
    let flow_hash = format!("sha256:{:x}", Sha256::digest(&flow_bytes));

    let covered_steps: Vec<String> = results
        .iter()
        .filter(|r| r.status.is_pass())
        .map(|r| r.step.clone())
        .collect();

    let mut conditions = BTreeMap::new();
    for result in results {
        if result.conditions.is_empty() {
            continue;
        }
        let step_conditions: BTreeMap<String, bool> = result
            .conditions
            .iter()
            .map(|c| (format!("{}:{}", c.kind, c.name), c.status.is_pass()))
            .collect();
        conditions.insert(result.step.clone(), step_conditions);
    }

    Ok(BaselineRecord {
        schema_version: SCHEMA_VERSION.into(),
        flow_id: flow.info.title.clone(),
        flow_hash,
        generated_at: Utc::now(),
        steps_total: flow.steps_count(),
        covered_steps,
        conditions,
    })
}

/// Write a baseline as pretty-printed JSON
pub fn save_baseline(baseline: &BaselineRecord, path: impl AsRef<Path>) -> BaselineResult<()> {
    let path = path.as_ref();
    let data = serde_json::to_vec_pretty(baseline).map_err(|source| BaselineError::Json {
        path: path.display().to_string(),
        source,
    })?;
    std::fs::write(path, data).map_err(|source| BaselineError::Io {
        path: path.display().to_string(),
        source,
    })
}

/// Load a baseline, rejecting any schema version other than `"1"`
pub fn load_baseline(path: impl AsRef<Path>) -> BaselineResult<BaselineRecord> {
    let path = path.as_ref();
    let bytes = std::fs::read(path).map_err(|source| BaselineError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let baseline: BaselineRecord =
        serde_json::from_slice(&bytes).map_err(|source| BaselineError::Json {
            path: path.display().to_string(),
            source,
        })?;
    if baseline.schema_version != SCHEMA_VERSION {
        return Err(BaselineError::SchemaVersion {
            found: baseline.schema_version,
        });
    }
    Ok(baseline)
}

#[cfg(test)]
mod tests {
    use super::*;
    use choreoatlas_spec::{FlowInfo, FlowStep};
    use choreoatlas_validate::{ConditionKind, ConditionResult, StepStatus};

    fn temp_dir() -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("ca-baseline-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn flow_with_steps(names: &[&str]) -> FlowSpec {
        FlowSpec {
            info: FlowInfo {
                title: "Order Flow".into(),
                description: None,
                version: None,
            },
            services: BTreeMap::new(),
            flow: names
                .iter()
                .map(|n| FlowStep {
                    step: n.to_string(),
                    call: "svc.op".into(),
                    ..Default::default()
                })
                .collect(),
            graph: None,
        }
    }

    fn pass_with_condition(step: &str, name: &str, status: StepStatus) -> StepResult {
        let mut result = StepResult::pass(step, "svc.op");
        result.conditions.push(ConditionResult {
            kind: ConditionKind::Post,
            name: name.into(),
            expr: "response.status == 200".into(),
            status,
            message: None,
        });
        result
    }

    #[test]
    fn test_record_baseline_covers_passed_steps() {
        let dir = temp_dir();
        let flow_path = dir.join("flow.yaml");
        std::fs::write(&flow_path, "info:\n  title: Order Flow\n").unwrap();

        let flow = flow_with_steps(&["s1", "s2", "s3"]);
        let results = vec![
            pass_with_condition("s1", "ok", StepStatus::Pass),
            StepResult::pass("s2", "svc.op"),
            StepResult::fail("s3", "svc.op", "no matching span found in trace"),
        ];

        let baseline = record_baseline(&flow, &results, &flow_path).unwrap();
        assert_eq!(baseline.schema_version, "1");
        assert_eq!(baseline.flow_id, "Order Flow");
        assert_eq!(baseline.steps_total, 3);
        assert_eq!(baseline.covered_steps, vec!["s1", "s2"]);
        assert!(baseline.flow_hash.starts_with("sha256:"));
        assert_eq!(baseline.conditions["s1"]["post:ok"], true);
        assert!(!baseline.conditions.contains_key("s2"));
    }

    #[test]
    fn test_flow_hash_stable_for_identical_bytes() {
        let dir = temp_dir();
        let flow_path = dir.join("hash-me.yaml");
        std::fs::write(&flow_path, "info:\n  title: T\n").unwrap();
        let flow = flow_with_steps(&["s1"]);
        let a = record_baseline(&flow, &[], &flow_path).unwrap();
        let b = record_baseline(&flow, &[], &flow_path).unwrap();
        assert_eq!(a.flow_hash, b.flow_hash);

        std::fs::write(&flow_path, "info:\n  title: Changed\n").unwrap();
        let c = record_baseline(&flow, &[], &flow_path).unwrap();
        assert_ne!(a.flow_hash, c.flow_hash);
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = temp_dir();
        let flow_path = dir.join("rt-flow.yaml");
        std::fs::write(&flow_path, "info:\n  title: RT\n").unwrap();
        let flow = flow_with_steps(&["s1", "s2"]);
        let results = vec![
            pass_with_condition("s1", "ok", StepStatus::Pass),
            pass_with_condition("s2", "created", StepStatus::Fail),
        ];
        let baseline = record_baseline(&flow, &results, &flow_path).unwrap();

        let out = dir.join("baseline.json");
        save_baseline(&baseline, &out).unwrap();
        let loaded = load_baseline(&out).unwrap();
        assert_eq!(loaded, baseline);
    }

    #[test]
    fn test_load_rejects_wrong_schema_version() {
        let dir = temp_dir();
        let out = dir.join("v2.json");
        std::fs::write(
            &out,
            r#"{
  "schemaVersion": "2",
  "flowId": "x",
  "flowHash": "sha256:00",
  "generatedAt": "2025-01-01T00:00:00Z",
  "stepsTotal": 0,
  "coveredSteps": [],
  "conditions": {}
}"#,
        )
        .unwrap();
        assert!(matches!(
            load_baseline(&out),
            Err(BaselineError::SchemaVersion { .. })
        ));
    }
}
