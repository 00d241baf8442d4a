//! Coverage summary: the reducer over step results

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use choreoatlas_baseline::GateResult;
use choreoatlas_validate::{StepResult, StepStatus};

/// Aggregated coverage numbers over a validation run
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoverageSummary {
    pub steps_total: usize,
    pub steps_pass: usize,
    pub steps_fail: usize,
    pub steps_skip: usize,
    pub conditions_total: usize,
    pub conditions_pass: usize,
    pub conditions_fail: usize,
    pub conditions_skip: usize,
    /// Names of FAILed steps
    pub uncovered_steps: Vec<String>,
    /// Steps passed as a percentage of all steps
    pub coverage_rate: f64,
    /// Step count per service alias (the prefix of each step's call)
    pub service_coverage: BTreeMap<String, usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub baseline_steps_coverage: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub steps_delta_abs: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub steps_delta_pct: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub baseline_conditions_rate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conditions_delta_abs: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conditions_delta_pct: Option<f64>,
}

impl CoverageSummary {
    /// Reduce step results to summary statistics
    pub fn from_results(steps: &[StepResult]) -> Self {
        let mut summary = CoverageSummary::default();

        for step in steps {
            summary.steps_total += 1;
            match step.status {
                StepStatus::Pass => summary.steps_pass += 1,
                StepStatus::Fail => {
                    summary.steps_fail += 1;
                    summary.uncovered_steps.push(step.step.clone());
                }
                StepStatus::Skip => summary.steps_skip += 1,
            }

            if let Some((service, _)) = step.call.split_once('.') {
                if !service.is_empty() {
                    *summary.service_coverage.entry(service.to_string()).or_insert(0) += 1;
                }
            }

            for condition in &step.conditions {
                summary.conditions_total += 1;
                match condition.status {
                    StepStatus::Pass => summary.conditions_pass += 1,
                    StepStatus::Fail => summary.conditions_fail += 1,
                    StepStatus::Skip => summary.conditions_skip += 1,
                }
            }
        }

        if summary.steps_total > 0 {
            summary.coverage_rate =
                summary.steps_pass as f64 / summary.steps_total as f64 * 100.0;
        }

        summary
    }

    /// Copy the baseline/delta numbers out of a gate result, when the
    /// gate ran in relative mode
    pub fn apply_gate_details(&mut self, gate: &GateResult) {
        let get = |key: &str| gate.details.get(key).and_then(|v| v.as_f64());
        self.baseline_steps_coverage = get("baselineStepsCoverage");
        self.steps_delta_abs = get("stepsDeltaAbs");
        self.steps_delta_pct = get("stepsDeltaPct");
        self.baseline_conditions_rate = get("baselineConditionsRate");
        self.conditions_delta_abs = get("conditionsDeltaAbs");
        self.conditions_delta_pct = get("conditionsDeltaPct");
    }
}
