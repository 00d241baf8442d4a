//! Gate evaluation: absolute thresholds or relative-to-baseline deltas

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;

use choreoatlas_validate::{StepResult, StepStatus};

use crate::record::BaselineRecord;

/// Gate thresholds.
///
/// Without a baseline these are floors on the coverage ratios. With a
/// baseline they are tolerated degradation fractions: the gate passes
/// while `deltaPct >= -threshold`.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThresholdConfig {
    pub steps_threshold: f64,
    pub conditions_threshold: f64,
    /// Count SKIPped conditions as failures
    pub skip_as_fail: bool,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            steps_threshold: 0.9,
            conditions_threshold: 0.95,
            skip_as_fail: false,
        }
    }
}

/// The gate decision with its supporting numbers
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GateResult {
    pub checked: bool,
    pub passed: bool,
    pub details: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub violations: Vec<String>,
}

/// Evaluate the gate over validation results.
///
/// With a baseline the comparison is relative (delta mode); otherwise
/// the thresholds are absolute floors. Every run fills the same core
/// detail keys; relative mode adds the six baseline/delta numbers.
pub fn evaluate_gate(
    results: &[StepResult],
    thresholds: &ThresholdConfig,
    baseline: Option<&BaselineRecord>,
) -> GateResult {
    let steps_total = results.len();
    let steps_pass = results.iter().filter(|r| r.status.is_pass()).count();

    let mut conditions_total = 0usize;
    let mut conditions_pass = 0usize;
    let mut conditions_fail = 0usize;
    for result in results {
        for condition in &result.conditions {
            conditions_total += 1;
            match condition.status {
                StepStatus::Pass => conditions_pass += 1,
                StepStatus::Fail => conditions_fail += 1,
                StepStatus::Skip => {
                    if thresholds.skip_as_fail {
                        conditions_fail += 1;
                    }
                }
            }
        }
    }

    let steps_coverage = ratio(steps_pass, steps_total);
    let conditions_evaluated = conditions_pass + conditions_fail;
    let conditions_rate = ratio(conditions_pass, conditions_evaluated);

    let mut details = BTreeMap::new();
    details.insert("stepsTotal".into(), json!(steps_total));
    details.insert("stepsPass".into(), json!(steps_pass));
    details.insert("stepsCoverage".into(), json!(steps_coverage));
    details.insert("stepsThreshold".into(), json!(thresholds.steps_threshold));
    details.insert("conditionsTotal".into(), json!(conditions_total));
    details.insert("conditionsPass".into(), json!(conditions_pass));
    details.insert("conditionsFail".into(), json!(conditions_fail));
    details.insert("conditionsEvaluated".into(), json!(conditions_evaluated));
    details.insert("conditionsRate".into(), json!(conditions_rate));
    details.insert(
        "conditionsThreshold".into(),
        json!(thresholds.conditions_threshold),
    );
    details.insert("skipAsFail".into(), json!(thresholds.skip_as_fail));

    let mut violations = Vec::new();
    let (steps_passed, conditions_passed) = match baseline {
        Some(baseline) => {
            let baseline_steps_coverage =
                ratio(baseline.covered_steps.len(), baseline.steps_total);
            details.insert(
                "baselineStepsCoverage".into(),
                json!(baseline_steps_coverage),
            );

            let steps_delta_abs = steps_coverage - baseline_steps_coverage;
            let steps_delta_pct = if baseline_steps_coverage > 0.0 {
                (steps_coverage - baseline_steps_coverage) / baseline_steps_coverage
            } else {
                0.0
            };
            details.insert("stepsDeltaAbs".into(), json!(steps_delta_abs));
            details.insert("stepsDeltaPct".into(), json!(steps_delta_pct));

            let mut baseline_conditions_pass = 0usize;
            let mut baseline_conditions_total = 0usize;
            for step_conditions in baseline.conditions.values() {
                for passed in step_conditions.values() {
                    baseline_conditions_total += 1;
                    if *passed {
                        baseline_conditions_pass += 1;
                    }
                }
            }
            let baseline_conditions_rate =
                ratio(baseline_conditions_pass, baseline_conditions_total);
            details.insert(
                "baselineConditionsRate".into(),
                json!(baseline_conditions_rate),
            );

            let conditions_delta_abs = conditions_rate - baseline_conditions_rate;
            let conditions_delta_pct = if baseline_conditions_rate > 0.0 {
                (conditions_rate - baseline_conditions_rate) / baseline_conditions_rate
            } else {
                0.0
            };
            details.insert("conditionsDeltaAbs".into(), json!(conditions_delta_abs));
            details.insert("conditionsDeltaPct".into(), json!(conditions_delta_pct));

            // Degradation up to the threshold fraction is tolerated
            let steps_passed = steps_delta_pct >= -thresholds.steps_threshold;
            let conditions_passed = conditions_delta_pct >= -thresholds.conditions_threshold;
            if !steps_passed {
                violations.push(format!(
                    "steps coverage delta {:.1}% < allowed {:.1}%",
                    steps_delta_pct * 100.0,
                    -thresholds.steps_threshold * 100.0
                ));
            }
            if !conditions_passed {
                violations.push(format!(
                    "conditions rate delta {:.1}% < allowed {:.1}%",
                    conditions_delta_pct * 100.0,
                    -thresholds.conditions_threshold * 100.0
                ));
            }
            (steps_passed, conditions_passed)
        }
        None => {
            let steps_passed = steps_coverage >= thresholds.steps_threshold;
            let conditions_passed = conditions_rate >= thresholds.conditions_threshold;
            if !steps_passed {
                violations.push(format!(
                    "steps coverage {:.1}% < required {:.1}%",
                    steps_coverage * 100.0,
                    thresholds.steps_threshold * 100.0
                ));
            }
            if !conditions_passed {
                violations.push(format!(
                    "conditions pass rate {:.1}% < required {:.1}%",
                    conditions_rate * 100.0,
                    thresholds.conditions_threshold * 100.0
                ));
            }
            (steps_passed, conditions_passed)
        }
    };

    GateResult {
        checked: true,
        passed: steps_passed && conditions_passed,
        details,
        violations,
    }
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}
