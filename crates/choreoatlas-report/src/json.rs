//! JSON report formatter

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::Path;

use choreoatlas_baseline::GateResult;
use choreoatlas_validate::{StepResult, StepStatus};

use crate::errors::{ReportError, ReportResult};
use crate::summary::CoverageSummary;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct JsonReport<'a> {
    timestamp: DateTime<Utc>,
    total_steps: usize,
    passed_steps: usize,
    failed_steps: usize,
    success: bool,
    steps: &'a [StepResult],
    summary: CoverageSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    gate_result: Option<&'a GateResult>,
}

/// Render the JSON report as a pretty-printed string
pub fn render_json_report(
    steps: &[StepResult],
    gate_result: Option<&GateResult>,
) -> ReportResult<String> {
    let mut summary = CoverageSummary::from_results(steps);
    if let Some(gate) = gate_result {
        summary.apply_gate_details(gate);
    }

    let passed_steps = steps.iter().filter(|s| s.status.is_pass()).count();
    let failed_steps = steps.len() - passed_steps;

    let report = JsonReport {
        timestamp: Utc::now(),
        total_steps: steps.len(),
        passed_steps,
        failed_steps,
        success: steps.iter().all(|s| s.status == StepStatus::Pass),
        steps,
        summary,
        gate_result,
    };

    serde_json::to_string_pretty(&report).map_err(|source| ReportError::Json { source })
}

/// Render and write the JSON report to a file
pub fn write_json_report(
    path: impl AsRef<Path>,
    steps: &[StepResult],
    gate_result: Option<&GateResult>,
) -> ReportResult<()> {
    let path = path.as_ref();
    let rendered = render_json_report(steps, gate_result)?;
    std::fs::write(path, rendered).map_err(|source| ReportError::Io {
        path: path.display().to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use choreoatlas_baseline::{evaluate_gate, ThresholdConfig};

    #[test]
    fn test_json_report_shape() {
        let steps = vec![
            StepResult::pass("s1", "order.createOrder"),
            StepResult::fail("s2", "shipping.ship", "no matching span found in trace"),
        ];
        let gate = evaluate_gate(&steps, &ThresholdConfig::default(), None);
        let rendered = render_json_report(&steps, Some(&gate)).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&rendered).unwrap();

        assert_eq!(parsed["totalSteps"], 2);
        assert_eq!(parsed["passedSteps"], 1);
        assert_eq!(parsed["failedSteps"], 1);
        assert_eq!(parsed["success"], false);
        assert_eq!(parsed["steps"][0]["status"], "PASS");
        assert_eq!(parsed["steps"][1]["message"], "no matching span found in trace");
        assert_eq!(parsed["summary"]["uncoveredSteps"][0], "s2");
        assert_eq!(parsed["gateResult"]["checked"], true);
        assert!(parsed["timestamp"].is_string());
    }

    #[test]
    fn test_json_report_without_gate() {
        let steps = vec![StepResult::pass("s1", "order.createOrder")];
        let rendered = render_json_report(&steps, None).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&rendered).unwrap();
        assert_eq!(parsed["success"], true);
        assert!(parsed.get("gateResult").is_none());
    }
}
