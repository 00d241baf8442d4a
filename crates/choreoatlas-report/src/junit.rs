//! JUnit XML report formatter
//!
//! One `<testcase>` per step result; failures carry the step message,
//! condition details ride along as JSON in `<system-out>`, and the
//! `<properties>` block exposes `coverage.*` and `baseline.*` metrics
//! for CI dashboards.

use std::fmt::Write as _;
use std::path::Path;

use choreoatlas_baseline::GateResult;
use choreoatlas_validate::{StepResult, StepStatus};

use crate::errors::{ReportError, ReportResult};
use crate::summary::CoverageSummary;

/// Render the JUnit XML report as a string
pub fn render_junit_report(steps: &[StepResult], gate_result: Option<&GateResult>) -> String {
    let failures = steps.iter().filter(|s| s.status.is_fail()).count();
    let summary = CoverageSummary::from_results(steps);

    let mut out = String::new();
    out.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    let _ = writeln!(
        out,
        "<testsuite name=\"flowspec-validation\" tests=\"{}\" failures=\"{}\" time=\"0\">",
        steps.len(),
        failures
    );

    out.push_str("  <properties>\n");
    push_property(&mut out, "coverage.stepsTotal", summary.steps_total);
    push_property(&mut out, "coverage.stepsPass", summary.steps_pass);
    push_property(&mut out, "coverage.stepsFail", summary.steps_fail);
    push_property(&mut out, "coverage.stepsSkip", summary.steps_skip);
    push_property(&mut out, "coverage.conditionsTotal", summary.conditions_total);
    push_property(&mut out, "coverage.conditionsPass", summary.conditions_pass);
    push_property(&mut out, "coverage.conditionsFail", summary.conditions_fail);
    push_property(&mut out, "coverage.conditionsSkip", summary.conditions_skip);
    let _ = writeln!(
        out,
        "    <property name=\"coverage.coverageRate\" value=\"{:.2}\"/>",
        summary.coverage_rate
    );

    if let Some(gate) = gate_result {
        let baseline_props = [
            ("baselineStepsCoverage", "baseline.stepsCoverage"),
            ("stepsDeltaAbs", "baseline.stepsDeltaAbs"),
            ("stepsDeltaPct", "baseline.stepsDeltaPct"),
            ("baselineConditionsRate", "baseline.conditionsRate"),
            ("conditionsDeltaAbs", "baseline.conditionsDeltaAbs"),
            ("conditionsDeltaPct", "baseline.conditionsDeltaPct"),
        ];
        for (detail_key, property_name) in baseline_props {
            if let Some(value) = gate.details.get(detail_key).and_then(|v| v.as_f64()) {
                let _ = writeln!(
                    out,
                    "    <property name=\"{}\" value=\"{:.2}\"/>",
                    property_name, value
                );
            }
        }
    }
    out.push_str("  </properties>\n");

    for step in steps {
        let _ = write!(
            out,
            "  <testcase name=\"{}\" classname=\"{}\">",
            xml_escape(&step.step),
            xml_escape(&step.call)
        );
        if step.status == StepStatus::Fail {
            let message = step.message.as_deref().unwrap_or_default();
            let _ = write!(
                out,
                "\n    <failure message=\"{}\" type=\"ValidationFailure\">{}</failure>\n  ",
                xml_escape(message),
                xml_escape(message)
            );
        }
        if !step.conditions.is_empty() {
            let conditions_json =
                serde_json::to_string(&step.conditions).unwrap_or_else(|_| "[]".into());
            let _ = write!(
                out,
                "\n    <system-out><![CDATA[{}]]></system-out>\n  ",
                conditions_json
            );
        }
        out.push_str("</testcase>\n");
    }

    if !summary.uncovered_steps.is_empty() || !summary.service_coverage.is_empty() {
        out.push_str("  <system-out><![CDATA[\n");
        if let Ok(summary_json) = serde_json::to_string_pretty(&summary) {
            out.push_str(&summary_json);
        }
        out.push_str("\n  ]]></system-out>\n");
    }

    out.push_str("</testsuite>\n");
    out
}

/// Render and write the JUnit report to a file
pub fn write_junit_report(
    path: impl AsRef<Path>,
    steps: &[StepResult],
    gate_result: Option<&GateResult>,
) -> ReportResult<()> {
    let path = path.as_ref();
    std::fs::write(path, render_junit_report(steps, gate_result)).map_err(|source| {
        ReportError::Io {
            path: path.display().to_string(),
            source,
        }
    })
}

fn push_property(out: &mut String, name: &str, value: usize) {
    let _ = writeln!(out, "    <property name=\"{}\" value=\"{}\"/>", name, value);
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use choreoatlas_baseline::{evaluate_gate, ThresholdConfig};
    use choreoatlas_validate::{ConditionKind, ConditionResult};

    #[test]
    fn test_junit_testcases_and_failures() {
        let mut passing = StepResult::pass("s1", "order.createOrder");
        passing.conditions.push(ConditionResult {
            kind: ConditionKind::Post,
            name: "ok".into(),
            expr: "response.status == 200".into(),
            status: StepStatus::Pass,
            message: None,
        });
        let steps = vec![
            passing,
            StepResult::fail("s2", "shipping.ship", "no matching span found in trace"),
        ];
        let xml = render_junit_report(&steps, None);

        assert!(xml.contains("tests=\"2\" failures=\"1\""));
        assert!(xml.contains("<testcase name=\"s1\" classname=\"order.createOrder\">"));
        assert!(xml.contains("<failure message=\"no matching span found in trace\""));
        assert!(xml.contains("<system-out><![CDATA[[{\"kind\":\"post\""));
        assert!(xml.contains("coverage.stepsPass\" value=\"1\""));
    }

    #[test]
    fn test_junit_escapes_xml_characters() {
        let steps = vec![StepResult::fail("s<1>", "svc.op", "broken & \"odd\"")];
        let xml = render_junit_report(&steps, None);
        assert!(xml.contains("name=\"s&lt;1&gt;\""));
        assert!(xml.contains("broken &amp; &quot;odd&quot;"));
    }

    #[test]
    fn test_junit_baseline_properties() {
        use chrono::Utc;
        use std::collections::BTreeMap;
        let baseline = choreoatlas_baseline::BaselineRecord {
            schema_version: "1".into(),
            flow_id: "f".into(),
            flow_hash: "sha256:00".into(),
            generated_at: Utc::now(),
            steps_total: 1,
            covered_steps: vec!["s1".into()],
            conditions: BTreeMap::new(),
        };
        let steps = vec![StepResult::pass("s1", "a.op")];
        let gate = evaluate_gate(&steps, &ThresholdConfig::default(), Some(&baseline));
        let xml = render_junit_report(&steps, Some(&gate));
        assert!(xml.contains("baseline.stepsCoverage"));
        assert!(xml.contains("baseline.stepsDeltaPct"));
    }
}
