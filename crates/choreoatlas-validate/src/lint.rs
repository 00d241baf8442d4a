//! Static lint: spec-only checks run before any trace is loaded
//!
//! Lint validates structure (step names, flow-vs-graph shape, DAG
//! acyclicity and reachability), call resolution against the operation
//! index, telemetry-key hygiene of declared inputs, and variable
//! dataflow from the well-known seed variables through step outputs.
//!
//! Any ERROR-level issue short-circuits validation at the CLI boundary.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};

use choreoatlas_spec::{FlowSpec, FlowStep, GraphSpec, OpIndex};

use crate::matching::split_call;

/// Variables assumed available before the first step runs
pub(crate) const SEED_VARIABLES: [&str; 5] = [
    "customerId",
    "orderItems",
    "totalAmount",
    "userId",
    "requestId",
];

/// Severity of a lint finding
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum IssueLevel {
    Error,
    Warn,
}

impl std::fmt::Display for IssueLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            IssueLevel::Error => "ERROR",
            IssueLevel::Warn => "WARN",
        };
        write!(f, "{}", s)
    }
}

/// One finding from the static lint pass
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LintIssue {
    pub level: IssueLevel,
    pub msg: String,
}

impl LintIssue {
    fn error(msg: impl Into<String>) -> Self {
        Self {
            level: IssueLevel::Error,
            msg: msg.into(),
        }
    }

    fn warn(msg: impl Into<String>) -> Self {
        Self {
            level: IssueLevel::Warn,
            msg: msg.into(),
        }
    }
}

/// True when any issue is ERROR level
pub fn has_errors(issues: &[LintIssue]) -> bool {
    issues.iter().any(|i| i.level == IssueLevel::Error)
}

/// Run the full static lint pass over a flow specification
pub fn lint_flow(fs: &FlowSpec, op_index: &OpIndex) -> Vec<LintIssue> {
    let mut issues = Vec::new();

    if fs.info.title.is_empty() {
        issues.push(LintIssue::warn("info.title is empty"));
    }

    if fs.flow.is_empty() && fs.graph.is_none() {
        issues.push(LintIssue::error("either flow or graph must be specified"));
        return issues;
    }
    if !fs.flow.is_empty() && fs.graph.is_some() {
        issues.push(LintIssue::error(
            "cannot specify both 'flow' and 'graph' - please choose one format",
        ));
        return issues;
    }

    match &fs.graph {
        Some(graph) => lint_graph(graph, op_index, &mut issues),
        None => lint_flow_steps(&fs.flow, op_index, &mut issues),
    }

    issues
}

// ── Flow format ──────────────────────────────────────────────────────

fn lint_flow_steps(flow: &[FlowStep], op_index: &OpIndex, issues: &mut Vec<LintIssue>) {
    issues.push(LintIssue::warn(
        "using the ordered flow format; the graph (DAG) format is recommended for better expressiveness and validation",
    ));

    // Step uniqueness and call validity, parallel children included
    let mut all_steps: Vec<&FlowStep> = Vec::new();
    for step in flow {
        all_steps.push(step);
        all_steps.extend(step.parallel.iter());
    }

    let mut step_names = HashSet::new();
    for (i, step) in all_steps.iter().enumerate() {
        if step.step.is_empty() {
            issues.push(LintIssue::error(format!(
                "step #{} is missing step name",
                i + 1
            )));
        }
        if !step_names.insert(step.step.as_str()) {
            issues.push(LintIssue::error(format!(
                "duplicate step name: {}",
                step.step
            )));
        }

        // Group parents carry no call of their own
        if step.call.is_empty() && step.is_parallel_group() {
            continue;
        }

        check_call(&format!("step={}", step.step), &step.call, op_index, issues);
        check_input_keys(&format!("step={}", step.step), step.input.as_ref(), issues);
    }

    // Variable flow: outputs become available to later steps; a
    // parallel group sees the pre-group set and contributes only after
    // the whole group completes
    let mut known_vars: HashSet<String> =
        SEED_VARIABLES.iter().map(|s| s.to_string()).collect();

    for step in flow {
        if step.is_parallel_group() {
            for child in &step.parallel {
                check_var_refs(&child.step, child.input.as_ref(), &known_vars, issues);
            }
            for child in &step.parallel {
                known_vars.extend(child.output.keys().cloned());
            }
        } else {
            check_var_refs(&step.step, step.input.as_ref(), &known_vars, issues);
            known_vars.extend(step.output.keys().cloned());
        }
    }
}

// ── Graph format ─────────────────────────────────────────────────────

fn lint_graph(graph: &GraphSpec, op_index: &OpIndex, issues: &mut Vec<LintIssue>) {
    if let Err(e) = graph.validate_structure() {
        issues.push(LintIssue::error(format!(
            "DAG structure validation failed: {}",
            e
        )));
        return;
    }

    for node in &graph.nodes {
        check_call(&format!("node={}", node.id), &node.call, op_index, issues);
        check_input_keys(&format!("node={}", node.id), node.input.as_ref(), issues);
    }

    lint_graph_variable_flow(graph, issues);
}

/// Every `${var}` a node references must be producible by a transitive
/// predecessor's output or be one of the seed variables.
fn lint_graph_variable_flow(graph: &GraphSpec, issues: &mut Vec<LintIssue>) {
    let mut reverse_adj: HashMap<&str, Vec<&str>> = HashMap::new();
    for edge in &graph.edges {
        reverse_adj
            .entry(edge.to.as_str())
            .or_default()
            .push(edge.from.as_str());
    }
    let node_outputs: HashMap<&str, Vec<&String>> = graph
        .nodes
        .iter()
        .map(|n| (n.id.as_str(), n.output.keys().collect()))
        .collect();

    for node in &graph.nodes {
        let required = collect_var_refs(node.input.as_ref());
        if required.is_empty() {
            continue;
        }

        let mut available: HashSet<String> =
            SEED_VARIABLES.iter().map(|s| s.to_string()).collect();
        let mut visited = HashSet::new();
        let mut stack: Vec<&str> = reverse_adj
            .get(node.id.as_str())
            .map(|preds| preds.clone())
            .unwrap_or_default();
        while let Some(current) = stack.pop() {
            if !visited.insert(current) {
                continue;
            }
            if let Some(outputs) = node_outputs.get(current) {
                available.extend(outputs.iter().map(|s| s.to_string()));
            }
            if let Some(preds) = reverse_adj.get(current) {
                stack.extend(preds.iter().copied());
            }
        }

        for var in &required {
            let root = var.split('.').next().unwrap_or(var);
            if !available.contains(root) {
                issues.push(LintIssue::error(format!(
                    "node {} references variable ${{{}}} that is not available from predecessor nodes",
                    node.id, var
                )));
            }
        }
    }
}

// ── Shared rules ─────────────────────────────────────────────────────

fn check_call(subject: &str, call: &str, op_index: &OpIndex, issues: &mut Vec<LintIssue>) {
    let Some((service, operation)) = split_call(call) else {
        issues.push(LintIssue::error(format!(
            "{} has invalid call: call must be in format 'serviceAlias.operationId'",
            subject
        )));
        return;
    };
    let Some(ops) = op_index.get(service) else {
        issues.push(LintIssue::error(format!(
            "{} references undeclared service: {}",
            subject, service
        )));
        return;
    };
    if !ops.contains_key(operation) {
        issues.push(LintIssue::error(format!(
            "{} references non-existent operation {} in service {}",
            subject, operation, service
        )));
    }
}

fn check_input_keys(subject: &str, input: Option<&Value>, issues: &mut Vec<LintIssue>) {
    let Some(input) = input else { return };
    let bad = find_telemetry_keys(input);
    if !bad.is_empty() {
        issues.push(LintIssue::error(format!(
            "{} input contains telemetry keys not allowed in FlowSpec.input: {}",
            subject,
            bad.join(", ")
        )));
    }
}

fn check_var_refs(
    step_name: &str,
    input: Option<&Value>,
    known_vars: &HashSet<String>,
    issues: &mut Vec<LintIssue>,
) {
    for var in collect_var_refs(input) {
        let root = var.split('.').next().unwrap_or(&var);
        if !known_vars.contains(root) {
            issues.push(LintIssue::error(format!(
                "step={} references unknown variable ${{{}}}",
                step_name, var
            )));
        }
    }
}

/// Collect distinct `${var}` / `${var.path}` references from an input
/// tree, sorted
pub(crate) fn collect_var_refs(value: Option<&Value>) -> Vec<String> {
    let re = Regex::new(r"\$\{\s*([a-zA-Z_][\w\-.]*)\s*\}").expect("the reference pattern is valid");
    let mut out = HashSet::new();
    if let Some(value) = value {
        collect_from_value(value, &re, &mut out);
    }
    let mut sorted: Vec<String> = out.into_iter().collect();
    sorted.sort();
    sorted
}

fn collect_from_value(value: &Value, re: &Regex, out: &mut HashSet<String>) {
    match value {
        Value::String(s) => {
            for caps in re.captures_iter(s) {
                out.insert(caps[1].to_string());
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_from_value(item, re, out);
            }
        }
        Value::Object(map) => {
            for item in map.values() {
                collect_from_value(item, re, out);
            }
        }
        _ => {}
    }
}

/// Keys that look like raw telemetry leaking into declared inputs.
///
/// Allowed top-level keys are `path`, `query`, `headers`, `body`; any
/// other top-level key, or any key under `body`, beginning with
/// `http.`, `otel.`, or `span.` (case-insensitive) is rejected.
fn find_telemetry_keys(input: &Value) -> Vec<String> {
    const ALLOWED_TOP_LEVEL: [&str; 4] = ["path", "query", "headers", "body"];

    let mut out = HashSet::new();
    if let Value::Object(map) = input {
        for key in map.keys() {
            if !ALLOWED_TOP_LEVEL.contains(&key.as_str()) && has_telemetry_prefix(key) {
                out.insert(key.clone());
            }
        }
        if let Some(Value::Object(body)) = map.get("body") {
            for key in body.keys() {
                if has_telemetry_prefix(key) {
                    out.insert(format!("body.{}", key));
                }
            }
        }
    }
    let mut sorted: Vec<String> = out.into_iter().collect();
    sorted.sort();
    sorted
}

fn has_telemetry_prefix(key: &str) -> bool {
    let lower = key.to_lowercase();
    lower.starts_with("http.") || lower.starts_with("otel.") || lower.starts_with("span.")
}
