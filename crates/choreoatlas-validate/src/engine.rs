//! Matching engine: binds spec steps/nodes to observed spans
//!
//! Strategy selection is a deterministic predicate over the spec and
//! the trace:
//!
//! 1. Graph-mode specs validate node-by-node in topological order.
//! 2. Flows with any parallel group, or traces carrying OTLP
//!    parent-child metadata, validate through the call graph.
//! 3. Purely sequential flows over flat traces validate by time
//!    sequence with a forward-moving cursor.
//!
//! Causal checks are governed by an explicit [`ValidationConfig`]
//! threaded through the engine; there is no process-global state.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap, HashMap, HashSet};
use tracing::warn;

use choreoatlas_spec::{FlowSpec, FlowStep, GraphNode, GraphSpec, OpIndex};
use choreoatlas_trace::{Span, Trace};

use crate::callgraph::{CallGraph, CycleError};
use crate::conditions::evaluate_conditions;
use crate::matching::{call_key, normalize, split_call};
use crate::result::{StepResult, StepStatus};

/// How causal ordering between dependent calls is checked
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CausalityMode {
    /// Require OTLP parent-child span linkage
    Strict,
    /// Require non-decreasing start times
    #[default]
    Temporal,
    /// No causal check
    Off,
}

/// Engine configuration, set once per run
#[derive(Clone, Copy, Debug)]
pub struct ValidationConfig {
    /// Evaluate pre/postconditions on matched spans
    pub enable_semantic: bool,
    pub causality_mode: CausalityMode,
    /// Slack applied to call-graph edge constraints
    pub causality_tolerance_ms: i64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            enable_semantic: true,
            causality_mode: CausalityMode::Temporal,
            causality_tolerance_ms: 50,
        }
    }
}

impl ValidationConfig {
    fn tolerance_nanos(&self) -> i64 {
        self.causality_tolerance_ms * 1_000_000
    }
}

/// Validate a flow specification against an observed trace.
///
/// Returns per-step results plus an overall pass flag; the run never
/// aborts on a single failing step.
pub fn validate_against_trace(
    fs: &FlowSpec,
    op_index: &OpIndex,
    trace: &Trace,
    config: &ValidationConfig,
) -> (Vec<StepResult>, bool) {
    if fs.is_graph_mode() {
        return validate_graph_against_trace(fs, op_index, trace, config);
    }
    if selects_causality(fs, trace) {
        return validate_with_causality(fs, op_index, trace, config);
    }
    validate_with_time_sequence(fs, op_index, trace, config)
}

/// The deterministic strategy predicate for flow-mode specs
fn selects_causality(fs: &FlowSpec, trace: &Trace) -> bool {
    fs.flow.iter().any(|s| s.is_parallel_group()) || trace.has_otlp_metadata()
}

// ── Time-sequence strategy ───────────────────────────────────────────

fn validate_with_time_sequence(
    fs: &FlowSpec,
    op_index: &OpIndex,
    trace: &Trace,
    config: &ValidationConfig,
) -> (Vec<StepResult>, bool) {
    let mut results = Vec::new();
    let mut ok_all = true;

    let mut sorted: Vec<&Span> = trace.spans.iter().collect();
    sorted.sort_by_key(|s| s.start_nanos);

    let mut cursor = 0usize;
    for step in &fs.flow {
        // Parallel groups belong to the causality strategy
        if step.is_parallel_group() {
            continue;
        }

        let Some((service, operation)) = split_call(&step.call) else {
            results.push(StepResult::fail(
                &step.step,
                &step.call,
                "call must be in format 'serviceAlias.operationId'",
            ));
            ok_all = false;
            continue;
        };

        let matched = sorted[cursor..]
            .iter()
            .position(|sp| {
                normalize(&sp.service) == normalize(service)
                    && normalize(&sp.name) == normalize(operation)
            })
            .map(|offset| cursor + offset);

        match matched {
            Some(index) if index >= cursor => {
                let mut result = StepResult::pass(&step.step, &step.call);
                if index > cursor {
                    result.message = Some(format!(
                        "matched span #{} in time order (intermediate spans were skipped)",
                        index + 1
                    ));
                }

                if config.enable_semantic {
                    if let Some(op_spec) =
                        op_index.get(service).and_then(|ops| ops.get(operation))
                    {
                        let (conditions, semantics_ok) =
                            evaluate_conditions(step, op_spec, sorted[index], &BTreeMap::new());
                        result.conditions = conditions;
                        if !semantics_ok {
                            result.status = StepStatus::Fail;
                            result.push_message("semantic validation failed");
                            ok_all = false;
                        }
                    }
                }

                results.push(result);
                cursor = index + 1;
            }
            Some(_) => {
                // Unreachable with the forward scan above; kept so an
                // alternative matcher cannot silently accept reordering
                results.push(StepResult::fail(
                    &step.step,
                    &step.call,
                    "temporal regression: matched span precedes the previous step",
                ));
                ok_all = false;
            }
            None => {
                results.push(StepResult::fail(
                    &step.step,
                    &step.call,
                    "no matching span found in trace",
                ));
                ok_all = false;
            }
        }
    }

    (results, ok_all)
}

// ── Causality strategy ───────────────────────────────────────────────

fn validate_with_causality(
    fs: &FlowSpec,
    op_index: &OpIndex,
    trace: &Trace,
    config: &ValidationConfig,
) -> (Vec<StepResult>, bool) {
    let graph = CallGraph::build(&trace.spans);

    let violations = graph.validate_edge_constraints(config.tolerance_nanos());
    let (mut results, mut ok_all) = check_causality(fs, &graph);

    if !violations.is_empty() {
        ok_all = false;
        for violation in &violations {
            warn!(kind = %violation.kind, "call-graph violation: {}", violation.message);
        }
        results.insert(
            0,
            StepResult::fail(
                "DAG Validation",
                "internal",
                format!(
                    "detected {} call-graph constraint violations",
                    violations.len()
                ),
            ),
        );
    }

    if config.enable_semantic {
        for result in results.iter_mut() {
            if result.status != StepStatus::Pass {
                continue;
            }
            let Some((service, operation)) = split_call(&result.call) else {
                continue;
            };
            let Some(span) = trace.spans.iter().find(|sp| {
                normalize(&sp.service) == normalize(service)
                    && normalize(&sp.name) == normalize(operation)
            }) else {
                continue;
            };
            let Some(op_spec) = op_index.get(service).and_then(|ops| ops.get(operation)) else {
                continue;
            };
            let step = FlowStep {
                step: result.step.clone(),
                call: result.call.clone(),
                ..Default::default()
            };
            let (conditions, semantics_ok) =
                evaluate_conditions(&step, op_spec, span, &BTreeMap::new());
            result.conditions = conditions;
            if !semantics_ok {
                result.status = StepStatus::Fail;
                result.push_message("semantic validation failed");
                ok_all = false;
            }
        }
    }

    (results, ok_all)
}

fn check_causality(fs: &FlowSpec, graph: &CallGraph) -> (Vec<StepResult>, bool) {
    let mut results = Vec::new();
    let mut all_passed = true;

    for step in &fs.flow {
        if step.is_parallel_group() {
            let group_results = check_parallel_steps(&step.parallel, graph);
            for r in &group_results {
                if r.status != StepStatus::Pass {
                    all_passed = false;
                }
            }
            results.extend(group_results);
        } else if !step.step.is_empty() && !step.call.is_empty() {
            let result = check_single_step(step, graph);
            if result.status != StepStatus::Pass {
                all_passed = false;
            }
            results.push(result);
        }
    }

    (results, all_passed)
}

fn check_single_step(step: &FlowStep, graph: &CallGraph) -> StepResult {
    let Some((service, operation)) = split_call(&step.call) else {
        return StepResult::fail(
            &step.step,
            &step.call,
            "call must be in format 'serviceAlias.operationId'",
        );
    };
    match find_graph_node(graph, service, operation) {
        Some(_) => StepResult::pass(&step.step, &step.call),
        None => StepResult::fail(&step.step, &step.call, "no matching span found in trace"),
    }
}

fn check_parallel_steps(parallel: &[FlowStep], graph: &CallGraph) -> Vec<StepResult> {
    let mut results = Vec::new();
    let mut matched_nodes = Vec::new();

    for step in parallel {
        let Some((service, operation)) = split_call(&step.call) else {
            results.push(StepResult::fail(
                &step.step,
                &step.call,
                "call must be in format 'serviceAlias.operationId'",
            ));
            continue;
        };
        match find_graph_node(graph, service, operation) {
            Some(index) => {
                matched_nodes.push(index);
                results.push(StepResult::pass(&step.step, &step.call));
            }
            None => {
                results.push(StepResult::fail(
                    &step.step,
                    &step.call,
                    "no matching span found in trace",
                ));
            }
        }
    }

    // Every pair must overlap in time or share a parent span; one bad
    // pair demotes the whole group
    if matched_nodes.len() > 1 && !validate_concurrency(graph, &matched_nodes) {
        for result in results.iter_mut() {
            if result.status == StepStatus::Pass {
                result.status = StepStatus::Fail;
                result.message =
                    Some("concurrency constraint violation: steps not executed concurrently".into());
            }
        }
    }

    results
}

fn validate_concurrency(graph: &CallGraph, nodes: &[usize]) -> bool {
    for (i, &a) in nodes.iter().enumerate() {
        for &b in &nodes[i + 1..] {
            // A shared parent must be a real span; two unlinked roots
            // running back-to-back are not concurrent
            if !graph.overlaps(a, b) && !graph.shares_parent_span(a, b) {
                return false;
            }
        }
    }
    true
}

fn find_graph_node(graph: &CallGraph, service: &str, operation: &str) -> Option<usize> {
    graph.nodes().iter().position(|node| {
        normalize(&node.service) == normalize(service)
            && normalize(&node.operation) == normalize(operation)
    })
}

// ── DAG strategy ─────────────────────────────────────────────────────

fn validate_graph_against_trace(
    fs: &FlowSpec,
    op_index: &OpIndex,
    trace: &Trace,
    config: &ValidationConfig,
) -> (Vec<StepResult>, bool) {
    let Some(graph_spec) = &fs.graph else {
        return (Vec::new(), false);
    };
    let mut results = Vec::new();
    let mut ok_all = true;

    let call_graph = CallGraph::build(&trace.spans);
    let violations = call_graph.validate_edge_constraints(config.tolerance_nanos());
    if !violations.is_empty() {
        ok_all = false;
        for violation in &violations {
            warn!(kind = %violation.kind, "call-graph violation: {}", violation.message);
        }
        results.push(StepResult::fail(
            "DAG Validation",
            "internal",
            format!(
                "detected {} call-graph constraint violations",
                violations.len()
            ),
        ));
    }

    let mut span_index: HashMap<String, Vec<&Span>> = HashMap::new();
    for span in &trace.spans {
        span_index
            .entry(call_key(&span.service, &span.name))
            .or_default()
            .push(span);
    }

    let topo_order = match spec_topological_order(graph_spec) {
        Ok(order) => order,
        Err(CycleError) => {
            // Lint catches this earlier; report per node when reached
            for node in &graph_spec.nodes {
                results.push(StepResult::fail(
                    &node.id,
                    &node.call,
                    "DAG topological sort failed: cycle detected in graph",
                ));
            }
            return (results, false);
        }
    };

    let mut used_spans: HashSet<String> = HashSet::new();
    let mut bound: HashMap<&str, &Span> = HashMap::new();

    for node_id in &topo_order {
        let Some(node) = graph_spec.node(node_id) else {
            results.push(StepResult::fail(node_id, "", "node not found"));
            ok_all = false;
            continue;
        };

        let key = match split_call(&node.call) {
            Some((service, operation)) => call_key(service, operation),
            None => normalize(&node.call),
        };
        let matched = span_index
            .get(&key)
            .and_then(|candidates| {
                candidates
                    .iter()
                    .find(|sp| !used_spans.contains(&sp.synthetic_id()))
            })
            .copied();

        let Some(span) = matched else {
            results.push(StepResult::fail(
                &node.id,
                &node.call,
                "no matching span found in trace",
            ));
            ok_all = false;
            continue;
        };
        used_spans.insert(span.synthetic_id());
        bound.insert(node.id.as_str(), span);

        if config.causality_mode != CausalityMode::Off {
            if let Err(message) =
                check_node_causality(node, span, graph_spec, &bound, config.causality_mode)
            {
                results.push(StepResult::fail(&node.id, &node.call, message));
                ok_all = false;
                continue;
            }
        }

        let mut result = StepResult::pass(&node.id, &node.call);
        if config.enable_semantic {
            if let Some((service, operation)) = split_call(&node.call) {
                if let Some(op_spec) = op_index.get(service).and_then(|ops| ops.get(operation)) {
                    let step = FlowStep {
                        step: node.id.clone(),
                        call: node.call.clone(),
                        input: node.input.clone(),
                        output: node.output.clone(),
                        meta: node.meta.clone(),
                        parallel: Vec::new(),
                    };
                    let (conditions, _) =
                        evaluate_conditions(&step, op_spec, span, &BTreeMap::new());
                    let any_failed = conditions.iter().any(|c| c.status == StepStatus::Fail);
                    result.conditions = conditions;
                    if any_failed {
                        result.status = StepStatus::Fail;
                        result.message = Some("semantic validation failed".into());
                        ok_all = false;
                    }
                }
            }
        }
        results.push(result);
    }

    (results, ok_all)
}

/// Predecessor checks for one bound node.
///
/// Strict mode requires OTLP parent-child linkage. Temporal mode
/// requires non-negative start ordering; tolerance deliberately does
/// not apply here, only to call-graph edge constraints.
fn check_node_causality(
    node: &GraphNode,
    span: &Span,
    graph_spec: &GraphSpec,
    bound: &HashMap<&str, &Span>,
    mode: CausalityMode,
) -> Result<(), String> {
    for pred_id in graph_spec.predecessors(&node.id) {
        // An unbound predecessor fails its own validation
        let Some(pred_span) = bound.get(pred_id) else {
            continue;
        };
        match mode {
            CausalityMode::Strict => {
                let parent_id = pred_span
                    .attributes
                    .get("otlp.span_id")
                    .and_then(|v| v.as_str());
                let linked = matches!(
                    (span.parent_span_id(), parent_id),
                    (Some(child_parent), Some(parent)) if child_parent == parent
                );
                if !linked {
                    return Err(format!(
                        "causality validation failed: node {} must be a child span of {} (strict mode)",
                        node.id, pred_id
                    ));
                }
            }
            CausalityMode::Temporal => {
                if span.start_nanos < pred_span.start_nanos {
                    return Err(format!(
                        "causality validation failed: node {} starts before predecessor {} (temporal mode)",
                        node.id, pred_id
                    ));
                }
            }
            CausalityMode::Off => {}
        }
    }
    Ok(())
}

/// Kahn topological order over the spec DAG, lexicographic tie-break
fn spec_topological_order(graph: &GraphSpec) -> Result<Vec<String>, CycleError> {
    let mut in_degree: HashMap<&str, usize> =
        graph.nodes.iter().map(|n| (n.id.as_str(), 0)).collect();
    let mut adj: HashMap<&str, Vec<&str>> = HashMap::new();
    for edge in &graph.edges {
        adj.entry(edge.from.as_str())
            .or_default()
            .push(edge.to.as_str());
        if let Some(d) = in_degree.get_mut(edge.to.as_str()) {
            *d += 1;
        }
    }

    let mut ready: BinaryHeap<Reverse<&str>> = in_degree
        .iter()
        .filter(|(_, d)| **d == 0)
        .map(|(id, _)| Reverse(*id))
        .collect();

    let mut order = Vec::new();
    while let Some(Reverse(current)) = ready.pop() {
        order.push(current.to_string());
        if let Some(next) = adj.get(current) {
            for &neighbor in next {
                if let Some(d) = in_degree.get_mut(neighbor) {
                    *d -= 1;
                    if *d == 0 {
                        ready.push(Reverse(neighbor));
                    }
                }
            }
        }
    }

    if order.len() != graph.nodes.len() {
        return Err(CycleError);
    }
    Ok(order)
}
