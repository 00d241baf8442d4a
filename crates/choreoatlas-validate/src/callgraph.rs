//! Call graph: spans linked by causal and temporal edges
//!
//! Nodes live in an arena and refer to each other by index; the
//! `parent`/`children` links are traversal back-references, not an
//! ownership graph. Edges carry span ids and one of three
//! relationships:
//!
//! - `parent`: OTLP parent/child linkage
//! - `follows`: sibling spans where the first ends before the second starts
//! - `concurrent`: sibling spans whose intervals overlap
//!
//! Built once per run from the trace; read-only afterwards.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, VecDeque};

use choreoatlas_trace::Span;

/// A span projected into the call graph
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallNode {
    pub span_id: String,
    pub trace_id: String,
    pub service: String,
    pub operation: String,
    pub start_nanos: i64,
    pub end_nanos: i64,
    pub attributes: BTreeMap<String, Value>,
    /// Arena index of the parent node, if linked
    #[serde(skip)]
    pub parent: Option<usize>,
    /// Arena indices of child nodes
    #[serde(skip)]
    pub children: Vec<usize>,
}

/// Relationship carried by a call edge
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeRelationship {
    Parent,
    Follows,
    Concurrent,
}

/// A directed edge between two spans
#[derive(Clone, Debug, Serialize)]
pub struct CallEdge {
    pub from: String,
    pub to: String,
    pub relationship: EdgeRelationship,
}

/// The kind of an edge-constraint violation
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ViolationKind {
    Cycle,
    Causality,
    ParentChild,
    Overlap,
}

impl std::fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ViolationKind::Cycle => "cycle",
            ViolationKind::Causality => "causality",
            ViolationKind::ParentChild => "parent-child",
            ViolationKind::Overlap => "overlap",
        };
        write!(f, "{}", s)
    }
}

/// An edge that violates its temporal or causal constraint
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgeViolation {
    pub from: String,
    pub to: String,
    pub kind: ViolationKind,
    pub message: String,
}

/// Raised when a topological sort hits a cycle
#[derive(Debug, thiserror::Error)]
#[error("cannot complete topological sort: cycle detected in call graph")]
pub struct CycleError;

/// Aggregate numbers about a call graph
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallGraphStats {
    pub total_nodes: usize,
    pub total_edges: usize,
    pub root_nodes: usize,
    pub concurrent_pairs: usize,
    pub services: BTreeMap<String, usize>,
}

/// The derived DAG of spans
#[derive(Clone, Debug, Default)]
pub struct CallGraph {
    nodes: Vec<CallNode>,
    index: HashMap<String, usize>,
    edges: Vec<CallEdge>,
}

impl CallGraph {
    /// Build the call graph from a span list.
    ///
    /// One node per span (synthetic ids when OTLP ids are absent, first
    /// span wins on id collision), parent edges from
    /// `otlp.parent_span_id`, then follows/concurrent edges between
    /// start-ordered siblings.
    pub fn build(spans: &[Span]) -> Self {
        let mut graph = CallGraph::default();

        for span in spans {
            let span_id = span.span_id();
            if graph.index.contains_key(&span_id) {
                continue;
            }
            let idx = graph.nodes.len();
            graph.nodes.push(CallNode {
                span_id: span_id.clone(),
                trace_id: span.trace_id(),
                service: span.service.clone(),
                operation: span.name.clone(),
                start_nanos: span.start_nanos,
                end_nanos: span.end_nanos,
                attributes: span.attributes.clone(),
                parent: None,
                children: Vec::new(),
            });
            graph.index.insert(span_id, idx);
        }

        for span in spans {
            let span_id = span.span_id();
            let Some(parent_id) = span.parent_span_id() else {
                continue;
            };
            if parent_id == span_id {
                continue;
            }
            let (Some(&child_idx), Some(&parent_idx)) =
                (graph.index.get(&span_id), graph.index.get(parent_id))
            else {
                continue;
            };
            graph.nodes[child_idx].parent = Some(parent_idx);
            graph.nodes[parent_idx].children.push(child_idx);
            graph.edges.push(CallEdge {
                from: parent_id.to_string(),
                to: span_id,
                relationship: EdgeRelationship::Parent,
            });
        }

        graph.build_temporal_edges();
        graph
    }

    /// Nodes in arena (span input) order
    pub fn nodes(&self) -> &[CallNode] {
        &self.nodes
    }

    /// All edges
    pub fn edges(&self) -> &[CallEdge] {
        &self.edges
    }

    /// Arena index of a span id
    pub fn index_of(&self, span_id: &str) -> Option<usize> {
        self.index.get(span_id).copied()
    }

    /// True when both nodes hang off the same parent (or both are
    /// roots); this is the sibling test used for temporal edges
    pub fn same_parent(&self, a: usize, b: usize) -> bool {
        self.nodes[a].parent == self.nodes[b].parent
    }

    /// True when both nodes are children of the same actual parent
    /// span; two roots do not count
    pub fn shares_parent_span(&self, a: usize, b: usize) -> bool {
        self.nodes[a].parent.is_some() && self.nodes[a].parent == self.nodes[b].parent
    }

    /// True when the two nodes' time intervals overlap
    pub fn overlaps(&self, a: usize, b: usize) -> bool {
        intervals_overlap(&self.nodes[a], &self.nodes[b])
    }

    fn build_temporal_edges(&mut self) {
        let mut order: Vec<usize> = (0..self.nodes.len()).collect();
        order.sort_by(|&a, &b| {
            self.nodes[a]
                .start_nanos
                .cmp(&self.nodes[b].start_nanos)
                .then_with(|| self.nodes[a].span_id.cmp(&self.nodes[b].span_id))
        });

        for pair in order.windows(2) {
            let (current, next) = (pair[0], pair[1]);
            if !self.same_parent(current, next) {
                continue;
            }
            if self.nodes[current].end_nanos <= self.nodes[next].start_nanos {
                self.edges.push(CallEdge {
                    from: self.nodes[current].span_id.clone(),
                    to: self.nodes[next].span_id.clone(),
                    relationship: EdgeRelationship::Follows,
                });
            } else if self.overlaps(current, next) {
                self.edges.push(CallEdge {
                    from: self.nodes[current].span_id.clone(),
                    to: self.nodes[next].span_id.clone(),
                    relationship: EdgeRelationship::Concurrent,
                });
            }
        }
    }

    /// Detect a cycle over non-concurrent edges; returns the cycle path
    pub fn detect_cycle(&self) -> Option<Vec<String>> {
        let adj = self.causal_adjacency();

        fn dfs<'a>(
            id: &'a str,
            adj: &HashMap<&'a str, Vec<&'a str>>,
            visited: &mut HashMap<&'a str, bool>,
            on_stack: &mut HashMap<&'a str, bool>,
            path: &mut Vec<&'a str>,
        ) -> Option<Vec<String>> {
            visited.insert(id, true);
            on_stack.insert(id, true);
            path.push(id);

            if let Some(next) = adj.get(id) {
                for &to in next {
                    if !visited.get(to).copied().unwrap_or(false) {
                        if let Some(cycle) = dfs(to, adj, visited, on_stack, path) {
                            return Some(cycle);
                        }
                    } else if on_stack.get(to).copied().unwrap_or(false) {
                        let start = path.iter().position(|&p| p == to).unwrap_or(0);
                        let mut cycle: Vec<String> =
                            path[start..].iter().map(|s| s.to_string()).collect();
                        cycle.push(to.to_string());
                        return Some(cycle);
                    }
                }
            }

            on_stack.insert(id, false);
            path.pop();
            None
        }

        let mut ids: Vec<&str> = self.nodes.iter().map(|n| n.span_id.as_str()).collect();
        ids.sort_unstable();

        let mut visited = HashMap::new();
        let mut on_stack = HashMap::new();
        for id in ids {
            if !visited.get(id).copied().unwrap_or(false) {
                let mut path = Vec::new();
                if let Some(cycle) = dfs(id, &adj, &mut visited, &mut on_stack, &mut path) {
                    return Some(cycle);
                }
            }
        }
        None
    }

    /// Check every edge against its constraint, with tolerance applied
    /// to the temporal ones.
    pub fn validate_edge_constraints(&self, tolerance_nanos: i64) -> Vec<EdgeViolation> {
        let mut violations = Vec::new();

        if let Some(cycle) = self.detect_cycle() {
            let from = cycle
                .len()
                .checked_sub(2)
                .and_then(|i| cycle.get(i))
                .cloned()
                .unwrap_or_default();
            let to = cycle.last().cloned().unwrap_or_default();
            violations.push(EdgeViolation {
                from,
                to,
                kind: ViolationKind::Cycle,
                message: format!("cycle detected: {}", cycle.join(" -> ")),
            });
        }

        for edge in &self.edges {
            let (Some(&from_idx), Some(&to_idx)) =
                (self.index.get(&edge.from), self.index.get(&edge.to))
            else {
                continue;
            };
            let from = &self.nodes[from_idx];
            let to = &self.nodes[to_idx];

            match edge.relationship {
                EdgeRelationship::Follows => {
                    if from.end_nanos > to.start_nanos + tolerance_nanos {
                        violations.push(EdgeViolation {
                            from: edge.from.clone(),
                            to: edge.to.clone(),
                            kind: ViolationKind::Causality,
                            message: format!(
                                "{}.{} should complete before {}.{} starts (tolerance {}ms)",
                                from.service,
                                from.operation,
                                to.service,
                                to.operation,
                                tolerance_nanos / 1_000_000
                            ),
                        });
                    }
                }
                EdgeRelationship::Parent => {
                    if to.start_nanos < from.start_nanos - tolerance_nanos
                        || to.end_nanos > from.end_nanos + tolerance_nanos
                    {
                        violations.push(EdgeViolation {
                            from: edge.from.clone(),
                            to: edge.to.clone(),
                            kind: ViolationKind::ParentChild,
                            message: format!(
                                "{}.{} should run within parent {}.{} time range",
                                to.service, to.operation, from.service, from.operation
                            ),
                        });
                    }
                }
                EdgeRelationship::Concurrent => {
                    if !intervals_overlap(from, to) {
                        violations.push(EdgeViolation {
                            from: edge.from.clone(),
                            to: edge.to.clone(),
                            kind: ViolationKind::Overlap,
                            message: format!(
                                "{}.{} and {}.{} should overlap in time but do not",
                                from.service, from.operation, to.service, to.operation
                            ),
                        });
                    }
                }
            }
        }

        violations
    }

    /// Kahn topological order over non-concurrent edges
    pub fn topological_order(&self) -> Result<Vec<String>, CycleError> {
        let mut in_degree: BTreeMap<&str, usize> = self
            .nodes
            .iter()
            .map(|n| (n.span_id.as_str(), 0))
            .collect();
        for edge in &self.edges {
            if edge.relationship != EdgeRelationship::Concurrent {
                if let Some(d) = in_degree.get_mut(edge.to.as_str()) {
                    *d += 1;
                }
            }
        }

        let mut queue: VecDeque<&str> = in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(id, _)| *id)
            .collect();

        let mut sorted = Vec::new();
        while let Some(current) = queue.pop_front() {
            sorted.push(current.to_string());
            for edge in &self.edges {
                if edge.from == current && edge.relationship != EdgeRelationship::Concurrent {
                    if let Some(d) = in_degree.get_mut(edge.to.as_str()) {
                        *d -= 1;
                        if *d == 0 {
                            queue.push_back(edge.to.as_str());
                        }
                    }
                }
            }
        }

        if sorted.len() != self.nodes.len() {
            return Err(CycleError);
        }
        Ok(sorted)
    }

    /// Aggregate numbers for reporting and diagnostics
    pub fn stats(&self) -> CallGraphStats {
        let mut services = BTreeMap::new();
        let mut root_nodes = 0;
        for node in &self.nodes {
            *services.entry(node.service.clone()).or_insert(0) += 1;
            if node.parent.is_none() {
                root_nodes += 1;
            }
        }
        let concurrent_pairs = self
            .edges
            .iter()
            .filter(|e| e.relationship == EdgeRelationship::Concurrent)
            .count();
        CallGraphStats {
            total_nodes: self.nodes.len(),
            total_edges: self.edges.len(),
            root_nodes,
            concurrent_pairs,
            services,
        }
    }

    fn causal_adjacency(&self) -> HashMap<&str, Vec<&str>> {
        let mut adj: HashMap<&str, Vec<&str>> = HashMap::new();
        for edge in &self.edges {
            if edge.relationship != EdgeRelationship::Concurrent {
                adj.entry(edge.from.as_str())
                    .or_default()
                    .push(edge.to.as_str());
            }
        }
        adj
    }
}

fn intervals_overlap(a: &CallNode, b: &CallNode) -> bool {
    a.start_nanos < b.end_nanos && b.start_nanos < a.end_nanos
}
