//! FlowSpec: the choreography document and its two representations
//!
//! The graph representation keeps `depends` declarations on nodes and
//! derives explicit edges from them when none are declared. Derivation
//! happens at load time and is idempotent, so consumers always observe
//! a consistent edge set.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::path::Path;

use crate::errors::{SpecError, SpecResult};
use crate::service::{load_service_spec, ServiceOperation, ServiceSpecFile};

/// Operation lookup built from the service bindings: alias → operationId → operation
pub type OpIndex = BTreeMap<String, BTreeMap<String, ServiceOperation>>;

// ── Document model ───────────────────────────────────────────────────

/// A flow specification document
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FlowSpec {
    pub info: FlowInfo,
    #[serde(default)]
    pub services: BTreeMap<String, ServiceBinding>,
    /// Ordered flow format
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub flow: Vec<FlowStep>,
    /// DAG format
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub graph: Option<GraphSpec>,
}

/// Basic flow information
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FlowInfo {
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// Binds a service alias to its ServiceSpec file
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServiceBinding {
    /// Path to the service spec document, relative to the flow file
    pub spec: String,
}

/// A step in the ordered flow format
///
/// A step is either a leaf call (`step` + `call`) or a parallel group
/// (`parallel` non-empty; the group's own `call` is ignored).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FlowStep {
    #[serde(default)]
    pub step: String,
    /// Format: "serviceAlias.operationId"
    #[serde(default)]
    pub call: String,
    /// Request input tree; string values may carry `${var}` references
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
    /// Output mappings, variable name → source expression
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub output: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
    /// Parallel step group
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parallel: Vec<FlowStep>,
}

impl FlowStep {
    /// True when this entry is a parallel group rather than a leaf call
    pub fn is_parallel_group(&self) -> bool {
        !self.parallel.is_empty()
    }
}

/// The DAG representation: call nodes plus explicit or derived edges
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GraphSpec {
    pub nodes: Vec<GraphNode>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub edges: Vec<GraphEdge>,
    #[serde(skip)]
    ensured: bool,
}

/// A node in the DAG
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    pub call: String,
    /// Node IDs this node depends on
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub output: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

/// An edge in the DAG
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GraphEdge {
    pub from: String,
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

// ── Loading ──────────────────────────────────────────────────────────

/// Load a flow specification from a YAML file.
///
/// Enforces the exactly-one-of `flow`/`graph` invariant and derives
/// graph edges before returning, so callers never see an un-ensured
/// graph.
pub fn load_flow_spec(path: impl AsRef<Path>) -> SpecResult<FlowSpec> {
    let path = path.as_ref();
    let bytes = std::fs::read(path).map_err(|source| SpecError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let mut fs: FlowSpec = serde_yaml::from_slice(&bytes).map_err(|source| SpecError::Yaml {
        path: path.display().to_string(),
        source,
    })?;

    if fs.graph.is_some() && !fs.flow.is_empty() {
        return Err(SpecError::BothFlowAndGraph);
    }
    if fs.graph.is_none() && fs.flow.is_empty() {
        return Err(SpecError::MissingFlowOrGraph);
    }

    if let Some(graph) = fs.graph.as_mut() {
        graph.ensure_edges();
    }

    Ok(fs)
}

impl FlowSpec {
    /// True when this flowspec uses the DAG format
    pub fn is_graph_mode(&self) -> bool {
        self.graph.is_some()
    }

    /// Total number of steps/nodes
    pub fn steps_count(&self) -> usize {
        match &self.graph {
            Some(g) => g.nodes.len(),
            None => self.flow.len(),
        }
    }

    /// All step/node names in declaration order
    pub fn step_names(&self) -> Vec<String> {
        match &self.graph {
            Some(g) => g.nodes.iter().map(|n| n.id.clone()).collect(),
            None => self.flow.iter().map(|s| s.step.clone()).collect(),
        }
    }

    /// Load every bound ServiceSpec and build the operation index.
    ///
    /// Relative spec paths are resolved against the flow file's
    /// directory.
    pub fn build_operation_index(
        &self,
        flow_path: impl AsRef<Path>,
    ) -> SpecResult<(BTreeMap<String, ServiceSpecFile>, OpIndex)> {
        let base = flow_path
            .as_ref()
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .to_path_buf();

        let mut service_files = BTreeMap::new();
        let mut op_index = OpIndex::new();

        for (alias, binding) in &self.services {
            let spec_path = Path::new(&binding.spec);
            let spec_path = if spec_path.is_absolute() {
                spec_path.to_path_buf()
            } else {
                base.join(spec_path)
            };
            let ss = load_service_spec(&spec_path).map_err(|source| SpecError::ServiceLoad {
                alias: alias.clone(),
                source: Box::new(source),
            })?;

            let mut ops = BTreeMap::new();
            for op in &ss.operations {
                ops.insert(op.operation_id.clone(), op.clone());
            }
            op_index.insert(alias.clone(), ops);
            service_files.insert(alias.clone(), ss);
        }

        Ok((service_files, op_index))
    }
}

// ── Graph structure ──────────────────────────────────────────────────

impl GraphSpec {
    /// Build a graph spec programmatically. Edges are derived from
    /// `depends` right away when none are given, matching what the
    /// loader does for documents.
    pub fn new(nodes: Vec<GraphNode>, edges: Vec<GraphEdge>) -> Self {
        let mut graph = Self {
            nodes,
            edges,
            ensured: false,
        };
        graph.ensure_edges();
        graph
    }

    /// Derive edges from node `depends` declarations.
    ///
    /// A no-op when edges were already declared or already derived.
    pub fn ensure_edges(&mut self) {
        if self.ensured {
            return;
        }
        if self.edges.is_empty() {
            for node in &self.nodes {
                for dep in &node.depends {
                    self.edges.push(GraphEdge {
                        from: dep.clone(),
                        to: node.id.clone(),
                        condition: None,
                    });
                }
            }
        }
        self.ensured = true;
    }

    /// Validate the DAG structure: node ids, edge endpoints, acyclicity,
    /// and reachability from in-degree-0 entry nodes.
    pub fn validate_structure(&self) -> SpecResult<()> {
        let mut node_ids = HashSet::new();
        for node in &self.nodes {
            if node.id.is_empty() {
                return Err(SpecError::EmptyNodeId);
            }
            if !node_ids.insert(node.id.as_str()) {
                return Err(SpecError::DuplicateNodeId(node.id.clone()));
            }
        }

        for edge in &self.edges {
            if !node_ids.contains(edge.from.as_str()) {
                return Err(SpecError::EdgeUnknownNode(edge.from.clone()));
            }
            if !node_ids.contains(edge.to.as_str()) {
                return Err(SpecError::EdgeUnknownNode(edge.to.clone()));
            }
        }

        self.check_cycles()?;
        self.check_connectivity()?;
        Ok(())
    }

    /// Predecessor node ids of the given node
    pub fn predecessors(&self, node_id: &str) -> Vec<&str> {
        self.edges
            .iter()
            .filter(|e| e.to == node_id)
            .map(|e| e.from.as_str())
            .collect()
    }

    /// Find a node by id
    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    fn adjacency(&self) -> HashMap<&str, Vec<&str>> {
        let mut adj: HashMap<&str, Vec<&str>> = HashMap::new();
        for edge in &self.edges {
            adj.entry(edge.from.as_str())
                .or_default()
                .push(edge.to.as_str());
        }
        adj
    }

    fn check_cycles(&self) -> SpecResult<()> {
        #[derive(Clone, Copy, PartialEq)]
        enum Color {
            White,
            Gray,
            Black,
        }

        fn visit<'a>(
            id: &'a str,
            adj: &HashMap<&'a str, Vec<&'a str>>,
            color: &mut HashMap<&'a str, Color>,
        ) -> SpecResult<()> {
            match color.get(id).copied() {
                Some(Color::Black) => return Ok(()),
                Some(Color::Gray) => return Err(SpecError::CycleDetected),
                _ => {}
            }
            color.insert(id, Color::Gray);
            if let Some(next) = adj.get(id) {
                for neighbor in next {
                    visit(neighbor, adj, color)?;
                }
            }
            color.insert(id, Color::Black);
            Ok(())
        }

        let adj = self.adjacency();
        let mut color: HashMap<&str, Color> = self
            .nodes
            .iter()
            .map(|n| (n.id.as_str(), Color::White))
            .collect();

        for node in &self.nodes {
            visit(node.id.as_str(), &adj, &mut color)?;
        }
        Ok(())
    }

    fn check_connectivity(&self) -> SpecResult<()> {
        let adj = self.adjacency();
        let mut in_degree: HashMap<&str, usize> =
            self.nodes.iter().map(|n| (n.id.as_str(), 0)).collect();
        for edge in &self.edges {
            if let Some(d) = in_degree.get_mut(edge.to.as_str()) {
                *d += 1;
            }
        }

        let mut queue: VecDeque<&str> = self
            .nodes
            .iter()
            .filter(|n| in_degree.get(n.id.as_str()) == Some(&0))
            .map(|n| n.id.as_str())
            .collect();
        if queue.is_empty() {
            return Err(SpecError::NoEntryNode);
        }

        let mut visited = HashSet::new();
        while let Some(current) = queue.pop_front() {
            if !visited.insert(current) {
                continue;
            }
            if let Some(next) = adj.get(current) {
                for neighbor in next {
                    if !visited.contains(neighbor) {
                        queue.push_back(neighbor);
                    }
                }
            }
        }

        for node in &self.nodes {
            if !visited.contains(node.id.as_str()) {
                return Err(SpecError::UnreachableNode(node.id.clone()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(nodes: Vec<GraphNode>, edges: Vec<GraphEdge>) -> GraphSpec {
        let mut g = GraphSpec {
            nodes,
            edges,
            ensured: false,
        };
        g.ensure_edges();
        g
    }

    fn node(id: &str, call: &str, depends: &[&str]) -> GraphNode {
        GraphNode {
            id: id.into(),
            call: call.into(),
            depends: depends.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_edges_derived_from_depends() {
        let g = graph(
            vec![
                node("a", "svc.opA", &[]),
                node("b", "svc.opB", &["a"]),
                node("c", "svc.opC", &["a", "b"]),
            ],
            Vec::new(),
        );
        assert_eq!(g.edges.len(), 3);
        assert!(g.edges.iter().any(|e| e.from == "a" && e.to == "b"));
        assert!(g.edges.iter().any(|e| e.from == "a" && e.to == "c"));
        assert!(g.edges.iter().any(|e| e.from == "b" && e.to == "c"));
    }

    #[test]
    fn test_ensure_edges_idempotent() {
        let mut g = graph(
            vec![node("a", "svc.opA", &[]), node("b", "svc.opB", &["a"])],
            Vec::new(),
        );
        let first = g.edges.clone();
        g.ensure_edges();
        g.ensure_edges();
        assert_eq!(g.edges.len(), first.len());
        assert_eq!(g.edges[0].from, first[0].from);
        assert_eq!(g.edges[0].to, first[0].to);
    }

    #[test]
    fn test_explicit_edges_not_overwritten() {
        let g = graph(
            vec![node("a", "svc.opA", &[]), node("b", "svc.opB", &["a"])],
            vec![GraphEdge {
                from: "a".into(),
                to: "b".into(),
                condition: Some("always".into()),
            }],
        );
        assert_eq!(g.edges.len(), 1);
        assert_eq!(g.edges[0].condition.as_deref(), Some("always"));
    }

    #[test]
    fn test_validate_structure_ok() {
        let g = graph(
            vec![
                node("a", "svc.opA", &[]),
                node("b", "svc.opB", &["a"]),
                node("c", "svc.opC", &["b"]),
            ],
            Vec::new(),
        );
        assert!(g.validate_structure().is_ok());
    }

    #[test]
    fn test_validate_structure_cycle() {
        let g = graph(
            vec![node("a", "svc.opA", &["b"]), node("b", "svc.opB", &["a"])],
            Vec::new(),
        );
        // A pure cycle has no entry node either; cycle check runs first.
        assert!(matches!(
            g.validate_structure(),
            Err(SpecError::CycleDetected)
        ));
    }

    #[test]
    fn test_validate_structure_duplicate_node() {
        let g = graph(
            vec![node("a", "svc.opA", &[]), node("a", "svc.opB", &[])],
            Vec::new(),
        );
        assert!(matches!(
            g.validate_structure(),
            Err(SpecError::DuplicateNodeId(_))
        ));
    }

    #[test]
    fn test_validate_structure_unknown_edge_target() {
        let g = graph(
            vec![node("a", "svc.opA", &[]), node("b", "svc.opB", &["ghost"])],
            Vec::new(),
        );
        assert!(matches!(
            g.validate_structure(),
            Err(SpecError::EdgeUnknownNode(_))
        ));
    }

    #[test]
    fn test_validate_structure_cyclic_island() {
        // x and y form a cycle disconnected from the entry chain;
        // the cycle check catches it before reachability does
        let g = graph(
            vec![
                node("a", "svc.opA", &[]),
                node("b", "svc.opB", &["a"]),
                node("x", "svc.opX", &["y"]),
                node("y", "svc.opY", &["x"]),
            ],
            Vec::new(),
        );
        assert!(matches!(
            g.validate_structure(),
            Err(SpecError::CycleDetected)
        ));
    }

    #[test]
    fn test_validate_structure_empty_graph_has_no_entry() {
        let g = graph(Vec::new(), Vec::new());
        assert!(matches!(g.validate_structure(), Err(SpecError::NoEntryNode)));
    }

    #[test]
    fn test_steps_count_and_names() {
        let fs = FlowSpec {
            info: FlowInfo::default(),
            services: BTreeMap::new(),
            flow: vec![
                FlowStep {
                    step: "s1".into(),
                    call: "svc.op".into(),
                    ..Default::default()
                },
                FlowStep {
                    step: "s2".into(),
                    call: "svc.op2".into(),
                    ..Default::default()
                },
            ],
            graph: None,
        };
        assert!(!fs.is_graph_mode());
        assert_eq!(fs.steps_count(), 2);
        assert_eq!(fs.step_names(), vec!["s1", "s2"]);
    }

    #[test]
    fn test_load_rejects_both_formats() {
        let yaml = r#"
info:
  title: "Both"
services: {}
flow:
  - step: s1
    call: svc.op
graph:
  nodes:
    - id: a
      call: svc.op
"#;
        let dir = std::env::temp_dir().join(format!("ca-spec-both-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("flow.yaml");
        std::fs::write(&path, yaml).unwrap();
        assert!(matches!(
            load_flow_spec(&path),
            Err(SpecError::BothFlowAndGraph)
        ));
    }

    #[test]
    fn test_load_rejects_neither_format() {
        let yaml = r#"
info:
  title: "Neither"
services: {}
"#;
        let dir = std::env::temp_dir().join(format!("ca-spec-neither-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("flow.yaml");
        std::fs::write(&path, yaml).unwrap();
        assert!(matches!(
            load_flow_spec(&path),
            Err(SpecError::MissingFlowOrGraph)
        ));
    }

    #[test]
    fn test_load_graph_mode_ensures_edges() {
        let yaml = r#"
info:
  title: "Graph"
services: {}
graph:
  nodes:
    - id: a
      call: svc.opA
    - id: b
      call: svc.opB
      depends: [a]
"#;
        let dir = std::env::temp_dir().join(format!("ca-spec-graph-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("flow.yaml");
        std::fs::write(&path, yaml).unwrap();
        let fs = load_flow_spec(&path).unwrap();
        assert!(fs.is_graph_mode());
        let g = fs.graph.as_ref().unwrap();
        assert_eq!(g.edges.len(), 1);
        assert_eq!(g.edges[0].from, "a");
        assert_eq!(g.edges[0].to, "b");
    }
}
