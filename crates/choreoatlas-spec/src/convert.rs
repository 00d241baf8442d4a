//! DAG → flow conversion
//!
//! Produces an ordered flow whose execution semantics are a superset of
//! a valid serial linearisation of the DAG. Conversion walks the graph
//! in Kahn topological order with a lexicographic node-id tie-break, so
//! the result is deterministic for a given input.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

use crate::flow::{FlowSpec, FlowStep, GraphNode};

/// Convert a graph-mode FlowSpec into flow format.
///
/// When a dequeued node has more than one successor whose *original*
/// in-degree is 1, those successors fold into a single `parallel` group
/// beneath the dequeued step; everything else becomes a sequential
/// step. Flow-mode specs are returned unchanged.
pub fn convert_graph_to_flow(fs: &FlowSpec) -> FlowSpec {
    let Some(graph) = &fs.graph else {
        return fs.clone();
    };

    let mut nodes: HashMap<&str, &GraphNode> = HashMap::new();
    let mut in_degree: HashMap<&str, usize> = HashMap::new();
    let mut adj: HashMap<&str, Vec<&str>> = HashMap::new();
    for node in &graph.nodes {
        nodes.insert(node.id.as_str(), node);
        in_degree.insert(node.id.as_str(), 0);
    }
    for edge in &graph.edges {
        adj.entry(edge.from.as_str())
            .or_default()
            .push(edge.to.as_str());
        if let Some(d) = in_degree.get_mut(edge.to.as_str()) {
            *d += 1;
        }
    }
    // Original in-degrees decide parallel-fold eligibility
    let original_in: HashMap<&str, usize> = in_degree.clone();

    let mut ready: BinaryHeap<Reverse<&str>> = in_degree
        .iter()
        .filter(|(_, d)| **d == 0)
        .map(|(id, _)| Reverse(*id))
        .collect();
    let mut visited: HashSet<&str> = HashSet::new();
    let mut flow = Vec::new();

    while let Some(Reverse(id)) = ready.pop() {
        if !visited.insert(id) {
            continue;
        }
        let Some(node) = nodes.get(id) else { continue };

        let mut successors: Vec<&str> = adj.get(id).cloned().unwrap_or_default();
        successors.sort_unstable();

        let fold_candidates: Vec<&str> = successors
            .iter()
            .copied()
            .filter(|s| original_in.get(s) == Some(&1) && !visited.contains(s))
            .collect();

        if fold_candidates.len() > 1 {
            let mut parent = node_to_step(node);
            for child_id in &fold_candidates {
                if let Some(child) = nodes.get(child_id) {
                    parent.parallel.push(node_to_step(child));
                }
                visited.insert(*child_id);
                // Release the folded children's successors
                if let Some(grandchildren) = adj.get(child_id) {
                    for gc in grandchildren {
                        release(gc, &mut in_degree, &mut ready);
                    }
                }
            }
            // Successors that did not fold still lose this node's edge
            for s in successors
                .iter()
                .filter(|s| !fold_candidates.contains(s))
            {
                release(s, &mut in_degree, &mut ready);
            }
            flow.push(parent);
        } else {
            flow.push(node_to_step(node));
            for s in &successors {
                release(s, &mut in_degree, &mut ready);
            }
        }
    }

    FlowSpec {
        info: fs.info.clone(),
        services: fs.services.clone(),
        flow,
        graph: None,
    }
}

fn release<'a>(
    id: &'a str,
    in_degree: &mut HashMap<&'a str, usize>,
    ready: &mut BinaryHeap<Reverse<&'a str>>,
) {
    if let Some(d) = in_degree.get_mut(id) {
        if *d > 0 {
            *d -= 1;
        }
        if *d == 0 {
            ready.push(Reverse(id));
        }
    }
}

fn node_to_step(node: &GraphNode) -> FlowStep {
    FlowStep {
        step: node.id.clone(),
        call: node.call.clone(),
        input: node.input.clone(),
        output: node.output.clone(),
        meta: node.meta.clone(),
        parallel: Vec::new(),
    }
}
