use crate::graph::GraphError;
use crate::store::{NodeId, Registry};
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{HashSet, VecDeque};

/// Performs a Topological Sort using Depth-First Search (DFS).
///
/// Returns a list of NodeIds where every dependency appears before its consumer.
/// On a cycle, every strongly connected component is reported by node name.
pub fn sort(registry: &Registry) -> Result<Vec<NodeId>, GraphError> {
    let count = registry.count();
    let mut order = Vec::with_capacity(count);
    let mut state = vec![VisitState::None; count];

    // Edges point Child -> Parent; DFS post-order gives [Parent, ..., Child].
    for i in 0..count {
        if state[i] == VisitState::None && !visit(NodeId::new(i), registry, &mut state, &mut order) {
            return Err(GraphError::Cycle { nodes: cycle_members(registry) });
        }
    }

    Ok(order)
}

#[derive(Clone, PartialEq, Eq)]
enum VisitState {
    None,
    Visiting,
    Visited,
}

/// Returns false when a cycle is reached.
fn visit(node: NodeId, registry: &Registry, state: &mut Vec<VisitState>, order: &mut Vec<NodeId>) -> bool {
    let idx = node.index();

    match state[idx] {
        VisitState::Visited => return true,
        VisitState::Visiting => return false,
        VisitState::None => state[idx] = VisitState::Visiting,
    }

    for &parent in registry.get_parents(node) {
        if !visit(parent, registry, state, order) {
            return false;
        }
    }

    state[idx] = VisitState::Visited;
    order.push(node);
    true
}

/// Names of every node taking part in a cycle, one group per strongly connected component.
pub fn cycle_members(registry: &Registry) -> Vec<Vec<String>> {
    let mut graph: DiGraph<(), ()> = DiGraph::with_capacity(registry.count(), registry.parents_flat.len());
    for _ in 0..registry.count() {
        graph.add_node(());
    }
    for child in 0..registry.count() {
        for parent in registry.get_parents(NodeId::new(child)) {
            graph.add_edge(NodeIndex::new(parent.index()), NodeIndex::new(child), ());
        }
    }

    tarjan_scc(&graph)
        .into_iter()
        .filter(|scc| scc.len() > 1 || graph.contains_edge(scc[0], scc[0]))
        .map(|scc| {
            let mut names: Vec<String> = scc.iter().map(|n| registry.meta[n.index()].name.clone()).collect();
            names.sort();
            names
        })
        .collect()
}

/// Identifies all nodes downstream from the given start nodes, start nodes included.
pub fn downstream_from(registry: &Registry, start_nodes: &[NodeId]) -> HashSet<NodeId> {
    let mut visited = HashSet::new();
    let mut queue = VecDeque::from(start_nodes.to_vec());

    while let Some(node) = queue.pop_front() {
        if visited.insert(node) {
            queue.extend(registry.children(node));
        }
    }
    visited
}

/// Identifies all nodes upstream from the given start nodes, start nodes included.
pub fn upstream_from(registry: &Registry, start_nodes: &[NodeId]) -> HashSet<NodeId> {
    let mut visited = HashSet::new();
    let mut queue = VecDeque::from(start_nodes.to_vec());

    while let Some(node) = queue.pop_front() {
        if visited.insert(node) {
            queue.extend(registry.get_parents(node).iter().copied());
        }
    }
    visited
}
