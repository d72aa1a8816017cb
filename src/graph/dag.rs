//! The immutable dependency graph and its builder.
//! Topology is kept in the dense columnar `Registry` (CSR parents + linked-list children).

use super::function::CalculationFunction;
use super::node::{CalculationNode, Inputs, Outputs};
use crate::analysis::topology;
use crate::store::{Children, NodeId, NodeMetadata, Registry, ValueSpecification};
use crate::target::TargetSpecification;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GraphError {
    #[error("cycle detected among nodes {nodes:?}")]
    Cycle { nodes: Vec<Vec<String>> },
    #[error("output {output} is produced by both '{first}' and '{second}'")]
    DuplicateOutput { output: String, first: String, second: String },
    #[error("node '{node}' declares no outputs")]
    NoOutputs { node: String },
    #[error("unknown node {0}")]
    UnknownNode(NodeId),
}

/// A built graph. Shared read-only (usually behind an `Arc`) by every execution
/// of its configuration.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    name: String,
    nodes: Vec<CalculationNode>,
    registry: Registry,
    producers: HashMap<ValueSpecification, NodeId>,
    terminal_inputs: BTreeSet<ValueSpecification>,
    order: Vec<NodeId>,
}

impl DependencyGraph {
    pub fn builder(name: impl Into<String>) -> DependencyGraphBuilder {
        DependencyGraphBuilder { name: name.into(), pending: Vec::new() }
    }

    /// Name of the calculation configuration the graph was compiled for.
    pub fn name(&self) -> &str { &self.name }
    pub fn len(&self) -> usize { self.nodes.len() }
    pub fn is_empty(&self) -> bool { self.nodes.is_empty() }

    pub fn node(&self, id: NodeId) -> Option<&CalculationNode> {
        self.nodes.get(id.index())
    }

    pub fn node_by_name(&self, name: &str) -> Option<&CalculationNode> {
        self.nodes.iter().find(|n| n.name == name)
    }

    pub fn nodes(&self) -> &[CalculationNode] { &self.nodes }
    pub fn registry(&self) -> &Registry { &self.registry }
    pub fn parents(&self, id: NodeId) -> &[NodeId] { self.registry.get_parents(id) }
    pub fn children(&self, id: NodeId) -> Children<'_> { self.registry.children(id) }

    /// Every dependency appears before its consumers.
    pub fn topological_order(&self) -> &[NodeId] { &self.order }

    pub fn producer_of(&self, spec: &ValueSpecification) -> Option<NodeId> {
        self.producers.get(spec).copied()
    }

    /// Inputs no node of this graph produces; they must come from outside.
    pub fn terminal_inputs(&self) -> &BTreeSet<ValueSpecification> {
        &self.terminal_inputs
    }

    pub fn outputs(&self) -> impl Iterator<Item = &ValueSpecification> {
        self.nodes.iter().flat_map(|n| n.outputs.iter())
    }

    pub fn roots(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.iter().map(|n| n.id).filter(|&id| self.parents(id).is_empty())
    }

    pub fn downstream_from(&self, start_nodes: &[NodeId]) -> HashSet<NodeId> {
        topology::downstream_from(&self.registry, start_nodes)
    }

    pub fn upstream_from(&self, start_nodes: &[NodeId]) -> HashSet<NodeId> {
        topology::upstream_from(&self.registry, start_nodes)
    }
}

struct PendingNode {
    name: String,
    target: TargetSpecification,
    inputs: Inputs,
    outputs: Outputs,
    function: Arc<dyn CalculationFunction>,
}

pub struct DependencyGraphBuilder {
    name: String,
    pending: Vec<PendingNode>,
}

impl DependencyGraphBuilder {
    /// Adds a node. Duplicate names are suffixed (`name_1`, `name_2`...) on build.
    pub fn add_node(
        &mut self,
        name: impl Into<String>,
        target: TargetSpecification,
        inputs: impl IntoIterator<Item = ValueSpecification>,
        outputs: impl IntoIterator<Item = ValueSpecification>,
        function: Arc<dyn CalculationFunction>,
    ) -> NodeId {
        let id = NodeId::new(self.pending.len());
        self.pending.push(PendingNode {
            name: name.into(),
            target,
            inputs: inputs.into_iter().collect(),
            outputs: outputs.into_iter().collect(),
            function,
        });
        id
    }

    pub fn build(self) -> Result<DependencyGraph, GraphError> {
        let mut producers: HashMap<ValueSpecification, NodeId> = HashMap::new();
        for (i, node) in self.pending.iter().enumerate() {
            if node.outputs.is_empty() {
                return Err(GraphError::NoOutputs { node: node.name.clone() });
            }
            for output in &node.outputs {
                if let Some(first) = producers.insert(output.clone(), NodeId::new(i)) {
                    return Err(GraphError::DuplicateOutput {
                        output: output.to_string(),
                        first: self.pending[first.index()].name.clone(),
                        second: node.name.clone(),
                    });
                }
            }
        }

        let mut registry = Registry::new();
        let mut terminal_inputs = BTreeSet::new();
        for node in &self.pending {
            let mut parents: Vec<NodeId> = Vec::new();
            for input in &node.inputs {
                match producers.get(input) {
                    Some(&p) if !parents.contains(&p) => parents.push(p),
                    Some(_) => {}
                    None => {
                        terminal_inputs.insert(input.clone());
                    }
                }
            }
            registry.add_node(
                &parents,
                NodeMetadata { name: node.name.clone(), function: node.function.name().to_string() },
            );
        }
        registry.link_children();
        let order = topology::sort(&registry)?;

        let nodes = self
            .pending
            .into_iter()
            .enumerate()
            .map(|(i, p)| CalculationNode {
                id: NodeId::new(i),
                name: registry.meta[i].name.clone(),
                target: p.target,
                inputs: p.inputs,
                outputs: p.outputs,
                function: p.function,
            })
            .collect::<Vec<_>>();

        debug!(graph = %self.name, nodes = nodes.len(), terminal_inputs = terminal_inputs.len(), "built dependency graph");
        Ok(DependencyGraph { name: self.name, nodes, registry, producers, terminal_inputs, order })
    }
}
