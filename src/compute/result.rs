use super::ledger::{ComputationError, Ledger, NodeResult, NodeTiming, ValueMap};
use crate::analysis::telemetry::ExecutionStats;
use crate::graph::DependencyGraph;
use crate::store::{NodeId, Value, ValueSpecification};
use std::sync::Arc;

/// What a caller gets for one requested value.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueOutcome {
    Computed(Value),
    /// The producing node itself failed.
    Failed(ComputationError),
    /// A dependency of the producing node failed, so it never ran.
    Blocked { upstream: String },
    Cancelled,
    /// Not produced by this graph, or the execution never reached it.
    NotComputed,
}

/// Mixture of successful values and per-node failure records.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    graph: Arc<DependencyGraph>,
    ledger: Ledger,
    stats: ExecutionStats,
    aborted: bool,
}

impl ExecutionResult {
    pub(crate) fn new(graph: Arc<DependencyGraph>, ledger: Ledger, stats: ExecutionStats, aborted: bool) -> Self {
        Self { graph, ledger, stats, aborted }
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn stats(&self) -> &ExecutionStats {
        &self.stats
    }

    /// True when fail-fast stopped the execution after a node failure.
    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    /// True when every node produced its values.
    pub fn is_success(&self) -> bool {
        self.stats.succeeded == self.stats.total_nodes
    }

    pub fn node_result(&self, node: NodeId) -> Option<&NodeResult> {
        self.ledger.get(node)
    }

    pub fn timing(&self, node: NodeId) -> Option<NodeTiming> {
        self.ledger.timing(node)
    }

    pub fn value(&self, spec: &ValueSpecification) -> ValueOutcome {
        let Some(node) = self.graph.producer_of(spec) else {
            return ValueOutcome::NotComputed;
        };
        match self.ledger.get(node) {
            Some(Ok(values)) => values.get(spec).cloned().map_or(ValueOutcome::NotComputed, ValueOutcome::Computed),
            Some(Err(ComputationError::UpstreamFailure { upstream, .. })) => {
                ValueOutcome::Blocked { upstream: upstream.clone() }
            }
            Some(Err(ComputationError::Cancelled { .. })) => ValueOutcome::Cancelled,
            Some(Err(err)) => ValueOutcome::Failed(err.clone()),
            None => ValueOutcome::NotComputed,
        }
    }

    /// Every successfully computed value.
    pub fn values(&self) -> ValueMap {
        self.ledger
            .iter()
            .filter_map(|(_, r)| r.as_ref().ok())
            .flat_map(|values| values.iter().map(|(k, v)| (k.clone(), v.clone())))
            .collect()
    }

    pub fn failures(&self) -> Vec<(NodeId, &ComputationError)> {
        self.ledger.iter().filter_map(|(id, r)| r.as_ref().err().map(|e| (id, e))).collect()
    }
}
