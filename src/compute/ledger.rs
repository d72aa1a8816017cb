use crate::store::{NodeId, Value, ValueSpecification};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Values keyed by specification, as produced by one node or supplied to it.
pub type ValueMap = HashMap<ValueSpecification, Value>;

/// Why a node has no values. Recorded per node; never aborts unrelated nodes.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ComputationError {
    #[error("calculation failed at node '{node}': {message}")]
    CalculationFailure { node: String, message: String },
    #[error("node '{node}' is missing input {input}")]
    MissingInput { node: String, input: String },
    #[error("node '{node}' did not produce declared output {output}")]
    MissingOutput { node: String, output: String },
    /// The node was never scheduled because a dependency failed.
    #[error("upstream dependency '{upstream}' of node '{node}' failed")]
    UpstreamFailure { node: String, upstream: String },
    #[error("node '{node}' was cancelled")]
    Cancelled { node: String },
    #[error("calculation panicked at node '{node}': {message}")]
    Panicked { node: String, message: String },
}

impl ComputationError {
    pub fn node(&self) -> &str {
        match self {
            Self::CalculationFailure { node, .. }
            | Self::MissingInput { node, .. }
            | Self::MissingOutput { node, .. }
            | Self::UpstreamFailure { node, .. }
            | Self::Cancelled { node }
            | Self::Panicked { node, .. } => node,
        }
    }

    pub fn is_blocked(&self) -> bool {
        matches!(self, Self::UpstreamFailure { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

pub type NodeResult = Result<Arc<ValueMap>, ComputationError>;

/// Position of a node's start and finish on the execution-wide event counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeTiming {
    pub started: u64,
    pub finished: u64,
}

#[derive(Debug, Clone, Default)]
pub struct Ledger {
    values: Vec<Option<NodeResult>>,
    timings: Vec<Option<NodeTiming>>,
}

impl Ledger {
    pub fn new() -> Self { Self::default() }

    pub fn with_capacity(size: usize) -> Self {
        let mut ledger = Self::new();
        ledger.ensure_capacity(size);
        ledger
    }

    pub fn ensure_capacity(&mut self, size: usize) {
        if self.values.len() < size {
            self.values.resize(size, None);
            self.timings.resize(size, None);
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, node_id: NodeId) -> Option<&NodeResult> {
        self.values.get(node_id.index())?.as_ref()
    }

    pub fn insert(&mut self, node_id: NodeId, value: NodeResult) {
        let idx = node_id.index();
        if idx >= self.values.len() {
            self.ensure_capacity(idx + 1);
        }
        self.values[idx] = Some(value);
    }

    pub fn record_timing(&mut self, node_id: NodeId, timing: NodeTiming) {
        let idx = node_id.index();
        if idx >= self.timings.len() {
            self.ensure_capacity(idx + 1);
        }
        self.timings[idx] = Some(timing);
    }

    pub fn timing(&self, node_id: NodeId) -> Option<NodeTiming> {
        self.timings.get(node_id.index()).copied().flatten()
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &NodeResult)> {
        self.values
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|r| (NodeId::new(i), r)))
    }
}
