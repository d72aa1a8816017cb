//! A single calculation step: one function applied to one target.

use super::function::CalculationFunction;
use crate::store::{NodeId, ValueSpecification};
use crate::target::TargetSpecification;
use smallvec::SmallVec;
use std::fmt;
use std::sync::Arc;

/// Most nodes consume a handful of values and produce one or two.
pub type Inputs = SmallVec<[ValueSpecification; 4]>;
pub type Outputs = SmallVec<[ValueSpecification; 2]>;

/// A node is the "skeleton" of a calculation. It names what it needs and what it
/// produces but holds no values; those live in the execution ledger.
#[derive(Clone)]
pub struct CalculationNode {
    pub id: NodeId,
    /// Unique within the graph.
    pub name: String,
    pub target: TargetSpecification,
    pub inputs: Inputs,
    pub outputs: Outputs,
    pub function: Arc<dyn CalculationFunction>,
}

impl CalculationNode {
    pub fn produces(&self, spec: &ValueSpecification) -> bool {
        self.outputs.contains(spec)
    }
}

impl fmt::Debug for CalculationNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CalculationNode")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("target", &self.target)
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .field("function", &self.function.name())
            .finish()
    }
}
