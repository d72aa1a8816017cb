//! The seam between the engine and the analytics library.

use crate::compute::cancel::CancellationToken;
use crate::compute::ledger::ValueMap;
use crate::error::{EngineError, EngineResult};
use crate::store::{NodeId, Value, ValueSpecification};
use crate::target::{ResolutionScope, ResolvedTarget, TargetSpecification};
use chrono::{DateTime, Utc};
use std::fmt;

/// Everything a calculation may look at while it runs.
pub struct CalculationContext<'a> {
    pub(crate) node: NodeId,
    pub(crate) node_name: &'a str,
    pub(crate) target: &'a TargetSpecification,
    pub(crate) inputs: &'a ValueMap,
    pub(crate) parameters: Option<&'a serde_json::Value>,
    pub(crate) cancellation: &'a CancellationToken,
    pub(crate) valuation_time: Option<DateTime<Utc>>,
    pub(crate) scope: Option<&'a ResolutionScope>,
}

impl<'a> CalculationContext<'a> {
    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn node_name(&self) -> &str {
        self.node_name
    }

    pub fn target(&self) -> &TargetSpecification {
        self.target
    }

    pub fn input(&self, spec: &ValueSpecification) -> Option<&Value> {
        self.inputs.get(spec)
    }

    /// The first input whose requirement name matches.
    pub fn input_named(&self, name: &str) -> Option<&Value> {
        self.inputs.iter().find(|(spec, _)| spec.name == name).map(|(_, v)| v)
    }

    pub fn inputs(&self) -> &ValueMap {
        self.inputs
    }

    /// Per-node parameters supplied with the execution request.
    pub fn parameters(&self) -> Option<&serde_json::Value> {
        self.parameters
    }

    pub fn valuation_time(&self) -> Option<DateTime<Utc>> {
        self.valuation_time
    }

    pub fn cancellation(&self) -> &CancellationToken {
        self.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Resolves the node's target through the cycle's resolution scope, so every node
    /// of the cycle sees the same version of it.
    pub fn resolve_target(&self) -> EngineResult<ResolvedTarget> {
        match self.scope {
            Some(scope) => scope.resolve(self.target),
            None => Err(EngineError::invalid_state("no resolution scope for this execution")),
        }
    }
}

/// An opaque calculation. Implementations should poll or wait on
/// [`CalculationContext::cancellation`] when they block.
pub trait CalculationFunction: Send + Sync {
    fn name(&self) -> &str;

    /// Returns one value per declared output. Extra values are ignored.
    fn execute(&self, context: &CalculationContext<'_>) -> Result<ValueMap, String>;
}

type BoxedCalculation = Box<dyn Fn(&CalculationContext<'_>) -> Result<ValueMap, String> + Send + Sync>;

/// Adapts a closure to [`CalculationFunction`].
pub struct FnCalculation {
    name: String,
    func: BoxedCalculation,
}

impl FnCalculation {
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&CalculationContext<'_>) -> Result<ValueMap, String> + Send + Sync + 'static,
    {
        Self { name: name.into(), func: Box::new(func) }
    }
}

impl CalculationFunction for FnCalculation {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&self, context: &CalculationContext<'_>) -> Result<ValueMap, String> {
        (self.func)(context)
    }
}

impl fmt::Debug for FnCalculation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnCalculation").field("name", &self.name).finish()
    }
}
