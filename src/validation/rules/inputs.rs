//! Every input must be produced inside the graph or supplied from outside it.

use crate::compute::SharedValues;
use crate::graph::{CalculationNode, DependencyGraph};
use crate::validation::error::{ValidationError, ValidationErrorType};

pub(crate) fn validate_inputs(
    graph: &DependencyGraph,
    node: &CalculationNode,
    shared: &SharedValues,
) -> Vec<ValidationError> {
    node.inputs
        .iter()
        .filter(|input| graph.producer_of(input).is_none() && !shared.contains(input))
        .map(|input| ValidationError {
            node_id: node.id,
            error_type: ValidationErrorType::MissingMarketData,
            message: format!("'{}' requires {input}, which no node produces and no data source supplied", node.name),
        })
        .collect()
}
