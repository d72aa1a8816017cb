use crate::graph::CalculationNode;
use crate::validation::error::{ValidationError, ValidationErrorType};

pub(crate) fn validate_target(node: &CalculationNode, max_parent_depth: usize) -> Option<ValidationError> {
    node.target.validate(max_parent_depth).err().map(|err| ValidationError {
        node_id: node.id,
        error_type: ValidationErrorType::InvalidTarget,
        message: format!("'{}' has an unusable target: {err}", node.name),
    })
}
