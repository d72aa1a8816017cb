//! Defines the error types for the validation module.
use crate::store::NodeId;
use std::fmt;

/// The specific category of a validation error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValidationErrorType {
    /// An input no node produces is absent from the snapshot and shared values.
    MissingMarketData,
    /// A node's target specification is malformed.
    InvalidTarget,
}

/// A structured report of one problem found before execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// The node where the problem was detected.
    pub node_id: NodeId,
    pub error_type: ValidationErrorType,
    pub message: String,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:?}: {}", self.node_id, self.error_type, self.message)
    }
}
