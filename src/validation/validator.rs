//! Checks a graph against the data an execution will see, before it runs.
use super::error::ValidationError;
use super::rules::{inputs, targets};
use crate::compute::SharedValues;
use crate::graph::DependencyGraph;

const DEFAULT_MAX_PARENT_DEPTH: usize = 16;

/// Collects every problem in a graph rather than stopping at the first, like a linter
/// run before compilation.
pub struct Validator<'a> {
    graph: &'a DependencyGraph,
    shared: &'a SharedValues,
    max_parent_depth: usize,
}

impl<'a> Validator<'a> {
    pub fn new(graph: &'a DependencyGraph, shared: &'a SharedValues) -> Self {
        Self { graph, shared, max_parent_depth: DEFAULT_MAX_PARENT_DEPTH }
    }

    pub fn max_parent_depth(mut self, depth: usize) -> Self {
        self.max_parent_depth = depth;
        self
    }

    /// # Returns
    /// - `Ok(())` if nothing is wrong.
    /// - `Err(Vec<ValidationError>)` with every problem found, in node order.
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        // Rules only look at a node and what feeds it, so order does not matter.
        for node in self.graph.nodes() {
            if let Some(err) = targets::validate_target(node, self.max_parent_depth) {
                errors.push(err);
            }
            errors.extend(inputs::validate_inputs(self.graph, node, self.shared));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
