//! Defines the core data structures for the dependency graph.
pub mod dag;
pub mod function;
pub mod node;

pub use dag::{DependencyGraph, DependencyGraphBuilder, GraphError};
pub use function::{CalculationContext, CalculationFunction, FnCalculation};
pub use node::{CalculationNode, Inputs, Outputs};
