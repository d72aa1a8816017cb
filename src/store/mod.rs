pub mod registry;
pub mod types;

pub use registry::{Children, Registry};
pub use types::{NodeId, NodeMetadata, Value, ValueSpecification};
