//! Graph analysis: ordering, reachability and execution telemetry.
pub mod telemetry;
pub mod topology;

pub use telemetry::ExecutionStats;
