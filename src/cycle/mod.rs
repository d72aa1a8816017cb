//! Computation cycles: one snapshot, many graphs, end-to-end cancellation.
pub mod computation;
pub mod options;
pub mod result;
pub mod state;

pub use computation::ComputationCycle;
pub use options::CycleOptions;
pub use result::CycleResult;
pub use state::CycleState;
