//! Graph execution: cancellation, the per-execution ledger, futures and the executor.
pub mod cancel;
pub mod engine;
pub mod future;
pub mod ledger;
pub mod result;

pub use cancel::CancellationToken;
pub use engine::{DependencyGraphExecutor, NodeParameters, SharedValues};
pub use future::{ExecutionFuture, FutureState};
pub use ledger::{ComputationError, Ledger, NodeResult, NodeTiming, ValueMap};
pub use result::{ExecutionResult, ValueOutcome};
