//! Core of a financial computation engine.
//!
//! Desired outputs over financial targets are compiled (elsewhere) into immutable
//! [`DependencyGraph`]s. A [`ComputationCycle`] takes one market data snapshot from a
//! (possibly shocked) [`MarketDataProvider`], pins a bitemporal [`VersionCorrection`],
//! and runs each graph on a [`DependencyGraphExecutor`], which executes nodes
//! concurrently in dependency order and can be cancelled at any point.
//!
//! The library logs through `tracing` and never installs a subscriber.

pub mod analysis;
pub mod compute;
pub mod config;
pub mod cycle;
pub mod display;
pub mod error;
pub mod graph;
pub mod market_data;
pub mod store;
pub mod target;
pub mod time;
pub mod validation;

pub use analysis::ExecutionStats;
pub use compute::{
    CancellationToken, ComputationError, DependencyGraphExecutor, ExecutionFuture, ExecutionResult, FutureState,
    NodeParameters, SharedValues, ValueMap, ValueOutcome,
};
pub use config::{ConfigError, EngineConfig};
pub use cycle::{ComputationCycle, CycleOptions, CycleResult, CycleState};
pub use display::format_failure_trace;
pub use error::{EngineError, EngineResult};
pub use graph::{CalculationContext, CalculationFunction, DependencyGraph, FnCalculation, GraphError};
pub use market_data::{CompositeProvider, MarketDataListener, MarketDataProvider, MarketDataSnapshot};
pub use store::{NodeId, Value, ValueSpecification};
pub use target::{ResolvedTarget, TargetResolver, TargetSpecification, VersionCorrection};
pub use time::{Clock, ManualClock, SystemClock};
pub use validation::{ValidationError, Validator};
