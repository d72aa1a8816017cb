use crate::compute::{ExecutionResult, ValueOutcome};
use crate::market_data::MarketDataSnapshot;
use crate::store::ValueSpecification;
use crate::target::VersionCorrection;
use crate::validation::ValidationError;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Everything one completed cycle produced.
#[derive(Debug, Clone)]
pub struct CycleResult {
    pub cycle_id: Uuid,
    /// The coordinate every resolution in the cycle used.
    pub version_correction: VersionCorrection,
    pub snapshot: Arc<MarketDataSnapshot>,
    /// One entry per graph, in execution order.
    pub graphs: Vec<(String, Arc<ExecutionResult>)>,
    /// Problems found before execution. They also show up as node failures.
    pub validation: Vec<ValidationError>,
    pub duration: Duration,
}

impl CycleResult {
    pub fn graph(&self, name: &str) -> Option<&ExecutionResult> {
        self.graphs.iter().find(|(n, _)| n == name).map(|(_, r)| r.as_ref())
    }

    /// Looks `spec` up in every graph; the first graph that produces it answers.
    pub fn value(&self, spec: &ValueSpecification) -> ValueOutcome {
        self.graphs
            .iter()
            .find(|(_, r)| r.graph().producer_of(spec).is_some())
            .map_or(ValueOutcome::NotComputed, |(_, r)| r.value(spec))
    }

    pub fn is_success(&self) -> bool {
        self.graphs.iter().all(|(_, r)| r.is_success())
    }
}
