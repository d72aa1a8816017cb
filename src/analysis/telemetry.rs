use crate::compute::ledger::{ComputationError, Ledger};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Summary of one graph execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionStats {
    pub total_nodes: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Never scheduled because a dependency failed.
    pub blocked: usize,
    pub cancelled: usize,
    /// Nodes with no record at all (execution never started).
    pub not_run: usize,
    #[serde(with = "duration_millis")]
    pub duration: Duration,
    /// Largest number of calculations observed running at the same time.
    pub peak_concurrency: usize,
}

impl ExecutionStats {
    pub fn analyze(ledger: &Ledger, total_nodes: usize, duration: Duration, peak_concurrency: usize) -> Self {
        let mut stats = Self { total_nodes, duration, peak_concurrency, ..Default::default() };
        for (_, result) in ledger.iter() {
            match result {
                Ok(_) => stats.succeeded += 1,
                Err(ComputationError::UpstreamFailure { .. }) => stats.blocked += 1,
                Err(ComputationError::Cancelled { .. }) => stats.cancelled += 1,
                Err(_) => stats.failed += 1,
            }
        }
        stats.not_run = total_nodes.saturating_sub(stats.succeeded + stats.failed + stats.blocked + stats.cancelled);
        stats
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
