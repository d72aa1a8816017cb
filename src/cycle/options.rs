use crate::compute::NodeParameters;
use crate::config::{CycleConfig, ExecutorConfig};
use crate::target::VersionCorrection;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;

/// Per-cycle execution options.
#[derive(Debug, Clone)]
pub struct CycleOptions {
    pub version_correction: VersionCorrection,
    /// Defaults to the pinned business-time instant.
    pub valuation_time: Option<DateTime<Utc>>,
    pub fail_fast: bool,
    pub terminate_timeout: Duration,
    /// Values computed by earlier graphs are visible to later ones.
    pub share_values_between_graphs: bool,
    /// Node parameters keyed by graph name.
    pub node_parameters: HashMap<String, NodeParameters>,
}

impl Default for CycleOptions {
    fn default() -> Self {
        Self::from_config(&CycleConfig::default(), &ExecutorConfig::default())
    }
}

impl CycleOptions {
    pub fn from_config(cycle: &CycleConfig, executor: &ExecutorConfig) -> Self {
        Self {
            version_correction: VersionCorrection::LATEST,
            valuation_time: None,
            fail_fast: executor.fail_fast,
            terminate_timeout: cycle.terminate_timeout(),
            share_values_between_graphs: cycle.share_values_between_graphs,
            node_parameters: HashMap::new(),
        }
    }

    pub fn at(mut self, version_correction: VersionCorrection) -> Self {
        self.version_correction = version_correction;
        self
    }

    pub fn valued_at(mut self, valuation_time: DateTime<Utc>) -> Self {
        self.valuation_time = Some(valuation_time);
        self
    }

    pub fn fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    pub fn terminate_timeout(mut self, timeout: Duration) -> Self {
        self.terminate_timeout = timeout;
        self
    }

    pub fn share_values(mut self, share: bool) -> Self {
        self.share_values_between_graphs = share;
        self
    }

    pub fn with_node_parameters(mut self, graph: impl Into<String>, parameters: NodeParameters) -> Self {
        self.node_parameters.insert(graph.into(), parameters);
        self
    }
}
