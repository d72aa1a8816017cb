//! Engine configuration, read from TOML.
//!
//! ```toml
//! [executor]
//! worker_threads = 8
//! fail_fast = false
//!
//! [cycle]
//! terminate_timeout_ms = 5000
//!
//! [resolver]
//! cache_scope = "cycle"
//!
//! [[resolver.lazy]]
//! target_type = "portfolio"
//! child_types = ["portfolio_node"]
//! ```

use crate::target::{CacheScope, TargetType};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("cannot read configuration: {0}")]
    Io(String),
    #[error("cannot parse configuration: {0}")]
    Parse(String),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub executor: ExecutorConfig,
    pub cycle: CycleConfig,
    pub resolver: ResolverConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    pub worker_threads: usize,
    pub thread_name_prefix: String,
    /// Cancel every not-yet-started node after the first failure.
    pub fail_fast: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            worker_threads: std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1),
            thread_name_prefix: "vantage-calc".to_string(),
            fail_fast: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CycleConfig {
    pub terminate_timeout_ms: u64,
    /// Make values computed by earlier graphs of a cycle visible to later ones.
    pub share_values_between_graphs: bool,
}

impl CycleConfig {
    pub fn terminate_timeout(&self) -> Duration {
        Duration::from_millis(self.terminate_timeout_ms)
    }
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            terminate_timeout_ms: 5_000,
            share_values_between_graphs: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    pub cache_scope: CacheScope,
    pub max_parent_depth: usize,
    /// Entries kept by a process-scoped cache before the oldest are evicted.
    pub process_cache_capacity: usize,
    /// Target types resolved lazily, in rule order.
    pub lazy: Vec<LazyTypeConfig>,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            cache_scope: CacheScope::Cycle,
            max_parent_depth: 16,
            process_cache_capacity: 4096,
            lazy: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LazyTypeConfig {
    pub target_type: TargetType,
    #[serde(default)]
    pub child_types: Vec<TargetType>,
}

impl EngineConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.executor.worker_threads == 0 {
            return Err(ConfigError::Invalid("executor.worker_threads must be at least 1".into()));
        }
        if self.cycle.terminate_timeout_ms == 0 {
            return Err(ConfigError::Invalid("cycle.terminate_timeout_ms must be positive".into()));
        }
        if self.resolver.max_parent_depth == 0 {
            return Err(ConfigError::Invalid("resolver.max_parent_depth must be at least 1".into()));
        }
        if self.resolver.process_cache_capacity == 0 {
            return Err(ConfigError::Invalid("resolver.process_cache_capacity must be at least 1".into()));
        }
        let mut seen = HashSet::new();
        for rule in &self.resolver.lazy {
            if !seen.insert(rule.target_type) {
                return Err(ConfigError::Invalid(format!(
                    "resolver.lazy lists '{}' more than once",
                    rule.target_type
                )));
            }
        }
        Ok(())
    }
}
