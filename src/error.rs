//! Crate-wide error taxonomy.
//!
//! Per-node calculation failures are not represented here; they are recorded in the
//! execution ledger as [`ComputationError`](crate::compute::ComputationError) so that a
//! failing node never aborts independent parts of a graph.

use crate::config::ConfigError;
use crate::graph::GraphError;
use std::time::Duration;
use thiserror::Error;

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    /// Nothing matches the request at the given coordinate. Surfaced, never retried.
    #[error("not found: {0}")]
    NotFound(String),

    /// Malformed input. Fatal for the call that received it.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Expected outcome of `cancel()` / `terminate()`.
    #[error("cancelled")]
    Cancelled,

    /// A data source failed. Never replaced by a stale or defaulted value.
    #[error("provider '{provider}' failed: {message}")]
    Provider { provider: String, message: String },

    #[error("{operation} did not complete within {waited:?}")]
    Timeout { operation: String, waited: Duration },

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl EngineError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState(message.into())
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
