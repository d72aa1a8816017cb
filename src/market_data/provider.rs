//! The surface every market data source exposes.

use super::permission::{PermissionReport, UserPrincipal};
use super::snapshot::MarketDataSnapshot;
use crate::error::EngineResult;
use crate::store::{Value, ValueSpecification};
use chrono::Utc;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);

/// Handle returned by [`MarketDataProvider::add_listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl ListenerId {
    pub fn next() -> Self {
        Self(NEXT_LISTENER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Receives change and subscription events. Only `values_changed` is required.
pub trait MarketDataListener: Send + Sync {
    /// One batch of specifications whose values changed.
    fn values_changed(&self, specs: &BTreeSet<ValueSpecification>);

    fn subscriptions_succeeded(&self, _specs: &[ValueSpecification]) {}

    fn subscription_failed(&self, _spec: &ValueSpecification, _message: &str) {}

    fn subscription_stopped(&self, _spec: &ValueSpecification) {}
}

pub trait MarketDataProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Subscriptions are reference counted: N subscribes need N unsubscribes.
    fn subscribe(&self, specs: &[ValueSpecification]) -> EngineResult<()>;

    fn unsubscribe(&self, specs: &[ValueSpecification]) -> EngineResult<()>;

    /// The current value of `spec`, `None` if this provider has none.
    fn query(&self, spec: &ValueSpecification) -> EngineResult<Option<Value>>;

    fn is_available(&self, spec: &ValueSpecification) -> bool;

    fn check_permissions(&self, user: &UserPrincipal, specs: &[ValueSpecification]) -> EngineResult<PermissionReport>;

    fn add_listener(&self, listener: Arc<dyn MarketDataListener>) -> ListenerId;

    /// Returns false if `id` was not registered.
    fn remove_listener(&self, id: ListenerId) -> bool;

    /// Freezes the current values of `specs`. Specifications with no value are absent.
    fn snapshot(&self, specs: &[ValueSpecification]) -> EngineResult<MarketDataSnapshot> {
        let mut snapshot = MarketDataSnapshot::new(Utc::now());
        for spec in specs {
            if let Some(value) = self.query(spec)? {
                snapshot.insert(spec.clone(), value, self.name());
            }
        }
        Ok(snapshot)
    }
}
