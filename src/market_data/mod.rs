//! Market data sources, their composition and per-cycle snapshots.
pub mod composite;
pub mod memory;
pub mod permission;
pub mod provider;
pub mod snapshot;

pub use composite::CompositeProvider;
pub use memory::InMemoryMarketDataProvider;
pub use permission::{Permission, PermissionCheck, PermissionReport, UserPrincipal};
pub use provider::{ListenerId, MarketDataListener, MarketDataProvider};
pub use snapshot::MarketDataSnapshot;

#[cfg(test)]
pub(crate) mod testing {
    use super::MarketDataListener;
    use crate::store::ValueSpecification;
    use crate::target::TargetSpecification;
    use parking_lot::Mutex;
    use std::collections::BTreeSet;
    use std::time::Duration;

    pub fn quote(ticker: &str) -> ValueSpecification {
        ValueSpecification::new("MarketValue", TargetSpecification::primitive("Ticker", ticker))
    }

    #[derive(Default)]
    pub struct RecordingListener {
        delay: Option<Duration>,
        batches: Mutex<Vec<BTreeSet<ValueSpecification>>>,
        succeeded: Mutex<usize>,
        failed: Mutex<usize>,
        stopped: Mutex<Vec<ValueSpecification>>,
    }

    impl RecordingListener {
        /// Sleeps inside every change callback.
        pub fn slow(delay: Duration) -> Self {
            Self { delay: Some(delay), ..Self::default() }
        }

        pub fn batches(&self) -> Vec<BTreeSet<ValueSpecification>> {
            self.batches.lock().clone()
        }

        /// Number of specifications reported as successfully subscribed.
        pub fn succeeded(&self) -> usize {
            *self.succeeded.lock()
        }

        pub fn failed(&self) -> usize {
            *self.failed.lock()
        }

        pub fn stopped(&self) -> Vec<ValueSpecification> {
            self.stopped.lock().clone()
        }
    }

    impl MarketDataListener for RecordingListener {
        fn values_changed(&self, specs: &BTreeSet<ValueSpecification>) {
            if let Some(delay) = self.delay {
                std::thread::sleep(delay);
            }
            self.batches.lock().push(specs.clone());
        }

        fn subscriptions_succeeded(&self, specs: &[ValueSpecification]) {
            *self.succeeded.lock() += specs.len();
        }

        fn subscription_failed(&self, _spec: &ValueSpecification, _message: &str) {
            *self.failed.lock() += 1;
        }

        fn subscription_stopped(&self, spec: &ValueSpecification) {
            self.stopped.lock().push(spec.clone());
        }
    }
}
