//! An in-memory provider, used as a base feed in tests and as a shock layer.

use super::permission::{Permission, PermissionReport, UserPrincipal};
use super::provider::{ListenerId, MarketDataListener, MarketDataProvider};
use crate::error::{EngineError, EngineResult};
use crate::store::{Value, ValueSpecification};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::debug;

pub struct InMemoryMarketDataProvider {
    name: String,
    values: RwLock<HashMap<ValueSpecification, Value>>,
    /// Entitlement a user needs to see a specification.
    entitlements: RwLock<HashMap<ValueSpecification, String>>,
    subscriptions: Mutex<HashMap<ValueSpecification, usize>>,
    listeners: RwLock<Vec<(ListenerId, Arc<dyn MarketDataListener>)>>,
    /// When set, every data access fails with this message.
    failure: RwLock<Option<String>>,
}

impl InMemoryMarketDataProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            values: RwLock::new(HashMap::new()),
            entitlements: RwLock::new(HashMap::new()),
            subscriptions: Mutex::new(HashMap::new()),
            listeners: RwLock::new(Vec::new()),
            failure: RwLock::new(None),
        }
    }

    pub fn with_value(self, spec: ValueSpecification, value: Value) -> Self {
        self.values.write().insert(spec, value);
        self
    }

    pub fn set_value(&self, spec: ValueSpecification, value: Value) {
        self.set_values([(spec, value)]);
    }

    /// Stores a batch and notifies listeners once for all of it.
    pub fn set_values(&self, batch: impl IntoIterator<Item = (ValueSpecification, Value)>) {
        let mut changed = BTreeSet::new();
        {
            let mut values = self.values.write();
            for (spec, value) in batch {
                changed.insert(spec.clone());
                values.insert(spec, value);
            }
        }
        if !changed.is_empty() {
            for listener in self.listeners() {
                listener.values_changed(&changed);
            }
        }
    }

    pub fn remove_value(&self, spec: &ValueSpecification) -> Option<Value> {
        self.values.write().remove(spec)
    }

    pub fn require_entitlement(&self, spec: ValueSpecification, entitlement: impl Into<String>) {
        self.entitlements.write().insert(spec, entitlement.into());
    }

    /// Makes every subsequent data access fail until [`Self::recover`] is called.
    pub fn fail_with(&self, message: impl Into<String>) {
        *self.failure.write() = Some(message.into());
    }

    pub fn recover(&self) {
        *self.failure.write() = None;
    }

    pub fn subscription_count(&self, spec: &ValueSpecification) -> usize {
        self.subscriptions.lock().get(spec).copied().unwrap_or(0)
    }

    pub fn subscribed(&self) -> Vec<ValueSpecification> {
        let mut specs: Vec<_> = self.subscriptions.lock().keys().cloned().collect();
        specs.sort();
        specs
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    fn listeners(&self) -> Vec<Arc<dyn MarketDataListener>> {
        self.listeners.read().iter().map(|(_, l)| Arc::clone(l)).collect()
    }

    fn check_failure(&self) -> EngineResult<()> {
        match self.failure.read().as_ref() {
            Some(message) => Err(EngineError::provider(&self.name, message.clone())),
            None => Ok(()),
        }
    }
}

impl MarketDataProvider for InMemoryMarketDataProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn subscribe(&self, specs: &[ValueSpecification]) -> EngineResult<()> {
        if let Err(err) = self.check_failure() {
            let message = err.to_string();
            for listener in self.listeners() {
                for spec in specs {
                    listener.subscription_failed(spec, &message);
                }
            }
            return Err(err);
        }
        {
            let mut subscriptions = self.subscriptions.lock();
            for spec in specs {
                *subscriptions.entry(spec.clone()).or_insert(0) += 1;
            }
        }
        debug!(provider = %self.name, count = specs.len(), "subscribed");
        for listener in self.listeners() {
            listener.subscriptions_succeeded(specs);
        }
        Ok(())
    }

    fn unsubscribe(&self, specs: &[ValueSpecification]) -> EngineResult<()> {
        let mut stopped = Vec::new();
        {
            let mut subscriptions = self.subscriptions.lock();
            for spec in specs {
                match subscriptions.get_mut(spec) {
                    Some(count) if *count > 1 => *count -= 1,
                    Some(_) => {
                        subscriptions.remove(spec);
                        stopped.push(spec.clone());
                    }
                    None => debug!(provider = %self.name, %spec, "unsubscribe without subscription"),
                }
            }
        }
        for listener in self.listeners() {
            for spec in &stopped {
                listener.subscription_stopped(spec);
            }
        }
        Ok(())
    }

    fn query(&self, spec: &ValueSpecification) -> EngineResult<Option<Value>> {
        self.check_failure()?;
        Ok(self.values.read().get(spec).cloned())
    }

    fn is_available(&self, spec: &ValueSpecification) -> bool {
        self.failure.read().is_none() && self.values.read().contains_key(spec)
    }

    fn check_permissions(&self, user: &UserPrincipal, specs: &[ValueSpecification]) -> EngineResult<PermissionReport> {
        self.check_failure()?;
        let entitlements = self.entitlements.read();
        let mut report = PermissionReport::new();
        for spec in specs {
            let permission = match entitlements.get(spec) {
                Some(required) if !user.is_entitled(required) => Permission::Denied {
                    reason: format!("{} lacks entitlement '{required}'", user.name),
                },
                _ => Permission::Granted,
            };
            report.record(spec.clone(), &self.name, permission);
        }
        Ok(report)
    }

    fn add_listener(&self, listener: Arc<dyn MarketDataListener>) -> ListenerId {
        let id = ListenerId::next();
        self.listeners.write().push((id, listener));
        id
    }

    fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }
}
