//! Shock layers over a base feed.
//!
//! Providers are consulted highest priority first: every shock provider in the order
//! given, then the base. The first provider holding a value for a specification wins.

use super::permission::{PermissionReport, UserPrincipal};
use super::provider::{ListenerId, MarketDataListener, MarketDataProvider};
use super::snapshot::MarketDataSnapshot;
use crate::error::EngineResult;
use crate::store::{Value, ValueSpecification};
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

#[derive(Default)]
struct Dispatch {
    pending: BTreeSet<ValueSpecification>,
    dispatching: bool,
}

/// Listener state shared between the composite and the forwarders it registers on
/// underlying providers.
#[derive(Default)]
struct Listeners {
    registered: Mutex<Vec<(ListenerId, Arc<dyn MarketDataListener>)>>,
    dispatch: Mutex<Dispatch>,
}

impl Listeners {
    fn current(&self) -> Vec<Arc<dyn MarketDataListener>> {
        self.registered.lock().iter().map(|(_, l)| Arc::clone(l)).collect()
    }

    /// Merges `changed` into the pending batch. The first caller drains batches until
    /// none remain; callers arriving meanwhile only contribute to the next batch.
    fn values_changed(&self, changed: &BTreeSet<ValueSpecification>) {
        {
            let mut dispatch = self.dispatch.lock();
            dispatch.pending.extend(changed.iter().cloned());
            if dispatch.dispatching {
                return;
            }
            dispatch.dispatching = true;
        }
        loop {
            let batch = {
                let mut dispatch = self.dispatch.lock();
                if dispatch.pending.is_empty() {
                    dispatch.dispatching = false;
                    return;
                }
                std::mem::take(&mut dispatch.pending)
            };
            for listener in self.current() {
                listener.values_changed(&batch);
            }
        }
    }
}

/// Registered on each underlying provider while the composite has listeners.
struct Forwarder {
    listeners: Weak<Listeners>,
}

impl MarketDataListener for Forwarder {
    fn values_changed(&self, specs: &BTreeSet<ValueSpecification>) {
        if let Some(listeners) = self.listeners.upgrade() {
            listeners.values_changed(specs);
        }
    }

    fn subscriptions_succeeded(&self, specs: &[ValueSpecification]) {
        if let Some(listeners) = self.listeners.upgrade() {
            listeners.current().iter().for_each(|l| l.subscriptions_succeeded(specs));
        }
    }

    fn subscription_failed(&self, spec: &ValueSpecification, message: &str) {
        if let Some(listeners) = self.listeners.upgrade() {
            listeners.current().iter().for_each(|l| l.subscription_failed(spec, message));
        }
    }

    fn subscription_stopped(&self, spec: &ValueSpecification) {
        if let Some(listeners) = self.listeners.upgrade() {
            listeners.current().iter().for_each(|l| l.subscription_stopped(spec));
        }
    }
}

pub struct CompositeProvider {
    name: String,
    providers: Vec<Arc<dyn MarketDataProvider>>,
    listeners: Arc<Listeners>,
    /// Forwarder registrations on underlying providers, present while anyone listens.
    attached: Mutex<Option<Vec<ListenerId>>>,
}

impl CompositeProvider {
    /// `shocks` take priority over `base`, earlier shocks over later ones.
    pub fn compose(base: Arc<dyn MarketDataProvider>, shocks: Vec<Arc<dyn MarketDataProvider>>) -> Self {
        let mut providers = shocks;
        providers.push(base);
        let names: Vec<&str> = providers.iter().map(|p| p.name()).collect();
        let name = format!("composite[{}]", names.join(","));
        info!(provider = %name, "composed market data providers");
        Self { name, providers, listeners: Arc::default(), attached: Mutex::new(None) }
    }

    pub fn providers(&self) -> &[Arc<dyn MarketDataProvider>] {
        &self.providers
    }

    pub fn is_attached(&self) -> bool {
        self.attached.lock().is_some()
    }

    /// Callers hold the `attached` lock, so an empty check and the detach it leads to
    /// cannot interleave with a concurrent `add_listener`.
    fn detach(&self, attached: &mut Option<Vec<ListenerId>>) {
        if let Some(ids) = attached.take() {
            for (provider, id) in self.providers.iter().zip(ids) {
                provider.remove_listener(id);
            }
            debug!(provider = %self.name, "detached from underlying providers");
        }
    }

    /// The highest-priority value for `spec` and the provider that holds it.
    fn lookup(&self, spec: &ValueSpecification) -> EngineResult<Option<(Value, &str)>> {
        for provider in &self.providers {
            if let Some(value) = provider.query(spec)? {
                return Ok(Some((value, provider.name())));
            }
        }
        Ok(None)
    }
}

impl MarketDataProvider for CompositeProvider {
    fn name(&self) -> &str {
        &self.name
    }

    /// Subscribes on every underlying provider. If one fails, the subscriptions
    /// already made are rolled back and the error is returned.
    fn subscribe(&self, specs: &[ValueSpecification]) -> EngineResult<()> {
        for (i, provider) in self.providers.iter().enumerate() {
            if let Err(err) = provider.subscribe(specs) {
                warn!(provider = %provider.name(), error = %err, "subscription failed; rolling back");
                for done in &self.providers[..i] {
                    if let Err(rollback) = done.unsubscribe(specs) {
                        warn!(provider = %done.name(), error = %rollback, "rollback of subscription failed");
                    }
                }
                return Err(err);
            }
        }
        Ok(())
    }

    fn unsubscribe(&self, specs: &[ValueSpecification]) -> EngineResult<()> {
        let mut first_error = None;
        for provider in &self.providers {
            if let Err(err) = provider.unsubscribe(specs) {
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn query(&self, spec: &ValueSpecification) -> EngineResult<Option<Value>> {
        Ok(self.lookup(spec)?.map(|(value, _)| value))
    }

    fn is_available(&self, spec: &ValueSpecification) -> bool {
        self.providers.iter().any(|p| p.is_available(spec))
    }

    /// Consults providers in priority order up to and including the first one that
    /// has the specification available.
    fn check_permissions(&self, user: &UserPrincipal, specs: &[ValueSpecification]) -> EngineResult<PermissionReport> {
        let mut report = PermissionReport::new();
        for spec in specs {
            for provider in &self.providers {
                report.merge(provider.check_permissions(user, std::slice::from_ref(spec))?);
                if provider.is_available(spec) {
                    break;
                }
            }
        }
        Ok(report)
    }

    fn add_listener(&self, listener: Arc<dyn MarketDataListener>) -> ListenerId {
        let id = ListenerId::next();
        let mut attached = self.attached.lock();
        self.listeners.registered.lock().push((id, listener));
        if attached.is_none() {
            let ids = self
                .providers
                .iter()
                .map(|p| {
                    let forwarder: Arc<dyn MarketDataListener> =
                        Arc::new(Forwarder { listeners: Arc::downgrade(&self.listeners) });
                    p.add_listener(forwarder)
                })
                .collect();
            *attached = Some(ids);
            debug!(provider = %self.name, "attached to underlying providers");
        }
        id
    }

    /// Removing the last listener unregisters from every underlying provider.
    fn remove_listener(&self, id: ListenerId) -> bool {
        let mut attached = self.attached.lock();
        let (removed, now_empty) = {
            let mut registered = self.listeners.registered.lock();
            let before = registered.len();
            registered.retain(|(existing, _)| *existing != id);
            (registered.len() != before, registered.is_empty())
        };
        if removed && now_empty {
            self.detach(&mut attached);
        }
        removed
    }

    fn snapshot(&self, specs: &[ValueSpecification]) -> EngineResult<MarketDataSnapshot> {
        let mut snapshot = MarketDataSnapshot::new(Utc::now());
        for spec in specs {
            if let Some((value, source)) = self.lookup(spec)? {
                snapshot.insert(spec.clone(), value, source);
            }
        }
        Ok(snapshot)
    }
}

impl Drop for CompositeProvider {
    fn drop(&mut self) {
        let mut attached = self.attached.lock();
        self.detach(&mut attached);
    }
}
