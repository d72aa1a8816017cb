//! Entitlement checks on market data.

use crate::store::ValueSpecification;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UserPrincipal {
    pub name: String,
    pub entitlements: BTreeSet<String>,
}

impl UserPrincipal {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), entitlements: BTreeSet::new() }
    }

    pub fn with_entitlement(mut self, entitlement: impl Into<String>) -> Self {
        self.entitlements.insert(entitlement.into());
        self
    }

    pub fn is_entitled(&self, entitlement: &str) -> bool {
        self.entitlements.contains(entitlement)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Permission {
    Granted,
    Denied { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionCheck {
    pub provider: String,
    pub permission: Permission,
}

/// Per-specification answers from every provider that was consulted.
///
/// How partial answers are combined is up to the caller; see
/// [`PermissionReport::granted_by_all`] and [`PermissionReport::granted_by_any`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermissionReport {
    checks: BTreeMap<ValueSpecification, Vec<PermissionCheck>>,
}

impl PermissionReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, spec: ValueSpecification, provider: &str, permission: Permission) {
        self.checks
            .entry(spec)
            .or_default()
            .push(PermissionCheck { provider: provider.to_string(), permission });
    }

    pub fn merge(&mut self, other: PermissionReport) {
        for (spec, checks) in other.checks {
            self.checks.entry(spec).or_default().extend(checks);
        }
    }

    pub fn checks(&self, spec: &ValueSpecification) -> &[PermissionCheck] {
        self.checks.get(spec).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Providers consulted for `spec`, in the order they answered.
    pub fn consulted(&self, spec: &ValueSpecification) -> Vec<&str> {
        self.checks(spec).iter().map(|c| c.provider.as_str()).collect()
    }

    pub fn granted_by_all(&self, spec: &ValueSpecification) -> bool {
        let checks = self.checks(spec);
        !checks.is_empty() && checks.iter().all(|c| c.permission == Permission::Granted)
    }

    pub fn granted_by_any(&self, spec: &ValueSpecification) -> bool {
        self.checks(spec).iter().any(|c| c.permission == Permission::Granted)
    }

    /// Specifications at least one consulted provider denied.
    pub fn denied(&self) -> Vec<&ValueSpecification> {
        self.checks
            .iter()
            .filter(|(_, checks)| checks.iter().any(|c| matches!(c.permission, Permission::Denied { .. })))
            .map(|(spec, _)| spec)
            .collect()
    }

    pub fn specifications(&self) -> impl Iterator<Item = &ValueSpecification> {
        self.checks.keys()
    }
}
