//! Immutable per-cycle view of market data.

use crate::store::{Value, ValueSpecification};
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Values frozen at one instant. Never mutated after construction; a cycle shares one
/// snapshot read-only across every node of every graph it runs.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketDataSnapshot {
    taken_at: DateTime<Utc>,
    values: HashMap<ValueSpecification, Value>,
    /// Name of the provider each value came from.
    sources: HashMap<ValueSpecification, String>,
}

impl MarketDataSnapshot {
    pub fn new(taken_at: DateTime<Utc>) -> Self {
        Self { taken_at, values: HashMap::new(), sources: HashMap::new() }
    }

    /// Used while assembling a snapshot, before it is shared.
    pub(crate) fn insert(&mut self, spec: ValueSpecification, value: Value, source: &str) {
        self.sources.insert(spec.clone(), source.to_string());
        self.values.insert(spec, value);
    }

    pub fn taken_at(&self) -> DateTime<Utc> {
        self.taken_at
    }

    pub fn get(&self, spec: &ValueSpecification) -> Option<&Value> {
        self.values.get(spec)
    }

    pub fn contains(&self, spec: &ValueSpecification) -> bool {
        self.values.contains_key(spec)
    }

    pub fn source_of(&self, spec: &ValueSpecification) -> Option<&str> {
        self.sources.get(spec).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ValueSpecification, &Value)> {
        self.values.iter()
    }
}
