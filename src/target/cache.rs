//! Explicit resolution cache.
//!
//! A cache is owned either by a [`TargetResolver`](super::TargetResolver) (process
//! scope, lives as long as the resolver) or by a
//! [`ResolutionScope`](super::ResolutionScope) (cycle scope, dropped with the cycle).
//! Keys carry a fully pinned version-correction. Within a cycle cache, version-pinned
//! specifications are keyed at [`VersionCorrection::LATEST`] since the scope has one
//! pin for their children.
//!
//! A bounded cache evicts its oldest entries first.

use super::resolver::ResolvedTarget;
use super::spec::TargetSpecification;
use super::version::VersionCorrection;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheScope {
    /// One cache per cycle; nothing survives the cycle.
    #[default]
    Cycle,
    /// One cache per resolver, shared by every cycle that uses it.
    Process,
}

type CacheKey = (TargetSpecification, VersionCorrection);

#[derive(Debug, Default)]
struct Entries {
    map: HashMap<CacheKey, ResolvedTarget>,
    order: VecDeque<CacheKey>,
}

#[derive(Debug, Default)]
pub struct ResolverCache {
    entries: RwLock<Entries>,
    capacity: Option<usize>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl ResolverCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// A cache holding at most `capacity` entries (at least one).
    pub fn bounded(capacity: usize) -> Self {
        Self { capacity: Some(capacity.max(1)), ..Self::default() }
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    pub fn get(&self, spec: &TargetSpecification, vc: &VersionCorrection) -> Option<ResolvedTarget> {
        let found = self.entries.read().map.get(&(spec.clone(), *vc)).cloned();
        match found {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        found
    }

    /// Inserts unless another caller got there first; returns the entry that won.
    pub fn insert(&self, spec: TargetSpecification, vc: VersionCorrection, target: ResolvedTarget) -> ResolvedTarget {
        let mut entries = self.entries.write();
        let key = (spec, vc);
        if let Some(existing) = entries.map.get(&key) {
            return existing.clone();
        }
        if let Some(capacity) = self.capacity {
            while entries.map.len() >= capacity {
                let Some(oldest) = entries.order.pop_front() else { break };
                entries.map.remove(&oldest);
                self.evictions.fetch_add(1, Ordering::Relaxed);
                debug!(target = %oldest.0, vc = %oldest.1, "evicted resolution");
            }
        }
        entries.order.push_back(key.clone());
        entries.map.insert(key, target.clone());
        target
    }

    pub fn len(&self) -> usize {
        self.entries.read().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    pub fn clear(&self) {
        let mut entries = self.entries.write();
        entries.map.clear();
        entries.order.clear();
    }
}
