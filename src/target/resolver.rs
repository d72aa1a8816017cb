//! Resolves target specifications to content as of a bitemporal coordinate.
//!
//! The strategy used for a target type comes from an explicit, ordered rule table
//! (first match wins, default eager). Lazy rules defer every fetch until a capability
//! method is invoked on the returned target.

use super::cache::{CacheScope, ResolverCache};
use super::lazy::LazyTarget;
use super::source::{Entity, EntitySource};
use super::spec::{TargetSpecification, TargetType, UniqueId};
use super::version::VersionCorrection;
use crate::config::ResolverConfig;
use crate::error::EngineResult;
use crate::time::{Clock, SystemClock};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use tracing::debug;

static NEXT_RESOLVER_ID: AtomicU64 = AtomicU64::new(1);

const DEFAULT_MAX_PARENT_DEPTH: usize = 16;
const DEFAULT_PROCESS_CACHE_CAPACITY: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionStrategy {
    /// Fetch content synchronously during `resolve`.
    Eager,
    /// Return a deferred wrapper. Children of `child_types` are themselves exposed as
    /// deferred wrappers when the container's children are listed.
    Lazy { child_types: Vec<TargetType> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrategyRule {
    pub target_type: TargetType,
    pub strategy: ResolutionStrategy,
}

/// Capability surface shared by eagerly and lazily resolved targets.
pub trait ComputationTarget {
    fn specification(&self) -> &TargetSpecification;

    fn version_correction(&self) -> &VersionCorrection;

    fn entity(&self) -> EngineResult<Arc<Entity>>;

    fn children(&self) -> EngineResult<Vec<ResolvedTarget>>;

    fn unique_id(&self) -> EngineResult<UniqueId> {
        Ok(self.entity()?.unique_id.clone())
    }

    fn name(&self) -> EngineResult<String> {
        Ok(self.entity()?.name.clone())
    }

    fn attribute(&self, key: &str) -> EngineResult<Option<String>> {
        Ok(self.entity()?.attributes.get(key).cloned())
    }
}

#[derive(Debug)]
pub struct EagerTarget {
    spec: TargetSpecification,
    vc: VersionCorrection,
    resolver_id: u64,
    entity: Arc<Entity>,
    children: Vec<ResolvedTarget>,
}

impl ComputationTarget for EagerTarget {
    fn specification(&self) -> &TargetSpecification {
        &self.spec
    }

    fn version_correction(&self) -> &VersionCorrection {
        &self.vc
    }

    fn entity(&self) -> EngineResult<Arc<Entity>> {
        Ok(Arc::clone(&self.entity))
    }

    fn children(&self) -> EngineResult<Vec<ResolvedTarget>> {
        Ok(self.children.clone())
    }
}

/// The outcome of a resolve call.
///
/// Equality and hashing use `(specification, version-correction, resolver)` only, so
/// a lazy target can be used as a map key without forcing its fetch.
#[derive(Debug, Clone)]
pub enum ResolvedTarget {
    Eager(Arc<EagerTarget>),
    Lazy(Arc<LazyTarget>),
}

impl ResolvedTarget {
    fn inner(&self) -> &dyn ComputationTarget {
        match self {
            Self::Eager(target) => target.as_ref(),
            Self::Lazy(target) => target.as_ref(),
        }
    }

    fn resolver_id(&self) -> u64 {
        match self {
            Self::Eager(target) => target.resolver_id,
            Self::Lazy(target) => target.resolver_id(),
        }
    }

    pub fn is_lazy(&self) -> bool {
        matches!(self, Self::Lazy(_))
    }

    /// True once content is held in memory.
    pub fn is_fetched(&self) -> bool {
        match self {
            Self::Eager(_) => true,
            Self::Lazy(target) => target.is_fetched(),
        }
    }
}

impl ComputationTarget for ResolvedTarget {
    fn specification(&self) -> &TargetSpecification {
        self.inner().specification()
    }

    fn version_correction(&self) -> &VersionCorrection {
        self.inner().version_correction()
    }

    fn entity(&self) -> EngineResult<Arc<Entity>> {
        self.inner().entity()
    }

    fn children(&self) -> EngineResult<Vec<ResolvedTarget>> {
        self.inner().children()
    }
}

impl PartialEq for ResolvedTarget {
    fn eq(&self, other: &Self) -> bool {
        self.resolver_id() == other.resolver_id()
            && self.version_correction() == other.version_correction()
            && self.specification() == other.specification()
    }
}

impl Eq for ResolvedTarget {}

impl Hash for ResolvedTarget {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.resolver_id().hash(state);
        self.version_correction().hash(state);
        self.specification().hash(state);
    }
}

/// The coordinate shared by one resolution and every target reached through it.
///
/// "Latest" is fixed against the clock the first time a coordinate is needed and
/// never moves afterwards.
pub(crate) struct Coordinate {
    requested: VersionCorrection,
    pinned: OnceLock<VersionCorrection>,
}

impl Coordinate {
    fn new(requested: VersionCorrection) -> Self {
        Self { requested, pinned: OnceLock::new() }
    }

    fn get(&self, clock: &dyn Clock) -> VersionCorrection {
        *self.pinned.get_or_init(|| {
            let pinned = if self.requested.contains_latest() {
                self.requested.with_latest_fixed(clock.now())
            } else {
                self.requested
            };
            debug!(requested = %self.requested, %pinned, "pinned version-correction");
            pinned
        })
    }

    fn peek(&self) -> Option<VersionCorrection> {
        self.pinned.get().copied()
    }
}

#[derive(Clone, Copy)]
enum CachePolicy<'a> {
    Bypass,
    /// A cache private to one coordinate.
    Scoped(&'a ResolverCache),
    /// A cache shared across coordinates. Version-pinned specifications are keyed at
    /// the coordinate their children resolve against.
    Shared(&'a ResolverCache),
}

/// Everything needed to fetch. Holds no cache, so targets may keep it alive freely.
pub(crate) struct ResolverCore {
    id: u64,
    rules: Vec<StrategyRule>,
    source: Arc<dyn EntitySource>,
    clock: Arc<dyn Clock>,
    max_parent_depth: usize,
    cache_scope: CacheScope,
}

impl ResolverCore {
    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    fn strategy_for(&self, target_type: TargetType) -> &ResolutionStrategy {
        self.rules
            .iter()
            .find(|rule| rule.target_type == target_type)
            .map(|rule| &rule.strategy)
            .unwrap_or(&ResolutionStrategy::Eager)
    }

    fn resolve_with(
        self: &Arc<Self>,
        spec: &TargetSpecification,
        coordinate: &Arc<Coordinate>,
        cache: CachePolicy<'_>,
    ) -> EngineResult<ResolvedTarget> {
        spec.validate(self.max_parent_depth)?;
        // A pinned identifier names its content outright; the coordinate plays no part.
        let vc = if spec.is_version_pinned() {
            VersionCorrection::LATEST
        } else {
            coordinate.get(self.clock.as_ref())
        };
        let (cache, key) = match cache {
            CachePolicy::Bypass => return self.materialize(spec.clone(), vc, coordinate),
            CachePolicy::Scoped(cache) => (cache, vc),
            CachePolicy::Shared(cache) if spec.is_version_pinned() => (cache, coordinate.get(self.clock.as_ref())),
            CachePolicy::Shared(cache) => (cache, vc),
        };
        if let Some(hit) = cache.get(spec, &key) {
            return Ok(hit);
        }
        let target = self.materialize(spec.clone(), vc, coordinate)?;
        Ok(cache.insert(spec.clone(), key, target))
    }

    fn materialize(
        self: &Arc<Self>,
        spec: TargetSpecification,
        vc: VersionCorrection,
        coordinate: &Arc<Coordinate>,
    ) -> EngineResult<ResolvedTarget> {
        match self.strategy_for(spec.target_type) {
            ResolutionStrategy::Lazy { child_types } => {
                debug!(target = %spec, %vc, "deferring target resolution");
                Ok(ResolvedTarget::Lazy(Arc::new(LazyTarget::new(
                    spec,
                    vc,
                    Arc::clone(self),
                    Arc::clone(coordinate),
                    child_types.clone(),
                ))))
            }
            ResolutionStrategy::Eager => {
                let entity = Arc::new(self.fetch(&spec, &vc)?);
                let children = self.resolve_children(&entity, coordinate, &[])?;
                Ok(ResolvedTarget::Eager(Arc::new(EagerTarget {
                    spec,
                    vc,
                    resolver_id: self.id,
                    entity,
                    children,
                })))
            }
        }
    }

    pub(crate) fn fetch(&self, spec: &TargetSpecification, vc: &VersionCorrection) -> EngineResult<Entity> {
        debug!(target = %spec, %vc, "fetching target content");
        if spec.is_version_pinned() {
            self.source.get_version(spec.target_type, &spec.id)
        } else {
            self.source.get_as_of(spec.target_type, &spec.id.object_id(), vc)
        }
    }

    /// Children resolve at the parent's shared coordinate, also when the parent itself
    /// was named by a pinned identifier.
    pub(crate) fn resolve_children(
        self: &Arc<Self>,
        entity: &Entity,
        coordinate: &Arc<Coordinate>,
        deferred_types: &[TargetType],
    ) -> EngineResult<Vec<ResolvedTarget>> {
        entity
            .children
            .iter()
            .map(|child| {
                if deferred_types.contains(&child.target_type) {
                    child.validate(self.max_parent_depth)?;
                    let child_types = match self.strategy_for(child.target_type) {
                        ResolutionStrategy::Lazy { child_types } => child_types.clone(),
                        ResolutionStrategy::Eager => Vec::new(),
                    };
                    let child_vc = if child.is_version_pinned() {
                        VersionCorrection::LATEST
                    } else {
                        coordinate.get(self.clock.as_ref())
                    };
                    Ok(ResolvedTarget::Lazy(Arc::new(LazyTarget::new(
                        child.clone(),
                        child_vc,
                        Arc::clone(self),
                        Arc::clone(coordinate),
                        child_types,
                    ))))
                } else {
                    self.resolve_with(child, coordinate, CachePolicy::Bypass)
                }
            })
            .collect()
    }
}

/// Process-level resolver. Cheap to clone; clones share rules, source and the
/// process-scoped cache.
#[derive(Clone)]
pub struct TargetResolver {
    core: Arc<ResolverCore>,
    process_cache: Arc<ResolverCache>,
}

impl fmt::Debug for TargetResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetResolver")
            .field("id", &self.core.id)
            .field("rules", &self.core.rules)
            .field("cache_scope", &self.core.cache_scope)
            .finish()
    }
}

impl TargetResolver {
    pub fn builder(source: Arc<dyn EntitySource>) -> TargetResolverBuilder {
        TargetResolverBuilder {
            source,
            rules: Vec::new(),
            clock: Arc::new(SystemClock),
            max_parent_depth: DEFAULT_MAX_PARENT_DEPTH,
            cache_scope: CacheScope::default(),
            process_cache_capacity: DEFAULT_PROCESS_CACHE_CAPACITY,
        }
    }

    pub fn from_config(config: &ResolverConfig, source: Arc<dyn EntitySource>, clock: Arc<dyn Clock>) -> Self {
        let mut builder = Self::builder(source)
            .clock(clock)
            .max_parent_depth(config.max_parent_depth)
            .cache_scope(config.cache_scope)
            .process_cache_capacity(config.process_cache_capacity);
        for lazy in &config.lazy {
            builder = builder.lazy(lazy.target_type, lazy.child_types.clone());
        }
        builder.build()
    }

    pub fn strategy_for(&self, target_type: TargetType) -> &ResolutionStrategy {
        self.core.strategy_for(target_type)
    }

    pub fn cache_scope(&self) -> CacheScope {
        self.core.cache_scope
    }

    pub fn max_parent_depth(&self) -> usize {
        self.core.max_parent_depth
    }

    /// Resolves `spec` at `vc`. A "latest" axis is fixed against the clock on every
    /// call; use a [`ResolutionScope`] to keep one pin across many calls.
    ///
    /// Only fully pinned requests go through the process cache: a "latest" request
    /// is pinned to this call alone and could never be served again.
    pub fn resolve(&self, spec: &TargetSpecification, vc: VersionCorrection) -> EngineResult<ResolvedTarget> {
        let coordinate = Arc::new(Coordinate::new(vc));
        let cache = match self.core.cache_scope {
            CacheScope::Process if !vc.contains_latest() => CachePolicy::Shared(&self.process_cache),
            _ => CachePolicy::Bypass,
        };
        self.core.resolve_with(spec, &coordinate, cache)
    }

    /// Opens a cycle-lived scope whose "latest" pin is fixed on first use.
    pub fn scope(&self, vc: VersionCorrection) -> ResolutionScope {
        let cache = match self.core.cache_scope {
            CacheScope::Cycle => Some(ResolverCache::new()),
            CacheScope::Process => None,
        };
        ResolutionScope {
            resolver: self.clone(),
            coordinate: Arc::new(Coordinate::new(vc)),
            cache,
        }
    }

    pub fn process_cache(&self) -> &ResolverCache {
        &self.process_cache
    }
}

pub struct TargetResolverBuilder {
    source: Arc<dyn EntitySource>,
    rules: Vec<StrategyRule>,
    clock: Arc<dyn Clock>,
    max_parent_depth: usize,
    cache_scope: CacheScope,
    process_cache_capacity: usize,
}

impl TargetResolverBuilder {
    pub fn lazy(mut self, target_type: TargetType, child_types: Vec<TargetType>) -> Self {
        self.rules.push(StrategyRule {
            target_type,
            strategy: ResolutionStrategy::Lazy { child_types },
        });
        self
    }

    pub fn eager(mut self, target_type: TargetType) -> Self {
        self.rules.push(StrategyRule { target_type, strategy: ResolutionStrategy::Eager });
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn max_parent_depth(mut self, depth: usize) -> Self {
        self.max_parent_depth = depth;
        self
    }

    pub fn cache_scope(mut self, scope: CacheScope) -> Self {
        self.cache_scope = scope;
        self
    }

    pub fn process_cache_capacity(mut self, capacity: usize) -> Self {
        self.process_cache_capacity = capacity;
        self
    }

    pub fn build(self) -> TargetResolver {
        TargetResolver {
            core: Arc::new(ResolverCore {
                id: NEXT_RESOLVER_ID.fetch_add(1, Ordering::Relaxed),
                rules: self.rules,
                source: self.source,
                clock: self.clock,
                max_parent_depth: self.max_parent_depth,
                cache_scope: self.cache_scope,
            }),
            process_cache: Arc::new(ResolverCache::bounded(self.process_cache_capacity)),
        }
    }
}

/// Resolution bound to one cycle.
///
/// The requested version-correction is pinned the first time a coordinate is needed
/// and every later resolution through this scope, including children of version-pinned
/// containers, uses that same pin.
pub struct ResolutionScope {
    resolver: TargetResolver,
    coordinate: Arc<Coordinate>,
    cache: Option<ResolverCache>,
}

impl fmt::Debug for ResolutionScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolutionScope")
            .field("requested", &self.coordinate.requested)
            .field("pinned", &self.coordinate.peek())
            .finish()
    }
}

impl ResolutionScope {
    pub fn requested(&self) -> VersionCorrection {
        self.coordinate.requested
    }

    pub fn is_pinned(&self) -> bool {
        self.coordinate.peek().is_some()
    }

    /// The scope's coordinate, pinning it now if that has not happened yet.
    pub fn version_correction(&self) -> VersionCorrection {
        self.coordinate.get(self.resolver.core.clock.as_ref())
    }

    pub fn resolve(&self, spec: &TargetSpecification) -> EngineResult<ResolvedTarget> {
        let cache = match &self.cache {
            Some(cache) => CachePolicy::Scoped(cache),
            None => CachePolicy::Shared(&self.resolver.process_cache),
        };
        self.resolver.core.resolve_with(spec, &self.coordinate, cache)
    }

    pub fn cache(&self) -> &ResolverCache {
        self.cache.as_ref().unwrap_or(self.resolver.process_cache.as_ref())
    }
}
