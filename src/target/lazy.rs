//! Deferred resolution for container targets.

use super::resolver::{ComputationTarget, Coordinate, ResolvedTarget, ResolverCore};
use super::source::Entity;
use super::spec::{TargetSpecification, TargetType};
use super::version::VersionCorrection;
use crate::error::EngineResult;
use std::fmt;
use std::sync::{Arc, OnceLock};

/// A resolved target whose content, and the content of its children, is fetched on
/// first use. Failures are remembered and returned to every later caller.
pub struct LazyTarget {
    spec: TargetSpecification,
    vc: VersionCorrection,
    core: Arc<ResolverCore>,
    /// Where the children resolve; shared with the scope that produced this target.
    coordinate: Arc<Coordinate>,
    child_types: Vec<TargetType>,
    entity: OnceLock<EngineResult<Arc<Entity>>>,
    children: OnceLock<EngineResult<Vec<ResolvedTarget>>>,
}

impl LazyTarget {
    pub(crate) fn new(
        spec: TargetSpecification,
        vc: VersionCorrection,
        core: Arc<ResolverCore>,
        coordinate: Arc<Coordinate>,
        child_types: Vec<TargetType>,
    ) -> Self {
        Self {
            spec,
            vc,
            core,
            coordinate,
            child_types,
            entity: OnceLock::new(),
            children: OnceLock::new(),
        }
    }

    pub(crate) fn resolver_id(&self) -> u64 {
        self.core.id()
    }

    pub fn is_fetched(&self) -> bool {
        matches!(self.entity.get(), Some(Ok(_)))
    }

    pub fn child_types(&self) -> &[TargetType] {
        &self.child_types
    }
}

impl ComputationTarget for LazyTarget {
    fn specification(&self) -> &TargetSpecification {
        &self.spec
    }

    fn version_correction(&self) -> &VersionCorrection {
        &self.vc
    }

    fn entity(&self) -> EngineResult<Arc<Entity>> {
        self.entity
            .get_or_init(|| self.core.fetch(&self.spec, &self.vc).map(Arc::new))
            .clone()
    }

    fn children(&self) -> EngineResult<Vec<ResolvedTarget>> {
        self.children
            .get_or_init(|| {
                let entity = self.entity()?;
                self.core.resolve_children(&entity, &self.coordinate, &self.child_types)
            })
            .clone()
    }
}

impl fmt::Debug for LazyTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyTarget")
            .field("spec", &self.spec)
            .field("vc", &self.vc)
            .field("fetched", &self.is_fetched())
            .finish()
    }
}
