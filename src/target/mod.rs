//! Versioned target resolution.
pub mod cache;
pub mod lazy;
pub mod resolver;
pub mod source;
pub mod spec;
pub mod version;

pub use cache::{CacheScope, ResolverCache};
pub use lazy::LazyTarget;
pub use resolver::{
    ComputationTarget, ResolutionScope, ResolutionStrategy, ResolvedTarget, StrategyRule, TargetResolver,
    TargetResolverBuilder,
};
pub use source::{Entity, EntitySource, InMemoryEntitySource};
pub use spec::{ObjectId, TargetSpecification, TargetType, UniqueId};
pub use version::VersionCorrection;
