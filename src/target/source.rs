//! Entity access: the collaborator that returns target content by identifier and
//! version-correction.

use super::spec::{ObjectId, TargetSpecification, TargetType, UniqueId};
use super::version::VersionCorrection;
use crate::error::{EngineError, EngineResult};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Content of one version of a target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    /// Always versioned once returned by a source.
    pub unique_id: UniqueId,
    pub target_type: TargetType,
    pub name: String,
    pub attributes: BTreeMap<String, String>,
    /// Targets contained within this one. Listing them does not fetch them.
    pub children: Vec<TargetSpecification>,
}

impl Entity {
    pub fn new(target_type: TargetType, object_id: ObjectId, name: impl Into<String>) -> Self {
        Self {
            unique_id: object_id.at_latest(),
            target_type,
            name: name.into(),
            attributes: BTreeMap::new(),
            children: Vec::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn with_child(mut self, child: TargetSpecification) -> Self {
        self.children.push(child);
        self
    }
}

/// Returns entity content. Implementations may block on I/O.
///
/// Both methods fail with [`EngineError::NotFound`] when nothing matches.
pub trait EntitySource: Send + Sync {
    /// The exact version named by a versioned identifier.
    fn get_version(&self, target_type: TargetType, id: &UniqueId) -> EngineResult<Entity>;

    /// The version visible at a fully pinned coordinate.
    fn get_as_of(&self, target_type: TargetType, id: &ObjectId, vc: &VersionCorrection) -> EngineResult<Entity>;
}

#[derive(Debug, Clone)]
struct EntityVersion {
    valid_from: DateTime<Utc>,
    corrected_from: DateTime<Utc>,
    entity: Entity,
}

/// An in-memory bitemporal master.
///
/// Every stored version is stamped with a business-time `valid_from` and a
/// correction-time `corrected_from`; a lookup at `(as_of, corrected_to)` returns the
/// latest version with `valid_from <= as_of` among those known by `corrected_to`.
#[derive(Debug, Default)]
pub struct InMemoryEntitySource {
    versions: RwLock<HashMap<(TargetType, ObjectId), Vec<EntityVersion>>>,
    fetches: AtomicUsize,
    fetch_log: RwLock<Vec<UniqueId>>,
}

impl InMemoryEntitySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a new version and returns its versioned identifier.
    pub fn store(
        &self,
        mut entity: Entity,
        valid_from: DateTime<Utc>,
        corrected_from: DateTime<Utc>,
    ) -> UniqueId {
        let object_id = entity.unique_id.object_id();
        let mut versions = self.versions.write();
        let history = versions.entry((entity.target_type, object_id.clone())).or_default();
        let unique_id = object_id.at_version((history.len() + 1).to_string());
        entity.unique_id = unique_id.clone();
        history.push(EntityVersion { valid_from, corrected_from, entity });
        unique_id
    }

    /// Number of successful and failed lookups served so far.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Identifiers of every lookup, in call order.
    pub fn fetch_log(&self) -> Vec<UniqueId> {
        self.fetch_log.read().clone()
    }

    fn record(&self, id: UniqueId) {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.fetch_log.write().push(id);
    }
}

impl EntitySource for InMemoryEntitySource {
    fn get_version(&self, target_type: TargetType, id: &UniqueId) -> EngineResult<Entity> {
        self.record(id.clone());
        let versions = self.versions.read();
        versions
            .get(&(target_type, id.object_id()))
            .and_then(|history| history.iter().find(|v| v.entity.unique_id == *id))
            .map(|v| v.entity.clone())
            .ok_or_else(|| EngineError::not_found(format!("{target_type} {id}")))
    }

    fn get_as_of(&self, target_type: TargetType, id: &ObjectId, vc: &VersionCorrection) -> EngineResult<Entity> {
        self.record(id.at_latest());
        let (Some(as_of), Some(corrected_to)) = (vc.version_as_of, vc.corrected_to) else {
            return Err(EngineError::invalid_argument(format!("version-correction {vc} is not pinned")));
        };
        let versions = self.versions.read();
        versions
            .get(&(target_type, id.clone()))
            .and_then(|history| {
                history
                    .iter()
                    .filter(|v| v.valid_from <= as_of && v.corrected_from <= corrected_to)
                    .max_by_key(|v| (v.valid_from, v.corrected_from))
            })
            .map(|v| v.entity.clone())
            .ok_or_else(|| EngineError::not_found(format!("{target_type} {id} at {vc}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, d, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_bitemporal_lookup_respects_both_axes() {
        let source = InMemoryEntitySource::new();
        let oid = ObjectId::new("Sec", "BOND1");
        let v1 = source.store(Entity::new(TargetType::Security, oid.clone(), "Bond v1"), day(1), day(1));
        // A correction issued on day 5 for business time day 1.
        let v2 = source.store(Entity::new(TargetType::Security, oid.clone(), "Bond v1 corrected"), day(1), day(5));

        let before_correction = source.get_as_of(TargetType::Security, &oid, &VersionCorrection::of(day(3), day(3))).unwrap();
        assert_eq!(before_correction.unique_id, v1);

        let after_correction = source.get_as_of(TargetType::Security, &oid, &VersionCorrection::of(day(3), day(6))).unwrap();
        assert_eq!(after_correction.unique_id, v2);

        let missing = source.get_as_of(TargetType::Security, &oid, &VersionCorrection::of(Utc.with_ymd_and_hms(2023, 12, 1, 0, 0, 0).unwrap(), day(9)));
        assert!(matches!(missing, Err(EngineError::NotFound(_))));
    }

    #[test]
    fn test_exact_version_lookup() {
        let source = InMemoryEntitySource::new();
        let oid = ObjectId::new("Sec", "EQ1");
        let v1 = source.store(Entity::new(TargetType::Security, oid.clone(), "one"), day(1), day(1));
        source.store(Entity::new(TargetType::Security, oid.clone(), "two"), day(2), day(2));

        assert_eq!(source.get_version(TargetType::Security, &v1).unwrap().name, "one");
        assert!(source.get_version(TargetType::Security, &oid.at_version("9")).is_err());
        assert_eq!(source.fetch_count(), 2);
    }

    #[test]
    fn test_unpinned_coordinate_is_rejected() {
        let source = InMemoryEntitySource::new();
        let result = source.get_as_of(TargetType::Security, &ObjectId::new("Sec", "X"), &VersionCorrection::LATEST);
        assert!(matches!(result, Err(EngineError::InvalidArgument(_))));
    }
}
