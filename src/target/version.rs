//! Bitemporal coordinates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A two-instant coordinate into a versioned ledger.
///
/// `version_as_of` selects along business time, `corrected_to` along correction time.
/// `None` on either axis is the "latest" sentinel; it has to be fixed against a clock
/// before it can be used as a cache key or handed to an entity source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct VersionCorrection {
    pub version_as_of: Option<DateTime<Utc>>,
    pub corrected_to: Option<DateTime<Utc>>,
}

impl VersionCorrection {
    pub const LATEST: VersionCorrection = VersionCorrection { version_as_of: None, corrected_to: None };

    pub fn of(version_as_of: DateTime<Utc>, corrected_to: DateTime<Utc>) -> Self {
        Self {
            version_as_of: Some(version_as_of),
            corrected_to: Some(corrected_to),
        }
    }

    pub fn of_version_as_of(version_as_of: DateTime<Utc>) -> Self {
        Self { version_as_of: Some(version_as_of), corrected_to: None }
    }

    pub fn of_corrected_to(corrected_to: DateTime<Utc>) -> Self {
        Self { version_as_of: None, corrected_to: Some(corrected_to) }
    }

    /// True if either axis still carries the "latest" sentinel.
    pub fn contains_latest(&self) -> bool {
        self.version_as_of.is_none() || self.corrected_to.is_none()
    }

    /// Replaces any "latest" axis with `now`.
    pub fn with_latest_fixed(&self, now: DateTime<Utc>) -> Self {
        Self {
            version_as_of: Some(self.version_as_of.unwrap_or(now)),
            corrected_to: Some(self.corrected_to.unwrap_or(now)),
        }
    }
}

impl fmt::Display for VersionCorrection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let axis = |instant: &Option<DateTime<Utc>>| match instant {
            Some(at) => at.to_rfc3339(),
            None => "LATEST".to_string(),
        };
        write!(f, "V{}.C{}", axis(&self.version_as_of), axis(&self.corrected_to))
    }
}
