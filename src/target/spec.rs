//! Target identity: what a calculation is performed over, prior to resolution.

use crate::error::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Separator used in the textual form of identifiers.
const SEPARATOR: char = '~';

/// The kind of entity a target refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetType {
    /// A bare identifier with no backing entity (e.g. a currency or a ticker).
    Primitive,
    Security,
    Trade,
    Position,
    PortfolioNode,
    Portfolio,
}

impl TargetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Primitive => "primitive",
            Self::Security => "security",
            Self::Trade => "trade",
            Self::Position => "position",
            Self::PortfolioNode => "portfolio_node",
            Self::Portfolio => "portfolio",
        }
    }
}

impl fmt::Display for TargetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TargetType {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "primitive" => Ok(Self::Primitive),
            "security" => Ok(Self::Security),
            "trade" => Ok(Self::Trade),
            "position" => Ok(Self::Position),
            "portfolio_node" => Ok(Self::PortfolioNode),
            "portfolio" => Ok(Self::Portfolio),
            other => Err(EngineError::invalid_argument(format!("unknown target type '{other}'"))),
        }
    }
}

/// Identifies an entity across all of its versions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId {
    pub scheme: String,
    pub value: String,
}

impl ObjectId {
    pub fn new(scheme: impl Into<String>, value: impl Into<String>) -> Self {
        Self { scheme: scheme.into(), value: value.into() }
    }

    pub fn at_version(&self, version: impl Into<String>) -> UniqueId {
        UniqueId {
            scheme: self.scheme.clone(),
            value: self.value.clone(),
            version: Some(version.into()),
        }
    }

    pub fn at_latest(&self) -> UniqueId {
        UniqueId { scheme: self.scheme.clone(), value: self.value.clone(), version: None }
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{SEPARATOR}{}", self.scheme, self.value)
    }
}

/// An identifier that is either pinned to one version or refers to "whatever is current".
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UniqueId {
    pub scheme: String,
    pub value: String,
    pub version: Option<String>,
}

impl UniqueId {
    pub fn of(scheme: impl Into<String>, value: impl Into<String>) -> Self {
        Self { scheme: scheme.into(), value: value.into(), version: None }
    }

    pub fn versioned(scheme: impl Into<String>, value: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            scheme: scheme.into(),
            value: value.into(),
            version: Some(version.into()),
        }
    }

    /// Parses `scheme~value` or `scheme~value~version`.
    pub fn parse(text: &str) -> EngineResult<Self> {
        let parts: Vec<&str> = text.split(SEPARATOR).collect();
        let id = match parts.as_slice() {
            [scheme, value] => Self::of(*scheme, *value),
            [scheme, value, version] => Self::versioned(*scheme, *value, *version),
            _ => return Err(EngineError::invalid_argument(format!("malformed identifier '{text}'"))),
        };
        id.validate()?;
        Ok(id)
    }

    pub fn is_versioned(&self) -> bool {
        self.version.is_some()
    }

    pub fn object_id(&self) -> ObjectId {
        ObjectId::new(self.scheme.clone(), self.value.clone())
    }

    pub fn validate(&self) -> EngineResult<()> {
        let bad_part = |part: &str| part.is_empty() || part.contains(SEPARATOR);
        if bad_part(&self.scheme) {
            return Err(EngineError::invalid_argument(format!("identifier scheme '{}' is malformed", self.scheme)));
        }
        if bad_part(&self.value) {
            return Err(EngineError::invalid_argument(format!("identifier value '{}' is malformed", self.value)));
        }
        if let Some(version) = &self.version {
            if bad_part(version) {
                return Err(EngineError::invalid_argument(format!("identifier version '{version}' is malformed")));
            }
        }
        Ok(())
    }
}

impl fmt::Display for UniqueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version {
            Some(version) => write!(f, "{}{SEPARATOR}{}{SEPARATOR}{}", self.scheme, self.value, version),
            None => write!(f, "{}{SEPARATOR}{}", self.scheme, self.value),
        }
    }
}

/// Describes "what" a calculation targets: a typed identifier, optionally contained
/// within a parent target (e.g. a position within a portfolio node).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TargetSpecification {
    pub target_type: TargetType,
    pub id: UniqueId,
    pub parent: Option<Box<TargetSpecification>>,
}

impl TargetSpecification {
    pub fn new(target_type: TargetType, id: UniqueId) -> Self {
        Self { target_type, id, parent: None }
    }

    pub fn primitive(scheme: &str, value: &str) -> Self {
        Self::new(TargetType::Primitive, UniqueId::of(scheme, value))
    }

    pub fn contained_in(mut self, parent: TargetSpecification) -> Self {
        self.parent = Some(Box::new(parent));
        self
    }

    /// True when the identifier already names an exact version.
    pub fn is_version_pinned(&self) -> bool {
        self.id.is_versioned()
    }

    /// Parent chain from the immediate parent outwards.
    pub fn parents(&self) -> impl Iterator<Item = &TargetSpecification> {
        std::iter::successors(self.parent.as_deref(), |spec| spec.parent.as_deref())
    }

    pub fn depth(&self) -> usize {
        self.parents().count()
    }

    pub fn validate(&self, max_parent_depth: usize) -> EngineResult<()> {
        self.id.validate()?;
        let depth = self.depth();
        if depth > max_parent_depth {
            return Err(EngineError::invalid_argument(format!(
                "target {} has a parent chain of depth {depth}, limit is {max_parent_depth}",
                self.id
            )));
        }
        for parent in self.parents() {
            parent.id.validate()?;
            if parent.target_type == TargetType::Primitive {
                return Err(EngineError::invalid_argument(format!(
                    "target {} cannot be contained within primitive {}",
                    self.id, parent.id
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Display for TargetSpecification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.target_type, self.id)?;
        if let Some(parent) = &self.parent {
            write!(f, " in {parent}")?;
        }
        Ok(())
    }
}
