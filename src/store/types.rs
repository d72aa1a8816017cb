use crate::target::TargetSpecification;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl NodeId {
    #[inline(always)]
    pub fn index(&self) -> usize { self.0 as usize }
    pub fn new(idx: usize) -> Self { Self(idx as u32) }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Names one value: a requirement name over a target, qualified by properties
/// (currency, curve, calculation method...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ValueSpecification {
    pub name: String,
    pub target: TargetSpecification,
    pub properties: BTreeMap<String, String>,
}

impl ValueSpecification {
    pub fn new(name: impl Into<String>, target: TargetSpecification) -> Self {
        Self { name: name.into(), target, properties: BTreeMap::new() }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }
}

impl fmt::Display for ValueSpecification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.name, self.target)?;
        if !self.properties.is_empty() {
            let props: Vec<String> = self.properties.iter().map(|(k, v)| format!("{k}={v}")).collect();
            write!(f, "{{{}}}", props.join(","))?;
        }
        Ok(())
    }
}

/// The atomic unit of data exchanged between nodes and read from snapshots.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Scalar(f64),
    /// Shared so that fan-out to many consumers does not copy.
    Series(Arc<Vec<f64>>),
    Text(Arc<str>),
}

impl Value {
    pub fn series(values: Vec<f64>) -> Self {
        Value::Series(Arc::new(values))
    }

    pub fn text(text: &str) -> Self {
        Value::Text(Arc::from(text))
    }

    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            Value::Scalar(s) => Some(*s),
            Value::Series(v) if v.len() == 1 => Some(v[0]),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(t) => Some(&**t),
            _ => None,
        }
    }

    pub fn to_vec(&self) -> Vec<f64> {
        match self {
            Value::Scalar(s) => vec![*s],
            Value::Series(s) => s.to_vec(),
            Value::Text(_) => Vec::new(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Scalar(s) => write!(f, "{s:.3}"),
            Value::Series(v) if v.len() == 1 => write!(f, "{:.3}", v[0]),
            Value::Series(v) => match v.first() {
                Some(first) => write!(f, "{first:.3}, ... (len={})", v.len()),
                None => f.write_str("(empty)"),
            },
            Value::Text(t) => write!(f, "\"{t}\""),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeMetadata {
    /// Unique within a graph.
    pub name: String,
    /// Name of the calculation function the node invokes.
    pub function: String,
}
