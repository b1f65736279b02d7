use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identity of a logical entity across fetches.
///
/// Remote records are identified either by a numeric id or by a name; both
/// forms hash and compare by value so they can key set operations.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordKey {
    Id(i64),
    Name(String),
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "{id}"),
            Self::Name(name) => f.write_str(name),
        }
    }
}

impl From<i64> for RecordKey {
    fn from(id: i64) -> Self {
        Self::Id(id)
    }
}

impl From<&str> for RecordKey {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

impl From<String> for RecordKey {
    fn from(name: String) -> Self {
        Self::Name(name)
    }
}

/// Identity key extractor.
///
/// Must return the same key for every fetch of the same logical entity; set
/// differences and record lookups rely on it instead of structural equality.
pub trait Identify {
    fn key(&self) -> RecordKey;
}

/// Anything a [`ListEngine`](crate::engine::ListEngine) can hold.
pub trait Record: Identify + Clone + fmt::Debug + PartialEq + Send + Sync + 'static {}

impl<T> Record for T where T: Identify + Clone + fmt::Debug + PartialEq + Send + Sync + 'static {}

/// Anything a [`WorkflowEngine`](crate::engine::WorkflowEngine) can carry as a
/// target or parameter.
pub trait Payload: Clone + fmt::Debug + Send + Sync + 'static {}

impl<T> Payload for T where T: Clone + fmt::Debug + Send + Sync + 'static {}
