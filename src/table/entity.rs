use crate::core::Value;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;

/// Opaque per-row version tag.
///
/// `ETag::all()` is the wildcard accepted by every conditional write.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct ETag(String);

impl ETag {
    const WILDCARD: &'static str = "*";

    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn all() -> Self {
        Self(Self::WILDCARD.to_string())
    }

    pub fn is_wildcard(&self) -> bool {
        self.0 == Self::WILDCARD
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when a write conditioned on `self` may replace a row tagged `current`.
    pub fn admits(&self, current: &ETag) -> bool {
        self.is_wildcard() || self == current
    }
}

impl fmt::Display for ETag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A generic table row: keys, version metadata and untyped properties.
#[derive(Debug, Clone, PartialEq)]
pub struct TableEntity {
    pub partition_key: String,
    pub row_key: String,
    pub etag: ETag,
    pub timestamp: Option<DateTime<Utc>>,
    pub properties: BTreeMap<String, Value>,
}

impl TableEntity {
    pub fn new(partition_key: impl Into<String>, row_key: impl Into<String>) -> Self {
        Self {
            partition_key: partition_key.into(),
            row_key: row_key.into(),
            etag: ETag::default(),
            timestamp: None,
            properties: BTreeMap::new(),
        }
    }

    /// Builder-style property setter.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_str)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.properties.insert(name.into(), value.into());
    }

    pub fn key(&self) -> (&str, &str) {
        (&self.partition_key, &self.row_key)
    }

    /// Keeps only the listed properties; keys and metadata are always retained.
    pub fn project(&mut self, columns: &[String]) {
        self.properties.retain(|name, _| columns.iter().any(|c| c == name));
    }
}
