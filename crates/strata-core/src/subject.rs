use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::attribute::AttributeValue;

// ---------------------------------------------------------------------------
// AttributeSource
// ---------------------------------------------------------------------------

/// One named collection of attributes (e.g. the data set, the file meta).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttributeSource {
    pub name: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, AttributeValue>,
}

impl AttributeSource {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with(mut self, keyword: impl Into<String>, value: AttributeValue) -> Self {
        self.attributes.insert(keyword.into(), value);
        self
    }
}

// ---------------------------------------------------------------------------
// Subject
// ---------------------------------------------------------------------------

/// Read-only snapshot of an attribute-bearing entity that rules evaluate against.
///
/// Sources are searched in order and the first one holding the attribute wins.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Subject {
    pub key: String,
    pub sources: Vec<AttributeSource>,
}

impl Subject {
    pub fn new(key: impl Into<String>, sources: Vec<AttributeSource>) -> Self {
        Self {
            key: key.into(),
            sources,
        }
    }

    /// Find an attribute by keyword, trying each source in order.
    pub fn find(&self, keyword: &str) -> Option<&AttributeValue> {
        self.sources
            .iter()
            .find_map(|source| source.attributes.get(keyword))
    }
}
