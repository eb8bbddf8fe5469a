//! The tuple record type

use crate::value::Value;
use indexmap::IndexMap;
use rustc_hash::FxBuildHasher;
use serde::{Deserialize, Serialize};

/// Type alias for IndexMap with FxBuildHasher for fast field access.
pub type FxIndexMap<K, V> = IndexMap<K, V, FxBuildHasher>;

/// One record flowing through a pipeline, or the terminal EOF marker for
/// its source.
///
/// Fields keep insertion order. An EOF tuple carries no data fields other
/// than incidental metadata (worker summaries, batch counters); operators
/// treat it as the end of the upstream sequence, never as data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tuple {
    /// Field payload
    pub fields: FxIndexMap<String, Value>,
    /// End-of-stream marker
    #[serde(default)]
    pub eof: bool,
}

impl Default for Tuple {
    fn default() -> Self {
        Self::new()
    }
}

impl Tuple {
    pub fn new() -> Self {
        Self {
            fields: IndexMap::with_hasher(FxBuildHasher),
            eof: false,
        }
    }

    /// Creates the terminal marker for a stream.
    pub fn eof() -> Self {
        Self {
            fields: IndexMap::with_hasher(FxBuildHasher),
            eof: true,
        }
    }

    /// Creates a tuple from a pre-built field map.
    pub fn from_fields(fields: FxIndexMap<String, Value>) -> Self {
        Self { fields, eof: false }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn is_eof(&self) -> bool {
        self.eof
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(|v| v.as_str())
    }

    pub fn get_int(&self, key: &str) -> Option<i64> {
        self.fields.get(key).and_then(|v| v.as_int())
    }

    pub fn get_float(&self, key: &str) -> Option<f64> {
        self.fields.get(key).and_then(|v| v.as_float())
    }

    pub fn get_list(&self, key: &str) -> Option<&[Value]> {
        self.fields.get(key).and_then(|v| v.as_list())
    }

    /// Projects the named fields into the tuple's value representation,
    /// used when tuples are nested inside other tuples (group lists).
    pub fn to_map(&self) -> Value {
        let mut m = IndexMap::new();
        for (k, v) in &self.fields {
            m.insert(k.clone(), v.clone());
        }
        Value::Map(m)
    }

    /// Serializes the data fields as a JSON object.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.fields)
    }

    /// Builds a data tuple from a JSON object, keeping field order.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        let fields: FxIndexMap<String, Value> = serde_json::from_str(text)?;
        Ok(Self { fields, eof: false })
    }
}
