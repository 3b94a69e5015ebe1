//! Cross-component metadata propagation (design note §9).
//!
//! The original system passes a dynamically-typed dict between pipeline
//! stages. Here that becomes a typed union plus an extension map: a small
//! closed set of well-known value shapes, with producers free to stash
//! anything JSON-representable under a string key. The pipeline merges
//! maps by adding keys, never overwriting a key a prior stage already set.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// A single metadata value. Producers reach for a typed variant when one
/// fits (`extracted_metadata`, `pcd_scale`, ...); anything else falls back
/// to raw JSON so new validators can add fields without a crate-wide
/// schema change.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Json(JsonValue),
}

impl MetadataValue {
    pub fn json(value: impl Serialize) -> Self {
        MetadataValue::Json(serde_json::to_value(value).unwrap_or(JsonValue::Null))
    }

    pub fn as_json(&self) -> &JsonValue {
        match self {
            MetadataValue::Json(value) => value,
        }
    }
}

/// Additive string-keyed metadata map. Standard top-level keys per spec
/// §3: `extracted_metadata`, `pcd_scale`, `device`, `size`,
/// `transient_validation`, `validation_pipeline`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetadataMap {
    entries: BTreeMap<String, MetadataValue>,
}

impl MetadataMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a key. Returns `false` without mutating if the key is
    /// already present — metadata keys are additive across pipeline
    /// stages and must never be overwritten by a later stage (spec §3).
    pub fn insert(&mut self, key: impl Into<String>, value: MetadataValue) -> bool {
        let key = key.into();
        if self.entries.contains_key(&key) {
            return false;
        }
        self.entries.insert(key, value);
        true
    }

    pub fn get(&self, key: &str) -> Option<&MetadataValue> {
        self.entries.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Merges `other` into `self`, keeping `self`'s existing keys and
    /// adding any key from `other` that `self` does not already have.
    /// Used by the Validation Manager (L12) to combine a basic
    /// validator's metadata with a transient validator's metadata.
    pub fn merge_additive(&mut self, other: MetadataMap) {
        for (key, value) in other.entries {
            self.entries.entry(key).or_insert(value);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &MetadataValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_does_not_overwrite_existing_key() {
        let mut map = MetadataMap::new();
        assert!(map.insert("k", MetadataValue::json(1)));
        assert!(!map.insert("k", MetadataValue::json(2)));
        assert_eq!(map.get("k").unwrap().as_json(), &JsonValue::from(1));
    }

    #[test]
    fn merge_additive_keeps_first_writer() {
        let mut base = MetadataMap::new();
        base.insert("shared", MetadataValue::json("basic"));
        base.insert("only_basic", MetadataValue::json(true));

        let mut incoming = MetadataMap::new();
        incoming.insert("shared", MetadataValue::json("transient"));
        incoming.insert("only_transient", MetadataValue::json(true));

        base.merge_additive(incoming);

        assert_eq!(
            base.get("shared").unwrap().as_json(),
            &JsonValue::from("basic")
        );
        assert!(base.contains_key("only_basic"));
        assert!(base.contains_key("only_transient"));
    }
}
