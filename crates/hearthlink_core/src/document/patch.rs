//! Flattened field patches.
//!
//! A patch maps leaf paths to either a value or the deletion sentinel. Merge
//! writes never remove fields on their own, so a relation that wants a stale
//! cached key gone must name it with `FieldValue::Delete`.

use super::path::{remove_path, set_path, FieldPath};
use super::{Document, DocumentError, DocumentResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Value written at one patch path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldValue {
    /// Replace the value at the path.
    Set(Value),
    /// Remove the field at the path.
    Delete,
}

/// Ordered set of leaf writes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Patch {
    fields: BTreeMap<FieldPath, FieldValue>,
}

impl Patch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flattens a JSON object into leaf writes.
    ///
    /// Non-empty objects are descended into; every other value (including
    /// `{}`) becomes one leaf, so `{"wheel": {}}` clears the `wheel` map.
    pub fn flatten(value: &Value) -> DocumentResult<Self> {
        let map = value
            .as_object()
            .ok_or(DocumentError::NotAnObject("patch"))?;
        let mut patch = Self::new();
        flatten_into(&mut patch, &FieldPath::default(), map);
        Ok(patch)
    }

    /// Flattens a JSON object and nests every leaf under `prefix`.
    pub fn flatten_under(prefix: &FieldPath, value: &Value) -> DocumentResult<Self> {
        Ok(Self::flatten(value)?.prefixed(prefix))
    }

    pub fn set(&mut self, path: impl Into<FieldPath>, value: Value) -> &mut Self {
        self.fields.insert(path.into(), FieldValue::Set(value));
        self
    }

    pub fn delete(&mut self, path: impl Into<FieldPath>) -> &mut Self {
        self.fields.insert(path.into(), FieldValue::Delete);
        self
    }

    pub fn with_set(mut self, path: impl Into<FieldPath>, value: Value) -> Self {
        self.set(path, value);
        self
    }

    pub fn with_delete(mut self, path: impl Into<FieldPath>) -> Self {
        self.delete(path);
        self
    }

    /// Moves every entry of `other` into this patch; later entries win.
    pub fn extend(&mut self, other: Patch) {
        self.fields.extend(other.fields);
    }

    /// Returns a copy with every path nested under `prefix`.
    pub fn prefixed(self, prefix: &FieldPath) -> Self {
        Self {
            fields: self
                .fields
                .into_iter()
                .map(|(path, value)| (prefix.join(&path), value))
                .collect(),
        }
    }

    pub fn get(&self, path: &FieldPath) -> Option<&FieldValue> {
        self.fields.get(path)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&FieldPath, &FieldValue)> {
        self.fields.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Applies the patch to a document in path order.
    pub fn apply_to(&self, doc: &mut Document) -> DocumentResult<()> {
        for (path, value) in &self.fields {
            if path.is_empty() {
                return Err(DocumentError::EmptyPath);
            }
            match value {
                FieldValue::Set(value) => {
                    set_path(doc, path, value.clone());
                }
                FieldValue::Delete => {
                    remove_path(doc, path);
                }
            }
        }
        Ok(())
    }
}

fn flatten_into(patch: &mut Patch, prefix: &FieldPath, map: &serde_json::Map<String, Value>) {
    for (key, value) in map {
        let path = prefix.child(key.clone());
        match value {
            Value::Object(nested) if !nested.is_empty() => flatten_into(patch, &path, nested),
            other => {
                patch.fields.insert(path, FieldValue::Set(other.clone()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{FieldValue, Patch};
    use crate::document::FieldPath;
    use serde_json::json;

    #[test]
    fn flatten_produces_leaf_paths_and_keeps_empty_maps() {
        let patch = Patch::flatten(&json!({"a": {"b": 1, "c": {}}, "d": [1, 2]})).unwrap();
        assert_eq!(patch.len(), 3);
        assert_eq!(
            patch.get(&FieldPath::parse("a.b")),
            Some(&FieldValue::Set(json!(1)))
        );
        assert_eq!(
            patch.get(&FieldPath::parse("a.c")),
            Some(&FieldValue::Set(json!({})))
        );
    }

    #[test]
    fn flatten_rejects_scalars() {
        assert!(Patch::flatten(&json!(3)).is_err());
    }

    #[test]
    fn apply_merges_leaves_without_touching_siblings() {
        let mut doc = json!({"wheel": {"W1": true}, "name": "car"})
            .as_object()
            .cloned()
            .unwrap();
        Patch::flatten(&json!({"wheel": {"W2": true}}))
            .unwrap()
            .with_delete("name")
            .apply_to(&mut doc)
            .unwrap();
        assert_eq!(json!(doc), json!({"wheel": {"W1": true, "W2": true}}));
    }

    #[test]
    fn apply_rejects_root_path() {
        let mut doc = serde_json::Map::new();
        let patch = Patch::new().with_set(FieldPath::default(), json!(1));
        assert!(patch.apply_to(&mut doc).is_err());
    }
}
