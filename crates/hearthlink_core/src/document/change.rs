//! Before/after snapshots delivered by the trigger boundary.

use super::path::{get_path, FieldPath};
use super::Document;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Point-in-time view of one document. `data == None` means the document did
/// not exist at that point.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    data: Option<Document>,
}

impl Snapshot {
    pub fn new(data: Option<Document>) -> Self {
        Self { data }
    }

    pub fn missing() -> Self {
        Self { data: None }
    }

    /// Builds a snapshot from a JSON object; any other value means "missing".
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(map) => Self { data: Some(map) },
            _ => Self::missing(),
        }
    }

    pub fn exists(&self) -> bool {
        self.data.is_some()
    }

    pub fn data(&self) -> Option<&Document> {
        self.data.as_ref()
    }

    pub fn get(&self, path: impl Into<FieldPath>) -> Option<&Value> {
        self.get_path(&path.into())
    }

    pub fn get_path(&self, path: &FieldPath) -> Option<&Value> {
        get_path(self.data.as_ref()?, path)
    }
}

/// Immutable before/after pair for one document mutation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Change {
    pub before: Snapshot,
    pub after: Snapshot,
}

impl Change {
    pub fn new(before: Snapshot, after: Snapshot) -> Self {
        Self { before, after }
    }

    pub fn created(after: Snapshot) -> Self {
        Self::new(Snapshot::missing(), after)
    }

    pub fn deleted(before: Snapshot) -> Self {
        Self::new(before, Snapshot::missing())
    }

    /// Convenience for tests and JSON payloads: `null` means missing.
    pub fn from_values(before: Value, after: Value) -> Self {
        Self::new(Snapshot::from_value(before), Snapshot::from_value(after))
    }

    /// Returns `(before, after)` for one path.
    pub fn field(&self, path: &FieldPath) -> (Option<&Value>, Option<&Value>) {
        (self.before.get_path(path), self.after.get_path(path))
    }
}
