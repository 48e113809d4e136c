//! Diff-and-propagate helper shared by every relation kind.
//!
//! # Responsibility
//! - Turn a before/after pair of source objects into the leaf writes that
//!   bring a denormalized copy of the declared fields up to date.
//! - Route each declared field to the public or the secure patch.
//!
//! # Invariants
//! - Unchanged fields produce no entries; an empty result means no write.
//! - Keys removed from an object-valued field become deletion sentinels.
//! - Running twice on the same pair produces the same patches.

use crate::document::diff::{removed_keys, updated_entries};
use crate::document::path::get_path;
use crate::document::{Document, FieldPath, Patch};
use crate::model::is_secure_field;
use serde_json::Value;

/// Writes for the public document and for its secure mirror.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CachePatches {
    pub public: Patch,
    pub secure: Patch,
}

impl CachePatches {
    pub fn is_empty(&self) -> bool {
        self.public.is_empty() && self.secure.is_empty()
    }

    /// Nests both patches under `prefix` (the cache location).
    pub fn prefixed(self, prefix: &FieldPath) -> Self {
        Self {
            public: self.public.prefixed(prefix),
            secure: self.secure.prefixed(prefix),
        }
    }
}

/// Computes the cache writes for `fields` between two source objects.
///
/// With `wholesale`, every declared field present in `after` is written as
/// is. Otherwise fields are compared pairwise; object values on both sides
/// are compared one level down.
pub fn cache_patches(
    fields: &[FieldPath],
    before: Option<&Document>,
    after: Option<&Document>,
    wholesale: bool,
) -> CachePatches {
    let mut patches = CachePatches::default();
    for field in fields {
        let old = before.and_then(|doc| get_path(doc, field));
        let new = after.and_then(|doc| get_path(doc, field));
        let target = if is_secure_field(field) {
            &mut patches.secure
        } else {
            &mut patches.public
        };

        if wholesale {
            if let Some(value) = new {
                target.set(field, value.clone());
            }
            continue;
        }
        diff_field(target, field, old, new);
    }
    patches
}

fn diff_field(target: &mut Patch, field: &FieldPath, old: Option<&Value>, new: Option<&Value>) {
    match (old, new) {
        (None, None) => {}
        (Some(_), None) => {
            target.delete(field);
        }
        (Some(Value::Object(old_map)), Some(Value::Object(new_map))) => {
            if let Some(changed) = updated_entries(old, new) {
                for key in changed.keys() {
                    if let Some(value) = new_map.get(key) {
                        target.set(field.child(key.clone()), value.clone());
                    }
                }
            }
            for key in removed_keys(old_map, new_map) {
                target.delete(field.child(key));
            }
        }
        (old, Some(value)) => {
            if old != Some(value) {
                target.set(field, value.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::cache_patches;
    use crate::document::{FieldPath, FieldValue};
    use serde_json::json;

    fn doc(value: serde_json::Value) -> crate::document::Document {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn removed_object_key_becomes_deletion_sentinel() {
        let fields = [FieldPath::parse("field")];
        let before = doc(json!({"field": {"x": true, "y": true}}));
        let after = doc(json!({"field": {"x": true}}));
        let patches = cache_patches(&fields, Some(&before), Some(&after), false);
        assert_eq!(patches.public.len(), 1);
        assert_eq!(
            patches.public.get(&FieldPath::parse("field.y")),
            Some(&FieldValue::Delete)
        );
    }

    #[test]
    fn unchanged_fields_produce_nothing() {
        let fields = [FieldPath::parse("name"), FieldPath::parse("tags")];
        let data = doc(json!({"name": "kitchen", "tags": {"a": 1}, "other": 1}));
        assert!(cache_patches(&fields, Some(&data), Some(&data), false).is_empty());
    }

    #[test]
    fn secure_fields_are_routed_to_secure_patch() {
        let fields = [FieldPath::parse("name"), FieldPath::parse("phone_secure")];
        let after = doc(json!({"name": "Ada", "phone_secure": "555"}));
        let patches = cache_patches(&fields, None, Some(&after), true);
        assert_eq!(patches.public.len(), 1);
        assert_eq!(
            patches.secure.get(&FieldPath::parse("phone_secure")),
            Some(&FieldValue::Set(json!("555")))
        );
    }

    #[test]
    fn removed_scalar_field_is_deleted() {
        let fields = [FieldPath::parse("name")];
        let before = doc(json!({"name": "old"}));
        let after = doc(json!({}));
        let patches = cache_patches(&fields, Some(&before), Some(&after), false);
        assert_eq!(
            patches.public.get(&FieldPath::parse("name")),
            Some(&FieldValue::Delete)
        );
    }
}
