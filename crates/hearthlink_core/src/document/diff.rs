//! Deep differences between JSON values.
//!
//! Used by cache propagation (what to write) and by actionable-field
//! dispatch (what changed inside a relation payload).

use serde_json::{Map, Value};

/// Returns the keys of `after` that were added or changed relative to
/// `before`, descending into nested objects.
///
/// A missing or non-object `before` makes every key of `after` new.
/// Returns `None` when `after` is not an object or nothing was added/changed.
pub fn updated_entries(before: Option<&Value>, after: Option<&Value>) -> Option<Map<String, Value>> {
    let after = after?.as_object()?;
    let Some(before) = before.and_then(Value::as_object) else {
        return (!after.is_empty()).then(|| after.clone());
    };

    let mut changed = Map::new();
    for (key, after_value) in after {
        match before.get(key) {
            None => {
                changed.insert(key.clone(), after_value.clone());
            }
            Some(before_value) if before_value.is_object() && after_value.is_object() => {
                if let Some(nested) = updated_entries(Some(before_value), Some(after_value)) {
                    changed.insert(key.clone(), Value::Object(nested));
                }
            }
            Some(before_value) if before_value != after_value => {
                changed.insert(key.clone(), after_value.clone());
            }
            Some(_) => {}
        }
    }

    (!changed.is_empty()).then_some(changed)
}

/// Returns the top-level keys present in `before` but absent from `after`.
pub fn removed_keys(before: &Map<String, Value>, after: &Map<String, Value>) -> Vec<String> {
    before
        .keys()
        .filter(|key| !after.contains_key(*key))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{removed_keys, updated_entries};
    use serde_json::json;

    #[test]
    fn missing_before_reports_everything() {
        let after = json!({"U1": true});
        assert_eq!(
            updated_entries(None, Some(&after)).map(serde_json::Value::Object),
            Some(after)
        );
    }

    #[test]
    fn nested_changes_keep_only_changed_leaves() {
        let before = json!({"U1": {"flat": "1A", "role": "member"}, "U2": true});
        let after = json!({"U1": {"flat": "2B", "role": "member"}, "U2": true});
        assert_eq!(
            updated_entries(Some(&before), Some(&after)).map(serde_json::Value::Object),
            Some(json!({"U1": {"flat": "2B"}}))
        );
    }

    #[test]
    fn identical_values_report_nothing() {
        let value = json!({"a": {"b": [1, 2]}});
        assert_eq!(updated_entries(Some(&value), Some(&value)), None);
        assert_eq!(updated_entries(Some(&value), None), None);
    }

    #[test]
    fn removed_keys_lists_dropped_entries() {
        let before = json!({"x": true, "y": true});
        let after = json!({"x": true});
        assert_eq!(
            removed_keys(before.as_object().unwrap(), after.as_object().unwrap()),
            vec!["y".to_string()]
        );
    }
}
