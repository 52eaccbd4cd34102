//! Minimal-patch diffing between two data snapshots.
//!
//! Produces the flat dotted/bracketed patch the host applies via
//! `setData`. The diff favors small patches but gives up early where a
//! whole-value replacement is cheaper to transfer: arrays with more than
//! 35% of elements changed, arrays that shrank, and objects that lost a
//! key are all replaced wholesale.

use serde_json::{Map, Value};

use crate::host::DataPatch;
use crate::util::value_kind;

/// Fraction of changed array elements above which the whole array is
/// sent instead of per-index patches.
const ARRAY_REPLACE_RATIO: f64 = 0.35;

/// Result of a diff. `Unchanged` means the host call can be skipped
/// entirely.
#[derive(Debug, Clone, PartialEq)]
pub enum Diff {
    Unchanged,
    Patch(DataPatch),
}

impl Diff {
    pub fn is_unchanged(&self) -> bool {
        matches!(self, Diff::Unchanged)
    }

    pub fn into_patch(self) -> Option<DataPatch> {
        match self {
            Diff::Unchanged => None,
            Diff::Patch(patch) => Some(patch),
        }
    }
}

/// Diff `new_data` against `old_data`.
///
/// Only keys present in `new_data` are visited; a key that exists solely
/// in `old_data` contributes nothing. Host-side data is only ever grown
/// or overwritten, never pruned by a patch.
pub fn diff(new_data: &Map<String, Value>, old_data: &Map<String, Value>) -> Diff {
    let mut res = DataPatch::new();
    for (key, value) in new_data {
        patch_value(value, old_data.get(key), key, &mut res);
    }
    if res.is_empty() {
        Diff::Unchanged
    } else {
        Diff::Patch(res)
    }
}

/// Record the difference between `new_value` and `old_value` under
/// `path`. Returns whether anything changed.
fn patch_value(
    new_value: &Value,
    old_value: Option<&Value>,
    path: &str,
    res: &mut DataPatch,
) -> bool {
    let old_value = match old_value {
        Some(old) if value_kind(new_value) == value_kind(old) => old,
        // Missing or differently shaped: replace outright.
        _ => {
            res.insert(path.to_owned(), new_value.clone());
            return true;
        }
    };

    match (new_value, old_value) {
        (Value::Array(new), Value::Array(old)) => {
            if new.len() < old.len() || old.is_empty() {
                // A shrunken array cannot be expressed as a patch, and
                // growth from empty is a replacement either way.
                if new.len() != old.len() {
                    res.insert(path.to_owned(), new_value.clone());
                    return true;
                }
                return false;
            }

            let mut changed = 0usize;
            let mut element_changes = DataPatch::new();
            let threshold = new.len() as f64 * ARRAY_REPLACE_RATIO;
            for (index, item) in new.iter().enumerate() {
                let item_path = format!("{path}[{index}]");
                if patch_value(item, old.get(index), &item_path, &mut element_changes) {
                    changed += 1;
                    // Checked inside the loop so a churny array bails out
                    // before diffing the rest of its elements.
                    if changed as f64 > threshold {
                        res.insert(path.to_owned(), new_value.clone());
                        return true;
                    }
                }
            }
            if changed > 0 {
                res.extend(element_changes);
                return true;
            }
            false
        }
        (Value::Object(new), Value::Object(old)) => {
            // Key removal cannot be patched; replace the whole object.
            if old.keys().any(|key| !new.contains_key(key)) {
                res.insert(path.to_owned(), new_value.clone());
                return true;
            }
            let mut changed = false;
            for (key, value) in new {
                let member_path = format!("{path}.{key}");
                if patch_value(value, old.get(key), &member_path, res) {
                    changed = true;
                }
            }
            changed
        }
        _ => {
            if new_value != old_value {
                res.insert(path.to_owned(), new_value.clone());
                return true;
            }
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn obj(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    fn patch_of(entries: &[(&str, Value)]) -> Diff {
        Diff::Patch(
            entries
                .iter()
                .map(|(k, v)| ((*k).to_owned(), v.clone()))
                .collect(),
        )
    }

    #[test]
    fn test_identical_data_is_unchanged() {
        let data = obj(json!({"a": 1, "b": {"c": [1, 2, 3]}}));
        assert_eq!(diff(&data, &data.clone()), Diff::Unchanged);
    }

    #[test]
    fn test_nested_object_member_gets_dotted_path() {
        let new = obj(json!({"x": {"y": 2}}));
        let old = obj(json!({"x": {"y": 1}}));
        assert_eq!(diff(&new, &old), patch_of(&[("x.y", json!(2))]));
    }

    #[test]
    fn test_keys_only_in_old_data_are_ignored() {
        let new = obj(json!({"a": 1}));
        let old = obj(json!({"a": 1, "gone": true}));
        assert_eq!(diff(&new, &old), Diff::Unchanged);
    }

    #[test]
    fn test_new_key_is_set_outright() {
        let new = obj(json!({"a": 1, "b": 2}));
        let old = obj(json!({"a": 1}));
        assert_eq!(diff(&new, &old), patch_of(&[("b", json!(2))]));
    }

    #[test]
    fn test_kind_change_replaces_value() {
        let new = obj(json!({"a": [1]}));
        let old = obj(json!({"a": {"b": 1}}));
        assert_eq!(diff(&new, &old), patch_of(&[("a", json!([1]))]));
    }

    #[test]
    fn test_object_key_removal_replaces_whole_object() {
        let new = obj(json!({"o": {"keep": 1}}));
        let old = obj(json!({"o": {"keep": 1, "gone": 2}}));
        assert_eq!(diff(&new, &old), patch_of(&[("o", json!({"keep": 1}))]));
    }

    #[test]
    fn test_array_few_changes_patch_per_index() {
        let new = obj(json!({"arr": [9, 1, 9, 3, 4, 5, 6, 7, 9, 9]}));
        let old = obj(json!({"arr": [0, 1, 2, 3, 4, 5, 6, 7, 8, 9]}));
        // 3 of 10 changed: under the replacement ratio, patch per index.
        assert_eq!(
            diff(&new, &old),
            patch_of(&[
                ("arr[0]", json!(9)),
                ("arr[2]", json!(9)),
                ("arr[8]", json!(9)),
            ])
        );
    }

    #[test]
    fn test_array_many_changes_replace_whole() {
        let new = obj(json!({"arr": [9, 9, 9, 9, 4, 5, 6, 7, 8, 9]}));
        let old = obj(json!({"arr": [0, 1, 2, 3, 4, 5, 6, 7, 8, 9]}));
        // 4 of 10 changed: above the ratio, the array is replaced.
        assert_eq!(
            diff(&new, &old),
            patch_of(&[("arr", json!([9, 9, 9, 9, 4, 5, 6, 7, 8, 9]))])
        );
    }

    #[test]
    fn test_array_shrink_replaces_whole() {
        let new = obj(json!({"arr": [1, 2]}));
        let old = obj(json!({"arr": [1, 2, 3]}));
        assert_eq!(diff(&new, &old), patch_of(&[("arr", json!([1, 2]))]));
    }

    #[test]
    fn test_array_growth_appends_per_index() {
        let new = obj(json!({"arr": [1, 2, 3]}));
        let old = obj(json!({"arr": [1, 2]}));
        assert_eq!(diff(&new, &old), patch_of(&[("arr[2]", json!(3))]));
    }

    #[test]
    fn test_array_growth_from_empty_replaces_whole() {
        let new = obj(json!({"arr": [1]}));
        let old = obj(json!({"arr": []}));
        assert_eq!(diff(&new, &old), patch_of(&[("arr", json!([1]))]));
    }

    #[test]
    fn test_empty_arrays_are_equal() {
        let new = obj(json!({"arr": []}));
        let old = obj(json!({"arr": []}));
        assert_eq!(diff(&new, &old), Diff::Unchanged);
    }

    #[test]
    fn test_deep_element_change_counts_once() {
        let new = obj(json!({"arr": [{"v": 1}, {"v": 9}, {"v": 3}]}));
        let old = obj(json!({"arr": [{"v": 1}, {"v": 2}, {"v": 3}]}));
        assert_eq!(diff(&new, &old), patch_of(&[("arr[1].v", json!(9))]));
    }

    #[test]
    fn test_null_and_object_are_different_kinds() {
        let new = obj(json!({"a": null}));
        let old = obj(json!({"a": {}}));
        assert_eq!(diff(&new, &old), patch_of(&[("a", json!(null))]));
    }
}
