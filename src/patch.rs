//! Structural patches over JSON documents.
//!
//! The port and the server exchange value updates as lists of JSON-Patch-like
//! operations so both sides produce and consume identical byte-level
//! representations. A patch addresses a location with a path of object keys
//! and array indices; the empty path addresses the document root.
//!
//! Two directions are supported: applying a patch list to a document
//! ([`apply_patches`]), and producing a patch list by running a mutating
//! producer against a draft copy ([`produce_patches`]).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Operation kind of a single patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchOp {
    Replace,
    Add,
    Remove,
}

/// One step of a patch path: an object member or an array index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSegment {
    Index(usize),
    Key(String),
}

impl From<&str> for PathSegment {
    fn from(key: &str) -> Self {
        PathSegment::Key(key.to_string())
    }
}

impl From<usize> for PathSegment {
    fn from(index: usize) -> Self {
        PathSegment::Index(index)
    }
}

impl std::fmt::Display for PathSegment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PathSegment::Index(i) => write!(f, "{}", i),
            PathSegment::Key(k) => f.write_str(k),
        }
    }
}

/// A single structural edit. A root replacement is encoded as
/// `{op: "replace", path: [], value}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Patch {
    pub op: PatchOp,
    pub path: Vec<PathSegment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl Patch {
    pub fn replace(path: Vec<PathSegment>, value: Value) -> Self {
        Self {
            op: PatchOp::Replace,
            path,
            value: Some(value),
        }
    }

    pub fn add(path: Vec<PathSegment>, value: Value) -> Self {
        Self {
            op: PatchOp::Add,
            path,
            value: Some(value),
        }
    }

    pub fn remove(path: Vec<PathSegment>) -> Self {
        Self {
            op: PatchOp::Remove,
            path,
            value: None,
        }
    }

    /// Replace the whole document.
    pub fn replace_root(value: Value) -> Self {
        Self::replace(Vec::new(), value)
    }
}

/// Failure to apply a patch to a document.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PatchError {
    #[error("Patch path not found: {path}")]
    PathNotFound { path: String },

    #[error("Patch path {path} does not address a container")]
    NotAContainer { path: String },

    #[error("Array index {index} out of bounds at {path}")]
    IndexOutOfBounds { path: String, index: usize },

    #[error("Patch op {op:?} requires a value")]
    MissingValue { op: PatchOp },

    #[error("Cannot remove the document root")]
    RootRemove,
}

fn render_path(path: &[PathSegment]) -> String {
    if path.is_empty() {
        return "<root>".to_string();
    }
    let parts: Vec<String> = path.iter().map(|s| s.to_string()).collect();
    format!("/{}", parts.join("/"))
}

/// Apply a sequence of patches to a document, returning the new document.
///
/// The input document is never mutated. Patches apply in order; the first
/// failing patch aborts the whole application.
pub fn apply_patches(base: &Value, patches: &[Patch]) -> Result<Value, PatchError> {
    let mut doc = base.clone();
    for patch in patches {
        apply_one(&mut doc, patch)?;
    }
    Ok(doc)
}

fn apply_one(doc: &mut Value, patch: &Patch) -> Result<(), PatchError> {
    if patch.path.is_empty() {
        return match patch.op {
            PatchOp::Replace | PatchOp::Add => {
                let value = patch
                    .value
                    .clone()
                    .ok_or(PatchError::MissingValue { op: patch.op })?;
                *doc = value;
                Ok(())
            }
            PatchOp::Remove => Err(PatchError::RootRemove),
        };
    }

    let (last, parents) = patch.path.split_last().expect("path is non-empty");
    let mut target = &mut *doc;
    for (depth, segment) in parents.iter().enumerate() {
        target = descend(target, segment, &patch.path[..=depth])?;
    }

    let rendered = || render_path(&patch.path);
    match (patch.op, last) {
        (PatchOp::Replace, segment) => {
            let value = patch
                .value
                .clone()
                .ok_or(PatchError::MissingValue { op: patch.op })?;
            let slot = descend(target, segment, &patch.path)?;
            *slot = value;
        }
        (PatchOp::Add, PathSegment::Key(key)) => {
            let value = patch
                .value
                .clone()
                .ok_or(PatchError::MissingValue { op: patch.op })?;
            let map = target
                .as_object_mut()
                .ok_or_else(|| PatchError::NotAContainer { path: rendered() })?;
            map.insert(key.clone(), value);
        }
        (PatchOp::Add, PathSegment::Index(index)) => {
            let value = patch
                .value
                .clone()
                .ok_or(PatchError::MissingValue { op: patch.op })?;
            let array = target
                .as_array_mut()
                .ok_or_else(|| PatchError::NotAContainer { path: rendered() })?;
            // Index == len appends, matching JSON Patch array-add semantics.
            if *index > array.len() {
                return Err(PatchError::IndexOutOfBounds {
                    path: rendered(),
                    index: *index,
                });
            }
            array.insert(*index, value);
        }
        (PatchOp::Remove, PathSegment::Key(key)) => {
            let map = target
                .as_object_mut()
                .ok_or_else(|| PatchError::NotAContainer { path: rendered() })?;
            if map.remove(key).is_none() {
                return Err(PatchError::PathNotFound { path: rendered() });
            }
        }
        (PatchOp::Remove, PathSegment::Index(index)) => {
            let array = target
                .as_array_mut()
                .ok_or_else(|| PatchError::NotAContainer { path: rendered() })?;
            if *index >= array.len() {
                return Err(PatchError::IndexOutOfBounds {
                    path: rendered(),
                    index: *index,
                });
            }
            array.remove(*index);
        }
    }
    Ok(())
}

fn descend<'a>(
    value: &'a mut Value,
    segment: &PathSegment,
    consumed: &[PathSegment],
) -> Result<&'a mut Value, PatchError> {
    match (value, segment) {
        (Value::Object(map), PathSegment::Key(key)) => {
            map.get_mut(key).ok_or_else(|| PatchError::PathNotFound {
                path: render_path(consumed),
            })
        }
        (Value::Array(array), PathSegment::Index(index)) => {
            array
                .get_mut(*index)
                .ok_or_else(|| PatchError::IndexOutOfBounds {
                    path: render_path(consumed),
                    index: *index,
                })
        }
        _ => Err(PatchError::NotAContainer {
            path: render_path(consumed),
        }),
    }
}

/// Run a mutating producer against a draft copy of `base` and return the new
/// value together with the patch list that transforms `base` into it.
///
/// Applying the returned patches to `base` reproduces the returned value
/// exactly.
pub fn produce_patches(base: &Value, producer: impl FnOnce(&mut Value)) -> (Value, Vec<Patch>) {
    let mut draft = base.clone();
    producer(&mut draft);
    let mut patches = Vec::new();
    diff_into(base, &draft, &mut Vec::new(), &mut patches);
    (draft, patches)
}

fn diff_into(base: &Value, new: &Value, path: &mut Vec<PathSegment>, out: &mut Vec<Patch>) {
    if base == new {
        return;
    }
    match (base, new) {
        (Value::Object(old_map), Value::Object(new_map)) => {
            for key in old_map.keys() {
                if !new_map.contains_key(key) {
                    let mut removed = path.clone();
                    removed.push(PathSegment::Key(key.clone()));
                    out.push(Patch::remove(removed));
                }
            }
            for (key, new_member) in new_map {
                match old_map.get(key) {
                    Some(old_member) => {
                        path.push(PathSegment::Key(key.clone()));
                        diff_into(old_member, new_member, path, out);
                        path.pop();
                    }
                    None => {
                        let mut added = path.clone();
                        added.push(PathSegment::Key(key.clone()));
                        out.push(Patch::add(added, new_member.clone()));
                    }
                }
            }
        }
        // Same-length arrays diff elementwise; a length change replaces the
        // whole array node.
        (Value::Array(old_items), Value::Array(new_items))
            if old_items.len() == new_items.len() =>
        {
            for (index, (old_item, new_item)) in old_items.iter().zip(new_items).enumerate() {
                path.push(PathSegment::Index(index));
                diff_into(old_item, new_item, path, out);
                path.pop();
            }
        }
        _ => out.push(Patch::replace(path.clone(), new.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_root_replace() {
        let base = json!({"n": 0});
        let next = apply_patches(&base, &[Patch::replace_root(json!({"n": 7}))]).unwrap();
        assert_eq!(next, json!({"n": 7}));
        assert_eq!(base, json!({"n": 0}));
    }

    #[test]
    fn test_nested_replace() {
        let base = json!({"a": {"b": [1, 2, 3]}});
        let patch = Patch::replace(vec!["a".into(), "b".into(), 1usize.into()], json!(9));
        let next = apply_patches(&base, &[patch]).unwrap();
        assert_eq!(next, json!({"a": {"b": [1, 9, 3]}}));
    }

    #[test]
    fn test_add_object_member_and_array_append() {
        let base = json!({"items": [1]});
        let patches = vec![
            Patch::add(vec!["label".into()], json!("x")),
            Patch::add(vec!["items".into(), 1usize.into()], json!(2)),
        ];
        let next = apply_patches(&base, &patches).unwrap();
        assert_eq!(next, json!({"label": "x", "items": [1, 2]}));
    }

    #[test]
    fn test_remove_member_and_element() {
        let base = json!({"a": 1, "b": [10, 20]});
        let patches = vec![
            Patch::remove(vec!["a".into()]),
            Patch::remove(vec!["b".into(), 0usize.into()]),
        ];
        let next = apply_patches(&base, &patches).unwrap();
        assert_eq!(next, json!({"b": [20]}));
    }

    #[test]
    fn test_missing_path_is_an_error() {
        let base = json!({"a": 1});
        let err = apply_patches(&base, &[Patch::replace(vec!["nope".into()], json!(2))])
            .unwrap_err();
        assert!(matches!(err, PatchError::PathNotFound { .. }));
    }

    #[test]
    fn test_add_past_end_is_an_error() {
        let base = json!([1]);
        let err = apply_patches(&base, &[Patch::add(vec![5usize.into()], json!(2))]).unwrap_err();
        assert!(matches!(err, PatchError::IndexOutOfBounds { index: 5, .. }));
    }

    #[test]
    fn test_root_remove_is_an_error() {
        let base = json!(1);
        let err = apply_patches(&base, &[Patch::remove(Vec::new())]).unwrap_err();
        assert_eq!(err, PatchError::RootRemove);
    }

    #[test]
    fn test_replace_requires_value() {
        let base = json!({"a": 1});
        let patch = Patch {
            op: PatchOp::Replace,
            path: vec!["a".into()],
            value: None,
        };
        let err = apply_patches(&base, &[patch]).unwrap_err();
        assert!(matches!(err, PatchError::MissingValue { .. }));
    }

    #[test]
    fn test_produce_granular_patches() {
        let base = json!({"n": 1, "gone": true, "keep": "same"});
        let (draft, patches) = produce_patches(&base, |value| {
            value["n"] = json!(2);
            value["fresh"] = json!([1]);
            value.as_object_mut().unwrap().remove("gone");
        });
        assert_eq!(draft, json!({"n": 2, "keep": "same", "fresh": [1]}));
        // Untouched members produce no patches.
        assert!(patches
            .iter()
            .all(|p| p.path.first() != Some(&PathSegment::Key("keep".into()))));
        assert_eq!(apply_patches(&base, &patches).unwrap(), draft);
    }

    #[test]
    fn test_produce_replaces_resized_arrays_whole() {
        let base = json!({"items": [1, 2]});
        let (draft, patches) = produce_patches(&base, |value| {
            value["items"] = json!([1, 2, 3]);
        });
        assert_eq!(
            patches,
            vec![Patch::replace(vec!["items".into()], json!([1, 2, 3]))]
        );
        assert_eq!(apply_patches(&base, &patches).unwrap(), draft);
    }

    #[test]
    fn test_produce_root_type_change() {
        let base = json!(1);
        let (draft, patches) = produce_patches(&base, |value| *value = json!({"n": 1}));
        assert_eq!(patches, vec![Patch::replace_root(json!({"n": 1}))]);
        assert_eq!(apply_patches(&base, &patches).unwrap(), draft);
    }

    #[test]
    fn test_produce_noop_yields_no_patches() {
        let base = json!({"a": 1});
        let (draft, patches) = produce_patches(&base, |_| {});
        assert_eq!(draft, base);
        assert!(patches.is_empty());
    }

    #[test]
    fn test_patch_wire_shape() {
        let patch = Patch::replace(vec!["n".into()], json!(1));
        let encoded = serde_json::to_value(&patch).unwrap();
        assert_eq!(encoded, json!({"op": "replace", "path": ["n"], "value": 1}));

        let root = Patch::replace_root(json!({"n": 0}));
        let encoded = serde_json::to_value(&root).unwrap();
        assert_eq!(encoded, json!({"op": "replace", "path": [], "value": {"n": 0}}));

        let removed = Patch::remove(vec!["items".into(), 0usize.into()]);
        let encoded = serde_json::to_value(&removed).unwrap();
        assert_eq!(encoded, json!({"op": "remove", "path": ["items", 0]}));
    }

    #[test]
    fn test_path_segment_decoding() {
        let decoded: Vec<PathSegment> = serde_json::from_value(json!(["a", 3, "b"])).unwrap();
        assert_eq!(
            decoded,
            vec![
                PathSegment::Key("a".into()),
                PathSegment::Index(3),
                PathSegment::Key("b".into())
            ]
        );
    }
}
