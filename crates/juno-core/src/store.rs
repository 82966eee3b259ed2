//! The nested state tree addressed by dot-delimited paths.
//!
//! [`PathStore`] wraps a single `serde_json::Value` object. Reads walk the
//! tree segment by segment; writes create whatever intermediate objects are
//! missing.
//!
//! # Invariants
//!
//! 1. The root is always a JSON object.
//! 2. `set` on a valid path always succeeds: a missing or non-container
//!    segment is replaced by an empty object.
//! 3. A numeric segment indexes an existing array; writing at `len` appends
//!    and writing past it pads with `null`, at most [`MAX_ARRAY_PADDING`]
//!    slots.
//! 4. Invalid paths, and writes that would pad further, read as missing and
//!    write as no-ops.

use serde_json::{Map, Value};

use crate::path::{self, PathError};

/// How many `null` slots a write may insert past the end of an array.
pub const MAX_ARRAY_PADDING: usize = 1024;

/// A JSON tree addressed by dot paths.
#[derive(Debug, Clone, PartialEq)]
pub struct PathStore {
    root: Value,
}

impl Default for PathStore {
    fn default() -> Self {
        Self::new(Value::Object(Map::new()))
    }
}

impl PathStore {
    /// Create a store from an initial snapshot. Non-object snapshots are
    /// replaced by an empty object.
    #[must_use]
    pub fn new(initial: Value) -> Self {
        let root = match initial {
            Value::Object(_) => initial,
            _ => Value::Object(Map::new()),
        };
        Self { root }
    }

    /// The whole tree.
    #[must_use]
    pub fn root(&self) -> &Value {
        &self.root
    }

    /// Replace the whole tree.
    pub fn replace(&mut self, root: Value) {
        *self = Self::new(root);
    }

    /// Read the value at `path`; `None` when the path is invalid or any
    /// segment is missing.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<&Value> {
        if !path::is_valid_path(path) {
            return None;
        }
        let mut current = &self.root;
        for segment in path::segments(path) {
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Whether a value exists at `path`.
    #[must_use]
    pub fn contains(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    /// Check that writing at `path` is allowed against the current tree.
    ///
    /// # Errors
    ///
    /// The [`PathError`] from [`path::validate`], or
    /// [`PathError::BeyondArrayEnd`] when an array index lies more than
    /// [`MAX_ARRAY_PADDING`] past the end.
    pub fn check_write(&self, path: &str) -> Result<(), PathError> {
        path::validate(path)?;
        let mut current = &self.root;
        for segment in path::segments(path) {
            current = match current {
                Value::Object(map) => match map.get(segment) {
                    Some(next) => next,
                    None => return Ok(()),
                },
                Value::Array(items) => {
                    let Ok(index) = segment.parse::<usize>() else {
                        return Ok(());
                    };
                    if index > items.len().saturating_add(MAX_ARRAY_PADDING) {
                        return Err(PathError::BeyondArrayEnd {
                            path: path.to_owned(),
                            index,
                            len: items.len(),
                        });
                    }
                    match items.get(index) {
                        Some(next) => next,
                        None => return Ok(()),
                    }
                }
                _ => return Ok(()),
            };
        }
        Ok(())
    }

    /// Write `value` at `path`, returning the previous value.
    ///
    /// Returns `None` both when nothing was there before and when the write
    /// is refused; use [`check_write`](Self::check_write) first when the
    /// distinction matters.
    pub fn set(&mut self, path: &str, value: Value) -> Option<Value> {
        if self.check_write(path).is_err() {
            return None;
        }
        let mut parts = path::segments(path).peekable();
        let mut current = &mut self.root;
        while let Some(segment) = parts.next() {
            let last = parts.peek().is_none();
            if last {
                return write_slot(current, segment, value);
            }
            current = child_container(current, segment);
        }
        None
    }

    /// Delete the value at `path`, returning it.
    pub fn remove(&mut self, path: &str) -> Option<Value> {
        if !path::is_valid_path(path) {
            return None;
        }
        let (parent, key) = match path.rfind('.') {
            Some(idx) => (Some(&path[..idx]), &path[idx + 1..]),
            None => (None, path),
        };
        let container = match parent {
            Some(parent) => self.get_mut(parent)?,
            None => &mut self.root,
        };
        match container {
            Value::Object(map) => map.remove(key),
            Value::Array(items) => {
                let idx = key.parse::<usize>().ok()?;
                (idx < items.len()).then(|| items.remove(idx))
            }
            _ => None,
        }
    }

    fn get_mut(&mut self, path: &str) -> Option<&mut Value> {
        let mut current = &mut self.root;
        for segment in path::segments(path) {
            current = match current {
                Value::Object(map) => map.get_mut(segment)?,
                Value::Array(items) => items.get_mut(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }
}

/// Step into `segment`, creating an object there if needed.
fn child_container<'a>(current: &'a mut Value, segment: &str) -> &'a mut Value {
    let index = match *current {
        Value::Array(_) => segment.parse::<usize>().ok(),
        _ => None,
    };
    if !current.is_object() && index.is_none() {
        *current = Value::Object(Map::new());
    }
    let slot = match *current {
        Value::Array(ref mut items) => {
            let idx = index.unwrap_or(items.len());
            if idx >= items.len() {
                items.resize(idx + 1, Value::Null);
            }
            &mut items[idx]
        }
        Value::Object(ref mut map) => map
            .entry(segment.to_owned())
            .or_insert_with(|| Value::Object(Map::new())),
        ref mut other => other,
    };
    if !is_container(slot) {
        *slot = Value::Object(Map::new());
    }
    slot
}

fn write_slot(container: &mut Value, segment: &str, value: Value) -> Option<Value> {
    if let Value::Array(items) = container {
        if let Ok(idx) = segment.parse::<usize>() {
            if idx < items.len() {
                return Some(std::mem::replace(&mut items[idx], value));
            }
            items.resize(idx, Value::Null);
            items.push(value);
            return None;
        }
        *container = Value::Object(Map::new());
    }
    match container {
        Value::Object(map) => map.insert(segment.to_owned(), value),
        _ => None,
    }
}

fn is_container(value: &Value) -> bool {
    matches!(value, Value::Object(_) | Value::Array(_))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn reads_nested_values() {
        let store = PathStore::new(json!({"a": {"b": {"c": 3}}, "list": [1, 2]}));
        assert_eq!(store.get("a.b.c"), Some(&json!(3)));
        assert_eq!(store.get("list.1"), Some(&json!(2)));
        assert_eq!(store.get("a.x.c"), None);
        assert_eq!(store.get("a..b"), None);
    }

    #[test]
    fn null_leaf_is_present_but_null_parent_is_missing() {
        let store = PathStore::new(json!({"a": null}));
        assert_eq!(store.get("a"), Some(&Value::Null));
        assert_eq!(store.get("a.b"), None);
    }

    #[test]
    fn set_creates_intermediate_objects() {
        let mut store = PathStore::default();
        assert_eq!(store.set("a.b.c", json!(1)), None);
        assert_eq!(store.root(), &json!({"a": {"b": {"c": 1}}}));
    }

    #[test]
    fn set_replaces_scalar_segment_with_object() {
        let mut store = PathStore::new(json!({"a": 5}));
        store.set("a.b", json!(true));
        assert_eq!(store.root(), &json!({"a": {"b": true}}));
    }

    #[test]
    fn set_returns_previous_value() {
        let mut store = PathStore::new(json!({"x": 1}));
        assert_eq!(store.set("x", json!(2)), Some(json!(1)));
    }

    #[test]
    fn array_segments_index_and_append() {
        let mut store = PathStore::new(json!({"items": ["a"]}));
        store.set("items.0", json!("z"));
        store.set("items.1", json!("b"));
        assert_eq!(store.get("items"), Some(&json!(["z", "b"])));
    }

    #[test]
    fn far_array_index_is_refused() {
        let mut store = PathStore::new(json!({"list": [1]}));
        let far = format!("list.{}", 1 + MAX_ARRAY_PADDING + 1);
        assert!(matches!(
            store.check_write(&far),
            Err(PathError::BeyondArrayEnd { index, len: 1, .. }) if index == MAX_ARRAY_PADDING + 2
        ));
        assert_eq!(store.set(&far, json!(0)), None);
        assert_eq!(store.set("list.99999999999", json!(0)), None);
        assert_eq!(store.get("list"), Some(&json!([1])));

        let edge = format!("list.{}", 1 + MAX_ARRAY_PADDING);
        assert!(store.check_write(&edge).is_ok());
        store.set(&edge, json!(2));
        assert_eq!(store.get("list").and_then(Value::as_array).map(Vec::len), Some(MAX_ARRAY_PADDING + 2));
    }

    #[test]
    fn invalid_paths_are_ignored() {
        let mut store = PathStore::default();
        assert_eq!(store.set("", json!(1)), None);
        assert_eq!(store.set("a..b", json!(1)), None);
        assert_eq!(store.root(), &json!({}));
    }

    #[test]
    fn remove_deletes_leaf() {
        let mut store = PathStore::new(json!({"__local": {"c_1": {"n": 1, "m": 2}}}));
        assert_eq!(store.remove("__local.c_1.n"), Some(json!(1)));
        assert_eq!(store.root(), &json!({"__local": {"c_1": {"m": 2}}}));
        assert_eq!(store.remove("missing.path"), None);
    }
}
