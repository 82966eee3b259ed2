//! Dot-delimited state paths.
//!
//! A path addresses one location in the state tree: `"user.profile.name"`.
//!
//! # Invariants
//!
//! 1. A valid path is non-empty, equal to its trimmed form, and never
//!    contains `..` (so no segment is empty between two dots).
//! 2. [`ancestors`] yields proper ancestors nearest-first and never the path
//!    itself.
//! 3. [`is_descendant`] is strict: a path is not its own descendant.
//!
//! # Failure Modes
//!
//! | Input | Behavior |
//! |-------|----------|
//! | `""` | [`PathError::Empty`] |
//! | `" a.b"` | [`PathError::Untrimmed`] |
//! | `"a..b"` | [`PathError::Traversal`] |
//! | `"a."` / `".a"` | [`PathError::EmptySegment`] |
//! | `"list.99999"` written far past an array end | [`PathError::BeyondArrayEnd`] (from [`PathStore::check_write`](crate::PathStore::check_write)) |

use thiserror::Error;

/// Reasons a state path is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    #[error("state path is empty")]
    Empty,
    #[error("state path has surrounding whitespace: {0:?}")]
    Untrimmed(String),
    #[error("state path contains '..': {0:?}")]
    Traversal(String),
    #[error("state path has an empty segment: {0:?}")]
    EmptySegment(String),
    #[error("state path {path:?} writes index {index} of an array of length {len}")]
    BeyondArrayEnd { path: String, index: usize, len: usize },
}

/// Validate a path, returning the reason it is unusable.
pub fn validate(path: &str) -> Result<(), PathError> {
    if path.is_empty() {
        return Err(PathError::Empty);
    }
    if path.trim() != path {
        return Err(PathError::Untrimmed(path.to_owned()));
    }
    if path.contains("..") {
        return Err(PathError::Traversal(path.to_owned()));
    }
    if path.starts_with('.') || path.ends_with('.') {
        return Err(PathError::EmptySegment(path.to_owned()));
    }
    Ok(())
}

/// Whether `path` can address the state tree.
#[inline]
#[must_use]
pub fn is_valid_path(path: &str) -> bool {
    validate(path).is_ok()
}

/// Split a (valid) path into its segments.
pub fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('.')
}

/// Proper ancestors of `path`, nearest first: `"a.b.c"` → `"a.b"`, `"a"`.
pub fn ancestors(path: &str) -> impl Iterator<Item = &str> {
    let mut end = path.len();
    std::iter::from_fn(move || {
        let idx = path[..end].rfind('.')?;
        end = idx;
        Some(&path[..idx])
    })
}

/// Whether `candidate` lies strictly below `parent`.
#[must_use]
pub fn is_descendant(candidate: &str, parent: &str) -> bool {
    candidate.len() > parent.len()
        && candidate.starts_with(parent)
        && candidate.as_bytes()[parent.len()] == b'.'
}

/// Join a parent path and a child key.
#[must_use]
pub fn join(parent: &str, key: &str) -> String {
    if parent.is_empty() {
        key.to_owned()
    } else {
        format!("{parent}.{key}")
    }
}
