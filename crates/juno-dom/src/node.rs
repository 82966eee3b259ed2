//! Node identity.

use std::fmt;

/// Opaque identity token for a DOM node owned by a [`DomBackend`].
///
/// Tokens are never reused by a backend, so a stale token can be detected
/// rather than silently aliasing a newer node.
///
/// [`DomBackend`]: crate::DomBackend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    /// Backend-side constructor.
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

/// What kind of node a token refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Element,
    Text,
    /// Appending a fragment moves its children and leaves it empty.
    Fragment,
    /// Raw markup installed through `innerHTML`.
    Raw,
}
