//! The DOM operations the renderer needs.
//!
//! Methods take `&self`: backends are shared handles (`Rc` inside) and use
//! interior mutability, so a listener running inside
//! [`dispatch`](crate::MemoryDom::dispatch_event) can mutate the tree.
//!
//! Structural methods return [`DomError`] for impossible requests (unknown
//! node, cycle, wrong parent). Attribute and style setters are infallible:
//! on an unknown node they do nothing.

use std::rc::Rc;

use serde_json::Value;
use thiserror::Error;

use crate::event::DomEvent;
use crate::node::{NodeId, NodeKind};

/// Listener callback.
pub type EventCallback = Rc<dyn Fn(&DomEvent)>;

/// Handle for removing a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

/// Structural DOM failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomError {
    #[error("unknown {0}")]
    UnknownNode(NodeId),
    /// The insertion would make a node its own ancestor.
    #[error("inserting {child} under {parent} would create a cycle")]
    Cycle { parent: NodeId, child: NodeId },
    #[error("{child} is not a child of {parent}")]
    NotAChild { parent: NodeId, child: NodeId },
    #[error("{0} cannot have children")]
    NotAContainer(NodeId),
    #[error("dom backend error: {0}")]
    Backend(String),
}

/// A DOM implementation.
pub trait DomBackend {
    // -- creation ----------------------------------------------------------

    fn create_element(&self, tag: &str) -> NodeId;
    fn create_text(&self, text: &str) -> NodeId;
    fn create_fragment(&self) -> NodeId;

    // -- inspection --------------------------------------------------------

    fn kind(&self, node: NodeId) -> Option<NodeKind>;
    /// Lowercase tag name for elements.
    fn tag_name(&self, node: NodeId) -> Option<String>;
    fn parent(&self, node: NodeId) -> Option<NodeId>;
    fn children(&self, node: NodeId) -> Vec<NodeId>;
    /// Inclusive: a node contains itself.
    fn contains(&self, ancestor: NodeId, node: NodeId) -> bool;
    fn text_content(&self, node: NodeId) -> String;

    // -- structure ---------------------------------------------------------

    /// Append `child` (moving it from any previous parent). Appending a
    /// fragment moves the fragment's children instead.
    fn append_child(&self, parent: NodeId, child: NodeId) -> Result<(), DomError>;
    /// Insert `child` before `reference`, or append when `reference` is
    /// `None`.
    fn insert_before(&self, parent: NodeId, child: NodeId, reference: Option<NodeId>) -> Result<(), DomError>;
    fn remove_child(&self, parent: NodeId, child: NodeId) -> Result<(), DomError>;
    fn replace_child(&self, parent: NodeId, new_child: NodeId, old_child: NodeId) -> Result<(), DomError>;

    /// Detach every child of `node`.
    fn clear_children(&self, node: NodeId) {
        for child in self.children(node) {
            let _ = self.remove_child(node, child);
        }
    }

    /// Detach `node` from its parent, if any.
    fn detach(&self, node: NodeId) {
        if let Some(parent) = self.parent(node) {
            let _ = self.remove_child(parent, node);
        }
    }

    // -- content -----------------------------------------------------------

    fn set_text_content(&self, node: NodeId, text: &str);
    fn set_inner_html(&self, node: NodeId, html: &str);

    // -- attributes and properties ----------------------------------------

    fn set_attribute(&self, node: NodeId, name: &str, value: &str);
    fn remove_attribute(&self, node: NodeId, name: &str);
    fn get_attribute(&self, node: NodeId, name: &str) -> Option<String>;
    fn attribute_names(&self, node: NodeId) -> Vec<String>;

    /// Whether `name` is an existing, writable property on the element.
    fn has_writable_property(&self, node: NodeId, name: &str) -> bool;
    /// Assign a property. Returns `false` if the property is not writable.
    fn set_property(&self, node: NodeId, name: &str, value: &Value) -> bool;
    fn get_property(&self, node: NodeId, name: &str) -> Option<Value>;

    fn set_style(&self, node: NodeId, name: &str, value: &str);
    fn get_style(&self, node: NodeId, name: &str) -> Option<String>;
    fn clear_style(&self, node: NodeId);

    // -- classes -----------------------------------------------------------

    fn add_class(&self, node: NodeId, class: &str) {
        let current = self.get_attribute(node, "class").unwrap_or_default();
        if current.split_whitespace().any(|c| c == class) {
            return;
        }
        let next = if current.trim().is_empty() {
            class.to_owned()
        } else {
            format!("{} {class}", current.trim())
        };
        self.set_attribute(node, "class", &next);
    }

    fn remove_class(&self, node: NodeId, class: &str) {
        let Some(current) = self.get_attribute(node, "class") else {
            return;
        };
        let next: Vec<&str> = current.split_whitespace().filter(|c| *c != class).collect();
        if next.is_empty() {
            self.remove_attribute(node, "class");
        } else {
            self.set_attribute(node, "class", &next.join(" "));
        }
    }

    fn has_class(&self, node: NodeId, class: &str) -> bool {
        self.get_attribute(node, "class")
            .is_some_and(|c| c.split_whitespace().any(|c| c == class))
    }

    // -- events ------------------------------------------------------------

    fn add_event_listener(&self, node: NodeId, event: &str, callback: EventCallback) -> ListenerId;
    fn remove_event_listener(&self, node: NodeId, listener: ListenerId);
}
