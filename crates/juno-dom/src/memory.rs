//! Arena-backed in-memory DOM.
//!
//! Good enough to run the renderer headless: element/text/fragment nodes,
//! attributes, a small set of reflected properties, inline style, listeners
//! with bubbling dispatch, and HTML serialization.
//!
//! # Invariants
//!
//! 1. Every node has at most one parent, and the parent lists it exactly
//!    once among its children.
//! 2. No node is its own ancestor (insertions that would create a cycle
//!    return [`DomError::Cycle`]).
//! 3. Node ids are never reused.

use std::cell::RefCell;
use std::fmt::{self, Write as _};
use std::rc::Rc;

use ahash::AHashMap;
use serde_json::Value;
use tracing::trace;

use crate::backend::{DomBackend, DomError, EventCallback, ListenerId};
use crate::event::DomEvent;
use crate::node::{NodeId, NodeKind};

const VOID_ELEMENTS: &[&str] = &[
    "area", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track", "wbr",
];

/// Properties the in-memory DOM treats as writable, with the attribute each
/// one reflects to (if any).
const PROPERTIES: &[(&str, Option<&str>)] = &[
    ("id", Some("id")),
    ("title", Some("title")),
    ("href", Some("href")),
    ("src", Some("src")),
    ("alt", Some("alt")),
    ("name", Some("name")),
    ("type", Some("type")),
    ("placeholder", Some("placeholder")),
    ("disabled", Some("disabled")),
    ("hidden", Some("hidden")),
    ("className", Some("class")),
    ("tabIndex", Some("tabindex")),
    ("value", None),
    ("checked", None),
    ("selected", None),
];

fn reflected(name: &str) -> Option<Option<&'static str>> {
    PROPERTIES
        .iter()
        .find(|(prop, _)| *prop == name)
        .map(|(_, attr)| *attr)
}

struct Listener {
    id: ListenerId,
    event: String,
    callback: EventCallback,
}

struct NodeData {
    kind: NodeKind,
    tag: String,
    text: String,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    attributes: Vec<(String, String)>,
    properties: AHashMap<String, Value>,
    style: Vec<(String, String)>,
    listeners: Vec<Listener>,
}

impl NodeData {
    fn new(kind: NodeKind, tag: &str, text: &str) -> Self {
        Self {
            kind,
            tag: tag.to_ascii_lowercase(),
            text: text.to_owned(),
            parent: None,
            children: Vec::new(),
            attributes: Vec::new(),
            properties: AHashMap::new(),
            style: Vec::new(),
            listeners: Vec::new(),
        }
    }
}

#[derive(Default)]
struct Arena {
    nodes: AHashMap<NodeId, NodeData>,
    next_node: u64,
    next_listener: u64,
}

impl Arena {
    fn alloc(&mut self, data: NodeData) -> NodeId {
        self.next_node += 1;
        let id = NodeId::from_raw(self.next_node);
        self.nodes.insert(id, data);
        id
    }

    fn node(&self, id: NodeId) -> Result<&NodeData, DomError> {
        self.nodes.get(&id).ok_or(DomError::UnknownNode(id))
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut NodeData, DomError> {
        self.nodes.get_mut(&id).ok_or(DomError::UnknownNode(id))
    }

    fn contains(&self, ancestor: NodeId, mut node: NodeId) -> bool {
        loop {
            if node == ancestor {
                return true;
            }
            match self.nodes.get(&node).and_then(|n| n.parent) {
                Some(parent) => node = parent,
                None => return false,
            }
        }
    }

    fn unlink(&mut self, child: NodeId) {
        let Some(parent) = self.nodes.get_mut(&child).and_then(|n| n.parent.take()) else {
            return;
        };
        if let Some(parent) = self.nodes.get_mut(&parent) {
            parent.children.retain(|c| *c != child);
        }
    }

    /// Nodes that will actually be inserted for `child`: the fragment's
    /// children for a fragment, otherwise the node itself.
    fn insertion_set(&self, child: NodeId) -> Result<Vec<NodeId>, DomError> {
        let data = self.node(child)?;
        Ok(if data.kind == NodeKind::Fragment {
            data.children.clone()
        } else {
            vec![child]
        })
    }

    fn insert(&mut self, parent: NodeId, child: NodeId, reference: Option<NodeId>) -> Result<(), DomError> {
        let parent_kind = self.node(parent)?.kind;
        if matches!(parent_kind, NodeKind::Text | NodeKind::Raw) {
            return Err(DomError::NotAContainer(parent));
        }
        if let Some(reference) = reference {
            if !self.node(parent)?.children.contains(&reference) {
                return Err(DomError::NotAChild {
                    parent,
                    child: reference,
                });
            }
        }
        let moving = self.insertion_set(child)?;
        for node in &moving {
            if self.contains(*node, parent) {
                return Err(DomError::Cycle {
                    parent,
                    child: *node,
                });
            }
        }
        for node in moving {
            if Some(node) == reference {
                continue;
            }
            self.unlink(node);
            let siblings = &mut self.node_mut(parent)?.children;
            let at = reference
                .and_then(|r| siblings.iter().position(|c| *c == r))
                .unwrap_or(siblings.len());
            siblings.insert(at, node);
            self.node_mut(node)?.parent = Some(parent);
        }
        Ok(())
    }

    fn text_content(&self, id: NodeId, out: &mut String) {
        let Some(data) = self.nodes.get(&id) else {
            return;
        };
        match data.kind {
            NodeKind::Text | NodeKind::Raw => out.push_str(&data.text),
            NodeKind::Element | NodeKind::Fragment => {
                for child in &data.children {
                    self.text_content(*child, out);
                }
            }
        }
    }

    fn write_html(&self, id: NodeId, out: &mut String) {
        let Some(data) = self.nodes.get(&id) else {
            return;
        };
        match data.kind {
            NodeKind::Text => escape_into(&data.text, false, out),
            NodeKind::Raw => out.push_str(&data.text),
            NodeKind::Fragment => {
                for child in &data.children {
                    self.write_html(*child, out);
                }
            }
            NodeKind::Element => {
                out.push('<');
                out.push_str(&data.tag);
                for (name, value) in &data.attributes {
                    let _ = write!(out, " {name}=\"");
                    escape_into(value, true, out);
                    out.push('"');
                }
                if !data.style.is_empty() {
                    out.push_str(" style=\"");
                    let css: Vec<String> = data.style.iter().map(|(k, v)| format!("{k}: {v};")).collect();
                    escape_into(&css.join(" "), true, out);
                    out.push('"');
                }
                out.push('>');
                if VOID_ELEMENTS.contains(&data.tag.as_str()) {
                    return;
                }
                for child in &data.children {
                    self.write_html(*child, out);
                }
                let _ = write!(out, "</{}>", data.tag);
            }
        }
    }
}

fn escape_into(text: &str, attribute: bool, out: &mut String) {
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' if attribute => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
}

fn property_to_attribute(value: &Value) -> Option<String> {
    match value {
        Value::Null | Value::Bool(false) => None,
        Value::Bool(true) => Some(String::new()),
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// In-memory [`DomBackend`]. Cheap to clone; clones share the tree.
#[derive(Clone, Default)]
pub struct MemoryDom {
    arena: Rc<RefCell<Arena>>,
}

impl MemoryDom {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Serialize `node` and its subtree as HTML.
    #[must_use]
    pub fn outer_html(&self, node: NodeId) -> String {
        let mut out = String::new();
        self.arena.borrow().write_html(node, &mut out);
        out
    }

    /// Serialize the children of `node` as HTML.
    #[must_use]
    pub fn inner_html(&self, node: NodeId) -> String {
        let arena = self.arena.borrow();
        let mut out = String::new();
        if let Ok(data) = arena.node(node) {
            for child in &data.children {
                arena.write_html(*child, &mut out);
            }
        }
        out
    }

    /// Deliver `event` to its target, then bubble to each ancestor.
    /// Listeners run with no borrow of the tree held.
    pub fn dispatch_event(&self, event: &DomEvent) {
        let mut path = Vec::new();
        let mut cursor = Some(event.target);
        while let Some(node) = cursor {
            path.push(node);
            cursor = self.parent(node);
        }
        for node in path {
            let callbacks: Vec<EventCallback> = {
                let arena = self.arena.borrow();
                let Ok(data) = arena.node(node) else {
                    continue;
                };
                data.listeners
                    .iter()
                    .filter(|l| l.event == event.event_type)
                    .map(|l| Rc::clone(&l.callback))
                    .collect()
            };
            for callback in callbacks {
                callback(event);
            }
        }
    }

    /// Build and dispatch an event of `event_type` at `target`.
    pub fn dispatch(&self, target: NodeId, event_type: &str) -> DomEvent {
        let event = DomEvent::new(event_type, target);
        self.dispatch_event(&event);
        event
    }

    /// Listeners currently attached to `node`.
    #[must_use]
    pub fn listener_count(&self, node: NodeId) -> usize {
        self.arena
            .borrow()
            .node(node)
            .map_or(0, |data| data.listeners.len())
    }

    /// Every element under `root` (inclusive) with the given tag, in
    /// document order.
    #[must_use]
    pub fn find_all_by_tag(&self, root: NodeId, tag: &str) -> Vec<NodeId> {
        let tag = tag.to_ascii_lowercase();
        self.find_all(root, |dom, node| dom.tag_name(node).as_deref() == Some(tag.as_str()))
    }

    /// Every element under `root` (inclusive) carrying `class`.
    #[must_use]
    pub fn find_all_by_class(&self, root: NodeId, class: &str) -> Vec<NodeId> {
        self.find_all(root, |dom, node| dom.has_class(node, class))
    }

    /// First element under `root` (inclusive) with the given tag.
    #[must_use]
    pub fn first_by_tag(&self, root: NodeId, tag: &str) -> Option<NodeId> {
        self.find_all_by_tag(root, tag).into_iter().next()
    }

    fn find_all(&self, root: NodeId, matches: impl Fn(&Self, NodeId) -> bool) -> Vec<NodeId> {
        let mut found = Vec::new();
        let mut stack = vec![root];
        while let Some(node) = stack.pop() {
            if matches(self, node) {
                found.push(node);
            }
            stack.extend(self.children(node).into_iter().rev());
        }
        found
    }

    /// Total nodes ever created and still in the arena.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.arena.borrow().nodes.len()
    }
}

impl fmt::Debug for MemoryDom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryDom")
            .field("nodes", &self.node_count())
            .finish()
    }
}

impl DomBackend for MemoryDom {
    fn create_element(&self, tag: &str) -> NodeId {
        self.arena
            .borrow_mut()
            .alloc(NodeData::new(NodeKind::Element, tag, ""))
    }

    fn create_text(&self, text: &str) -> NodeId {
        self.arena
            .borrow_mut()
            .alloc(NodeData::new(NodeKind::Text, "", text))
    }

    fn create_fragment(&self) -> NodeId {
        self.arena
            .borrow_mut()
            .alloc(NodeData::new(NodeKind::Fragment, "", ""))
    }

    fn kind(&self, node: NodeId) -> Option<NodeKind> {
        self.arena.borrow().node(node).ok().map(|d| d.kind)
    }

    fn tag_name(&self, node: NodeId) -> Option<String> {
        let arena = self.arena.borrow();
        let data = arena.node(node).ok()?;
        (data.kind == NodeKind::Element).then(|| data.tag.clone())
    }

    fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.arena.borrow().node(node).ok().and_then(|d| d.parent)
    }

    fn children(&self, node: NodeId) -> Vec<NodeId> {
        self.arena
            .borrow()
            .node(node)
            .map(|d| d.children.clone())
            .unwrap_or_default()
    }

    fn contains(&self, ancestor: NodeId, node: NodeId) -> bool {
        self.arena.borrow().contains(ancestor, node)
    }

    fn text_content(&self, node: NodeId) -> String {
        let mut out = String::new();
        self.arena.borrow().text_content(node, &mut out);
        out
    }

    fn append_child(&self, parent: NodeId, child: NodeId) -> Result<(), DomError> {
        self.arena.borrow_mut().insert(parent, child, None)
    }

    fn insert_before(&self, parent: NodeId, child: NodeId, reference: Option<NodeId>) -> Result<(), DomError> {
        self.arena.borrow_mut().insert(parent, child, reference)
    }

    fn remove_child(&self, parent: NodeId, child: NodeId) -> Result<(), DomError> {
        let mut arena = self.arena.borrow_mut();
        if arena.node(child)?.parent != Some(parent) {
            return Err(DomError::NotAChild { parent, child });
        }
        arena.unlink(child);
        Ok(())
    }

    fn replace_child(&self, parent: NodeId, new_child: NodeId, old_child: NodeId) -> Result<(), DomError> {
        if new_child == old_child {
            return Ok(());
        }
        let mut arena = self.arena.borrow_mut();
        arena.insert(parent, new_child, Some(old_child))?;
        arena.unlink(old_child);
        Ok(())
    }

    fn set_text_content(&self, node: NodeId, text: &str) {
        let mut arena = self.arena.borrow_mut();
        let Ok(data) = arena.node_mut(node) else {
            return;
        };
        match data.kind {
            NodeKind::Text | NodeKind::Raw => data.text = text.to_owned(),
            NodeKind::Element | NodeKind::Fragment => {
                let old = std::mem::take(&mut data.children);
                for child in old {
                    if let Some(c) = arena.nodes.get_mut(&child) {
                        c.parent = None;
                    }
                }
                if !text.is_empty() {
                    let text_node = arena.alloc(NodeData::new(NodeKind::Text, "", text));
                    let _ = arena.insert(node, text_node, None);
                }
            }
        }
    }

    fn set_inner_html(&self, node: NodeId, html: &str) {
        let mut arena = self.arena.borrow_mut();
        let Ok(data) = arena.node_mut(node) else {
            return;
        };
        let old = std::mem::take(&mut data.children);
        for child in old {
            if let Some(c) = arena.nodes.get_mut(&child) {
                c.parent = None;
            }
        }
        if !html.is_empty() {
            let raw = arena.alloc(NodeData::new(NodeKind::Raw, "", html));
            let _ = arena.insert(node, raw, None);
        }
    }

    fn set_attribute(&self, node: NodeId, name: &str, value: &str) {
        let mut arena = self.arena.borrow_mut();
        let Ok(data) = arena.node_mut(node) else {
            return;
        };
        match data.attributes.iter_mut().find(|(n, _)| n == name) {
            Some(slot) => slot.1 = value.to_owned(),
            None => data.attributes.push((name.to_owned(), value.to_owned())),
        }
    }

    fn remove_attribute(&self, node: NodeId, name: &str) {
        if let Ok(data) = self.arena.borrow_mut().node_mut(node) {
            data.attributes.retain(|(n, _)| n != name);
        }
    }

    fn get_attribute(&self, node: NodeId, name: &str) -> Option<String> {
        let arena = self.arena.borrow();
        let data = arena.node(node).ok()?;
        data.attributes
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.clone())
    }

    fn attribute_names(&self, node: NodeId) -> Vec<String> {
        self.arena
            .borrow()
            .node(node)
            .map(|d| d.attributes.iter().map(|(n, _)| n.clone()).collect())
            .unwrap_or_default()
    }

    fn has_writable_property(&self, node: NodeId, name: &str) -> bool {
        self.kind(node) == Some(NodeKind::Element) && reflected(name).is_some()
    }

    fn set_property(&self, node: NodeId, name: &str, value: &Value) -> bool {
        let Some(attribute) = reflected(name) else {
            return false;
        };
        {
            let mut arena = self.arena.borrow_mut();
            let Ok(data) = arena.node_mut(node) else {
                return false;
            };
            data.properties.insert(name.to_owned(), value.clone());
        }
        if let Some(attribute) = attribute {
            match property_to_attribute(value) {
                Some(text) => self.set_attribute(node, attribute, &text),
                None => self.remove_attribute(node, attribute),
            }
        }
        trace!(%node, name, "property set");
        true
    }

    fn get_property(&self, node: NodeId, name: &str) -> Option<Value> {
        self.arena
            .borrow()
            .node(node)
            .ok()
            .and_then(|d| d.properties.get(name).cloned())
    }

    fn set_style(&self, node: NodeId, name: &str, value: &str) {
        let mut arena = self.arena.borrow_mut();
        let Ok(data) = arena.node_mut(node) else {
            return;
        };
        if value.is_empty() {
            data.style.retain(|(n, _)| n != name);
            return;
        }
        match data.style.iter_mut().find(|(n, _)| n == name) {
            Some(slot) => slot.1 = value.to_owned(),
            None => data.style.push((name.to_owned(), value.to_owned())),
        }
    }

    fn get_style(&self, node: NodeId, name: &str) -> Option<String> {
        let arena = self.arena.borrow();
        let data = arena.node(node).ok()?;
        data.style
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.clone())
    }

    fn clear_style(&self, node: NodeId) {
        if let Ok(data) = self.arena.borrow_mut().node_mut(node) {
            data.style.clear();
        }
    }

    fn add_event_listener(&self, node: NodeId, event: &str, callback: EventCallback) -> ListenerId {
        let mut arena = self.arena.borrow_mut();
        arena.next_listener += 1;
        let id = ListenerId::from_raw(arena.next_listener);
        if let Ok(data) = arena.node_mut(node) {
            data.listeners.push(Listener {
                id,
                event: event.to_owned(),
                callback,
            });
        }
        id
    }

    fn remove_event_listener(&self, node: NodeId, listener: ListenerId) {
        if let Ok(data) = self.arena.borrow_mut().node_mut(node) {
            data.listeners.retain(|l| l.id != listener);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::cell::Cell;

    fn el(dom: &MemoryDom, tag: &str, text: &str) -> NodeId {
        let node = dom.create_element(tag);
        dom.set_text_content(node, text);
        node
    }

    #[test]
    fn serializes_nested_tree() {
        let dom = MemoryDom::new();
        let ul = dom.create_element("ul");
        dom.set_attribute(ul, "class", "list");
        dom.append_child(ul, el(&dom, "li", "a < b")).unwrap();
        dom.set_style(ul, "opacity", "0.6");
        assert_eq!(
            dom.outer_html(ul),
            r#"<ul class="list" style="opacity: 0.6;"><li>a &lt; b</li></ul>"#
        );
    }

    #[test]
    fn appending_fragment_moves_children() {
        let dom = MemoryDom::new();
        let parent = dom.create_element("div");
        let fragment = dom.create_fragment();
        dom.append_child(fragment, el(&dom, "p", "1")).unwrap();
        dom.append_child(fragment, el(&dom, "p", "2")).unwrap();
        dom.append_child(parent, fragment).unwrap();
        assert!(dom.children(fragment).is_empty());
        assert_eq!(dom.text_content(parent), "12");
    }

    #[test]
    fn insert_before_reorders_without_duplicates() {
        let dom = MemoryDom::new();
        let parent = dom.create_element("ul");
        let a = el(&dom, "li", "a");
        let b = el(&dom, "li", "b");
        dom.append_child(parent, a).unwrap();
        dom.append_child(parent, b).unwrap();
        dom.insert_before(parent, b, Some(a)).unwrap();
        assert_eq!(dom.children(parent), vec![b, a]);
    }

    #[test]
    fn cycles_are_rejected() {
        let dom = MemoryDom::new();
        let outer = dom.create_element("div");
        let inner = dom.create_element("div");
        dom.append_child(outer, inner).unwrap();
        assert_eq!(
            dom.append_child(inner, outer),
            Err(DomError::Cycle {
                parent: inner,
                child: outer
            })
        );
        assert_eq!(
            dom.append_child(outer, outer),
            Err(DomError::Cycle {
                parent: outer,
                child: outer
            })
        );
    }

    #[test]
    fn replace_child_swaps_in_place() {
        let dom = MemoryDom::new();
        let parent = dom.create_element("div");
        let a = el(&dom, "span", "a");
        let b = el(&dom, "span", "b");
        let c = el(&dom, "span", "c");
        for n in [a, b] {
            dom.append_child(parent, n).unwrap();
        }
        dom.replace_child(parent, c, a).unwrap();
        assert_eq!(dom.children(parent), vec![c, b]);
        assert_eq!(dom.parent(a), None);
    }

    #[test]
    fn events_bubble_and_listeners_can_be_removed() {
        let dom = MemoryDom::new();
        let outer = dom.create_element("div");
        let button = dom.create_element("button");
        dom.append_child(outer, button).unwrap();
        let hits = Rc::new(Cell::new(0));
        let h = Rc::clone(&hits);
        let on_outer = dom.add_event_listener(outer, "click", Rc::new(move |_| h.set(h.get() + 1)));
        dom.dispatch(button, "click");
        assert_eq!(hits.get(), 1);
        dom.remove_event_listener(outer, on_outer);
        dom.dispatch(button, "click");
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn listener_may_mutate_tree() {
        let dom = MemoryDom::new();
        let button = dom.create_element("button");
        let handle = dom.clone();
        dom.add_event_listener(
            button,
            "click",
            Rc::new(move |event| handle.set_text_content(event.target, "clicked")),
        );
        dom.dispatch(button, "click");
        assert_eq!(dom.text_content(button), "clicked");
    }

    #[test]
    fn reflected_properties_show_as_attributes() {
        let dom = MemoryDom::new();
        let input = dom.create_element("input");
        assert!(dom.set_property(input, "disabled", &Value::Bool(true)));
        assert!(dom.set_property(input, "value", &Value::from("hi")));
        assert!(!dom.set_property(input, "madeUp", &Value::from(1)));
        assert_eq!(dom.outer_html(input), r#"<input disabled="">"#);
        assert_eq!(dom.get_property(input, "value"), Some(Value::from("hi")));
    }

    #[test]
    fn class_helpers() {
        let dom = MemoryDom::new();
        let div = dom.create_element("div");
        dom.add_class(div, "a");
        dom.add_class(div, "b");
        dom.add_class(div, "a");
        assert_eq!(dom.get_attribute(div, "class").as_deref(), Some("a b"));
        dom.remove_class(div, "a");
        dom.remove_class(div, "b");
        assert_eq!(dom.get_attribute(div, "class"), None);
    }
}
