//! [`DomBackend`] over real `web-sys` nodes.
//!
//! Each node the renderer touches gets a [`NodeId`]. The id is also stored
//! on the JS object under [`NODE_ID_PROPERTY`], so walking the tree
//! (`parentNode`, `childNodes`) maps back to ids without a reverse table.
//! Nodes created outside the renderer (server markup, `innerHTML`) are
//! adopted on first sight.
//!
//! # Invariants
//!
//! 1. A JS node carries at most one id, and that id maps back to it.
//! 2. Every listener closure stays alive until its [`ListenerId`] is
//!    removed.
//!
//! # Failure Modes
//!
//! | Failure | Result |
//! |---------|--------|
//! | DOM method throws | [`DomError::Backend`] with the exception message |
//! | invalid tag name | warning; an empty text node stands in |
//! | setter on unknown node | ignored |

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use ahash::AHashMap;
use js_sys::{JSON, Reflect};
use juno_dom::{DomBackend, DomError, EventCallback, ListenerId, NodeId, NodeKind};
use serde_json::Value;
use tracing::{trace, warn};
use wasm_bindgen::JsCast;
use wasm_bindgen::prelude::*;
use web_sys::{Document, Element, HtmlElement};

use crate::error::WebError;
use crate::event::to_dom_event;

/// Expando property holding a node's id.
pub const NODE_ID_PROPERTY: &str = "__junoNodeId";

struct Listener {
    node: NodeId,
    event: String,
    closure: Closure<dyn FnMut(web_sys::Event)>,
}

struct Inner {
    document: Document,
    nodes: RefCell<AHashMap<NodeId, web_sys::Node>>,
    next_node: Cell<u64>,
    listeners: RefCell<AHashMap<ListenerId, Listener>>,
    next_listener: Cell<u64>,
}

/// Browser DOM. Cheap to clone; clones share the node table.
#[derive(Clone)]
pub struct WebDom {
    inner: Rc<Inner>,
}

impl WebDom {
    /// Use the current window's document.
    ///
    /// # Errors
    ///
    /// [`WebError::NoWindow`] / [`WebError::NoDocument`] outside a page.
    pub fn new() -> Result<Self, WebError> {
        let window = web_sys::window().ok_or(WebError::NoWindow)?;
        let document = window.document().ok_or(WebError::NoDocument)?;
        Ok(Self::with_document(document))
    }

    #[must_use]
    pub fn with_document(document: Document) -> Self {
        Self {
            inner: Rc::new(Inner {
                document,
                nodes: RefCell::new(AHashMap::new()),
                next_node: Cell::new(0),
                listeners: RefCell::new(AHashMap::new()),
                next_listener: Cell::new(0),
            }),
        }
    }

    #[must_use]
    pub fn document(&self) -> &Document {
        &self.inner.document
    }

    /// Id for an existing JS node, assigning one if it has none.
    pub fn adopt(&self, node: &web_sys::Node) -> NodeId {
        if let Some(id) = stored_id(node) {
            return id;
        }
        let id = NodeId::from_raw(self.inner.next_node.get());
        self.inner.next_node.set(id.get() + 1);
        if let Err(err) = Reflect::set(node, &JsValue::from_str(NODE_ID_PROPERTY), &JsValue::from_f64(id.get() as f64)) {
            warn!(error = %js_message(&err), "could not tag node");
        }
        self.inner.nodes.borrow_mut().insert(id, node.clone());
        trace!(%id, "adopted node");
        id
    }

    /// First element matching `selector`.
    ///
    /// # Errors
    ///
    /// [`WebError::NotFound`] when nothing matches or the selector is
    /// invalid.
    pub fn query(&self, selector: &str) -> Result<NodeId, WebError> {
        let found = self
            .inner
            .document
            .query_selector(selector)
            .ok()
            .flatten()
            .ok_or_else(|| WebError::NotFound(selector.to_owned()))?;
        Ok(self.adopt(&found))
    }

    /// The JS node behind `id`.
    #[must_use]
    pub fn js_node(&self, id: NodeId) -> Option<web_sys::Node> {
        self.inner.nodes.borrow().get(&id).cloned()
    }

    /// Number of nodes with an id. Nothing is ever forgotten, so this only
    /// grows.
    #[must_use]
    pub fn tracked_nodes(&self) -> usize {
        self.inner.nodes.borrow().len()
    }

    fn element(&self, id: NodeId) -> Option<Element> {
        self.js_node(id)?.dyn_into::<Element>().ok()
    }

    fn html_element(&self, id: NodeId) -> Option<HtmlElement> {
        self.js_node(id)?.dyn_into::<HtmlElement>().ok()
    }

    fn pair(&self, parent: NodeId, child: NodeId) -> Result<(web_sys::Node, web_sys::Node), DomError> {
        let nodes = self.inner.nodes.borrow();
        let parent = nodes.get(&parent).cloned().ok_or(DomError::UnknownNode(parent))?;
        let child = nodes.get(&child).cloned().ok_or(DomError::UnknownNode(child))?;
        Ok((parent, child))
    }
}

impl fmt::Debug for WebDom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebDom")
            .field("nodes", &self.inner.nodes.borrow().len())
            .field("listeners", &self.inner.listeners.borrow().len())
            .finish()
    }
}

pub(crate) fn stored_id(node: &JsValue) -> Option<NodeId> {
    Reflect::get(node, &JsValue::from_str(NODE_ID_PROPERTY))
        .ok()?
        .as_f64()
        .map(|raw| NodeId::from_raw(raw as u64))
}

pub(crate) fn js_message(err: &JsValue) -> String {
    err.as_string()
        .or_else(|| Reflect::get(err, &JsValue::from_str("message")).ok()?.as_string())
        .unwrap_or_else(|| format!("{err:?}"))
}

fn backend_error(err: &JsValue) -> DomError {
    DomError::Backend(js_message(err))
}

fn to_js(value: &Value) -> JsValue {
    match value {
        Value::Null => JsValue::NULL,
        Value::Bool(b) => JsValue::from_bool(*b),
        Value::Number(n) => n.as_f64().map_or(JsValue::NULL, JsValue::from_f64),
        Value::String(s) => JsValue::from_str(s),
        Value::Array(_) | Value::Object(_) => JSON::parse(&value.to_string()).unwrap_or(JsValue::NULL),
    }
}

fn from_js(value: &JsValue) -> Option<Value> {
    if value.is_undefined() {
        return None;
    }
    if value.is_null() {
        return Some(Value::Null);
    }
    if let Some(b) = value.as_bool() {
        return Some(Value::Bool(b));
    }
    if let Some(n) = value.as_f64() {
        return serde_json::Number::from_f64(n).map(Value::Number);
    }
    if let Some(s) = value.as_string() {
        return Some(Value::String(s));
    }
    let text: String = JSON::stringify(value).ok()?.into();
    serde_json::from_str(&text).ok()
}

impl DomBackend for WebDom {
    fn create_element(&self, tag: &str) -> NodeId {
        let node: web_sys::Node = match self.inner.document.create_element(tag) {
            Ok(element) => element.into(),
            Err(err) => {
                warn!(tag, error = %js_message(&err), "invalid tag; using an empty text node");
                self.inner.document.create_text_node("").into()
            }
        };
        self.adopt(&node)
    }

    fn create_text(&self, text: &str) -> NodeId {
        let node: web_sys::Node = self.inner.document.create_text_node(text).into();
        self.adopt(&node)
    }

    fn create_fragment(&self) -> NodeId {
        let node: web_sys::Node = self.inner.document.create_document_fragment().into();
        self.adopt(&node)
    }

    fn kind(&self, node: NodeId) -> Option<NodeKind> {
        let node = self.js_node(node)?;
        Some(match node.node_type() {
            web_sys::Node::ELEMENT_NODE => NodeKind::Element,
            web_sys::Node::TEXT_NODE => NodeKind::Text,
            web_sys::Node::DOCUMENT_FRAGMENT_NODE => NodeKind::Fragment,
            _ => NodeKind::Raw,
        })
    }

    fn tag_name(&self, node: NodeId) -> Option<String> {
        self.element(node).map(|element| element.local_name())
    }

    fn parent(&self, node: NodeId) -> Option<NodeId> {
        let parent = self.js_node(node)?.parent_node()?;
        Some(self.adopt(&parent))
    }

    fn children(&self, node: NodeId) -> Vec<NodeId> {
        let Some(node) = self.js_node(node) else {
            return Vec::new();
        };
        let list = node.child_nodes();
        (0..list.length())
            .filter_map(|index| list.item(index))
            .map(|child| self.adopt(&child))
            .collect()
    }

    fn contains(&self, ancestor: NodeId, node: NodeId) -> bool {
        match (self.js_node(ancestor), self.js_node(node)) {
            (Some(ancestor), Some(node)) => ancestor.contains(Some(&node)),
            _ => false,
        }
    }

    fn text_content(&self, node: NodeId) -> String {
        self.js_node(node)
            .and_then(|node| node.text_content())
            .unwrap_or_default()
    }

    fn append_child(&self, parent: NodeId, child: NodeId) -> Result<(), DomError> {
        let (parent, child) = self.pair(parent, child)?;
        parent.append_child(&child).map(drop).map_err(|err| backend_error(&err))
    }

    fn insert_before(&self, parent: NodeId, child: NodeId, reference: Option<NodeId>) -> Result<(), DomError> {
        let (parent, child) = self.pair(parent, child)?;
        let reference = match reference {
            Some(id) => Some(self.js_node(id).ok_or(DomError::UnknownNode(id))?),
            None => None,
        };
        parent
            .insert_before(&child, reference.as_ref())
            .map(drop)
            .map_err(|err| backend_error(&err))
    }

    fn remove_child(&self, parent: NodeId, child: NodeId) -> Result<(), DomError> {
        let (parent_node, child_node) = self.pair(parent, child)?;
        if child_node.parent_node().as_ref() != Some(&parent_node) {
            return Err(DomError::NotAChild { parent, child });
        }
        parent_node.remove_child(&child_node).map(drop).map_err(|err| backend_error(&err))
    }

    fn replace_child(&self, parent: NodeId, new_child: NodeId, old_child: NodeId) -> Result<(), DomError> {
        let (parent, new_child) = self.pair(parent, new_child)?;
        let old_child = self.js_node(old_child).ok_or(DomError::UnknownNode(old_child))?;
        parent
            .replace_child(&new_child, &old_child)
            .map(drop)
            .map_err(|err| backend_error(&err))
    }

    fn set_text_content(&self, node: NodeId, text: &str) {
        if let Some(node) = self.js_node(node) {
            node.set_text_content(Some(text));
        }
    }

    fn set_inner_html(&self, node: NodeId, html: &str) {
        if let Some(element) = self.element(node) {
            element.set_inner_html(html);
        }
    }

    fn set_attribute(&self, node: NodeId, name: &str, value: &str) {
        let Some(element) = self.element(node) else {
            return;
        };
        if let Err(err) = element.set_attribute(name, value) {
            warn!(%node, name, error = %js_message(&err), "set_attribute failed");
        }
    }

    fn remove_attribute(&self, node: NodeId, name: &str) {
        if let Some(element) = self.element(node) {
            let _ = element.remove_attribute(name);
        }
    }

    fn get_attribute(&self, node: NodeId, name: &str) -> Option<String> {
        self.element(node)?.get_attribute(name)
    }

    fn attribute_names(&self, node: NodeId) -> Vec<String> {
        self.element(node)
            .map(|element| {
                element
                    .get_attribute_names()
                    .iter()
                    .filter_map(|name| name.as_string())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn has_writable_property(&self, node: NodeId, name: &str) -> bool {
        self.element(node)
            .and_then(|element| Reflect::has(&element, &JsValue::from_str(name)).ok())
            .unwrap_or(false)
    }

    fn set_property(&self, node: NodeId, name: &str, value: &Value) -> bool {
        self.js_node(node)
            .and_then(|node| Reflect::set(&node, &JsValue::from_str(name), &to_js(value)).ok())
            .unwrap_or(false)
    }

    fn get_property(&self, node: NodeId, name: &str) -> Option<Value> {
        let node = self.js_node(node)?;
        from_js(&Reflect::get(&node, &JsValue::from_str(name)).ok()?)
    }

    fn set_style(&self, node: NodeId, name: &str, value: &str) {
        let Some(element) = self.html_element(node) else {
            return;
        };
        let style = element.style();
        let result = if value.is_empty() {
            style.remove_property(name).map(drop)
        } else {
            style.set_property(name, value)
        };
        if let Err(err) = result {
            warn!(%node, name, error = %js_message(&err), "style update failed");
        }
    }

    fn get_style(&self, node: NodeId, name: &str) -> Option<String> {
        let value = self.html_element(node)?.style().get_property_value(name).ok()?;
        (!value.is_empty()).then_some(value)
    }

    fn clear_style(&self, node: NodeId) {
        self.remove_attribute(node, "style");
    }

    fn add_event_listener(&self, node: NodeId, event: &str, callback: EventCallback) -> ListenerId {
        let id = ListenerId::from_raw(self.inner.next_listener.get());
        self.inner.next_listener.set(id.get() + 1);
        let closure = Closure::<dyn FnMut(web_sys::Event)>::new(move |raw: web_sys::Event| {
            let event = to_dom_event(&raw, node);
            callback(&event);
            if event.default_prevented() {
                raw.prevent_default();
            }
        });
        if let Some(target) = self.js_node(node) {
            if let Err(err) = target.add_event_listener_with_callback(event, closure.as_ref().unchecked_ref()) {
                warn!(%node, event, error = %js_message(&err), "addEventListener failed");
            }
        }
        self.inner.listeners.borrow_mut().insert(
            id,
            Listener {
                node,
                event: event.to_owned(),
                closure,
            },
        );
        id
    }

    fn remove_event_listener(&self, node: NodeId, listener: ListenerId) {
        let Some(entry) = self.inner.listeners.borrow_mut().remove(&listener) else {
            return;
        };
        if entry.node != node {
            warn!(%node, owner = %entry.node, "listener removed through the wrong node");
        }
        if let Some(target) = self.js_node(entry.node) {
            let _ = target.remove_event_listener_with_callback(&entry.event, entry.closure.as_ref().unchecked_ref());
        }
    }
}
