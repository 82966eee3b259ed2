//! Batch-mode reconciliation against a backend that can be made to fail.

mod common;

use std::cell::Cell;
use std::rc::Rc;

use common::Page;
use juno_core::{RenderMode, display_text};
use juno_dom::{DomBackend, DomError, EventCallback, ListenerId, MemoryDom, NodeId, NodeKind};
use juno_runtime::{Node, Props};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};

/// A [`MemoryDom`] whose `append_child` can be told to refuse.
struct FlakyDom {
    inner: MemoryDom,
    refuse_under: Cell<Option<NodeId>>,
    refuse_all: Cell<bool>,
}

impl FlakyDom {
    fn new(inner: MemoryDom) -> Self {
        Self {
            inner,
            refuse_under: Cell::new(None),
            refuse_all: Cell::new(false),
        }
    }

    fn refuses(&self, parent: NodeId) -> bool {
        self.refuse_all.get() || self.refuse_under.get() == Some(parent)
    }
}

impl DomBackend for FlakyDom {
    fn create_element(&self, tag: &str) -> NodeId {
        self.inner.create_element(tag)
    }

    fn create_text(&self, text: &str) -> NodeId {
        self.inner.create_text(text)
    }

    fn create_fragment(&self) -> NodeId {
        self.inner.create_fragment()
    }

    fn kind(&self, node: NodeId) -> Option<NodeKind> {
        self.inner.kind(node)
    }

    fn tag_name(&self, node: NodeId) -> Option<String> {
        self.inner.tag_name(node)
    }

    fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.inner.parent(node)
    }

    fn children(&self, node: NodeId) -> Vec<NodeId> {
        self.inner.children(node)
    }

    fn contains(&self, ancestor: NodeId, node: NodeId) -> bool {
        self.inner.contains(ancestor, node)
    }

    fn text_content(&self, node: NodeId) -> String {
        self.inner.text_content(node)
    }

    fn append_child(&self, parent: NodeId, child: NodeId) -> Result<(), DomError> {
        if self.refuses(parent) {
            return Err(DomError::Backend("append refused".into()));
        }
        self.inner.append_child(parent, child)
    }

    fn insert_before(&self, parent: NodeId, child: NodeId, reference: Option<NodeId>) -> Result<(), DomError> {
        if self.refuses(parent) {
            return Err(DomError::Backend("insert refused".into()));
        }
        self.inner.insert_before(parent, child, reference)
    }

    fn remove_child(&self, parent: NodeId, child: NodeId) -> Result<(), DomError> {
        self.inner.remove_child(parent, child)
    }

    fn replace_child(&self, parent: NodeId, new_child: NodeId, old_child: NodeId) -> Result<(), DomError> {
        self.inner.replace_child(parent, new_child, old_child)
    }

    fn set_text_content(&self, node: NodeId, text: &str) {
        self.inner.set_text_content(node, text);
    }

    fn set_inner_html(&self, node: NodeId, html: &str) {
        self.inner.set_inner_html(node, html);
    }

    fn set_attribute(&self, node: NodeId, name: &str, value: &str) {
        self.inner.set_attribute(node, name, value);
    }

    fn remove_attribute(&self, node: NodeId, name: &str) {
        self.inner.remove_attribute(node, name);
    }

    fn get_attribute(&self, node: NodeId, name: &str) -> Option<String> {
        self.inner.get_attribute(node, name)
    }

    fn attribute_names(&self, node: NodeId) -> Vec<String> {
        self.inner.attribute_names(node)
    }

    fn has_writable_property(&self, node: NodeId, name: &str) -> bool {
        self.inner.has_writable_property(node, name)
    }

    fn set_property(&self, node: NodeId, name: &str, value: &Value) -> bool {
        self.inner.set_property(node, name, value)
    }

    fn get_property(&self, node: NodeId, name: &str) -> Option<Value> {
        self.inner.get_property(node, name)
    }

    fn set_style(&self, node: NodeId, name: &str, value: &str) {
        self.inner.set_style(node, name, value);
    }

    fn get_style(&self, node: NodeId, name: &str) -> Option<String> {
        self.inner.get_style(node, name)
    }

    fn clear_style(&self, node: NodeId) {
        self.inner.clear_style(node);
    }

    fn add_event_listener(&self, node: NodeId, event: &str, callback: EventCallback) -> ListenerId {
        self.inner.add_event_listener(node, event, callback)
    }

    fn remove_event_listener(&self, node: NodeId, listener: ListenerId) {
        self.inner.remove_event_listener(node, listener);
    }
}

fn flaky_page(initial: Value) -> (Page, Rc<FlakyDom>) {
    let dom = MemoryDom::new();
    let flaky = Rc::new(FlakyDom::new(dom.clone()));
    let page = Page::over(dom, Rc::clone(&flaky) as Rc<dyn DomBackend>, initial, RenderMode::Batch);
    (page, flaky)
}

fn keyed_list(page: &Page) -> Node {
    let state = page.ctx.state().clone();
    Node::el(
        "ul",
        Props::new().children_fn(move || {
            let order = state.get_state_or("order", json!([]));
            Node::list(order.as_array().into_iter().flatten().map(|key| {
                let key = display_text(key);
                Node::el("li", Props::new().with_key(key.clone()).text(key))
            }))
        }),
    )
}

#[test]
fn repeated_failures_fall_back_to_fine_grained() {
    let (page, flaky) = flaky_page(json!({}));
    flaky.refuse_all.set(true);
    let items = Node::list([Node::el("li", Props::new().text("a")), Node::el("li", Props::new().text("b"))]);

    for attempt in 1..=juno_runtime::DEMOTION_THRESHOLD {
        assert_eq!(page.ctx.utils().render_mode(), RenderMode::Batch, "attempt {attempt}");
        let rendered = page.ctx.render(&items).unwrap();
        assert!(page.dom.has_class(rendered, "juno-error"));
    }
    assert_eq!(page.ctx.utils().render_mode(), RenderMode::FineGrained);
}

#[test]
fn a_success_resets_the_failure_count() {
    let (page, flaky) = flaky_page(json!({}));
    let items = Node::list([Node::el("li", Props::new())]);
    for _ in 0..juno_runtime::DEMOTION_THRESHOLD - 1 {
        flaky.refuse_all.set(true);
        page.ctx.render(&items);
    }
    flaky.refuse_all.set(false);
    page.ctx.render(&items);
    flaky.refuse_all.set(true);
    page.ctx.render(&items);
    assert_eq!(page.ctx.utils().render_mode(), RenderMode::Batch);
}

#[test]
fn failing_binding_falls_back_to_replacement_alone() {
    let (page, flaky) = flaky_page(json!({"order": ["a", "b"]}));
    let section = page
        .mount(&Node::el("section", Props::new().children([keyed_list(&page), keyed_list(&page)])))
        .unwrap();
    let lists = page.dom.children(section);
    let [first, second] = lists[..] else {
        panic!("expected two lists");
    };

    flaky.refuse_under.set(Some(first));
    page.ctx.set_state("order", json!(["b", "a"]));
    assert_eq!(page.dom.children(first), Vec::<NodeId>::new());
    assert_eq!(page.dom.outer_html(second), "<ul><li>b</li><li>a</li></ul>");

    flaky.refuse_under.set(None);
    page.ctx.set_state("order", json!(["a", "b"]));
    let first_before = page.dom.children(first);
    let second_before = page.dom.children(second);
    assert_eq!(page.dom.outer_html(first), "<ul><li>a</li><li>b</li></ul>");

    page.ctx.set_state("order", json!(["b", "a"]));
    let first_after = page.dom.children(first);
    assert!(first_after.iter().all(|node| !first_before.contains(node)));
    assert_eq!(page.dom.children(second), vec![second_before[1], second_before[0]]);
    assert_eq!(page.dom.outer_html(first), "<ul><li>b</li><li>a</li></ul>");
    assert_eq!(page.ctx.utils().render_mode(), RenderMode::Batch);
}

#[test]
fn unkeyed_identical_items_are_reused() {
    let page = Page::batch(json!({"rows": 2}));
    let state = page.ctx.state().clone();
    let table = page
        .mount(&Node::el(
            "tbody",
            Props::new().children_fn(move || {
                let rows = state.get_state_or("rows", 0).as_u64().unwrap_or(0);
                Node::list((0..rows).map(|_| Node::el("tr", Props::new().attr("className", "row"))))
            }),
        ))
        .unwrap();
    let before = page.dom.children(table);
    page.ctx.set_state("rows", 3);
    let after = page.dom.children(table);
    assert_eq!(after.len(), 3);
    assert_eq!(&after[..2], &before[..]);
}

#[test]
fn keyed_component_is_updated_not_rebuilt() {
    let page = Page::batch(json!({"names": ["ada"]}));
    page.ctx.components().register("Tag", |props, _cx| {
        let label = props.value("label").map(display_text).unwrap_or_default();
        Ok(Node::el("b", Props::new().text(label)).into())
    });
    let state = page.ctx.state().clone();
    let list = page
        .mount(&Node::el(
            "p",
            Props::new().children_fn(move || {
                let names = state.get_state_or("names", json!([]));
                Node::list(
                    names
                        .as_array()
                        .into_iter()
                        .flatten()
                        .map(|name| Node::el("Tag", Props::new().with_key("only").attr("label", name.clone()))),
                )
            }),
        ))
        .unwrap();
    let before = page.dom.children(list)[0];
    assert_eq!(page.ctx.components().instance_at(before).unwrap().id, "Tag_1");

    page.ctx.set_state("names", json!(["grace"]));
    let after = page.dom.children(list)[0];
    assert_eq!(page.dom.outer_html(list), "<p><b>grace</b></p>");
    assert_eq!(page.ctx.components().instance_at(after).unwrap().id, "Tag_1");
    assert_eq!(page.ctx.components().instance_count(), 1);
}
