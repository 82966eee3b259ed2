//! Keyed children reconciliation for batch mode.
//!
//! Every child rendered by reconciliation is recorded in the [`KeyCache`]
//! with a key and the fingerprint of the description it came from. On the
//! next run, each new description looks for an old child of the same parent
//! with the same key:
//!
//! - found, same fingerprint: the node is moved into place untouched;
//! - found, different fingerprint: the node is patched (props re-applied,
//!   or the component instance updated) and moved into place;
//! - not found: a new node is rendered.
//!
//! Old children nobody claimed are cleaned up and recycled. The new order is
//! installed with a single fragment insert.
//!
//! # Keys
//!
//! An explicit `key` prop gives `tag#key`. Otherwise the key is the tag,
//! the identifying attributes (`id`, `className`, `name`, `type`), and a
//! hash of the full fingerprint, so unkeyed nodes are reused only when their
//! description is identical. Two siblings with the same derived key are
//! matched in order.
//!
//! # Failure Modes
//!
//! | Failure | Result |
//! |---------|--------|
//! | reused node is an ancestor of the parent | rendered fresh instead |
//! | DOM error mid-way | new nodes cleaned up; the binding falls back to full replacement for good |

use std::cell::Cell;
use std::collections::VecDeque;
use std::rc::Rc;

use ahash::{AHashMap, AHashSet};
use juno_async::AsyncError;
use juno_core::{RenderMode, deep_equal, display_text, stable_hash, stable_stringify};
use juno_dom::NodeId;
use serde_json::Value;
use tracing::{trace, warn};

use super::binding::Sink;
use super::{attrs, cleanup, recycle, reapply_props, render, replace_children};
use crate::component;
use crate::context::Context;
use crate::error::RenderError;
use crate::node::Node;

/// Attributes that identify an unkeyed element.
const IDENTIFYING_ATTRIBUTES: [&str; 4] = ["id", "className", "name", "type"];

#[derive(Debug, Default)]
pub(crate) struct KeyCache {
    entries: AHashMap<NodeId, (String, Value)>,
}

impl KeyCache {
    fn insert(&mut self, node: NodeId, key: String, fingerprint: Value) {
        self.entries.insert(node, (key, fingerprint));
    }

    pub(crate) fn evict(&mut self, node: NodeId) {
        self.entries.remove(&node);
    }

    fn key_of(&self, node: NodeId) -> Option<&str> {
        self.entries.get(&node).map(|(key, _)| key.as_str())
    }

    fn fingerprint_of(&self, node: NodeId) -> Option<&Value> {
        self.entries.get(&node).map(|(_, fingerprint)| fingerprint)
    }
}

pub(super) fn derive_key(node: &Node) -> Option<String> {
    let Node::Element { tag, props } = node else {
        return None;
    };
    if let Some(key) = props.key() {
        return Some(format!("{tag}#{key}"));
    }
    let mut key = tag.clone();
    for name in IDENTIFYING_ATTRIBUTES {
        if let Some(value) = props.value(name) {
            key.push('|');
            key.push_str(name);
            key.push('=');
            key.push_str(&display_text(value));
        }
    }
    let hash = stable_hash(&stable_stringify(&props.fingerprint()));
    key.push_str(&format!("|{hash:016x}"));
    Some(key)
}

/// Sink for a `children` prop. Owns the binding's demotion flag.
pub(super) fn children_sink() -> Sink<Node> {
    let demoted = Rc::new(Cell::new(false));
    Sink {
        apply: Rc::new(move |ctx: &Context, parent, result: Result<Node, AsyncError>| {
            attrs::hide_loading(ctx.dom(), parent);
            match result {
                Ok(children) => set_children(ctx, parent, &children, &demoted),
                Err(err) => attrs::mark_error(ctx.dom(), parent, "children", &err),
            }
        }),
        loading: Some(Rc::new(|ctx: &Context, node| attrs::show_loading(ctx.dom(), node))),
    }
}

fn set_children(ctx: &Context, parent: NodeId, children: &Node, demoted: &Cell<bool>) {
    if ctx.rt.renderer.mode() == RenderMode::Batch && !demoted.get() {
        match reconcile(ctx, parent, children) {
            Ok(()) => return,
            Err(err) => {
                warn!(%err, %parent, "keyed reconciliation failed; this binding now replaces children wholesale");
                demoted.set(true);
            }
        }
    }
    replace_children(ctx, parent, children);
}

fn flatten<'a>(node: &'a Node, out: &mut Vec<&'a Node>) {
    match node {
        Node::Empty => {}
        Node::List(nodes) => {
            for child in nodes {
                flatten(child, out);
            }
        }
        other => out.push(other),
    }
}

pub(super) fn reconcile(ctx: &Context, parent: NodeId, children: &Node) -> Result<(), RenderError> {
    let dom = ctx.dom();
    let state = &ctx.rt.renderer;

    let mut items = Vec::new();
    flatten(children, &mut items);
    let old = dom.children(parent);

    let mut available: AHashMap<String, VecDeque<NodeId>> = AHashMap::new();
    {
        let keys = state.keys.borrow();
        for child in &old {
            if let Some(key) = keys.key_of(*child) {
                available.entry(key.to_owned()).or_default().push_back(*child);
            }
        }
    }

    let fragment = dom.create_fragment();
    let mut kept = AHashSet::new();
    let mut created = Vec::new();
    for item in items {
        let key = derive_key(item);
        let reusable = key
            .as_ref()
            .and_then(|key| available.get_mut(key))
            .and_then(VecDeque::pop_front)
            .filter(|existing| !dom.contains(*existing, parent));
        let node = match reusable {
            Some(existing) => {
                let node = patch(ctx, existing, item, key.as_deref());
                kept.insert(node);
                node
            }
            None => {
                let Some(node) = render(ctx, item) else {
                    continue;
                };
                if let Some(key) = key {
                    state.keys.borrow_mut().insert(node, key, item.fingerprint());
                }
                created.push(node);
                node
            }
        };
        if let Err(err) = dom.append_child(fragment, node) {
            abandon(ctx, &created, &kept);
            return Err(err.into());
        }
    }

    let batch = state.mode() == RenderMode::Batch;
    for child in old {
        if kept.contains(&child) || dom.parent(child) != Some(parent) {
            continue;
        }
        cleanup(ctx, child);
        dom.remove_child(parent, child)?;
        if batch {
            recycle::recycle(ctx, child);
        }
    }

    if let Err(err) = dom.append_child(parent, fragment) {
        abandon(ctx, &created, &kept);
        return Err(err.into());
    }
    trace!(%parent, kept = kept.len(), created = created.len(), "children reconciled");
    Ok(())
}

/// Bring `existing` in line with `item`. Returns the node that now
/// represents it, which differs from `existing` when a component instance
/// re-rendered.
fn patch(ctx: &Context, existing: NodeId, item: &Node, key: Option<&str>) -> NodeId {
    let state = &ctx.rt.renderer;
    let fingerprint = item.fingerprint();
    let unchanged = state
        .keys
        .borrow()
        .fingerprint_of(existing)
        .is_some_and(|old| deep_equal(old, &fingerprint));
    if unchanged {
        return existing;
    }
    let Node::Element { props, .. } = item else {
        return existing;
    };
    let is_instance = ctx.rt.components.borrow().info(existing).is_some();
    let node = if is_instance {
        component::update_instance(ctx, existing, props.clone()).unwrap_or(existing)
    } else {
        reapply_props(ctx, existing, props);
        existing
    };
    if let Some(key) = key {
        state.keys.borrow_mut().insert(node, key.to_owned(), fingerprint);
    }
    node
}

fn abandon(ctx: &Context, created: &[NodeId], kept: &AHashSet<NodeId>) {
    for node in created.iter().chain(kept.iter()) {
        cleanup(ctx, *node);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::props::Props;
    use crate::testing::TestHarness;
    use juno_dom::DomBackend;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn li(key: &str, text: &str) -> Node {
        Node::el("li", Props::new().with_key(key).text(text))
    }

    #[test]
    fn explicit_keys_win() {
        assert_eq!(derive_key(&li("a", "x")).as_deref(), Some("li#a"));
        assert_eq!(derive_key(&Node::text("t")), None);
        let unkeyed = derive_key(&Node::el("input", Props::new().attr("name", "q"))).unwrap();
        assert!(unkeyed.starts_with("input|name=q|"));
    }

    #[test]
    fn reorder_keeps_nodes_and_patches_changed_ones() {
        let h = TestHarness::with_mode(json!({}), RenderMode::Batch);
        let ul = h.dom.create_element("ul");
        reconcile(&h.ctx, ul, &Node::list([li("a", "A"), li("b", "B"), li("c", "C")])).unwrap();
        let before = h.dom.children(ul);

        reconcile(&h.ctx, ul, &Node::list([li("c", "C"), li("a", "A2"), li("b", "B")])).unwrap();
        let after = h.dom.children(ul);
        assert_eq!(after, vec![before[2], before[0], before[1]]);
        assert_eq!(h.dom.outer_html(ul), "<ul><li>C</li><li>A2</li><li>B</li></ul>");
    }

    #[test]
    fn removed_children_are_recycled() {
        let h = TestHarness::with_mode(json!({}), RenderMode::Batch);
        let ul = h.dom.create_element("ul");
        reconcile(&h.ctx, ul, &Node::list([li("a", "A"), li("b", "B")])).unwrap();
        let b = h.dom.children(ul)[1];
        reconcile(&h.ctx, ul, &Node::list([li("a", "A")])).unwrap();
        assert_eq!(h.dom.children(ul).len(), 1);
        assert_eq!(h.dom.parent(b), None);
        assert_eq!(h.ctx.rt.renderer.pool.borrow().len("li"), 1);

        reconcile(&h.ctx, ul, &Node::list([li("a", "A"), li("z", "Z")])).unwrap();
        assert_eq!(h.dom.children(ul)[1], b);
        assert_eq!(h.dom.outer_html(ul), "<ul><li>A</li><li>Z</li></ul>");
    }
}
