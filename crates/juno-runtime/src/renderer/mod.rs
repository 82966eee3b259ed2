//! Node descriptions to DOM nodes.
//!
//! Rendering resolves each tag once ([`TagKind`]): a registered component
//! is handed to the component manager, anything else becomes an element
//! whose props are applied one by one:
//!
//! | prop | handling |
//! |------|----------|
//! | `key` | never applied |
//! | `children` | static render, reactive re-render, or deferred swap |
//! | `on*` handler | event listener (`onClick` also recognizes taps) |
//! | deferred value | async attribute group with loading indicator |
//! | anything else | [`attrs`] rules, reactive when given a closure |
//!
//! # Strategies
//!
//! - [`RenderMode::FineGrained`]: every dynamic prop is its own binding and
//!   reactive children are rebuilt from scratch on each re-run.
//! - [`RenderMode::Batch`]: reactive children are reconciled by key
//!   ([`reconcile`]), unmatched nodes go to a per-tag recycle pool, and new
//!   elements are taken from it.
//!
//! # Failure Modes
//!
//! | Failure | Result |
//! |---------|--------|
//! | render error or panic | inline error node; counts toward demotion |
//! | [`DEMOTION_THRESHOLD`] consecutive failures in batch mode | renderer switches to fine-grained |
//! | reconciliation error | that binding permanently falls back to full replacement |

mod attrs;
mod binding;
mod events;
mod reconcile;
mod recycle;

use std::cell::{Cell, RefCell};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::rc::Rc;

use ahash::AHashMap;
use juno_async::{AsyncError, TtlCache};
use juno_core::RenderMode;
use juno_dom::{DomBackend, ListenerId, NodeId};
use serde_json::Value;
use smallvec::SmallVec;
use tracing::{debug, error, trace, warn};

use crate::component::{self, ComponentFn};
use crate::context::Context;
use crate::error::{RenderError, panic_message};
use crate::node::Node;
use crate::props::{Dynamic, Prop, Props};

pub use binding::BindingStatus;
pub use events::{TAP_MAX_DURATION_MS, TAP_MAX_MOVEMENT_PX};
pub use recycle::RECYCLE_POOL_CAP;

pub(crate) use binding::BindingHandle;

/// Consecutive render failures after which batch mode is abandoned.
pub const DEMOTION_THRESHOLD: u32 = 3;

/// Per-node side table: what has to be undone on cleanup.
#[derive(Default)]
struct NodeRecord {
    bindings: SmallVec<[Rc<dyn BindingHandle>; 2]>,
    listeners: SmallVec<[ListenerId; 2]>,
}

#[derive(Default)]
pub(crate) struct RendererState {
    mode: Cell<RenderMode>,
    failures: Cell<u32>,
    /// Nesting of [`render`] calls; only an outermost success resets
    /// `failures`.
    depth: Cell<u32>,
    records: RefCell<AHashMap<NodeId, NodeRecord>>,
    /// Bumped on cleanup so late async writes can tell a node was reused.
    incarnations: RefCell<AHashMap<NodeId, u64>>,
    keys: RefCell<reconcile::KeyCache>,
    pool: RefCell<recycle::RecyclePool>,
    attr_cache: RefCell<TtlCache<Vec<Result<Value, AsyncError>>>>,
}

impl RendererState {
    pub(crate) fn mode(&self) -> RenderMode {
        self.mode.get()
    }

    pub(crate) fn set_mode(&self, mode: RenderMode) {
        if self.mode.replace(mode) != mode {
            debug!(%mode, "render mode changed");
        }
        self.failures.set(0);
    }

    fn record_failure(&self) {
        let failures = self.failures.get() + 1;
        self.failures.set(failures);
        if failures >= DEMOTION_THRESHOLD && self.mode.get() == RenderMode::Batch {
            warn!(failures, "repeated render failures; falling back to fine-grained mode");
            self.set_mode(RenderMode::FineGrained);
        }
    }

    pub(crate) fn incarnation(&self, node: NodeId) -> u64 {
        *self.incarnations.borrow_mut().entry(node).or_insert(0)
    }
}

enum TagKind {
    Component(ComponentFn),
    Element,
}

fn tag_kind(ctx: &Context, tag: &str) -> TagKind {
    match ctx.rt.components.borrow().get(tag) {
        Some(component) => TagKind::Component(component),
        None => TagKind::Element,
    }
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

pub(crate) fn render(ctx: &Context, node: &Node) -> Option<NodeId> {
    let state = &ctx.rt.renderer;
    state.depth.set(state.depth.get() + 1);
    let outcome = catch_unwind(AssertUnwindSafe(|| try_render(ctx, node)));
    state.depth.set(state.depth.get() - 1);
    match outcome {
        Ok(Ok(rendered)) => {
            if state.depth.get() == 0 {
                state.failures.set(0);
            }
            rendered
        }
        Ok(Err(err)) => {
            error!(%err, "render failed");
            state.record_failure();
            Some(error_node(ctx, &err.to_string()))
        }
        Err(payload) => {
            let err = RenderError::Panicked(panic_message(&*payload));
            error!(%err, "render panicked");
            state.record_failure();
            Some(error_node(ctx, &err.to_string()))
        }
    }
}

fn try_render(ctx: &Context, node: &Node) -> Result<Option<NodeId>, RenderError> {
    let dom = ctx.dom();
    match node {
        Node::Empty => Ok(None),
        Node::Text(text) => Ok(Some(dom.create_text(text))),
        Node::List(nodes) => {
            let fragment = dom.create_fragment();
            for child in nodes {
                if let Some(rendered) = render(ctx, child) {
                    dom.append_child(fragment, rendered)?;
                }
            }
            Ok(Some(fragment))
        }
        Node::Element { tag, props } => Ok(Some(match tag_kind(ctx, tag) {
            TagKind::Component(component) => component::instantiate(ctx, tag, component, props),
            TagKind::Element => render_element(ctx, tag, props),
        })),
    }
}

fn render_element(ctx: &Context, tag: &str, props: &Props) -> NodeId {
    let recycled = if ctx.rt.renderer.mode() == RenderMode::Batch {
        ctx.rt.renderer.pool.borrow_mut().take(tag)
    } else {
        None
    };
    let node = recycled.unwrap_or_else(|| ctx.dom().create_element(tag));
    apply_props(ctx, node, props);
    node
}

pub(crate) fn mount(ctx: &Context, container: NodeId, node: &Node) -> Option<NodeId> {
    let rendered = render(ctx, node)?;
    if let Err(err) = ctx.dom().append_child(container, rendered) {
        error!(%err, %container, "mount failed");
        cleanup(ctx, rendered);
        return None;
    }
    Some(rendered)
}

pub(crate) fn force_render(ctx: &Context, container: NodeId, node: &Node) -> Option<NodeId> {
    clear_children(ctx, container);
    mount(ctx, container, node)
}

/// Undo everything the renderer attached to `node` and its subtree. The
/// nodes stay where they are.
pub(crate) fn cleanup(ctx: &Context, node: NodeId) {
    component::cleanup(ctx, node);
    let state = &ctx.rt.renderer;
    let record = state.records.borrow_mut().remove(&node);
    if let Some(record) = record {
        for binding in &record.bindings {
            binding.dispose();
        }
        for listener in record.listeners {
            ctx.dom().remove_event_listener(node, listener);
        }
    }
    if let Some(incarnation) = state.incarnations.borrow_mut().get_mut(&node) {
        *incarnation += 1;
    }
    state.keys.borrow_mut().evict(node);
    for child in ctx.dom().children(node) {
        cleanup(ctx, child);
    }
}

/// Status of each reactive binding attached to `node`.
pub(crate) fn binding_statuses(ctx: &Context, node: NodeId) -> Vec<BindingStatus> {
    ctx.rt
        .renderer
        .records
        .borrow()
        .get(&node)
        .map(|record| record.bindings.iter().map(|b| b.status()).collect())
        .unwrap_or_default()
}

/// State paths the bindings on `node` currently depend on.
pub(crate) fn binding_dependencies(ctx: &Context, node: NodeId) -> Vec<String> {
    let records = ctx.rt.renderer.records.borrow();
    let mut paths: Vec<String> = records
        .get(&node)
        .map(|record| record.bindings.iter().flat_map(|b| b.dependencies()).collect())
        .unwrap_or_default();
    paths.sort();
    paths.dedup();
    paths
}

/// Clean up and detach every child of `parent`.
fn clear_children(ctx: &Context, parent: NodeId) {
    let dom = ctx.dom();
    for child in dom.children(parent) {
        cleanup(ctx, child);
    }
    dom.clear_children(parent);
}

/// Fine-grained children update: throw away what is there, render anew.
fn replace_children(ctx: &Context, parent: NodeId, children: &Node) {
    clear_children(ctx, parent);
    if let Some(rendered) = render(ctx, children) {
        if let Err(err) = ctx.dom().append_child(parent, rendered) {
            error!(%err, %parent, "could not insert children");
            cleanup(ctx, rendered);
        }
    }
}

// ---------------------------------------------------------------------------
// Props
// ---------------------------------------------------------------------------

fn apply_props(ctx: &Context, node: NodeId, props: &Props) {
    let mut deferred = Vec::new();
    for (key, prop) in props.iter() {
        if key == "key" {
            continue;
        }
        match prop {
            Prop::Failed(err) => attrs::mark_error(ctx.dom(), node, key, err),
            Prop::Handler(handler) => {
                if events::is_event_key(key) {
                    let ids = events::attach(ctx, node, key, Rc::clone(handler));
                    record(ctx, node).listeners.extend(ids);
                } else {
                    warn!(%node, prop = key, "handler on a non-event prop ignored");
                }
            }
            Prop::Children(children) => bind_children(ctx, node, children.clone()),
            Prop::Value(Dynamic::Deferred(value)) => deferred.push((key.to_owned(), value.clone())),
            Prop::Value(value) if key == "children" => {
                bind_children(ctx, node, value.clone().map(Rc::new(|value: Value| Node::from(value))));
            }
            Prop::Value(value) => {
                let handle = binding::bind(ctx, node, key, value.clone(), attrs::sink(key));
                if let Some(handle) = handle {
                    record(ctx, node).bindings.push(handle);
                }
            }
        }
    }
    if !deferred.is_empty() {
        attrs::apply_deferred(ctx, node, deferred);
    }
}

fn bind_children(ctx: &Context, node: NodeId, children: Dynamic<Node>) {
    if let Some(handle) = binding::bind(ctx, node, "children", children, reconcile::children_sink()) {
        record(ctx, node).bindings.push(handle);
    }
}

fn record(ctx: &Context, node: NodeId) -> std::cell::RefMut<'_, NodeRecord> {
    std::cell::RefMut::map(ctx.rt.renderer.records.borrow_mut(), |records| {
        records.entry(node).or_default()
    })
}

/// Reset an element so its props can be applied again from scratch.
fn reapply_props(ctx: &Context, node: NodeId, props: &Props) {
    cleanup(ctx, node);
    recycle::strip(ctx.dom(), node);
    apply_props(ctx, node, props);
    trace!(%node, "props re-applied");
}

// ---------------------------------------------------------------------------
// Stand-in nodes
// ---------------------------------------------------------------------------

/// Inline error block shown in place of something that failed.
pub(crate) fn error_node(ctx: &Context, message: &str) -> NodeId {
    let dom = ctx.dom();
    let node = dom.create_element("div");
    dom.set_attribute(node, "class", "juno-error");
    dom.set_attribute(node, "role", "alert");
    dom.set_text_content(node, message);
    node
}

/// Marker shown while something async is pending. `loading` replaces the
/// default text.
pub(crate) fn placeholder(ctx: &Context, loading: Option<&Node>) -> NodeId {
    let dom = ctx.dom();
    let node = dom.create_element("span");
    dom.set_attribute(node, "class", "juno-async-placeholder");
    dom.set_attribute(node, "aria-busy", "true");
    match loading.and_then(|loading| render(ctx, loading)) {
        Some(custom) => {
            if let Err(err) = dom.append_child(node, custom) {
                warn!(%err, "could not insert loading node");
                cleanup(ctx, custom);
                dom.set_text_content(node, "Loading…");
            }
        }
        None => dom.set_text_content(node, "Loading…"),
    }
    node
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestHarness;
    use juno_dom::DomBackend;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn renders_static_tree() {
        let h = TestHarness::new(json!({}));
        let node = Node::from(json!({"div": {"className": "card", "children": [
            {"h1": "Title"},
            {"p": {"text": "body", "data-id": 7, "key": "ignored"}}
        ]}}));
        h.mount(&node);
        assert_eq!(
            h.html(),
            r#"<div class="card"><h1>Title</h1><p data-id="7">body</p></div>"#
        );
    }

    #[test]
    fn empty_renders_nothing_and_lists_flatten() {
        let h = TestHarness::new(json!({}));
        assert_eq!(h.ctx.render(&Node::Empty), None);
        h.mount(&Node::list([Node::text("a"), Node::Empty, Node::text("b")]));
        assert_eq!(h.html(), "ab");
    }

    #[test]
    fn cleanup_releases_bindings_and_listeners() {
        let h = TestHarness::new(json!({"label": "x"}));
        let state = h.ctx.state().clone();
        let node = h
            .mount(&Node::el(
                "button",
                Props::new()
                    .text_fn(move || state.get_state_or("label", ""))
                    .on("onClick", |_| {}),
            ))
            .unwrap();
        assert_eq!(h.ctx.state().internal_listener_count(), 1);
        assert_eq!(h.dom.listener_count(node), 4);
        h.ctx.cleanup(node);
        assert_eq!(h.ctx.state().internal_listener_count(), 0);
        assert_eq!(h.dom.listener_count(node), 0);
    }

    #[test]
    fn batch_mode_demotes_after_repeated_failures() {
        let h = TestHarness::with_mode(json!({}), RenderMode::Batch);
        let state = &h.ctx.rt.renderer;
        for _ in 0..DEMOTION_THRESHOLD {
            state.record_failure();
        }
        assert_eq!(h.ctx.utils().render_mode(), RenderMode::FineGrained);
    }

    #[test]
    fn placeholder_uses_custom_loading_node() {
        let h = TestHarness::new(json!({}));
        let default = placeholder(&h.ctx, None);
        assert_eq!(h.dom.text_content(default), "Loading…");
        let custom = placeholder(&h.ctx, Some(&Node::el("i", Props::new().text("wait"))));
        assert_eq!(
            h.dom.outer_html(custom),
            r#"<span class="juno-async-placeholder" aria-busy="true"><i>wait</i></span>"#
        );
    }
}
