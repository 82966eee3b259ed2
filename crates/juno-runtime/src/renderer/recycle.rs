//! Per-tag pool of detached elements for batch mode.

use ahash::AHashMap;
use juno_dom::{DomBackend, NodeId, NodeKind};
use tracing::trace;

use crate::context::Context;

/// Pooled elements kept per tag name.
pub const RECYCLE_POOL_CAP: usize = 100;

#[derive(Debug, Default)]
pub(crate) struct RecyclePool {
    by_tag: AHashMap<String, Vec<NodeId>>,
}

impl RecyclePool {
    /// Returns `false` when the tag's pool is full.
    pub(crate) fn put(&mut self, tag: &str, node: NodeId) -> bool {
        let pool = self.by_tag.entry(tag.to_owned()).or_default();
        if pool.len() >= RECYCLE_POOL_CAP {
            return false;
        }
        pool.push(node);
        true
    }

    pub(crate) fn take(&mut self, tag: &str) -> Option<NodeId> {
        self.by_tag.get_mut(tag)?.pop()
    }

    #[cfg(test)]
    pub(crate) fn len(&self, tag: &str) -> usize {
        self.by_tag.get(tag).map_or(0, Vec::len)
    }
}

/// Remove attributes, inline style, and content.
pub(super) fn strip(dom: &dyn DomBackend, node: NodeId) {
    for name in dom.attribute_names(node) {
        dom.remove_attribute(node, &name);
    }
    dom.clear_style(node);
    dom.set_text_content(node, "");
}

/// Hand a detached, cleaned-up element to the pool.
pub(super) fn recycle(ctx: &Context, node: NodeId) {
    let dom = ctx.dom();
    if dom.kind(node) != Some(NodeKind::Element) {
        return;
    }
    let Some(tag) = dom.tag_name(node) else {
        return;
    };
    strip(dom, node);
    if ctx.rt.renderer.pool.borrow_mut().put(&tag, node) {
        trace!(%node, tag, "recycled");
    }
}
