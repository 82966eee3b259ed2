//! In-memory harness for exercising the runtime without a browser.
//!
//! Available to this crate's tests and, with the `test-helpers` feature, to
//! other crates.

use std::rc::Rc;

use juno_async::LocalScheduler;
use juno_core::RenderMode;
use juno_dom::{DomBackend, MemoryDom, NodeId};
use juno_state::StateManager;
use serde_json::Value;

use crate::context::Context;
use crate::node::Node;

/// A [`Context`] over a [`MemoryDom`] and a [`LocalScheduler`], with a
/// `<div id="app">` root to mount into.
pub struct TestHarness {
    pub dom: MemoryDom,
    pub scheduler: LocalScheduler,
    pub ctx: Context,
    pub root: NodeId,
}

impl TestHarness {
    #[must_use]
    pub fn new(initial: Value) -> Self {
        Self::with_state(StateManager::new(initial))
    }

    #[must_use]
    pub fn with_mode(initial: Value, mode: RenderMode) -> Self {
        let harness = Self::new(initial);
        harness.ctx.utils().set_render_mode(mode);
        harness
    }

    #[must_use]
    pub fn with_state(state: StateManager) -> Self {
        let dom = MemoryDom::new();
        let scheduler = LocalScheduler::new();
        let ctx = Context::new(state, Rc::new(dom.clone()), Rc::new(scheduler.clone()));
        let root = dom.create_element("div");
        dom.set_attribute(root, "id", "app");
        Self {
            dom,
            scheduler,
            ctx,
            root,
        }
    }

    /// Render `node` and append it to the root.
    pub fn mount(&self, node: &Node) -> Option<NodeId> {
        self.ctx.mount(self.root, node)
    }

    /// Run every task that can make progress.
    pub fn tick(&self) {
        self.scheduler.run_until_stalled();
    }

    /// Markup inside the root.
    #[must_use]
    pub fn html(&self) -> String {
        self.dom.inner_html(self.root)
    }

    #[must_use]
    pub fn text(&self) -> String {
        self.dom.text_content(self.root)
    }
}

impl std::fmt::Debug for TestHarness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestHarness")
            .field("root", &self.root)
            .field("html", &self.html())
            .finish()
    }
}
