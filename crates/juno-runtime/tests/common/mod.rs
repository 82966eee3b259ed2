//! Shared setup for the integration suites.

#![allow(dead_code)]

use std::rc::Rc;

use juno_async::LocalScheduler;
use juno_core::RenderMode;
use juno_dom::{DomBackend, MemoryDom, NodeId};
use juno_runtime::{Context, Node};
use juno_state::StateManager;
use serde_json::Value;

pub struct Page {
    pub dom: MemoryDom,
    pub scheduler: LocalScheduler,
    pub ctx: Context,
    pub root: NodeId,
}

impl Page {
    pub fn new(initial: Value) -> Self {
        let dom = MemoryDom::new();
        Self::over(dom.clone(), Rc::new(dom), initial, RenderMode::FineGrained)
    }

    pub fn batch(initial: Value) -> Self {
        let page = Self::new(initial);
        page.ctx.utils().set_render_mode(RenderMode::Batch);
        page
    }

    /// Render through `backend` while inspecting through `dom`. The two
    /// must share a tree.
    pub fn over(dom: MemoryDom, backend: Rc<dyn DomBackend>, initial: Value, mode: RenderMode) -> Self {
        let scheduler = LocalScheduler::new();
        let ctx = Context::new(StateManager::new(initial), backend, Rc::new(scheduler.clone()));
        ctx.utils().set_render_mode(mode);
        let root = dom.create_element("div");
        Self {
            dom,
            scheduler,
            ctx,
            root,
        }
    }

    pub fn mount(&self, node: &Node) -> Option<NodeId> {
        self.ctx.mount(self.root, node)
    }

    pub fn tick(&self) {
        self.scheduler.run_until_stalled();
    }

    pub fn html(&self) -> String {
        self.dom.inner_html(self.root)
    }
}
