//! The top-level orchestrator.
//!
//! [`App`] owns one [`Context`]: it builds the state manager from
//! [`AppOptions`], installs middleware, selects the render mode, registers
//! components (headless ones last), and mounts the root description.
//!
//! # Failure Modes
//!
//! | Failure | Result |
//! |---------|--------|
//! | anything escaping the renderer during [`App::mount`] | container replaced by a full-page error block |
//! | container unknown to the backend | mount returns `None`, logged |

use std::cell::Cell;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::rc::Rc;

use juno_async::Scheduler;
use juno_dom::{DomBackend, NodeId};
use juno_runtime::{Context, Node};
use juno_state::StateManager;
use serde_json::Value;
use tracing::{debug, error, info};

use crate::options::AppOptions;

/// Class of the block shown when mounting fails outright.
pub const FATAL_ERROR_CLASS: &str = "juno-fatal-error";

/// A running application.
pub struct App {
    ctx: Context,
    container: Cell<Option<NodeId>>,
    root: Cell<Option<NodeId>>,
}

impl App {
    /// Build an application over `dom`, running async work on `scheduler`.
    pub fn new(options: AppOptions, dom: Rc<dyn DomBackend>, scheduler: Rc<dyn Scheduler>) -> Self {
        let AppOptions {
            states,
            middleware,
            render_mode,
            components,
            headless,
            log_level: _,
        } = options;

        let state = StateManager::new(Value::Object(states));
        for middleware in middleware {
            state.use_shared_middleware(middleware);
        }
        let ctx = Context::new(state, dom, scheduler);
        ctx.utils().set_render_mode(render_mode);

        let registry = ctx.components();
        for (name, component) in components {
            registry.register_shared(&name, component);
        }
        for (name, component, options) in headless {
            registry.register_headless_shared(&name, component, options);
        }
        info!(mode = %render_mode, "juno app created");
        Self {
            ctx,
            container: Cell::new(None),
            root: Cell::new(None),
        }
    }

    /// In the current page, with [`WebDom`](juno_web::WebDom) and
    /// [`WasmScheduler`](juno_web::WasmScheduler). Installs console logging
    /// when the options carry a log level.
    ///
    /// # Errors
    ///
    /// [`WebError`](juno_web::WebError) outside a browser page.
    #[cfg(feature = "web")]
    pub fn in_browser(options: AppOptions) -> Result<Self, juno_web::WebError> {
        if let Some(level) = options.log_level() {
            if let Err(err) = juno_web::console::init(level) {
                tracing::warn!(%err, "console logging not installed");
            }
        }
        let dom = juno_web::WebDom::new()?;
        Ok(Self::new(options, Rc::new(dom), Rc::new(juno_web::WasmScheduler)))
    }

    #[must_use]
    pub fn context(&self) -> &Context {
        &self.ctx
    }

    /// The node produced by the last successful [`mount`](Self::mount).
    #[must_use]
    pub fn root(&self) -> Option<NodeId> {
        self.root.get()
    }

    /// Replace the contents of `container` with `node`.
    ///
    /// The renderer already turns failures into inline error nodes; a panic
    /// that still escapes replaces the whole container with an error block.
    pub fn mount(&self, container: NodeId, node: &Node) -> Option<NodeId> {
        let outcome = catch_unwind(AssertUnwindSafe(|| self.ctx.utils().force_render(container, node)));
        let mounted = match outcome {
            Ok(mounted) => mounted,
            Err(payload) => {
                let message = panic_message(&*payload);
                error!(%message, %container, "mount panicked");
                self.show_fatal(container, &message);
                None
            }
        };
        self.container.set(Some(container));
        self.root.set(mounted);
        debug!(%container, root = ?mounted, "mounted");
        mounted
    }

    /// Mount, then call `on_ready` once every async value started by the
    /// mount (and anything those start in turn) has settled.
    pub fn hydrate(&self, container: NodeId, node: &Node, on_ready: impl FnOnce() + 'static) -> Option<NodeId> {
        let resolver = self.ctx.resolver().clone();
        resolver.start_tracking();
        let mounted = self.mount(container, node);
        let done = resolver.clone();
        resolver
            .on_all_complete(move || {
                done.stop_tracking();
                debug!("hydration complete");
                on_ready();
            })
            .detach();
        mounted
    }

    /// Tear down whatever [`mount`](Self::mount) produced and empty the
    /// container.
    pub fn unmount(&self) {
        self.root.set(None);
        if let Some(container) = self.container.take() {
            self.clear(container);
        }
    }

    fn clear(&self, container: NodeId) {
        let dom = self.ctx.dom();
        for child in dom.children(container) {
            self.ctx.cleanup(child);
        }
        dom.clear_children(container);
    }

    fn show_fatal(&self, container: NodeId, message: &str) {
        self.clear(container);
        let dom = self.ctx.dom();
        let block = dom.create_element("div");
        dom.set_attribute(block, "class", FATAL_ERROR_CLASS);
        dom.set_attribute(block, "role", "alert");
        dom.set_text_content(block, &format!("Application failed to render: {message}"));
        if let Err(err) = dom.append_child(container, block) {
            error!(%err, "could not show the error block");
        }
    }
}

impl fmt::Debug for App {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("App")
            .field("root", &self.root.get())
            .field("render_mode", &self.ctx.utils().render_mode())
            .finish_non_exhaustive()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_owned())
}
