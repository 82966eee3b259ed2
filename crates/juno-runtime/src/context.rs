//! The shared root object.
//!
//! A [`Context`] owns every registry the engine needs (state, components,
//! headless instances, renderer side tables, caches) so that nothing lives
//! in a global. It is a cheap `Rc` clone and is handed to every component.
//!
//! Internals that are stored inside those registries (reactive bindings,
//! scheduled tasks) hold a [`WeakContext`] instead, so dropping the last
//! `Context` tears the whole engine down.

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::rc::{Rc, Weak};

use juno_async::{AsyncResolver, Deferred, Scheduler, TtlCache};
use juno_core::RenderMode;
use juno_dom::{DomBackend, NodeId};
use juno_state::{SetOutcome, StateChange, StateManager, Subscription};
use serde_json::Value;

use crate::component::{self, ComponentContext, ComponentFn, ComponentManager, ComponentOutput, InstanceInfo};
use crate::error::ComponentError;
use crate::headless::{HeadlessFn, HeadlessManager, HeadlessOptions, HeadlessOutput, HeadlessStatus};
use crate::node::Node;
use crate::props::Props;
use crate::renderer::{self, BindingStatus, RendererState};

pub(crate) struct Runtime {
    pub(crate) state: StateManager,
    pub(crate) resolver: AsyncResolver,
    pub(crate) dom: Rc<dyn DomBackend>,
    pub(crate) components: RefCell<ComponentManager>,
    pub(crate) headless: RefCell<HeadlessManager>,
    pub(crate) renderer: RendererState,
    pub(crate) props_cache: RefCell<TtlCache<Props>>,
}

/// Handle on one engine instance.
#[derive(Clone)]
pub struct Context {
    pub(crate) rt: Rc<Runtime>,
}

/// Non-owning [`Context`].
#[derive(Clone)]
pub struct WeakContext {
    rt: Weak<Runtime>,
}

impl WeakContext {
    #[must_use]
    pub fn upgrade(&self) -> Option<Context> {
        self.rt.upgrade().map(|rt| Context { rt })
    }
}

impl fmt::Debug for WeakContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakContext")
            .field("alive", &(self.rt.strong_count() > 0))
            .finish()
    }
}

impl Context {
    /// Build an engine over `state`, rendering into `dom` and running
    /// continuations on `scheduler`. Starts in fine-grained mode.
    pub fn new(state: StateManager, dom: Rc<dyn DomBackend>, scheduler: Rc<dyn Scheduler>) -> Self {
        Self {
            rt: Rc::new(Runtime {
                state,
                resolver: AsyncResolver::new(scheduler),
                dom,
                components: RefCell::new(ComponentManager::default()),
                headless: RefCell::new(HeadlessManager::default()),
                renderer: RendererState::default(),
                props_cache: RefCell::new(TtlCache::new()),
            }),
        }
    }

    #[must_use]
    pub fn downgrade(&self) -> WeakContext {
        WeakContext {
            rt: Rc::downgrade(&self.rt),
        }
    }

    #[must_use]
    pub fn state(&self) -> &StateManager {
        &self.rt.state
    }

    #[must_use]
    pub fn dom(&self) -> &dyn DomBackend {
        &*self.rt.dom
    }

    #[must_use]
    pub fn resolver(&self) -> &AsyncResolver {
        &self.rt.resolver
    }

    #[must_use]
    pub fn scheduler(&self) -> Rc<dyn Scheduler> {
        self.rt.resolver.scheduler()
    }

    /// Run `future` in the background, counted by the resolver while a
    /// tracked pass is active.
    pub(crate) fn spawn_tracked(&self, future: impl Future<Output = ()> + 'static) {
        let job = Deferred::from_future(future);
        self.rt.resolver.track(&job);
        self.scheduler().spawn_local(Box::pin(async move {
            let _ = job.await;
        }));
    }

    // -----------------------------------------------------------------------
    // State
    // -----------------------------------------------------------------------

    #[must_use]
    pub fn get_state(&self, path: &str) -> Option<Value> {
        self.rt.state.get_state(path)
    }

    #[must_use]
    pub fn get_state_or(&self, path: &str, default: impl Into<Value>) -> Value {
        self.rt.state.get_state_or(path, default)
    }

    #[must_use]
    pub fn get_state_with(&self, path: &str, default: impl Into<Value>, track: bool) -> Value {
        self.rt.state.get_state_with(path, default, track)
    }

    pub fn set_state(&self, path: &str, value: impl Into<Value>) -> SetOutcome {
        self.rt.state.set_state(path, value)
    }

    pub fn set_state_with(&self, path: &str, value: impl Into<Value>, context: Value) -> SetOutcome {
        self.rt.state.set_state_with(path, value, context)
    }

    pub fn subscribe(&self, path: &str, callback: impl Fn(&StateChange) + 'static, hierarchical: bool) -> Subscription {
        self.rt.state.subscribe(path, callback, hierarchical)
    }

    pub fn subscribe_exact(&self, path: &str, callback: impl Fn(&StateChange) + 'static) -> Subscription {
        self.rt.state.subscribe_exact(path, callback)
    }

    pub fn execute_batch<R>(&self, f: impl FnOnce() -> R) -> R {
        self.rt.state.execute_batch(f)
    }

    pub async fn execute_batch_async<F: Future>(&self, future: F) -> F::Output {
        self.rt.state.execute_batch_async(future).await
    }

    // -----------------------------------------------------------------------
    // Rendering
    // -----------------------------------------------------------------------

    /// Render a description. `None` for empty descriptions; lists become
    /// fragments. Never fails: errors render as inline error nodes.
    pub fn render(&self, node: &Node) -> Option<NodeId> {
        renderer::render(self, node)
    }

    /// Render `node` and append it to `container`.
    pub fn mount(&self, container: NodeId, node: &Node) -> Option<NodeId> {
        renderer::mount(self, container, node)
    }

    /// Tear down bindings, listeners, and component instances under `node`.
    pub fn cleanup(&self, node: NodeId) {
        renderer::cleanup(self, node);
    }

    #[must_use]
    pub fn components(&self) -> Components<'_> {
        Components { ctx: self }
    }

    #[must_use]
    pub fn utils(&self) -> Utils<'_> {
        Utils { ctx: self }
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("render_mode", &self.rt.renderer.mode())
            .field("state", &self.rt.state)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Component registry view
// ---------------------------------------------------------------------------

/// Component and headless registration, from [`Context::components`].
#[derive(Clone, Copy)]
pub struct Components<'a> {
    ctx: &'a Context,
}

impl Components<'_> {
    /// Register (or replace) a component.
    pub fn register<F>(&self, name: &str, component: F)
    where
        F: Fn(&Props, &ComponentContext) -> Result<ComponentOutput, ComponentError> + 'static,
    {
        self.register_shared(name, Rc::new(component));
    }

    pub fn register_shared(&self, name: &str, component: ComponentFn) {
        self.ctx.rt.components.borrow_mut().register(name, component);
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<ComponentFn> {
        self.ctx.rt.components.borrow().get(name)
    }

    #[must_use]
    pub fn is_registered(&self, name: &str) -> bool {
        self.ctx.rt.components.borrow().get(name).is_some()
    }

    /// The instance backed by `node`, if any.
    #[must_use]
    pub fn instance_at(&self, node: NodeId) -> Option<InstanceInfo> {
        self.ctx.rt.components.borrow().info(node)
    }

    /// Typed api of the instance backed by `node`.
    #[must_use]
    pub fn instance_api<T: Any>(&self, node: NodeId) -> Option<Rc<T>> {
        self.ctx.rt.components.borrow().api(node)?.downcast::<T>().ok()
    }

    #[must_use]
    pub fn instance_count(&self) -> usize {
        self.ctx.rt.components.borrow().instance_count()
    }

    /// Replace the props of the instance backed by `node` and re-render it.
    /// Returns the node now backing the instance.
    pub fn update_instance(&self, node: NodeId, props: Props) -> Option<NodeId> {
        component::update_instance(self.ctx, node, props)
    }

    /// Register a headless component; initializes it immediately when
    /// `options.auto_init` is set.
    pub fn register_headless<F>(&self, name: &str, component: F, options: HeadlessOptions)
    where
        F: Fn(&ComponentContext) -> Result<HeadlessOutput, ComponentError> + 'static,
    {
        self.register_headless_shared(name, Rc::new(component), options);
    }

    pub fn register_headless_shared(&self, name: &str, component: HeadlessFn, options: HeadlessOptions) {
        crate::headless::register(self.ctx, name, component, options);
    }

    #[must_use]
    pub fn get_headless(&self, name: &str) -> Option<HeadlessStatus> {
        self.ctx.rt.headless.borrow().status_of(name)
    }

    /// Initialize `name` unless it already is.
    pub fn init_headless(&self, name: &str) -> Result<(), ComponentError> {
        crate::headless::init(self.ctx, name)
    }

    /// Tear down and initialize `name` again.
    pub fn reinit_headless(&self, name: &str) -> Result<(), ComponentError> {
        crate::headless::reinit(self.ctx, name)
    }

    /// Typed api of an initialized headless component.
    #[must_use]
    pub fn headless_api<T: Any>(&self, name: &str) -> Option<Rc<T>> {
        self.ctx.rt.headless.borrow().api(name)?.downcast::<T>().ok()
    }

    /// Every initialized headless api, by name.
    #[must_use]
    pub fn all_headless_apis(&self) -> Vec<(String, Rc<dyn Any>)> {
        self.ctx.rt.headless.borrow().all_apis()
    }
}

impl fmt::Debug for Components<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Components").finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Utilities view
// ---------------------------------------------------------------------------

/// Rendering utilities, from [`Context::utils`].
#[derive(Clone, Copy)]
pub struct Utils<'a> {
    ctx: &'a Context,
}

impl Utils<'_> {
    pub fn render(&self, node: &Node) -> Option<NodeId> {
        self.ctx.render(node)
    }

    pub fn cleanup(&self, node: NodeId) {
        self.ctx.cleanup(node);
    }

    /// Tear down everything inside `container` and render `node` into it
    /// from scratch.
    pub fn force_render(&self, container: NodeId, node: &Node) -> Option<NodeId> {
        renderer::force_render(self.ctx, container, node)
    }

    #[must_use]
    pub fn render_mode(&self) -> RenderMode {
        self.ctx.rt.renderer.mode()
    }

    /// Switch strategy for subsequent renders and binding re-runs.
    pub fn set_render_mode(&self, mode: RenderMode) {
        self.ctx.rt.renderer.set_mode(mode);
    }

    /// Status of each reactive binding on `node`.
    #[must_use]
    pub fn binding_statuses(&self, node: NodeId) -> Vec<BindingStatus> {
        renderer::binding_statuses(self.ctx, node)
    }

    /// State paths the bindings on `node` currently read, sorted.
    #[must_use]
    pub fn binding_dependencies(&self, node: NodeId) -> Vec<String> {
        renderer::binding_dependencies(self.ctx, node)
    }

    #[must_use]
    pub fn headless_status(&self) -> Vec<HeadlessStatus> {
        self.ctx.rt.headless.borrow().status()
    }
}

impl fmt::Debug for Utils<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Utils").finish_non_exhaustive()
    }
}
