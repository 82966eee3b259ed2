//! Component instantiation and instance lifecycle.
//!
//! A component is a function from [`Props`] to a [`ComponentOutput`]. The
//! manager turns that output into a DOM node, remembers which instance a
//! node belongs to, and runs lifecycle hooks around it.
//!
//! # Instantiation
//!
//! ```text
//! props deferred? ──yes──▶ placeholder ── props resolve ──▶ instantiate ──▶ swap
//!       │no
//!       ▼
//! call component ──▶ Tree(node)        ──▶ render
//!                    Instance(hooks)   ──▶ render(), on_mount next tick
//!                    Pending(future)   ──▶ placeholder ── settles ──▶ classify ──▶ swap
//! ```
//!
//! # Invariants
//!
//! 1. Every live instance is keyed by exactly one node: the node currently
//!    representing it in the tree (a placeholder while it is pending).
//! 2. Local state for instance `id` lives under `__local.<id>` and is removed
//!    when the instance is cleaned up.
//! 3. A late async completion whose placeholder was cleaned up or detached
//!    does nothing visible.
//! 4. Component code never runs inside a dependency-tracking scope.
//!
//! # Failure Modes
//!
//! | Failure | Result |
//! |---------|--------|
//! | component returns `Err` or panics | logged, inline error node |
//! | deferred prop rejects | prop becomes [`Prop::Failed`](crate::Prop::Failed) |
//! | `on_mount`/`on_update`/`on_unmount` panics | logged, ignored |
//! | async `on_unmount` rejects | logged at `warn` |

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::ops::Deref;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::rc::Rc;

use ahash::AHashMap;
use futures::FutureExt;
use futures::future::LocalBoxFuture;
use juno_async::{Deferred, MaybeAsync};
use juno_core::stable_stringify;
use juno_dom::{NodeId, NodeKind};
use juno_state::StateManager;
use serde_json::Value;
use tracing::{debug, error, trace, warn};

use crate::context::Context;
use crate::error::{ComponentError, panic_message};
use crate::node::Node;
use crate::props::Props;
use crate::renderer;

/// Prefix under which instance-local state is stored.
pub const LOCAL_STATE_ROOT: &str = "__local";

/// A registered component.
pub type ComponentFn = Rc<dyn Fn(&Props, &ComponentContext) -> Result<ComponentOutput, ComponentError>>;

/// Render function of a stateful instance.
pub type RenderFn = Rc<dyn Fn() -> Result<MaybeAsync<Node>, ComponentError>>;

type MountHook = Rc<dyn Fn()>;
type UpdateHook = Rc<dyn Fn(&Props, &Props)>;
type UnmountHook = Rc<dyn Fn() -> MaybeAsync<()>>;

// ---------------------------------------------------------------------------
// Component output
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
pub struct LifecycleHooks {
    on_mount: Option<MountHook>,
    on_update: Option<UpdateHook>,
    on_unmount: Option<UnmountHook>,
}

impl LifecycleHooks {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.on_mount.is_none() && self.on_update.is_none() && self.on_unmount.is_none()
    }
}

/// A stateful instance: a render function plus optional hooks and api.
#[derive(Clone)]
pub struct Lifecycle {
    render: RenderFn,
    hooks: LifecycleHooks,
    api: Option<Rc<dyn Any>>,
    loading: Option<Node>,
}

impl Lifecycle {
    /// Instance whose render function always succeeds synchronously.
    pub fn new(render: impl Fn() -> Node + 'static) -> Self {
        Self::from_render(Rc::new(move || Ok(MaybeAsync::Ready(render()))))
    }

    /// Instance whose render function may fail.
    pub fn fallible(render: impl Fn() -> Result<Node, ComponentError> + 'static) -> Self {
        Self::from_render(Rc::new(move || render().map(MaybeAsync::Ready)))
    }

    /// Instance whose render function resolves later.
    pub fn deferred(render: impl Fn() -> Deferred<Node> + 'static) -> Self {
        Self::from_render(Rc::new(move || Ok(MaybeAsync::Pending(render()))))
    }

    #[must_use]
    pub fn from_render(render: RenderFn) -> Self {
        Self {
            render,
            hooks: LifecycleHooks::default(),
            api: None,
            loading: None,
        }
    }

    /// Runs once, on the tick after the instance's node is attached.
    #[must_use]
    pub fn on_mount(mut self, hook: impl Fn() + 'static) -> Self {
        self.hooks.on_mount = Some(Rc::new(hook));
        self
    }

    /// Runs with `(old, new)` props before each re-render.
    #[must_use]
    pub fn on_update(mut self, hook: impl Fn(&Props, &Props) + 'static) -> Self {
        self.hooks.on_update = Some(Rc::new(hook));
        self
    }

    #[must_use]
    pub fn on_unmount(mut self, hook: impl Fn() + 'static) -> Self {
        self.hooks.on_unmount = Some(Rc::new(move || {
            hook();
            MaybeAsync::Ready(())
        }));
        self
    }

    /// Teardown that finishes later; a rejection is logged.
    #[must_use]
    pub fn on_unmount_async(mut self, hook: impl Fn() -> Deferred<()> + 'static) -> Self {
        self.hooks.on_unmount = Some(Rc::new(move || MaybeAsync::Pending(hook())));
        self
    }

    /// Value exposed through [`Components::instance_api`](crate::Components::instance_api).
    #[must_use]
    pub fn api<T: Any>(mut self, api: T) -> Self {
        self.api = Some(Rc::new(api));
        self
    }

    /// Shown while an async render is pending.
    #[must_use]
    pub fn loading(mut self, node: Node) -> Self {
        self.loading = Some(node);
        self
    }

    #[must_use]
    pub fn hooks(&self) -> &LifecycleHooks {
        &self.hooks
    }
}

impl fmt::Debug for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lifecycle")
            .field("on_mount", &self.hooks.on_mount.is_some())
            .field("on_update", &self.hooks.on_update.is_some())
            .field("on_unmount", &self.hooks.on_unmount.is_some())
            .field("api", &self.api.is_some())
            .finish_non_exhaustive()
    }
}

/// What a component function returns.
pub enum ComponentOutput {
    /// A plain description, rendered directly.
    Tree(Node),
    /// A stateful instance.
    Instance(Lifecycle),
    /// The output arrives later; `loading` replaces the default placeholder.
    Pending {
        future: LocalBoxFuture<'static, Result<ComponentOutput, ComponentError>>,
        loading: Option<Node>,
    },
}

impl ComponentOutput {
    pub fn pending(future: impl Future<Output = Result<ComponentOutput, ComponentError>> + 'static) -> Self {
        Self::Pending {
            future: future.boxed_local(),
            loading: None,
        }
    }

    /// Replace the loading indicator of a pending output. No effect on
    /// other variants.
    #[must_use]
    pub fn with_loading(self, node: Node) -> Self {
        match self {
            Self::Pending { future, .. } => Self::Pending {
                future,
                loading: Some(node),
            },
            other => other,
        }
    }
}

impl From<Node> for ComponentOutput {
    fn from(node: Node) -> Self {
        Self::Tree(node)
    }
}

impl From<Lifecycle> for ComponentOutput {
    fn from(lifecycle: Lifecycle) -> Self {
        Self::Instance(lifecycle)
    }
}

impl fmt::Debug for ComponentOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tree(node) => f.debug_tuple("Tree").field(node).finish(),
            Self::Instance(lifecycle) => f.debug_tuple("Instance").field(lifecycle).finish(),
            Self::Pending { loading, .. } => f
                .debug_struct("Pending")
                .field("loading", loading)
                .finish_non_exhaustive(),
        }
    }
}

// ---------------------------------------------------------------------------
// Component context and local state
// ---------------------------------------------------------------------------

/// What a component function receives besides its props. Derefs to
/// [`Context`].
#[derive(Clone)]
pub struct ComponentContext {
    ctx: Context,
    id: String,
    local_paths: Rc<RefCell<Vec<String>>>,
}

impl ComponentContext {
    pub(crate) fn new(ctx: &Context, id: String, local_paths: Rc<RefCell<Vec<String>>>) -> Self {
        Self {
            ctx: ctx.clone(),
            id,
            local_paths,
        }
    }

    /// Instance id, `"<name>_<n>"`.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn context(&self) -> &Context {
        &self.ctx
    }

    /// State private to this instance. The first call for `key` writes
    /// `initial`; later calls (including re-renders) keep the current value.
    pub fn new_state(&self, key: &str, initial: impl Into<Value>) -> LocalState {
        let path = format!("{LOCAL_STATE_ROOT}.{}.{key}", self.id);
        let initial = initial.into();
        let state = self.ctx.state().clone();
        if state.peek_state(&path).is_none() {
            state.set_state(&path, initial.clone());
        }
        {
            let mut paths = self.local_paths.borrow_mut();
            if !paths.contains(&path) {
                paths.push(path.clone());
            }
        }
        LocalState { path, initial, state }
    }
}

impl Deref for ComponentContext {
    type Target = Context;

    fn deref(&self) -> &Context {
        &self.ctx
    }
}

impl fmt::Debug for ComponentContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentContext").field("id", &self.id).finish()
    }
}

/// Getter/setter pair over one instance-local path.
#[derive(Clone)]
pub struct LocalState {
    path: String,
    initial: Value,
    state: StateManager,
}

impl LocalState {
    /// Current value; tracked like any state read.
    #[must_use]
    pub fn get(&self) -> Value {
        self.state.get_state_or(&self.path, self.initial.clone())
    }

    pub fn set(&self, value: impl Into<Value>) {
        self.state.set_state(&self.path, value);
    }

    /// Write `f(current)`. The read is not tracked.
    pub fn update(&self, f: impl FnOnce(Value) -> Value) {
        let current = self.state.peek_state(&self.path).unwrap_or_else(|| self.initial.clone());
        self.set(f(current));
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl fmt::Debug for LocalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalState").field("path", &self.path).finish()
    }
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

/// Public view of a live instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceInfo {
    pub id: String,
    pub name: String,
    pub has_api: bool,
}

struct Instance {
    id: String,
    name: String,
    component: ComponentFn,
    props: Props,
    lifecycle: Option<Lifecycle>,
    local_paths: Rc<RefCell<Vec<String>>>,
    mount_scheduled: bool,
    mounted: bool,
}

impl Instance {
    fn context(&self, ctx: &Context) -> ComponentContext {
        ComponentContext::new(ctx, self.id.clone(), Rc::clone(&self.local_paths))
    }
}

#[derive(Default)]
pub(crate) struct ComponentManager {
    registry: AHashMap<String, ComponentFn>,
    ordinals: AHashMap<String, u64>,
    instances: AHashMap<NodeId, Instance>,
}

impl ComponentManager {
    pub(crate) fn register(&mut self, name: &str, component: ComponentFn) {
        if self.registry.insert(name.to_owned(), component).is_some() {
            debug!(component = name, "component replaced");
        }
    }

    pub(crate) fn get(&self, name: &str) -> Option<ComponentFn> {
        self.registry.get(name).cloned()
    }

    fn next_id(&mut self, name: &str) -> String {
        let ordinal = self.ordinals.entry(name.to_owned()).or_insert(0);
        *ordinal += 1;
        format!("{name}_{ordinal}")
    }

    fn insert(&mut self, node: NodeId, instance: Instance) {
        self.instances.insert(node, instance);
    }

    fn take(&mut self, node: NodeId) -> Option<Instance> {
        self.instances.remove(&node)
    }

    pub(crate) fn info(&self, node: NodeId) -> Option<InstanceInfo> {
        self.instances.get(&node).map(|i| InstanceInfo {
            id: i.id.clone(),
            name: i.name.clone(),
            has_api: i.lifecycle.as_ref().is_some_and(|lc| lc.api.is_some()),
        })
    }

    pub(crate) fn api(&self, node: NodeId) -> Option<Rc<dyn Any>> {
        self.instances.get(&node)?.lifecycle.as_ref()?.api.clone()
    }

    fn find_by_id(&self, id: &str) -> Option<NodeId> {
        self.instances
            .iter()
            .find_map(|(node, i)| (i.id == id).then_some(*node))
    }

    fn mount_hook(&mut self, id: &str) -> Option<MountHook> {
        let node = self.find_by_id(id)?;
        let instance = self.instances.get_mut(&node)?;
        if instance.mounted {
            return None;
        }
        instance.mounted = true;
        instance.lifecycle.as_ref()?.hooks.on_mount.clone()
    }

    pub(crate) fn instance_count(&self) -> usize {
        self.instances.len()
    }
}

// ---------------------------------------------------------------------------
// Instantiation
// ---------------------------------------------------------------------------

/// Build the node for component `name`. Never fails: errors become inline
/// error nodes.
pub(crate) fn instantiate(ctx: &Context, name: &str, component: ComponentFn, props: &Props) -> NodeId {
    ctx.state().untracked(|| {
        if props.has_deferred() {
            instantiate_with_async_props(ctx, name, component, props.clone())
        } else {
            instantiate_now(ctx, name, component, props.clone())
        }
    })
}

fn props_cache_key(name: &str, props: &Props) -> String {
    format!("props:{name}:{}", stable_stringify(&props.fingerprint()))
}

fn resolve_props(ctx: &Context, name: &str, props: Props) -> Deferred<Props> {
    let key = props_cache_key(name, &props);
    ctx.rt
        .props_cache
        .borrow_mut()
        .get_or_insert_with(&key, move || Deferred::from_future(props.resolved()))
}

fn instantiate_with_async_props(ctx: &Context, name: &str, component: ComponentFn, props: Props) -> NodeId {
    let placeholder = renderer::placeholder(ctx, None);
    let incarnation = ctx.rt.renderer.incarnation(placeholder);
    let resolved = resolve_props(ctx, name, props);
    let weak = ctx.downgrade();
    let name = name.to_owned();
    trace!(component = %name, %placeholder, "waiting for async props");
    ctx.spawn_tracked(async move {
        let result = resolved.await;
        let Some(ctx) = weak.upgrade() else {
            return;
        };
        if ctx.rt.renderer.incarnation(placeholder) != incarnation {
            trace!(component = %name, "placeholder cleaned up before props resolved");
            return;
        }
        if ctx.dom().parent(placeholder).is_none() {
            trace!(component = %name, "placeholder detached before props resolved");
            return;
        }
        let node = match result {
            Ok(props) => ctx.state().untracked(|| instantiate_now(&ctx, &name, component, props)),
            Err(err) => report(&ctx, &name, &ComponentError::from(err)),
        };
        swap(&ctx, placeholder, node);
    });
    placeholder
}

fn instantiate_now(ctx: &Context, name: &str, component: ComponentFn, props: Props) -> NodeId {
    let id = ctx.rt.components.borrow_mut().next_id(name);
    let instance = Instance {
        id,
        name: name.to_owned(),
        component,
        props,
        lifecycle: None,
        local_paths: Rc::new(RefCell::new(Vec::new())),
        mount_scheduled: false,
        mounted: false,
    };
    debug!(component = name, id = %instance.id, "instantiate");
    let output = call_component(ctx, &instance);
    settle_output(ctx, instance, output)
}

fn call_component(ctx: &Context, instance: &Instance) -> Result<ComponentOutput, ComponentError> {
    let cctx = instance.context(ctx);
    let component = Rc::clone(&instance.component);
    catch_unwind(AssertUnwindSafe(|| component(&instance.props, &cctx)))
        .unwrap_or_else(|payload| Err(ComponentError::Panicked(panic_message(&*payload))))
}

fn call_render(lifecycle: &Lifecycle) -> Result<MaybeAsync<Node>, ComponentError> {
    let render = Rc::clone(&lifecycle.render);
    catch_unwind(AssertUnwindSafe(|| render()))
        .unwrap_or_else(|payload| Err(ComponentError::Panicked(panic_message(&*payload))))
}

/// Turn a component's result into the node that represents it.
fn settle_output(ctx: &Context, mut instance: Instance, output: Result<ComponentOutput, ComponentError>) -> NodeId {
    match output {
        Err(err) => fail(ctx, &instance, &err),
        Ok(ComponentOutput::Tree(node)) => attach(ctx, instance, MaybeAsync::Ready(node), None),
        Ok(ComponentOutput::Instance(lifecycle)) => {
            let rendered = call_render(&lifecycle);
            let loading = lifecycle.loading.clone();
            instance.lifecycle = Some(lifecycle);
            match rendered {
                Ok(rendered) => attach(ctx, instance, rendered, loading.as_ref()),
                Err(err) => fail(ctx, &instance, &err),
            }
        }
        Ok(ComponentOutput::Pending { future, loading }) => {
            let placeholder = renderer::placeholder(ctx, loading.as_ref());
            ctx.rt.components.borrow_mut().insert(placeholder, instance);
            let weak = ctx.downgrade();
            ctx.spawn_tracked(async move {
                let output = future.await;
                let Some(ctx) = weak.upgrade() else {
                    return;
                };
                let Some(instance) = ctx.rt.components.borrow_mut().take(placeholder) else {
                    trace!(%placeholder, "pending component was cleaned up");
                    return;
                };
                let node = ctx.state().untracked(|| settle_output(&ctx, instance, output));
                swap(&ctx, placeholder, node);
            });
            placeholder
        }
    }
}

/// Render `rendered`, key the instance by the resulting node, and schedule
/// `on_mount` the first time. Later attaches, including ones before that
/// tick, never schedule it again.
fn attach(ctx: &Context, mut instance: Instance, rendered: MaybeAsync<Node>, loading: Option<&Node>) -> NodeId {
    match rendered {
        MaybeAsync::Ready(node) => {
            let root = render_root(ctx, &node);
            let announce = !instance.mount_scheduled
                && instance
                    .lifecycle
                    .as_ref()
                    .is_some_and(|lc| lc.hooks.on_mount.is_some());
            instance.mount_scheduled |= announce;
            let id = instance.id.clone();
            ctx.rt.components.borrow_mut().insert(root, instance);
            if announce {
                schedule_mount(ctx, id);
            }
            root
        }
        MaybeAsync::Pending(deferred) => {
            let placeholder = renderer::placeholder(ctx, loading);
            ctx.rt.components.borrow_mut().insert(placeholder, instance);
            let weak = ctx.downgrade();
            ctx.spawn_tracked(async move {
                let result = deferred.await;
                let Some(ctx) = weak.upgrade() else {
                    return;
                };
                let Some(instance) = ctx.rt.components.borrow_mut().take(placeholder) else {
                    trace!(%placeholder, "instance was cleaned up before its render settled");
                    return;
                };
                let node = match result {
                    Ok(node) => ctx
                        .state()
                        .untracked(|| attach(&ctx, instance, MaybeAsync::Ready(node), None)),
                    Err(err) => fail(&ctx, &instance, &ComponentError::from(err)),
                };
                swap(&ctx, placeholder, node);
            });
            placeholder
        }
    }
}

/// Render a component's description to a single node. Empty output gets an
/// empty text anchor; a list is wrapped so the instance has one root.
fn render_root(ctx: &Context, node: &Node) -> NodeId {
    let dom = ctx.dom();
    let Some(rendered) = renderer::render(ctx, node) else {
        return dom.create_text("");
    };
    if dom.kind(rendered) != Some(NodeKind::Fragment) {
        return rendered;
    }
    let wrapper = dom.create_element("div");
    dom.set_style(wrapper, "display", "contents");
    if let Err(err) = dom.append_child(wrapper, rendered) {
        warn!(%err, "could not wrap multi-root component output");
    }
    wrapper
}

fn schedule_mount(ctx: &Context, id: String) {
    let weak = ctx.downgrade();
    ctx.scheduler().defer(Box::new(move || {
        let Some(ctx) = weak.upgrade() else {
            return;
        };
        let hook = ctx.rt.components.borrow_mut().mount_hook(&id);
        if let Some(hook) = hook {
            run_hook(&id, "on_mount", || hook());
        }
    }));
}

fn run_hook(id: &str, hook: &str, f: impl FnOnce()) {
    if let Err(payload) = catch_unwind(AssertUnwindSafe(f)) {
        error!(instance = id, hook, panic = %panic_message(&*payload), "lifecycle hook panicked");
    }
}

fn fail(ctx: &Context, instance: &Instance, err: &ComponentError) -> NodeId {
    drop_local_state(ctx, instance);
    report(ctx, &instance.name, err)
}

fn report(ctx: &Context, name: &str, err: &ComponentError) -> NodeId {
    error!(component = name, %err, "component failed");
    renderer::error_node(ctx, &format!("Component {name} failed: {err}"))
}

/// Put `node` where `placeholder` is. If the placeholder has left the
/// tree, `node` is torn down instead.
fn swap(ctx: &Context, placeholder: NodeId, node: NodeId) {
    let dom = ctx.dom();
    match dom.parent(placeholder) {
        Some(parent) => {
            if let Err(err) = dom.replace_child(parent, node, placeholder) {
                warn!(%err, "could not swap placeholder");
                renderer::cleanup(ctx, node);
                return;
            }
            renderer::cleanup(ctx, placeholder);
        }
        None => {
            trace!(%placeholder, "placeholder detached; discarding late result");
            renderer::cleanup(ctx, node);
        }
    }
}

// ---------------------------------------------------------------------------
// Update and cleanup
// ---------------------------------------------------------------------------

/// Give the instance at `node` new props and re-render it in place.
/// Returns the node that represents the instance afterwards.
pub(crate) fn update_instance(ctx: &Context, node: NodeId, props: Props) -> Option<NodeId> {
    {
        let components = ctx.rt.components.borrow();
        let instance = components.instances.get(&node)?;
        if instance.props.same_as(&props) {
            return Some(node);
        }
    }

    if props.has_deferred() {
        let name = ctx.rt.components.borrow().instances.get(&node)?.name.clone();
        let resolved = resolve_props(ctx, &name, props);
        let weak = ctx.downgrade();
        ctx.spawn_tracked(async move {
            let Ok(props) = resolved.await else {
                return;
            };
            if let Some(ctx) = weak.upgrade() {
                update_instance(&ctx, node, props);
            }
        });
        return Some(node);
    }

    let mut instance = ctx.rt.components.borrow_mut().take(node)?;
    let old = std::mem::replace(&mut instance.props, props);
    if let Some(hook) = instance.lifecycle.as_ref().and_then(|lc| lc.hooks.on_update.clone()) {
        let new = instance.props.clone();
        run_hook(&instance.id, "on_update", || hook(&old, &new));
    }
    debug!(instance = %instance.id, "update");

    let replacement = ctx.state().untracked(|| match instance.lifecycle.clone() {
        Some(lifecycle) => match call_render(&lifecycle) {
            Ok(rendered) => attach(ctx, instance, rendered, lifecycle.loading.as_ref()),
            Err(err) => fail(ctx, &instance, &err),
        },
        None => {
            let output = call_component(ctx, &instance);
            settle_output(ctx, instance, output)
        }
    });

    let dom = ctx.dom();
    if let Some(parent) = dom.parent(node) {
        if let Err(err) = dom.replace_child(parent, replacement, node) {
            warn!(%err, "could not replace updated instance");
        }
    }
    renderer::cleanup(ctx, node);
    Some(replacement)
}

/// Run `on_unmount` for the instance at `node` and drop its local state.
/// No-op for nodes that do not represent an instance.
pub(crate) fn cleanup(ctx: &Context, node: NodeId) {
    let Some(instance) = ctx.rt.components.borrow_mut().take(node) else {
        return;
    };
    debug!(instance = %instance.id, "unmount");
    if let Some(hook) = instance.lifecycle.as_ref().and_then(|lc| lc.hooks.on_unmount.clone()) {
        match catch_unwind(AssertUnwindSafe(|| hook())) {
            Ok(MaybeAsync::Ready(())) => {}
            Ok(MaybeAsync::Pending(done)) => {
                let id = instance.id.clone();
                ctx.spawn_tracked(async move {
                    if let Err(err) = done.await {
                        warn!(instance = %id, %err, "async on_unmount failed");
                    }
                });
            }
            Err(payload) => {
                error!(instance = %instance.id, panic = %panic_message(&*payload), "on_unmount panicked");
            }
        }
    }
    drop_local_state(ctx, &instance);
}

fn drop_local_state(ctx: &Context, instance: &Instance) {
    let paths = std::mem::take(&mut *instance.local_paths.borrow_mut());
    let state = ctx.state();
    for path in &paths {
        state.remove_state(path);
    }
    state.remove_state(&format!("{LOCAL_STATE_ROOT}.{}", instance.id));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestHarness;
    use juno_dom::DomBackend;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::cell::Cell;

    #[test]
    fn ids_are_per_name_and_monotonic() {
        let mut manager = ComponentManager::default();
        assert_eq!(manager.next_id("Card"), "Card_1");
        assert_eq!(manager.next_id("Card"), "Card_2");
        assert_eq!(manager.next_id("List"), "List_1");
    }

    #[test]
    fn local_state_is_initialized_once_and_removed_on_cleanup() {
        let h = TestHarness::new(json!({}));
        h.ctx.components().register("Counter", |_props, cx| {
            let count = cx.new_state("count", 0);
            let again = cx.new_state("count", 99);
            assert_eq!(again.get(), json!(0));
            let shown = count.clone();
            Ok(Node::el("span", Props::new().text_fn(move || shown.get())).into())
        });
        let node = h.mount(&Node::el("Counter", Props::new())).unwrap();
        assert_eq!(h.ctx.get_state("__local.Counter_1.count"), Some(json!(0)));
        h.ctx.set_state("__local.Counter_1.count", 4);
        assert_eq!(h.dom.text_content(node), "4");

        h.ctx.cleanup(node);
        assert_eq!(h.ctx.get_state("__local.Counter_1"), None);
        assert_eq!(h.ctx.components().instance_count(), 0);
    }

    #[test]
    fn failing_component_renders_error_node() {
        let h = TestHarness::new(json!({}));
        h.ctx
            .components()
            .register("Broken", |_props, _cx| Err(ComponentError::failed("no data")));
        h.ctx.components().register("Panicky", |_props, _cx| panic!("boom"));
        let a = h.mount(&Node::el("Broken", Props::new())).unwrap();
        let b = h.mount(&Node::el("Panicky", Props::new())).unwrap();
        assert!(h.dom.has_class(a, "juno-error"));
        assert!(h.dom.text_content(a).contains("no data"));
        assert!(h.dom.text_content(b).contains("boom"));
    }

    #[test]
    fn on_mount_runs_on_next_tick_once() {
        let h = TestHarness::new(json!({}));
        let mounts = Rc::new(Cell::new(0));
        let seen = Rc::clone(&mounts);
        h.ctx.components().register("Widget", move |props, _cx| {
            let seen = Rc::clone(&seen);
            let label = props.value("label").cloned().unwrap_or_default();
            Ok(Lifecycle::new(move || Node::el("b", Props::new().text(label.clone())))
                .on_mount(move || seen.set(seen.get() + 1))
                .into())
        });
        let node = h.mount(&Node::el("Widget", Props::new().attr("label", "a"))).unwrap();
        assert_eq!(mounts.get(), 0);
        h.tick();
        assert_eq!(mounts.get(), 1);

        let updated = h
            .ctx
            .components()
            .update_instance(node, Props::new().attr("label", "b"))
            .unwrap();
        h.tick();
        assert_eq!(mounts.get(), 1);
        assert_eq!(h.dom.text_content(updated), "a");
    }

    #[test]
    fn update_before_first_tick_mounts_once() {
        let h = TestHarness::new(json!({}));
        let mounts = Rc::new(Cell::new(0));
        let seen = Rc::clone(&mounts);
        h.ctx.components().register("Widget", move |_props, _cx| {
            let seen = Rc::clone(&seen);
            Ok(Lifecycle::new(|| Node::el("b", Props::new()))
                .on_mount(move || seen.set(seen.get() + 1))
                .into())
        });
        let node = h.mount(&Node::el("Widget", Props::new().attr("n", 1))).unwrap();
        let node = h
            .ctx
            .components()
            .update_instance(node, Props::new().attr("n", 2))
            .unwrap();
        h.ctx.components().update_instance(node, Props::new().attr("n", 3));
        h.tick();
        assert_eq!(mounts.get(), 1);
        h.tick();
        assert_eq!(mounts.get(), 1);
    }

    #[test]
    fn cleaned_up_props_placeholder_stays_put() {
        let h = TestHarness::new(json!({}));
        let built = Rc::new(Cell::new(0));
        let count = Rc::clone(&built);
        h.ctx.components().register("Card", move |props, _cx| {
            count.set(count.get() + 1);
            let title = props.value("title").cloned().unwrap_or_default();
            Ok(Node::el("h2", Props::new().text(title)).into())
        });
        let (title, resolve) = Deferred::<Value>::pending();
        let placeholder = h
            .mount(&Node::el("Card", Props::new().deferred("title", title)))
            .unwrap();
        h.ctx.cleanup(placeholder);
        resolve.resolve(json!("late"));
        h.tick();

        assert_eq!(built.get(), 0);
        assert!(h.dom.parent(placeholder).is_some());
        assert_eq!(h.ctx.components().instance_count(), 0);
        assert!(!h.html().contains("late"));
    }

    #[test]
    fn pending_output_swaps_placeholder() {
        let h = TestHarness::new(json!({}));
        let (later, resolve) = Deferred::<Node>::pending();
        h.ctx.components().register("Slow", move |_props, _cx| {
            let later = later.clone();
            Ok(ComponentOutput::pending(async move {
                let node = later.await?;
                Ok(ComponentOutput::Tree(node))
            }))
        });
        let placeholder = h.mount(&Node::el("Slow", Props::new())).unwrap();
        assert_eq!(h.dom.get_attribute(placeholder, "aria-busy").as_deref(), Some("true"));
        resolve.resolve(Node::el("p", Props::new().text("done")));
        h.tick();
        assert_eq!(h.html(), "<p>done</p>");
        assert_eq!(h.ctx.components().instance_count(), 1);
    }

    #[test]
    fn cleaned_up_placeholder_ignores_late_result() {
        let h = TestHarness::new(json!({}));
        let (later, resolve) = Deferred::<Node>::pending();
        h.ctx.components().register("Slow", move |_props, _cx| {
            let later = later.clone();
            Ok(ComponentOutput::pending(async move { Ok(ComponentOutput::Tree(later.await?)) }))
        });
        let placeholder = h.mount(&Node::el("Slow", Props::new())).unwrap();
        h.ctx.cleanup(placeholder);
        h.dom.detach(placeholder);
        resolve.resolve(Node::text("late"));
        h.tick();
        assert_eq!(h.html(), "");
        assert_eq!(h.ctx.components().instance_count(), 0);
    }

    #[test]
    fn async_unmount_rejection_is_tolerated() {
        let h = TestHarness::new(json!({}));
        h.ctx.components().register("Fragile", |_props, _cx| {
            Ok(Lifecycle::new(|| Node::text("x"))
                .on_unmount_async(|| Deferred::failed(juno_async::AsyncError::rejected("teardown")))
                .into())
        });
        let node = h.mount(&Node::el("Fragile", Props::new())).unwrap();
        h.ctx.cleanup(node);
        h.tick();
        assert_eq!(h.ctx.components().instance_count(), 0);
    }
}
