//! Reactive bindings.
//!
//! A binding ties one dynamic property of one node to the state paths its
//! closure reads. Each run evaluates the closure inside a tracking scope,
//! re-subscribes to exactly the paths read this time, and hands the result
//! to its sink.
//!
//! # State machine
//!
//! ```text
//! Uninitialized ──run──▶ Running ──ok──▶ Idle ──dependency fires──▶ Running
//!                           │                                          │
//!                           └──panic──▶ Error ◀────────────panic───────┘
//! ```
//!
//! # Invariants
//!
//! 1. After a successful run, the binding is subscribed to exactly the
//!    paths that run read. After a failed run it keeps its previous
//!    subscriptions plus any new ones, so it can recover.
//! 2. A binding never re-enters itself: a dependency firing while the
//!    binding is `Running` is ignored.
//! 3. An async result is applied only if no newer run started and the
//!    binding has not been disposed.
//! 4. A failed evaluation leaves the DOM as it was.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::rc::{Rc, Weak};

use juno_async::{AsyncError, Deferred};
use juno_dom::NodeId;
use juno_state::{Dependencies, Subscription};
use tracing::{error, trace};

use crate::context::{Context, WeakContext};
use crate::error::panic_message;
use crate::props::Dynamic;

/// Nested `Reactive` results are unwrapped at most this many times.
const MAX_REACTIVE_NESTING: usize = 16;

/// Writes a settled value (or error) to a node.
pub(crate) type Apply<T> = Rc<dyn Fn(&Context, NodeId, Result<T, AsyncError>)>;
/// Shows an in-progress indicator while a deferred value is pending.
pub(crate) type Loading = Rc<dyn Fn(&Context, NodeId)>;

pub(crate) struct Sink<T> {
    pub(crate) apply: Apply<T>,
    pub(crate) loading: Option<Loading>,
}

impl<T> Clone for Sink<T> {
    fn clone(&self) -> Self {
        Self {
            apply: Rc::clone(&self.apply),
            loading: self.loading.clone(),
        }
    }
}

/// Lifecycle of a reactive binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingStatus {
    Uninitialized,
    Idle,
    Running,
    Error,
}

/// Type-erased view the renderer keeps per node.
pub(crate) trait BindingHandle {
    fn dispose(&self);
    fn status(&self) -> BindingStatus;
    fn dependencies(&self) -> Vec<String>;
}

/// Apply `value` to `node` through `sink`, creating a reactive binding if
/// needed. Returns the binding so the caller can record it against the node.
pub(crate) fn bind<T: Clone + 'static>(
    ctx: &Context,
    node: NodeId,
    label: &str,
    value: Dynamic<T>,
    sink: Sink<T>,
) -> Option<Rc<dyn BindingHandle>> {
    match value {
        Dynamic::Static(value) => {
            (sink.apply)(ctx, node, Ok(value));
            None
        }
        Dynamic::Keep => None,
        Dynamic::Deferred(deferred) => {
            settle_deferred(ctx, node, deferred, sink, None);
            None
        }
        Dynamic::Reactive(eval) => {
            let binding = Binding::new(ctx, node, label, eval, sink);
            binding.run();
            Some(binding)
        }
    }
}

/// Apply a deferred value now if it is already settled, otherwise show the
/// loading indicator and apply it when it settles.
fn settle_deferred<T: Clone + 'static>(
    ctx: &Context,
    node: NodeId,
    deferred: Deferred<T>,
    sink: Sink<T>,
    guard: Option<(Weak<Binding<T>>, u64)>,
) {
    if let Some(result) = deferred.try_now() {
        (sink.apply)(ctx, node, result);
        return;
    }
    if let Some(loading) = &sink.loading {
        loading(ctx, node);
    }
    let weak = ctx.downgrade();
    ctx.spawn_tracked(async move {
        let result = deferred.await;
        let Some(ctx) = weak.upgrade() else {
            return;
        };
        if let Some((binding, generation)) = guard {
            let current = binding
                .upgrade()
                .is_some_and(|b| b.is_current(generation));
            if !current {
                trace!(%node, "stale async result dropped");
                return;
            }
        }
        (sink.apply)(&ctx, node, result);
    });
}

pub(crate) struct Binding<T> {
    ctx: WeakContext,
    node: NodeId,
    label: String,
    eval: Rc<dyn Fn() -> Dynamic<T>>,
    sink: Sink<T>,
    status: Cell<BindingStatus>,
    generation: Cell<u64>,
    disposed: Cell<bool>,
    subscriptions: RefCell<BTreeMap<String, Subscription>>,
    this: Weak<Binding<T>>,
}

impl<T: Clone + 'static> Binding<T> {
    fn new(
        ctx: &Context,
        node: NodeId,
        label: &str,
        eval: Rc<dyn Fn() -> Dynamic<T>>,
        sink: Sink<T>,
    ) -> Rc<Self> {
        Rc::new_cyclic(|this| Self {
            ctx: ctx.downgrade(),
            node,
            label: label.to_owned(),
            eval,
            sink,
            status: Cell::new(BindingStatus::Uninitialized),
            generation: Cell::new(0),
            disposed: Cell::new(false),
            subscriptions: RefCell::new(BTreeMap::new()),
            this: this.clone(),
        })
    }

    fn is_current(&self, generation: u64) -> bool {
        !self.disposed.get() && self.generation.get() == generation
    }

    /// Evaluate, re-subscribe, apply.
    pub(crate) fn run(&self) {
        if self.disposed.get() || self.status.get() == BindingStatus::Running {
            return;
        }
        let Some(ctx) = self.ctx.upgrade() else {
            return;
        };
        self.status.set(BindingStatus::Running);
        let generation = self.generation.get() + 1;
        self.generation.set(generation);

        let (outcome, deps) = ctx
            .state()
            .track(|| catch_unwind(AssertUnwindSafe(|| self.evaluate())));
        self.resubscribe(&ctx, &deps, outcome.is_ok());

        let value = match outcome {
            Ok(value) => value,
            Err(payload) => {
                error!(
                    node = %self.node,
                    prop = %self.label,
                    panic = %panic_message(&*payload),
                    "reactive binding failed; previous output kept"
                );
                self.status.set(BindingStatus::Error);
                return;
            }
        };

        let applied = catch_unwind(AssertUnwindSafe(|| self.settle(&ctx, value, generation)));
        match applied {
            Ok(()) => self.status.set(BindingStatus::Idle),
            Err(payload) => {
                error!(
                    node = %self.node,
                    prop = %self.label,
                    panic = %panic_message(&*payload),
                    "applying reactive value failed"
                );
                self.status.set(BindingStatus::Error);
            }
        }
    }

    fn evaluate(&self) -> Dynamic<T> {
        let mut value = (self.eval)();
        for _ in 0..MAX_REACTIVE_NESTING {
            match value {
                Dynamic::Reactive(inner) => value = inner(),
                other => return other,
            }
        }
        error!(prop = %self.label, "reactive value nested too deeply; keeping current output");
        Dynamic::Keep
    }

    fn settle(&self, ctx: &Context, value: Dynamic<T>, generation: u64) {
        match value {
            Dynamic::Static(value) => (self.sink.apply)(ctx, self.node, Ok(value)),
            Dynamic::Keep => trace!(node = %self.node, prop = %self.label, "keep current output"),
            Dynamic::Deferred(deferred) => settle_deferred(
                ctx,
                self.node,
                deferred,
                self.sink.clone(),
                Some((self.this.clone(), generation)),
            ),
            Dynamic::Reactive(_) => {}
        }
    }

    fn resubscribe(&self, ctx: &Context, deps: &Dependencies, prune: bool) {
        let mut subscriptions = self.subscriptions.borrow_mut();
        if prune {
            subscriptions.retain(|path, _| deps.contains(path));
        }
        for path in deps {
            if subscriptions.contains_key(path) {
                continue;
            }
            let weak = self.this.clone();
            let subscription = ctx.state().subscribe_internal(
                path,
                Rc::new(move || {
                    if let Some(binding) = weak.upgrade() {
                        binding.run();
                    }
                }),
            );
            subscriptions.insert(path.clone(), subscription);
        }
    }
}

impl<T: Clone + 'static> BindingHandle for Binding<T> {
    fn dispose(&self) {
        self.disposed.set(true);
        let dropped = std::mem::take(&mut *self.subscriptions.borrow_mut());
        drop(dropped);
    }

    fn status(&self) -> BindingStatus {
        self.status.get()
    }

    fn dependencies(&self) -> Vec<String> {
        self.subscriptions.borrow().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestHarness;
    use juno_core::display_text;
    use juno_dom::DomBackend;
    use pretty_assertions::assert_eq;
    use serde_json::{Value, json};

    fn text_sink() -> Sink<Value> {
        Sink {
            apply: Rc::new(|ctx: &Context, node, result: Result<Value, AsyncError>| {
                if let Ok(value) = result {
                    ctx.dom().set_text_content(node, &display_text(&value));
                }
            }),
            loading: None,
        }
    }

    #[test]
    fn subscribes_to_exactly_the_paths_read() {
        let h = TestHarness::new(json!({"flag": true, "a": "A", "b": "B"}));
        let node = h.dom.create_element("span");
        let state = h.ctx.state().clone();
        let eval: Rc<dyn Fn() -> Dynamic<Value>> = Rc::new(move || {
            let path = if state.get_state_or("flag", false) == json!(true) { "a" } else { "b" };
            Dynamic::Static(state.get_state_or(path, ""))
        });
        let binding = bind(&h.ctx, node, "text", Dynamic::Reactive(eval), text_sink()).unwrap();
        assert_eq!(binding.dependencies(), vec!["a", "flag"]);
        assert_eq!(h.dom.text_content(node), "A");

        h.ctx.set_state("flag", false);
        assert_eq!(binding.dependencies(), vec!["b", "flag"]);
        assert_eq!(h.dom.text_content(node), "B");

        h.ctx.set_state("a", "ignored");
        assert_eq!(h.dom.text_content(node), "B");
        h.ctx.set_state("b", "B2");
        assert_eq!(h.dom.text_content(node), "B2");
    }

    #[test]
    fn panicking_evaluation_keeps_previous_output() {
        let h = TestHarness::new(json!({"n": 1}));
        let node = h.dom.create_element("span");
        let state = h.ctx.state().clone();
        let eval: Rc<dyn Fn() -> Dynamic<Value>> = Rc::new(move || {
            let n = state.get_state_or("n", 0);
            assert!(n != json!(2), "two is not allowed");
            Dynamic::Static(n)
        });
        let binding = bind(&h.ctx, node, "text", Dynamic::Reactive(eval), text_sink()).unwrap();
        h.ctx.set_state("n", 2);
        assert_eq!(binding.status(), BindingStatus::Error);
        assert_eq!(h.dom.text_content(node), "1");
        h.ctx.set_state("n", 3);
        assert_eq!(binding.status(), BindingStatus::Idle);
        assert_eq!(h.dom.text_content(node), "3");
    }

    #[test]
    fn stale_async_result_is_dropped() {
        let h = TestHarness::new(json!({"v": 0}));
        let node = h.dom.create_element("span");
        let (slow, resolve_slow) = Deferred::<Value>::pending();
        let state = h.ctx.state().clone();
        let eval: Rc<dyn Fn() -> Dynamic<Value>> = Rc::new(move || {
            if state.get_state_or("v", 0) == json!(0) {
                Dynamic::Deferred(slow.clone())
            } else {
                Dynamic::Static(json!("fresh"))
            }
        });
        let _binding = bind(&h.ctx, node, "text", Dynamic::Reactive(eval), text_sink()).unwrap();
        h.ctx.set_state("v", 1);
        assert_eq!(h.dom.text_content(node), "fresh");
        resolve_slow.resolve(json!("stale"));
        h.tick();
        assert_eq!(h.dom.text_content(node), "fresh");
    }

    #[test]
    fn disposed_binding_unsubscribes() {
        let h = TestHarness::new(json!({"n": 1}));
        let node = h.dom.create_element("span");
        let state = h.ctx.state().clone();
        let eval: Rc<dyn Fn() -> Dynamic<Value>> = Rc::new(move || Dynamic::Static(state.get_state_or("n", 0)));
        let binding = bind(&h.ctx, node, "text", Dynamic::Reactive(eval), text_sink()).unwrap();
        assert_eq!(h.ctx.state().internal_listener_count(), 1);
        binding.dispose();
        assert_eq!(h.ctx.state().internal_listener_count(), 0);
        h.ctx.set_state("n", 2);
        assert_eq!(h.dom.text_content(node), "1");
    }
}
