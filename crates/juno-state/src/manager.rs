//! The state manager.
//!
//! [`StateManager`] is a cheap-to-clone handle over the application state
//! tree. It is the only writer of the tree: every mutation goes through
//! [`set_state`](StateManager::set_state) (or a batch flush), which runs the
//! middleware chain, skips deep-equal writes, mutates the store, and then
//! notifies listeners.
//!
//! # Write path
//!
//! ```text
//! set_state(path, value)
//!   ├─ invalid path ─────────────▶ Rejected(InvalidPath)
//!   ├─ batch active ─────────────▶ queue (dedup by path) ─▶ Queued
//!   ├─ path already mid-write ───▶ warn ─▶ Rejected(Circular)
//!   ├─ middleware chain (registration order)
//!   ├─ deep-equal to old ────────▶ Unchanged
//!   ├─ mutate store
//!   └─ notify: internal exact → ancestors → descendants; external
//! ```
//!
//! # Invariants
//!
//! 1. No `RefCell` borrow is held while middleware or listeners run.
//! 2. The set of paths mid-write is exactly the set of `set_state` frames
//!    on the current call stack (plus paths being flushed by `end_batch`).
//! 3. Nested writes deeper than [`MAX_UPDATE_DEPTH`] are dropped.
//! 4. `reset()` never notifies.
//!
//! # Failure Modes
//!
//! | Failure | Behavior |
//! |---------|----------|
//! | Invalid path | read → default, write → no-op |
//! | Middleware error | logged, middleware skipped |
//! | Circular write | dropped, warning logged |
//! | Listener panic | caught, logged, wave continues |
//! | `end_batch` without `begin_batch` | warning, no-op |

use std::cell::{Cell, RefCell};
use std::fmt;
use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::rc::{Rc, Weak};

use ahash::AHashSet;
use juno_core::{PathStore, deep_equal, path};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, error, trace, warn};

use crate::batch::BatchQueue;
use crate::middleware::{Middleware, MiddlewareArgs};
use crate::registry::{Registry, StateChange, Subscription};
use crate::tracker::{Dependencies, DependencyTracker};

/// Nested write ceiling. Writes issued from inside this many in-progress
/// writes are dropped.
pub const MAX_UPDATE_DEPTH: usize = 64;

/// Why a write was not applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// The path failed validation, or indexes too far past an array end.
    InvalidPath,
    /// The path was already being written further up the call stack.
    Circular,
    /// Too many nested writes.
    DepthExceeded,
}

/// Result of a write attempt. Writes never fail loudly; this only reports
/// what happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOutcome {
    /// The tree changed and listeners were notified.
    Applied,
    /// The new value was deep-equal to the old one.
    Unchanged,
    /// A batch is active; the write is queued.
    Queued,
    /// The write was dropped.
    Rejected(RejectReason),
}

impl SetOutcome {
    /// Whether the tree changed.
    #[must_use]
    pub fn is_applied(self) -> bool {
        self == Self::Applied
    }
}

struct Inner {
    store: RefCell<PathStore>,
    initial: Value,
    tracker: DependencyTracker,
    registry: Rc<RefCell<Registry>>,
    middleware: RefCell<Vec<Rc<dyn Middleware>>>,
    updating: RefCell<AHashSet<String>>,
    notifying: RefCell<AHashSet<String>>,
    depth: Cell<usize>,
    batch: RefCell<BatchQueue>,
}

/// Shared handle to the application state.
#[derive(Clone)]
pub struct StateManager {
    inner: Rc<Inner>,
}

/// Non-owning handle, for closures stored inside the registry.
#[derive(Clone)]
pub struct WeakStateManager {
    inner: Weak<Inner>,
}

impl WeakStateManager {
    /// Recover a strong handle if the manager is still alive.
    #[must_use]
    pub fn upgrade(&self) -> Option<StateManager> {
        self.inner.upgrade().map(|inner| StateManager { inner })
    }
}

impl fmt::Debug for WeakStateManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakStateManager").finish_non_exhaustive()
    }
}

impl Default for StateManager {
    fn default() -> Self {
        Self::new(Value::Object(serde_json::Map::new()))
    }
}

impl fmt::Debug for StateManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registry = self.inner.registry.borrow();
        f.debug_struct("StateManager")
            .field("internal_listeners", &registry.internal_count())
            .field("external_listeners", &registry.external_count())
            .field("middleware", &self.inner.middleware.borrow().len())
            .field("batching", &self.is_batching_active())
            .finish()
    }
}

/// Marks paths as mid-write, and counts one level of nesting, for the
/// lifetime of the guard.
struct UpdateGuard<'a> {
    inner: &'a Inner,
    paths: Vec<String>,
}

impl<'a> UpdateGuard<'a> {
    fn enter(inner: &'a Inner) -> Self {
        inner.depth.set(inner.depth.get() + 1);
        Self {
            inner,
            paths: Vec::new(),
        }
    }

    fn mark(&mut self, path: &str) {
        if self.inner.updating.borrow_mut().insert(path.to_owned()) {
            self.paths.push(path.to_owned());
        }
    }
}

impl Drop for UpdateGuard<'_> {
    fn drop(&mut self) {
        let mut updating = self.inner.updating.borrow_mut();
        for path in &self.paths {
            updating.remove(path);
        }
        self.inner.depth.set(self.inner.depth.get().saturating_sub(1));
    }
}

/// Ends the batch when dropped, so a panicking or cancelled batch body
/// cannot leave batching switched on.
struct BatchGuard<'a> {
    manager: &'a StateManager,
}

impl Drop for BatchGuard<'_> {
    fn drop(&mut self) {
        self.manager.end_batch();
    }
}

impl StateManager {
    /// Create a manager from an initial snapshot. The snapshot is cloned and
    /// kept for [`reset`](Self::reset).
    #[must_use]
    pub fn new(initial: Value) -> Self {
        let store = PathStore::new(initial);
        let initial = store.root().clone();
        Self {
            inner: Rc::new(Inner {
                store: RefCell::new(store),
                initial,
                tracker: DependencyTracker::new(),
                registry: Rc::new(RefCell::new(Registry::default())),
                middleware: RefCell::new(Vec::new()),
                updating: RefCell::new(AHashSet::new()),
                notifying: RefCell::new(AHashSet::new()),
                depth: Cell::new(0),
                batch: RefCell::new(BatchQueue::default()),
            }),
        }
    }

    /// Non-owning handle.
    #[must_use]
    pub fn downgrade(&self) -> WeakStateManager {
        WeakStateManager {
            inner: Rc::downgrade(&self.inner),
        }
    }

    /// Whether two handles point at the same manager.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Read `path`, recording it in the active tracking scope.
    #[must_use]
    pub fn get_state(&self, path: &str) -> Option<Value> {
        self.read(path, true)
    }

    /// Read `path`, falling back to `default`. Tracked.
    #[must_use]
    pub fn get_state_or(&self, path: &str, default: impl Into<Value>) -> Value {
        self.read(path, true).unwrap_or_else(|| default.into())
    }

    /// Read `path` with explicit control over dependency tracking.
    #[must_use]
    pub fn get_state_with(&self, path: &str, default: impl Into<Value>, track: bool) -> Value {
        self.read(path, track).unwrap_or_else(|| default.into())
    }

    /// Read `path` without recording a dependency.
    #[must_use]
    pub fn peek_state(&self, path: &str) -> Option<Value> {
        self.read(path, false)
    }

    /// Read and deserialize `path`. Tracked. `None` when missing or when the
    /// stored value does not deserialize into `T`.
    #[must_use]
    pub fn get_as<T: DeserializeOwned>(&self, path: &str) -> Option<T> {
        self.read(path, true)
            .and_then(|value| serde_json::from_value(value).ok())
    }

    /// Clone of the whole tree. Untracked.
    #[must_use]
    pub fn snapshot(&self) -> Value {
        self.inner.store.borrow().root().clone()
    }

    fn read(&self, path: &str, track: bool) -> Option<Value> {
        if !path::is_valid_path(path) {
            return None;
        }
        if track {
            self.inner.tracker.record(path);
        }
        self.inner.store.borrow().get(path).cloned()
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    /// Write `value` at `path` with an empty context.
    pub fn set_state(&self, path: &str, value: impl Into<Value>) -> SetOutcome {
        self.set_state_with(path, value, Value::Object(serde_json::Map::new()))
    }

    /// Write `value` at `path`, passing `context` to middleware.
    pub fn set_state_with(&self, path: &str, value: impl Into<Value>, context: Value) -> SetOutcome {
        let value = value.into();
        if let Err(err) = self.inner.store.borrow().check_write(path) {
            debug!(%err, "set_state ignored");
            return SetOutcome::Rejected(RejectReason::InvalidPath);
        }
        if self.inner.batch.borrow().is_active() {
            self.inner.batch.borrow_mut().push(path, value, context);
            trace!(path, "write queued");
            return SetOutcome::Queued;
        }
        if let Some(reason) = self.reentry_check(path) {
            return SetOutcome::Rejected(reason);
        }

        let mut guard = UpdateGuard::enter(&self.inner);
        guard.mark(path);
        let Some(change) = self.apply_write(path, value, &context) else {
            return SetOutcome::Unchanged;
        };
        self.notify(&[change]);
        SetOutcome::Applied
    }

    /// Delete `path` from the tree without notifying anyone.
    pub fn remove_state(&self, path: &str) -> Option<Value> {
        self.inner.store.borrow_mut().remove(path)
    }

    /// Restore the construction snapshot. Discards any batch in progress.
    /// Listeners are not notified.
    pub fn reset(&self) {
        self.inner.batch.borrow_mut().clear();
        self.inner
            .store
            .borrow_mut()
            .replace(self.inner.initial.clone());
        debug!("state reset to initial snapshot");
    }

    /// Append a middleware to the chain.
    pub fn use_middleware(&self, middleware: impl Middleware + 'static) {
        self.inner.middleware.borrow_mut().push(Rc::new(middleware));
    }

    /// Append an already shared middleware.
    pub fn use_shared_middleware(&self, middleware: Rc<dyn Middleware>) {
        self.inner.middleware.borrow_mut().push(middleware);
    }

    /// Number of installed middleware.
    #[must_use]
    pub fn middleware_count(&self) -> usize {
        self.inner.middleware.borrow().len()
    }

    fn reentry_check(&self, path: &str) -> Option<RejectReason> {
        if self.is_circular(path) {
            return Some(RejectReason::Circular);
        }
        if self.inner.depth.get() >= MAX_UPDATE_DEPTH {
            warn!(path, depth = MAX_UPDATE_DEPTH, "nested state update limit reached; write dropped");
            return Some(RejectReason::DepthExceeded);
        }
        None
    }

    fn is_circular(&self, path: &str) -> bool {
        let circular = self.inner.updating.borrow().contains(path);
        if circular {
            warn!(path, "circular state update dropped");
        }
        circular
    }

    /// Run middleware, compare, mutate. Returns the change if the tree moved.
    fn apply_write(&self, path: &str, value: Value, context: &Value) -> Option<StateChange> {
        if let Err(err) = self.inner.store.borrow().check_write(path) {
            warn!(%err, "queued write dropped");
            return None;
        }
        let old_value = self.inner.store.borrow().get(path).cloned();
        let new_value = self.run_middleware(path, old_value.as_ref(), value, context);
        if old_value
            .as_ref()
            .is_some_and(|old| deep_equal(old, &new_value))
        {
            trace!(path, "write unchanged");
            return None;
        }
        self.inner
            .store
            .borrow_mut()
            .set(path, new_value.clone());
        Some(StateChange {
            path: path.to_owned(),
            old_value,
            new_value,
        })
    }

    fn run_middleware(
        &self,
        path: &str,
        old_value: Option<&Value>,
        mut value: Value,
        context: &Value,
    ) -> Value {
        let chain: Vec<Rc<dyn Middleware>> = self.inner.middleware.borrow().clone();
        for middleware in chain {
            let args = MiddlewareArgs {
                path,
                old_value,
                new_value: &value,
                context,
                state: self,
            };
            match middleware.apply(&args) {
                Ok(Some(replacement)) => value = replacement,
                Ok(None) => {}
                Err(err) => {
                    error!(path, middleware = middleware.name(), %err, "middleware failed; skipped");
                }
            }
        }
        value
    }

    /// Fire one notification wave for `changes`.
    ///
    /// Each internal listener runs at most once per wave; each external
    /// listener runs at most once, with the last change it matched.
    fn notify(&self, changes: &[StateChange]) {
        let changes: Vec<&StateChange> = {
            let notifying = self.inner.notifying.borrow();
            changes
                .iter()
                .filter(|change| !notifying.contains(&change.path))
                .collect()
        };
        if changes.is_empty() {
            return;
        }
        for change in &changes {
            self.inner
                .notifying
                .borrow_mut()
                .insert(change.path.clone());
        }

        let (internal, external) = {
            let registry = self.inner.registry.borrow();
            let mut seen = AHashSet::new();
            let mut internal = Vec::new();
            for change in &changes {
                for entry in registry.internal_wave(&change.path) {
                    if seen.insert(entry.1) {
                        internal.push(entry);
                    }
                }
            }
            let mut external: Vec<(String, _, _, &StateChange)> = Vec::new();
            for change in &changes {
                for (path, id, callback) in registry.external_wave(&change.path) {
                    match external.iter_mut().find(|(_, eid, _, _)| *eid == id) {
                        Some(slot) => slot.3 = change,
                        None => external.push((path, id, callback, change)),
                    }
                }
            }
            (internal, external)
        };

        for (path, id, callback) in internal {
            if !self.inner.registry.borrow().has_internal(&path, id) {
                continue;
            }
            if catch_unwind(AssertUnwindSafe(|| callback())).is_err() {
                error!(path = %path, "reactive re-run panicked");
            }
        }
        for (path, id, callback, change) in external {
            if !self.inner.registry.borrow().has_external(&path, id) {
                continue;
            }
            if catch_unwind(AssertUnwindSafe(|| callback(change))).is_err() {
                error!(path = %path, changed = %change.path, "state subscriber panicked");
            }
        }

        let mut notifying = self.inner.notifying.borrow_mut();
        for change in &changes {
            notifying.remove(&change.path);
        }
    }

    // -----------------------------------------------------------------------
    // Batching
    // -----------------------------------------------------------------------

    /// Start queueing writes. A second call while active is ignored.
    pub fn begin_batch(&self) {
        if !self.inner.batch.borrow_mut().begin() {
            debug!("begin_batch while already batching; ignored");
        }
    }

    /// Apply all queued writes and fire one notification wave. Returns the
    /// number of writes that changed the tree.
    pub fn end_batch(&self) -> usize {
        let Some(entries) = self.inner.batch.borrow_mut().finish() else {
            warn!("end_batch called without begin_batch");
            return 0;
        };
        if entries.is_empty() {
            return 0;
        }
        if self.inner.depth.get() >= MAX_UPDATE_DEPTH {
            warn!(dropped = entries.len(), depth = MAX_UPDATE_DEPTH, "nested state update limit reached; batch dropped");
            return 0;
        }
        // Every flushed path stays marked until the wave is over, so a
        // subscriber writing back into the batch is rejected as circular.
        let mut guard = UpdateGuard::enter(&self.inner);
        let mut changes = Vec::with_capacity(entries.len());
        for entry in entries {
            if self.is_circular(&entry.path) {
                continue;
            }
            guard.mark(&entry.path);
            if let Some(change) = self.apply_write(&entry.path, entry.value, &entry.context) {
                changes.push(change);
            }
        }
        debug!(applied = changes.len(), "batch flushed");
        self.notify(&changes);
        drop(guard);
        changes.len()
    }

    /// Whether writes are currently queued instead of applied.
    #[must_use]
    pub fn is_batching_active(&self) -> bool {
        self.inner.batch.borrow().is_active()
    }

    /// Number of distinct paths queued.
    #[must_use]
    pub fn batch_queue_size(&self) -> usize {
        self.inner.batch.borrow().len()
    }

    /// Drop queued writes and stop batching without applying anything.
    pub fn clear_batch(&self) {
        self.inner.batch.borrow_mut().clear();
    }

    /// Run `f` as one batch. Inside an active batch `f` simply runs inline.
    pub fn execute_batch<R>(&self, f: impl FnOnce() -> R) -> R {
        if self.is_batching_active() {
            return f();
        }
        self.begin_batch();
        let _guard = BatchGuard { manager: self };
        f()
    }

    /// Await `future` as one batch; the batch ends once it settles, whatever
    /// its output, and the output is returned unchanged.
    pub async fn execute_batch_async<F: Future>(&self, future: F) -> F::Output {
        if self.is_batching_active() {
            return future.await;
        }
        self.begin_batch();
        let _guard = BatchGuard { manager: self };
        future.await
    }

    // -----------------------------------------------------------------------
    // Subscriptions
    // -----------------------------------------------------------------------

    /// Listen for writes to `path` (and, if `hierarchical`, below it).
    pub fn subscribe(
        &self,
        path: &str,
        callback: impl Fn(&StateChange) + 'static,
        hierarchical: bool,
    ) -> Subscription {
        let id = self
            .inner
            .registry
            .borrow_mut()
            .add_external(path, Rc::new(callback), hierarchical);
        Subscription::external(&self.inner.registry, path, id)
    }

    /// Listen for writes to exactly `path`.
    pub fn subscribe_exact(&self, path: &str, callback: impl Fn(&StateChange) + 'static) -> Subscription {
        self.subscribe(path, callback, false)
    }

    /// Register a reactive re-run callback for `path`. Used by renderer
    /// bindings.
    pub fn subscribe_internal(&self, path: &str, callback: Rc<dyn Fn()>) -> Subscription {
        let id = self
            .inner
            .registry
            .borrow_mut()
            .add_internal(path, callback);
        Subscription::internal(&self.inner.registry, path, id)
    }

    /// Number of internal (binding) listeners.
    #[must_use]
    pub fn internal_listener_count(&self) -> usize {
        self.inner.registry.borrow().internal_count()
    }

    /// Number of external listeners.
    #[must_use]
    pub fn external_listener_count(&self) -> usize {
        self.inner.registry.borrow().external_count()
    }

    /// Paths that currently have internal listeners, sorted.
    #[must_use]
    pub fn internal_listener_paths(&self) -> Vec<String> {
        self.inner.registry.borrow().internal_paths()
    }

    // -----------------------------------------------------------------------
    // Dependency tracking
    // -----------------------------------------------------------------------

    /// Push a tracking scope.
    pub fn start_tracking(&self) {
        self.inner.tracker.start();
    }

    /// Pop the innermost tracking scope.
    pub fn end_tracking(&self) -> Dependencies {
        self.inner.tracker.end()
    }

    /// Run `f` in a fresh tracking scope.
    pub fn track<R>(&self, f: impl FnOnce() -> R) -> (R, Dependencies) {
        self.inner.tracker.track(f)
    }

    /// Run `f` with dependency recording suspended.
    pub fn untracked<R>(&self, f: impl FnOnce() -> R) -> R {
        self.inner.tracker.untracked(f)
    }

    /// Whether a tracking scope is recording reads.
    #[must_use]
    pub fn is_tracking(&self) -> bool {
        self.inner.tracker.is_active()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
