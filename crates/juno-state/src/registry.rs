//! Subscription registry.
//!
//! Two parallel maps from path to listeners:
//!
//! - **internal**: zero-argument re-run callbacks installed by reactive
//!   bindings. Notified for the exact path, its ancestors, and its
//!   descendants.
//! - **external**: `Fn(&StateChange)` listeners installed through
//!   [`StateManager::subscribe`](crate::StateManager::subscribe). Notified for
//!   the exact path, and for descendant writes when hierarchical.
//!
//! # Invariants
//!
//! 1. Listener ids are unique for the lifetime of a registry.
//! 2. Dropping a [`Subscription`] removes its listener before the next wave
//!    starts invoking callbacks; a listener removed mid-wave is skipped.
//! 3. Waves are snapshots: callbacks added during a wave are not invoked by
//!    that wave.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use ahash::AHashMap;
use juno_core::path;
use serde_json::Value;

/// Internal re-run callback.
pub type InternalCallback = Rc<dyn Fn()>;

/// External change listener.
pub type ExternalCallback = Rc<dyn Fn(&StateChange)>;

/// One applied write, as delivered to external listeners.
#[derive(Debug, Clone, PartialEq)]
pub struct StateChange {
    /// The path that was written.
    pub path: String,
    /// Value before the write; `None` if nothing was there.
    pub old_value: Option<Value>,
    /// Value after the write (after middleware).
    pub new_value: Value,
}

/// Opaque listener identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListenerKind {
    Internal,
    External,
}

struct ExternalListener {
    id: ListenerId,
    callback: ExternalCallback,
    hierarchical: bool,
}

#[derive(Default)]
pub(crate) struct Registry {
    next_id: u64,
    internal: AHashMap<String, Vec<(ListenerId, InternalCallback)>>,
    external: AHashMap<String, Vec<ExternalListener>>,
}

impl Registry {
    fn allocate(&mut self) -> ListenerId {
        self.next_id += 1;
        ListenerId(self.next_id)
    }

    pub(crate) fn add_internal(&mut self, path: &str, callback: InternalCallback) -> ListenerId {
        let id = self.allocate();
        self.internal
            .entry(path.to_owned())
            .or_default()
            .push((id, callback));
        id
    }

    pub(crate) fn add_external(
        &mut self,
        path: &str,
        callback: ExternalCallback,
        hierarchical: bool,
    ) -> ListenerId {
        let id = self.allocate();
        self.external
            .entry(path.to_owned())
            .or_default()
            .push(ExternalListener {
                id,
                callback,
                hierarchical,
            });
        id
    }

    fn remove(&mut self, kind: ListenerKind, path: &str, id: ListenerId) {
        match kind {
            ListenerKind::Internal => {
                if let Some(list) = self.internal.get_mut(path) {
                    list.retain(|(lid, _)| *lid != id);
                    if list.is_empty() {
                        self.internal.remove(path);
                    }
                }
            }
            ListenerKind::External => {
                if let Some(list) = self.external.get_mut(path) {
                    list.retain(|l| l.id != id);
                    if list.is_empty() {
                        self.external.remove(path);
                    }
                }
            }
        }
    }

    pub(crate) fn has_internal(&self, path: &str, id: ListenerId) -> bool {
        self.internal
            .get(path)
            .is_some_and(|list| list.iter().any(|(lid, _)| *lid == id))
    }

    pub(crate) fn has_external(&self, path: &str, id: ListenerId) -> bool {
        self.external
            .get(path)
            .is_some_and(|list| list.iter().any(|l| l.id == id))
    }

    /// Internal listeners affected by a write to `changed`: exact path,
    /// ancestors nearest-first, then descendants (sorted by path).
    pub(crate) fn internal_wave(&self, changed: &str) -> Vec<(String, ListenerId, InternalCallback)> {
        let mut out = Vec::new();
        let push_path = |p: &str, out: &mut Vec<(String, ListenerId, InternalCallback)>| {
            if let Some(list) = self.internal.get(p) {
                out.extend(list.iter().map(|(id, cb)| (p.to_owned(), *id, Rc::clone(cb))));
            }
        };
        push_path(changed, &mut out);
        for ancestor in path::ancestors(changed) {
            push_path(ancestor, &mut out);
        }
        let mut descendants: Vec<&String> = self
            .internal
            .keys()
            .filter(|key| path::is_descendant(key, changed))
            .collect();
        descendants.sort();
        for key in descendants {
            push_path(key, &mut out);
        }
        out
    }

    /// External listeners affected by a write to `changed`.
    pub(crate) fn external_wave(&self, changed: &str) -> Vec<(String, ListenerId, ExternalCallback)> {
        let mut out = Vec::new();
        if let Some(list) = self.external.get(changed) {
            out.extend(
                list.iter()
                    .map(|l| (changed.to_owned(), l.id, Rc::clone(&l.callback))),
            );
        }
        for ancestor in path::ancestors(changed) {
            if let Some(list) = self.external.get(ancestor) {
                out.extend(
                    list.iter()
                        .filter(|l| l.hierarchical)
                        .map(|l| (ancestor.to_owned(), l.id, Rc::clone(&l.callback))),
                );
            }
        }
        out
    }

    pub(crate) fn internal_count(&self) -> usize {
        self.internal.values().map(Vec::len).sum()
    }

    pub(crate) fn external_count(&self) -> usize {
        self.external.values().map(Vec::len).sum()
    }

    pub(crate) fn internal_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.internal.keys().cloned().collect();
        paths.sort();
        paths
    }
}

/// RAII guard for one listener. Dropping it unsubscribes.
///
/// Use [`detach`](Self::detach) to keep the listener for the lifetime of the
/// state manager.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    registry: Weak<RefCell<Registry>>,
    path: String,
    id: ListenerId,
    kind: ListenerKind,
    active: bool,
}

impl Subscription {
    pub(crate) fn internal(registry: &Rc<RefCell<Registry>>, path: &str, id: ListenerId) -> Self {
        Self {
            registry: Rc::downgrade(registry),
            path: path.to_owned(),
            id,
            kind: ListenerKind::Internal,
            active: true,
        }
    }

    pub(crate) fn external(registry: &Rc<RefCell<Registry>>, path: &str, id: ListenerId) -> Self {
        Self {
            registry: Rc::downgrade(registry),
            path: path.to_owned(),
            id,
            kind: ListenerKind::External,
            active: true,
        }
    }

    /// The subscribed path.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The listener id.
    #[must_use]
    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Unsubscribe now. Equivalent to dropping the guard.
    pub fn unsubscribe(self) {}

    /// Keep the listener registered without holding the guard.
    pub fn detach(mut self) {
        self.active = false;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if !self.active {
            return;
        }
        if let Some(registry) = self.registry.upgrade() {
            registry.borrow_mut().remove(self.kind, &self.path, self.id);
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("path", &self.path)
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("active", &self.active)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> InternalCallback {
        Rc::new(|| {})
    }

    #[test]
    fn internal_wave_orders_exact_ancestors_descendants() {
        let mut reg = Registry::default();
        reg.add_internal("a.b.c.d", noop());
        reg.add_internal("a", noop());
        reg.add_internal("a.b", noop());
        reg.add_internal("a.b.c", noop());
        reg.add_internal("a.bc", noop());
        let paths: Vec<String> = reg
            .internal_wave("a.b")
            .into_iter()
            .map(|(p, _, _)| p)
            .collect();
        assert_eq!(paths, vec!["a.b", "a", "a.b.c", "a.b.c.d"]);
    }

    #[test]
    fn external_wave_respects_hierarchical_flag() {
        let mut reg = Registry::default();
        let cb: ExternalCallback = Rc::new(|_| {});
        reg.add_external("a", Rc::clone(&cb), true);
        reg.add_external("a.b", Rc::clone(&cb), false);
        reg.add_external("a.b.c", Rc::clone(&cb), false);
        reg.add_external("a.b.c.d", Rc::clone(&cb), true);
        let paths: Vec<String> = reg
            .external_wave("a.b.c")
            .into_iter()
            .map(|(p, _, _)| p)
            .collect();
        assert_eq!(paths, vec!["a.b.c", "a"]);
    }

    #[test]
    fn dropping_subscription_removes_listener() {
        let reg = Rc::new(RefCell::new(Registry::default()));
        let id = reg.borrow_mut().add_internal("x", noop());
        let sub = Subscription::internal(&reg, "x", id);
        assert_eq!(reg.borrow().internal_count(), 1);
        drop(sub);
        assert_eq!(reg.borrow().internal_count(), 0);
        assert!(reg.borrow().internal_paths().is_empty());
    }

    #[test]
    fn detached_subscription_stays_registered() {
        let reg = Rc::new(RefCell::new(Registry::default()));
        let id = reg.borrow_mut().add_external("x", Rc::new(|_| {}), true);
        Subscription::external(&reg, "x", id).detach();
        assert!(reg.borrow().has_external("x", id));
    }
}
