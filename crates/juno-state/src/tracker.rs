//! Dependency tracking for reactive closures.
//!
//! A tracking scope is pushed before a reactive closure runs and popped
//! afterwards; every tracked read in between is recorded in the innermost
//! scope. Scopes form a stack so a binding created while another binding is
//! evaluating does not clobber the outer scope.
//!
//! # Invariants
//!
//! 1. Reads are recorded only in the innermost scope.
//! 2. An untracked region (see [`DependencyTracker::untracked`]) records
//!    nothing, even when an outer scope is active.
//! 3. [`DependencyTracker::track`] pops its scope even if the closure
//!    panics.

use std::cell::RefCell;
use std::collections::BTreeSet;

/// The set of paths one evaluation read, in sorted order.
pub type Dependencies = BTreeSet<String>;

/// Stack of tracking scopes. `None` entries are untracked regions.
#[derive(Debug, Default)]
pub struct DependencyTracker {
    scopes: RefCell<Vec<Option<Dependencies>>>,
}

impl DependencyTracker {
    /// Create an idle tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a fresh, empty scope.
    pub fn start(&self) {
        self.scopes.borrow_mut().push(Some(Dependencies::new()));
    }

    /// Pop the innermost scope and return what it recorded.
    ///
    /// Returns an empty set when no scope (or only an untracked region) was
    /// active.
    pub fn end(&self) -> Dependencies {
        self.scopes.borrow_mut().pop().flatten().unwrap_or_default()
    }

    /// Record a read of `path` in the innermost scope, if any.
    pub fn record(&self, path: &str) {
        if let Some(Some(scope)) = self.scopes.borrow_mut().last_mut() {
            if !scope.contains(path) {
                scope.insert(path.to_owned());
            }
        }
    }

    /// Whether reads are currently being recorded.
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self.scopes.borrow().last(), Some(Some(_)))
    }

    /// Current nesting depth (tracked and untracked scopes).
    #[must_use]
    pub fn depth(&self) -> usize {
        self.scopes.borrow().len()
    }

    /// Run `f` inside a fresh scope and return its result with the paths it
    /// read.
    pub fn track<R>(&self, f: impl FnOnce() -> R) -> (R, Dependencies) {
        self.start();
        let guard = ScopeGuard { tracker: self };
        let result = f();
        std::mem::forget(guard);
        (result, self.end())
    }

    /// Run `f` with recording suspended.
    pub fn untracked<R>(&self, f: impl FnOnce() -> R) -> R {
        self.scopes.borrow_mut().push(None);
        let _guard = ScopeGuard { tracker: self };
        f()
    }
}

/// Pops the innermost scope on drop, so a panicking closure cannot leave a
/// dangling scope behind.
struct ScopeGuard<'a> {
    tracker: &'a DependencyTracker,
}

impl Drop for ScopeGuard<'_> {
    fn drop(&mut self) {
        self.tracker.scopes.borrow_mut().pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_reads_inside_scope() {
        let tracker = DependencyTracker::new();
        let ((), deps) = tracker.track(|| {
            tracker.record("a");
            tracker.record("b.c");
            tracker.record("a");
        });
        assert_eq!(deps.into_iter().collect::<Vec<_>>(), vec!["a", "b.c"]);
        assert_eq!(tracker.depth(), 0);
    }

    #[test]
    fn reads_outside_scope_are_ignored() {
        let tracker = DependencyTracker::new();
        tracker.record("a");
        assert!(!tracker.is_active());
        assert!(tracker.end().is_empty());
    }

    #[test]
    fn nested_scopes_do_not_leak_into_each_other() {
        let tracker = DependencyTracker::new();
        let ((), outer) = tracker.track(|| {
            tracker.record("outer");
            let ((), inner) = tracker.track(|| tracker.record("inner"));
            assert_eq!(inner.len(), 1);
            tracker.record("outer.after");
        });
        assert!(outer.contains("outer"));
        assert!(outer.contains("outer.after"));
        assert!(!outer.contains("inner"));
    }

    #[test]
    fn untracked_region_suspends_recording() {
        let tracker = DependencyTracker::new();
        let ((), deps) = tracker.track(|| {
            tracker.untracked(|| tracker.record("hidden"));
            tracker.record("seen");
        });
        assert_eq!(deps.len(), 1);
        assert!(deps.contains("seen"));
    }

    #[test]
    fn panicking_closure_pops_scope() {
        let tracker = DependencyTracker::new();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            tracker.track(|| panic!("boom"));
        }));
        assert!(result.is_err());
        assert_eq!(tracker.depth(), 0);
    }
}
