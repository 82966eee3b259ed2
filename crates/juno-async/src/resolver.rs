//! Completion barrier for async work started during a tracked pass.
//!
//! Hydration-style renders need to know when every async attribute, prop,
//! and child they started has settled. While tracking is on, each genuinely
//! pending value passed through [`AsyncResolver::wrap`] is counted; a
//! watcher task decrements the count when it settles, and once the count
//! reaches zero every [`on_all_complete`](AsyncResolver::on_all_complete)
//! callback fires exactly once.
//!
//! # Invariants
//!
//! 1. Already-settled values are never counted. Counting never polls, so
//!    tracked work first runs on the scheduler.
//! 2. `start_tracking` / `stop_tracking` open a new epoch: the counter and
//!    the waiters are reset, and settlements from an older epoch are
//!    ignored.
//! 3. A waiter fires at most once, never synchronously from
//!    `on_all_complete` itself.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use tracing::{debug, trace};

use crate::deferred::{Deferred, MaybeAsync};
use crate::scheduler::Scheduler;

type Waiter = Box<dyn FnOnce()>;

struct Inner {
    scheduler: Rc<dyn Scheduler>,
    tracking: Cell<bool>,
    epoch: Cell<u64>,
    in_flight: Cell<usize>,
    next_waiter: Cell<u64>,
    waiters: RefCell<Vec<(u64, Waiter)>>,
}

/// Counts in-flight deferred values and notifies when they have all
/// settled.
#[derive(Clone)]
pub struct AsyncResolver {
    inner: Rc<Inner>,
}

impl AsyncResolver {
    pub fn new(scheduler: Rc<dyn Scheduler>) -> Self {
        Self {
            inner: Rc::new(Inner {
                scheduler,
                tracking: Cell::new(false),
                epoch: Cell::new(0),
                in_flight: Cell::new(0),
                next_waiter: Cell::new(0),
                waiters: RefCell::new(Vec::new()),
            }),
        }
    }

    /// The scheduler continuations run on.
    #[must_use]
    pub fn scheduler(&self) -> Rc<dyn Scheduler> {
        Rc::clone(&self.inner.scheduler)
    }

    /// Normalize `value` to a deferred, counting it if it is still pending
    /// and tracking is on.
    pub fn wrap<T: Clone + 'static>(&self, value: MaybeAsync<T>) -> Deferred<T> {
        let deferred = value.into_deferred();
        self.track(&deferred);
        deferred
    }

    /// Count an existing deferred if it is still pending and tracking is on.
    pub fn track<T: Clone + 'static>(&self, deferred: &Deferred<T>) {
        if !self.inner.tracking.get() || deferred.is_settled() {
            return;
        }
        let epoch = self.inner.epoch.get();
        self.inner.in_flight.set(self.inner.in_flight.get() + 1);
        trace!(id = %deferred.id(), in_flight = self.inner.in_flight.get(), "tracking deferred");

        let watched = deferred.clone();
        let weak = Rc::downgrade(&self.inner);
        self.inner.scheduler.spawn_local(Box::pin(async move {
            let _ = watched.await;
            if let Some(inner) = weak.upgrade() {
                settle(&inner, epoch);
            }
        }));
    }

    /// Begin a tracked pass.
    pub fn start_tracking(&self) {
        self.reset_epoch();
        self.inner.tracking.set(true);
        debug!("async tracking started");
    }

    /// End a tracked pass, dropping pending waiters.
    pub fn stop_tracking(&self) {
        self.reset_epoch();
        self.inner.tracking.set(false);
        debug!("async tracking stopped");
    }

    #[must_use]
    pub fn is_tracking(&self) -> bool {
        self.inner.tracking.get()
    }

    /// Number of counted deferreds not yet settled.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.get()
    }

    /// Run `callback` once nothing is in flight. If nothing is in flight
    /// now, it runs on the next scheduler tick.
    ///
    /// The returned handle cancels the callback when dropped; call
    /// [`CompletionHandle::detach`] to keep it.
    pub fn on_all_complete(&self, callback: impl FnOnce() + 'static) -> CompletionHandle {
        let id = self.inner.next_waiter.get();
        self.inner.next_waiter.set(id + 1);
        self.inner
            .waiters
            .borrow_mut()
            .push((id, Box::new(callback)));

        if self.inner.in_flight.get() == 0 {
            let weak = Rc::downgrade(&self.inner);
            self.inner.scheduler.defer(Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    fire_if_idle(&inner);
                }
            }));
        }

        CompletionHandle {
            id,
            resolver: Rc::downgrade(&self.inner),
        }
    }

    fn reset_epoch(&self) {
        self.inner.epoch.set(self.inner.epoch.get() + 1);
        self.inner.in_flight.set(0);
        self.inner.waiters.borrow_mut().clear();
    }
}

fn settle(inner: &Inner, epoch: u64) {
    if inner.epoch.get() != epoch {
        trace!("settlement from an earlier tracking pass ignored");
        return;
    }
    let remaining = inner.in_flight.get().saturating_sub(1);
    inner.in_flight.set(remaining);
    if remaining == 0 {
        fire_if_idle(inner);
    }
}

fn fire_if_idle(inner: &Inner) {
    if inner.in_flight.get() != 0 {
        return;
    }
    let waiters = std::mem::take(&mut *inner.waiters.borrow_mut());
    if !waiters.is_empty() {
        debug!(count = waiters.len(), "all async work complete");
    }
    for (_, waiter) in waiters {
        waiter();
    }
}

impl fmt::Debug for AsyncResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncResolver")
            .field("tracking", &self.inner.tracking.get())
            .field("in_flight", &self.inner.in_flight.get())
            .field("waiters", &self.inner.waiters.borrow().len())
            .finish()
    }
}

/// Registration returned by [`AsyncResolver::on_all_complete`].
#[must_use = "dropping the handle cancels the callback; call .detach() to keep it"]
pub struct CompletionHandle {
    id: u64,
    resolver: Weak<Inner>,
}

impl CompletionHandle {
    /// Keep the callback registered after the handle is gone.
    pub fn detach(mut self) {
        self.resolver = Weak::new();
    }

    /// Remove the callback now.
    pub fn cancel(self) {}
}

impl Drop for CompletionHandle {
    fn drop(&mut self) {
        if let Some(inner) = self.resolver.upgrade() {
            inner.waiters.borrow_mut().retain(|(id, _)| *id != self.id);
        }
    }
}

impl fmt::Debug for CompletionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionHandle")
            .field("id", &self.id)
            .field("attached", &(self.resolver.strong_count() > 0))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::LocalScheduler;

    fn setup() -> (LocalScheduler, AsyncResolver) {
        let scheduler = LocalScheduler::new();
        let resolver = AsyncResolver::new(Rc::new(scheduler.clone()));
        (scheduler, resolver)
    }

    fn flag() -> (Rc<Cell<bool>>, impl FnOnce() + 'static) {
        let fired = Rc::new(Cell::new(false));
        let f = Rc::clone(&fired);
        (fired, move || f.set(true))
    }

    #[test]
    fn ready_values_are_not_counted() {
        let (_scheduler, resolver) = setup();
        resolver.start_tracking();
        let _ = resolver.wrap(MaybeAsync::Ready(1));
        assert_eq!(resolver.in_flight(), 0);
    }

    #[test]
    fn fires_after_last_pending_settles() {
        let (scheduler, resolver) = setup();
        resolver.start_tracking();
        let (a, resolve_a) = Deferred::<i32>::pending();
        let (b, resolve_b) = Deferred::<i32>::pending();
        resolver.track(&a);
        resolver.track(&b);
        assert_eq!(resolver.in_flight(), 2);

        let (fired, callback) = flag();
        resolver.on_all_complete(callback).detach();

        resolve_a.resolve(1);
        scheduler.run_until_stalled();
        assert!(!fired.get());
        resolve_b.reject("nope");
        scheduler.run_until_stalled();
        assert!(fired.get());
        assert_eq!(resolver.in_flight(), 0);
    }

    #[test]
    fn idle_resolver_fires_on_next_tick() {
        let (scheduler, resolver) = setup();
        let (fired, callback) = flag();
        resolver.on_all_complete(callback).detach();
        assert!(!fired.get());
        scheduler.run_until_stalled();
        assert!(fired.get());
    }

    #[test]
    fn dropped_handle_cancels() {
        let (scheduler, resolver) = setup();
        let (fired, callback) = flag();
        drop(resolver.on_all_complete(callback));
        scheduler.run_until_stalled();
        assert!(!fired.get());
    }

    #[test]
    fn tracking_leaves_work_to_the_scheduler() {
        let (scheduler, resolver) = setup();
        resolver.start_tracking();
        let ran = Rc::new(Cell::new(false));
        let mark = Rc::clone(&ran);
        let job = Deferred::from_future(async move { mark.set(true) });
        resolver.track(&job);
        assert!(!ran.get());
        assert_eq!(resolver.in_flight(), 1);

        let (fired, callback) = flag();
        resolver.on_all_complete(callback).detach();
        scheduler.run_until_stalled();
        assert!(ran.get());
        assert!(fired.get());
    }

    #[test]
    fn untracked_values_do_not_count() {
        let (_scheduler, resolver) = setup();
        let (pending, _resolve) = Deferred::<i32>::pending();
        resolver.track(&pending);
        assert_eq!(resolver.in_flight(), 0);
    }

    #[test]
    fn restart_ignores_old_settlements() {
        let (scheduler, resolver) = setup();
        resolver.start_tracking();
        let (old, resolve_old) = Deferred::<i32>::pending();
        resolver.track(&old);
        resolver.start_tracking();
        let (new, resolve_new) = Deferred::<i32>::pending();
        resolver.track(&new);
        assert_eq!(resolver.in_flight(), 1);
        resolve_old.resolve(0);
        scheduler.run_until_stalled();
        assert_eq!(resolver.in_flight(), 1);
        resolve_new.resolve(0);
        scheduler.run_until_stalled();
        assert_eq!(resolver.in_flight(), 0);
    }
}
