//! Where continuations run.
//!
//! The renderer never blocks. Whenever it needs to do something "later"
//! (swap a placeholder once a future settles, run `on_mount` after the node
//! is attached) it hands a task to a [`Scheduler`].

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use futures::executor::{LocalPool, LocalSpawner};
use futures::future::LocalBoxFuture;
use futures::task::LocalSpawnExt;
use tracing::{trace, warn};

/// Single-threaded task sink.
pub trait Scheduler {
    /// Run `future` to completion in the background.
    fn spawn_local(&self, future: LocalBoxFuture<'static, ()>);

    /// Run `task` on a later tick, after the current synchronous work.
    fn defer(&self, task: Box<dyn FnOnce()>) {
        self.spawn_local(Box::pin(async move { task() }));
    }
}

/// [`Scheduler`] backed by a `futures` [`LocalPool`].
///
/// Nothing runs until the owner calls [`run_until_stalled`] or [`run`];
/// that is what makes the "next tick" deterministic in tests.
///
/// [`run_until_stalled`]: LocalScheduler::run_until_stalled
/// [`run`]: LocalScheduler::run
#[derive(Clone)]
pub struct LocalScheduler {
    pool: Rc<RefCell<LocalPool>>,
    spawner: LocalSpawner,
}

impl LocalScheduler {
    #[must_use]
    pub fn new() -> Self {
        let pool = LocalPool::new();
        let spawner = pool.spawner();
        Self {
            pool: Rc::new(RefCell::new(pool)),
            spawner,
        }
    }

    /// Run every task that can make progress. Returns `false` when called
    /// re-entrantly from inside a task, in which case nothing runs.
    pub fn run_until_stalled(&self) -> bool {
        let Ok(mut pool) = self.pool.try_borrow_mut() else {
            trace!("run_until_stalled called from inside the pool; ignored");
            return false;
        };
        pool.run_until_stalled();
        true
    }

    /// Run until every spawned task has finished.
    pub fn run(&self) -> bool {
        let Ok(mut pool) = self.pool.try_borrow_mut() else {
            trace!("run called from inside the pool; ignored");
            return false;
        };
        pool.run();
        true
    }
}

impl Default for LocalScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for LocalScheduler {
    fn spawn_local(&self, future: LocalBoxFuture<'static, ()>) {
        if let Err(err) = self.spawner.spawn_local(future) {
            warn!(%err, "task dropped: local pool is shut down");
        }
    }
}

impl fmt::Debug for LocalScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalScheduler").finish_non_exhaustive()
    }
}

impl<S: Scheduler + ?Sized> Scheduler for Rc<S> {
    fn spawn_local(&self, future: LocalBoxFuture<'static, ()>) {
        (**self).spawn_local(future);
    }

    fn defer(&self, task: Box<dyn FnOnce()>) {
        (**self).defer(task);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn deferred_task_waits_for_tick() {
        let scheduler = LocalScheduler::new();
        let ran = Rc::new(Cell::new(false));
        let flag = Rc::clone(&ran);
        scheduler.defer(Box::new(move || flag.set(true)));
        assert!(!ran.get());
        assert!(scheduler.run_until_stalled());
        assert!(ran.get());
    }

    #[test]
    fn nested_run_is_refused() {
        let scheduler = LocalScheduler::new();
        let inner = scheduler.clone();
        let nested = Rc::new(Cell::new(None));
        let slot = Rc::clone(&nested);
        scheduler.defer(Box::new(move || slot.set(Some(inner.run_until_stalled()))));
        scheduler.run_until_stalled();
        assert_eq!(nested.get(), Some(false));
    }

    #[test]
    fn tasks_spawned_from_tasks_run_in_same_drain() {
        let scheduler = LocalScheduler::new();
        let count = Rc::new(Cell::new(0));
        let outer = scheduler.clone();
        let c = Rc::clone(&count);
        scheduler.defer(Box::new(move || {
            c.set(c.get() + 1);
            let c = Rc::clone(&c);
            outer.defer(Box::new(move || c.set(c.get() + 1)));
        }));
        scheduler.run_until_stalled();
        assert_eq!(count.get(), 2);
    }
}
