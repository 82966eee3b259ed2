//! Shared, identity-bearing futures.
//!
//! A [`Deferred`] is what the renderer stores wherever a value may still be
//! on its way: attribute values, text, children, component props. It is a
//! [`Shared`] boxed local future, so any number of bindings can await the
//! same work and all of them see the same `Result`.
//!
//! # Invariants
//!
//! 1. Clones share one [`DeferredId`]; independently created deferreds never
//!    do.
//! 2. The wrapped work runs at most once regardless of how many clones are
//!    awaited.
//! 3. A failure is a value ([`AsyncError`]), never a panic through the
//!    awaiting code.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};

use futures::channel::oneshot;
use futures::future::{LocalBoxFuture, Shared, join_all};
use futures::{FutureExt, TryFutureExt};
use thiserror::Error;

/// Why a deferred value did not produce a result.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AsyncError {
    /// The producer reported a failure.
    #[error("{0}")]
    Rejected(String),
    /// The producing side went away without resolving.
    #[error("deferred value was dropped before it resolved")]
    Dropped,
}

impl AsyncError {
    /// Shorthand for [`AsyncError::Rejected`].
    #[must_use]
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected(message.into())
    }
}

/// Identity of a deferred value. Stable across clones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeferredId(u64);

impl DeferredId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw counter value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for DeferredId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "deferred#{}", self.0)
    }
}

type SharedResult<T> = Shared<LocalBoxFuture<'static, Result<T, AsyncError>>>;

/// A cloneable handle on a value that resolves later.
pub struct Deferred<T> {
    id: DeferredId,
    inner: SharedResult<T>,
}

impl<T> Deferred<T> {
    /// Identity shared by every clone.
    #[must_use]
    pub fn id(&self) -> DeferredId {
        self.id
    }
}

impl<T: Clone + 'static> Deferred<T> {
    /// Wrap a fallible future.
    pub fn new<F>(future: F) -> Self
    where
        F: Future<Output = Result<T, AsyncError>> + 'static,
    {
        Self {
            id: DeferredId::next(),
            inner: future.boxed_local().shared(),
        }
    }

    /// Wrap an infallible future.
    pub fn from_future<F>(future: F) -> Self
    where
        F: Future<Output = T> + 'static,
    {
        Self::new(future.map(Ok))
    }

    /// An already resolved value.
    pub fn ready(value: T) -> Self {
        Self::settled(Ok(value))
    }

    /// An already failed value.
    pub fn failed(error: AsyncError) -> Self {
        Self::settled(Err(error))
    }

    fn settled(outcome: Result<T, AsyncError>) -> Self {
        let deferred = Self::new(futures::future::ready(outcome));
        // Driving a ready future has no side effects; afterwards `peek` sees it.
        let _ = deferred.inner.clone().now_or_never();
        deferred
    }

    /// A deferred together with the handle that settles it.
    pub fn pending() -> (Self, Resolver<T>) {
        let (tx, rx) = oneshot::channel();
        let deferred = Self::new(rx.unwrap_or_else(|_canceled| Err(AsyncError::Dropped)));
        (deferred, Resolver { tx })
    }

    /// The outcome, if some clone has already driven the future to
    /// completion.
    #[must_use]
    pub fn peek(&self) -> Option<Result<T, AsyncError>> {
        self.inner.peek().cloned()
    }

    /// Poll once without a real waker and return the outcome if it is
    /// available right now. Ready values always are.
    #[must_use]
    pub fn try_now(&self) -> Option<Result<T, AsyncError>> {
        if let Some(done) = self.peek() {
            return Some(done);
        }
        self.inner.clone().now_or_never()
    }

    /// Whether the outcome is already known. Never polls, so the wrapped
    /// work does not start early.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.inner.peek().is_some()
    }

    /// Transform the successful value. The result has a new identity.
    pub fn map<U, F>(&self, f: F) -> Deferred<U>
    where
        U: Clone + 'static,
        F: FnOnce(T) -> U + 'static,
    {
        Deferred::new(self.inner.clone().map_ok(f))
    }
}

impl<T: Clone + 'static> Clone for Deferred<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            inner: self.inner.clone(),
        }
    }
}

impl<T: Clone + 'static> Future for Deferred<T> {
    type Output = Result<T, AsyncError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.inner.poll_unpin(cx)
    }
}

impl<T> fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Deferred").field(&self.id).finish()
    }
}

impl<T> PartialEq for Deferred<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

/// Settles the deferred created alongside it by [`Deferred::pending`].
/// Dropping it unresolved yields [`AsyncError::Dropped`].
pub struct Resolver<T> {
    tx: oneshot::Sender<Result<T, AsyncError>>,
}

impl<T> Resolver<T> {
    /// Fulfil with `value`. Returns `false` if every clone of the deferred
    /// is already gone.
    pub fn resolve(self, value: T) -> bool {
        self.tx.send(Ok(value)).is_ok()
    }

    /// Fail with `message`.
    pub fn reject(self, message: impl Into<String>) -> bool {
        self.tx.send(Err(AsyncError::rejected(message))).is_ok()
    }
}

impl<T> fmt::Debug for Resolver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("canceled", &self.tx.is_canceled())
            .finish()
    }
}

/// A value that is either ready now or will be.
pub enum MaybeAsync<T> {
    Ready(T),
    Pending(Deferred<T>),
}

impl<T: Clone + 'static> MaybeAsync<T> {
    /// Normalize to a deferred. Ready values become already-resolved
    /// deferreds.
    pub fn into_deferred(self) -> Deferred<T> {
        match self {
            Self::Ready(value) => Deferred::ready(value),
            Self::Pending(deferred) => deferred,
        }
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }
}

impl<T: Clone + 'static> From<Deferred<T>> for MaybeAsync<T> {
    fn from(deferred: Deferred<T>) -> Self {
        Self::Pending(deferred)
    }
}

impl<T: fmt::Debug> fmt::Debug for MaybeAsync<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ready(value) => f.debug_tuple("Ready").field(value).finish(),
            Self::Pending(deferred) => f.debug_tuple("Pending").field(&deferred.id).finish(),
        }
    }
}

/// Await every deferred concurrently. One failure does not disturb the
/// others; results come back in input order.
pub async fn resolve_all<T, I>(items: I) -> Vec<Result<T, AsyncError>>
where
    T: Clone + 'static,
    I: IntoIterator<Item = Deferred<T>>,
{
    join_all(items).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;
    use pretty_assertions::assert_eq;

    #[test]
    fn clones_share_identity_and_outcome() {
        let (deferred, resolver) = Deferred::<i32>::pending();
        let other = deferred.clone();
        assert_eq!(deferred.id(), other.id());
        assert!(deferred.try_now().is_none());
        assert!(resolver.resolve(7));
        assert_eq!(block_on(other), Ok(7));
        assert_eq!(deferred.peek(), Some(Ok(7)));
    }

    #[test]
    fn distinct_deferreds_have_distinct_ids() {
        let a = Deferred::ready(1);
        let b = Deferred::ready(1);
        assert_ne!(a.id(), b.id());
        assert_ne!(a, b);
    }

    #[test]
    fn ready_values_settle_immediately() {
        let ready = Deferred::ready("x".to_owned());
        assert!(ready.is_settled());
        assert_eq!(ready.try_now(), Some(Ok("x".to_owned())));
    }

    #[test]
    fn checking_settlement_does_not_start_work() {
        let started = std::rc::Rc::new(std::cell::Cell::new(false));
        let flag = std::rc::Rc::clone(&started);
        let job = Deferred::from_future(async move {
            flag.set(true);
            5
        });
        assert!(!job.is_settled());
        assert!(!started.get());
        assert_eq!(block_on(job.clone()), Ok(5));
        assert!(job.is_settled());
    }

    #[test]
    fn dropped_resolver_reports_dropped() {
        let (deferred, resolver) = Deferred::<i32>::pending();
        drop(resolver);
        assert_eq!(block_on(deferred), Err(AsyncError::Dropped));
    }

    #[test]
    fn resolve_all_keeps_order_and_isolates_failures() {
        let items = vec![
            Deferred::ready(1),
            Deferred::failed(AsyncError::rejected("boom")),
            Deferred::ready(3),
        ];
        let results = block_on(resolve_all(items));
        assert_eq!(
            results,
            vec![Ok(1), Err(AsyncError::rejected("boom")), Ok(3)]
        );
    }

    #[test]
    fn map_transforms_success() {
        let doubled = Deferred::map(&Deferred::ready(21), |n| n * 2);
        assert_eq!(block_on(doubled), Ok(42));
    }
}
