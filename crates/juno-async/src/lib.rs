#![forbid(unsafe_code)]

//! Async values for Juno.
//!
//! Anything the renderer accepts synchronously may also arrive later. This
//! crate supplies the pieces that make that uniform:
//!
//! - [`Deferred`]: a cloneable, shared future of `Result<T, AsyncError>` with
//!   a stable identity. Every clone observes the same outcome.
//! - [`MaybeAsync`]: a value that is either ready now or deferred.
//! - [`Scheduler`]: where continuations run. [`LocalScheduler`] drives a
//!   `futures` [`LocalPool`](futures::executor::LocalPool) and is used by
//!   tests and native hosts; the browser backend supplies its own.
//! - [`AsyncResolver`]: counts in-flight work during a tracked pass and
//!   fires completion callbacks once everything has settled.
//! - [`TtlCache`]: short-lived memo of deferred results keyed by a stable
//!   string, so identical requests issued close together share one future.

pub mod cache;
pub mod deferred;
pub mod resolver;
pub mod scheduler;

pub use cache::{ASYNC_CACHE_TTL, TtlCache};
pub use deferred::{AsyncError, Deferred, DeferredId, MaybeAsync, Resolver, resolve_all};
pub use resolver::{AsyncResolver, CompletionHandle};
pub use scheduler::{LocalScheduler, Scheduler};
