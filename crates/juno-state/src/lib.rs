#![forbid(unsafe_code)]

//! Path-addressed application state for Juno.
//!
//! - [`StateManager`]: owns the [`PathStore`](juno_core::PathStore); reads,
//!   writes, middleware, batching, and change notification.
//! - [`DependencyTracker`]: records which paths a closure read so reactive
//!   bindings can subscribe to exactly those paths.
//! - [`Subscription`]: RAII guard that unsubscribes on drop.
//! - [`Middleware`]: write interceptors run in registration order.
//!
//! # Architecture
//!
//! Everything is single-threaded: the manager is an `Rc` handle over
//! `RefCell` state, and no borrow is held while user code (middleware,
//! subscribers, re-run callbacks) executes. That is what allows a subscriber
//! to call back into the manager.
//!
//! # Invariants
//!
//! 1. Writing a value deep-equal to the current one is a no-op.
//! 2. A path is never re-entered while its own write is still in progress
//!    (middleware or notification); the nested write is dropped.
//! 3. While a batch is active, writes are queued and nothing is notified.
//! 4. Notification order per write: internal exact, internal ancestors
//!    (nearest first), internal descendants, then external listeners.
//! 5. One failing subscriber never prevents the rest of a wave.

pub mod batch;
pub mod manager;
pub mod middleware;
pub mod registry;
pub mod tracker;

pub use batch::QueuedWrite;
pub use manager::{MAX_UPDATE_DEPTH, RejectReason, SetOutcome, StateManager, WeakStateManager};
pub use middleware::{FnMiddleware, Middleware, MiddlewareArgs, MiddlewareError, from_fn};
pub use registry::{ListenerId, StateChange, Subscription};
pub use tracker::{Dependencies, DependencyTracker};
