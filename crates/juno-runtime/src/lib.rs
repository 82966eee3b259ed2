#![forbid(unsafe_code)]

//! Component manager, reactive renderer, and shared context for Juno.
//!
//! This crate provides:
//! - [`Node`] / [`Props`]: what a UI looks like, with [`Dynamic`] values that
//!   are static, reactive (closures over state), or deferred (futures)
//! - [`Context`]: the engine root handed to every component, with
//!   [`Components`] and [`Utils`] views
//! - [`ComponentOutput`] / [`Lifecycle`]: what components return
//! - headless components ([`HeadlessOutput`], [`HeadlessOptions`])
//!
//! # Architecture
//!
//! ```text
//!  set_state ──▶ StateManager ──notify──▶ Binding::run ──▶ DomBackend
//!                     ▲                        │
//!                     └──── tracked reads ─────┘
//! ```
//!
//! Rendering a description creates DOM nodes through a
//! [`DomBackend`](juno_dom::DomBackend). Each reactive prop becomes a
//! binding subscribed to exactly the state paths its closure read. Async
//! work runs on the context's [`Scheduler`](juno_async::Scheduler).

mod component;
mod context;
mod error;
mod headless;
mod node;
mod props;
mod renderer;

#[cfg(any(test, feature = "test-helpers"))]
pub mod testing;

pub use component::{
    ComponentContext, ComponentFn, ComponentOutput, InstanceInfo, LOCAL_STATE_ROOT, Lifecycle, LifecycleHooks,
    LocalState, RenderFn,
};
pub use context::{Components, Context, Utils, WeakContext};
pub use error::{ComponentError, RenderError};
pub use headless::{HeadlessFn, HeadlessOptions, HeadlessOutput, HeadlessStatus};
pub use node::Node;
pub use props::{Dynamic, EventHandler, Prop, Props};
pub use renderer::{BindingStatus, DEMOTION_THRESHOLD, RECYCLE_POOL_CAP, TAP_MAX_DURATION_MS, TAP_MAX_MOVEMENT_PX};
