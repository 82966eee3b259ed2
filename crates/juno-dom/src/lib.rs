#![forbid(unsafe_code)]

//! DOM abstraction for Juno.
//!
//! The renderer never touches a DOM directly. It talks to a [`DomBackend`]
//! and refers to nodes by [`NodeId`] tokens. Side tables (bindings,
//! listeners, component instances) are keyed by those tokens and removed
//! explicitly on cleanup.
//!
//! Two backends exist:
//!
//! - [`MemoryDom`] (this crate): an arena-backed tree used by tests, native
//!   hosts, and server-side rendering via [`MemoryDom::outer_html`].
//! - `WebDom` (`juno-web`): `web-sys` nodes in a real browser.

pub mod backend;
pub mod event;
pub mod memory;
pub mod node;

pub use backend::{DomBackend, DomError, EventCallback, ListenerId};
pub use event::{DomEvent, TouchPoint};
pub use memory::MemoryDom;
pub use node::{NodeId, NodeKind};
