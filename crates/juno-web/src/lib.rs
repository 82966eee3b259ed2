#![forbid(unsafe_code)]

//! Browser backend for Juno.
//!
//! This crate provides:
//! - [`WebDom`]: [`DomBackend`](juno_dom::DomBackend) over `web-sys` nodes
//! - [`WasmScheduler`]: [`Scheduler`](juno_async::Scheduler) on
//!   `wasm_bindgen_futures::spawn_local`
//! - [`console::init`]: `tracing` events to the browser console
//!
//! Everything here compiles on any target, but only does something useful
//! on `wasm32` inside a page.

pub mod console;
mod dom;
mod error;
mod event;
mod scheduler;

pub use dom::{NODE_ID_PROPERTY, WebDom};
pub use error::WebError;
pub use scheduler::WasmScheduler;
