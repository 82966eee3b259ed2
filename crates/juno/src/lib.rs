#![forbid(unsafe_code)]

//! Juno: reactive state and DOM rendering with async-aware components.
//!
//! This crate provides:
//! - [`App`]: builds a [`Context`](juno_runtime::Context) from
//!   [`AppOptions`] and mounts a root [`Node`](juno_runtime::Node)
//! - [`AppConfig`]: the file-loadable part of the options (JSON or TOML)
//! - [`prelude`]: the names most applications need
//!
//! The engine itself lives in the member crates:
//!
//! | crate | role |
//! |-------|------|
//! | `juno-core` | path store, render mode, value helpers |
//! | `juno-state` | state manager, dependency tracking, middleware, batching |
//! | `juno-async` | deferred values, scheduler, resolver, TTL cache |
//! | `juno-dom` | DOM abstraction and in-memory DOM |
//! | `juno-runtime` | components, renderer, context |
//! | `juno-web` | browser backend (feature `web`) |

mod app;
mod config;
mod options;
pub mod prelude;

pub use app::{App, FATAL_ERROR_CLASS};
pub use config::{AppConfig, ConfigError};
pub use options::AppOptions;

#[cfg(feature = "web")]
pub use juno_web::{WasmScheduler, WebDom, WebError};

#[cfg(feature = "test-helpers")]
pub use juno_runtime::testing;
