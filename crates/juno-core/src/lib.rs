#![forbid(unsafe_code)]

//! Shared vocabulary for Juno.
//!
//! This crate owns the pieces every other layer agrees on:
//! - [`path`]: validation and ancestry of dot-delimited state paths
//! - [`store`]: [`PathStore`], the nested JSON tree addressed by those paths
//! - [`value`]: deep equality, stable stringification, and stable hashing
//! - [`mode`]: the [`RenderMode`] selector shared by runtime and config
//! - [`error`]: the crate-level [`JunoError`]
//! - [`logging`]: optional `tracing-subscriber` installation

pub mod error;
pub mod logging;
pub mod mode;
pub mod path;
pub mod store;
pub mod value;

pub use error::JunoError;
pub use mode::RenderMode;
pub use path::{is_valid_path, PathError};
pub use store::{MAX_ARRAY_PADDING, PathStore};
pub use value::{deep_equal, display_text, stable_hash, stable_stringify};

/// Re-exported so downstream crates name one JSON value type.
pub use serde_json::{Map, Value, json};
