//! Write interceptors.
//!
//! Middleware run in registration order on every applied write (and on every
//! queued write when a batch ends). Each one sees the value produced by the
//! previous one and may replace it.
//!
//! # Failure Modes
//!
//! | Outcome | Effect |
//! |---------|--------|
//! | `Ok(Some(v))` | `v` replaces the pending value |
//! | `Ok(None)` | pending value unchanged |
//! | `Err(e)` | logged; this middleware is skipped, the write continues |

use std::fmt;

use serde_json::Value;
use thiserror::Error;

use crate::StateManager;

/// Arguments handed to each middleware.
pub struct MiddlewareArgs<'a> {
    /// Path being written.
    pub path: &'a str,
    /// Value currently stored at `path`.
    pub old_value: Option<&'a Value>,
    /// Pending value (after any earlier middleware).
    pub new_value: &'a Value,
    /// Caller-supplied context record.
    pub context: &'a Value,
    /// The state manager, for reads (and writes to other paths).
    pub state: &'a StateManager,
}

impl fmt::Debug for MiddlewareArgs<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MiddlewareArgs")
            .field("path", &self.path)
            .field("old_value", &self.old_value)
            .field("new_value", &self.new_value)
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

/// Error raised by a middleware.
#[derive(Debug, Error)]
pub enum MiddlewareError {
    /// The middleware refused to transform the value.
    #[error("middleware rejected write: {0}")]
    Rejected(String),
    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error>),
}

/// A write interceptor.
pub trait Middleware {
    /// Name used in log output.
    fn name(&self) -> &str {
        "middleware"
    }

    /// Inspect a pending write and optionally replace its value.
    fn apply(&self, args: &MiddlewareArgs<'_>) -> Result<Option<Value>, MiddlewareError>;
}

impl<F> Middleware for F
where
    F: Fn(&MiddlewareArgs<'_>) -> Result<Option<Value>, MiddlewareError>,
{
    fn apply(&self, args: &MiddlewareArgs<'_>) -> Result<Option<Value>, MiddlewareError> {
        self(args)
    }
}

/// A closure middleware with a name for log output.
pub struct FnMiddleware<F> {
    name: String,
    f: F,
}

/// Wrap a closure as a named middleware.
///
/// Going through this constructor also pins the closure's signature, so
/// `Ok(None)` and `Err(..)` bodies need no type annotations.
pub fn from_fn<F>(name: impl Into<String>, f: F) -> FnMiddleware<F>
where
    F: Fn(&MiddlewareArgs<'_>) -> Result<Option<Value>, MiddlewareError>,
{
    FnMiddleware {
        name: name.into(),
        f,
    }
}

impl<F> Middleware for FnMiddleware<F>
where
    F: Fn(&MiddlewareArgs<'_>) -> Result<Option<Value>, MiddlewareError>,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&self, args: &MiddlewareArgs<'_>) -> Result<Option<Value>, MiddlewareError> {
        (self.f)(args)
    }
}

impl<F> fmt::Debug for FnMiddleware<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnMiddleware").field("name", &self.name).finish_non_exhaustive()
    }
}
