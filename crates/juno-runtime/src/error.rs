//! Runtime error types.
//!
//! None of these escape [`render`](crate::Context::render) or
//! `set_state`: the renderer logs them and turns them into inline error
//! nodes. They exist so the internal plumbing can use `?` and so tests can
//! match on what went wrong.

use std::any::Any;

use juno_async::AsyncError;
use juno_dom::DomError;
use thiserror::Error;

/// A component could not be constructed or rendered.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ComponentError {
    #[error("{0}")]
    Failed(String),
    #[error("component panicked: {0}")]
    Panicked(String),
    #[error("async value failed: {0}")]
    Async(#[from] AsyncError),
    #[error("no component registered as `{0}`")]
    NotRegistered(String),
}

impl ComponentError {
    /// Shorthand for [`ComponentError::Failed`].
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// Rendering a node description failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderError {
    #[error(transparent)]
    Dom(#[from] DomError),
    #[error(transparent)]
    Component(#[from] ComponentError),
    #[error("invalid node description: {0}")]
    InvalidNode(String),
    #[error("render panicked: {0}")]
    Panicked(String),
}

/// Best-effort message from a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}
