//! Crate-level error type.

use thiserror::Error;

use crate::path::PathError;

/// Errors surfaced by Juno's shared layer.
///
/// Most of the engine degrades silently instead of returning these; they
/// appear where a caller explicitly asked for validation (configuration,
/// path checks, logging setup).
#[derive(Debug, Error)]
pub enum JunoError {
    #[error(transparent)]
    Path(#[from] PathError),
    #[error("unknown render mode: {0:?}")]
    UnknownRenderMode(String),
    #[error("logging already initialized: {0}")]
    Logging(String),
}
