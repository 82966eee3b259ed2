use thiserror::Error;

/// Browser setup failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WebError {
    #[error("no global window")]
    NoWindow,
    #[error("window has no document")]
    NoDocument,
    #[error("no element matches `{0}`")]
    NotFound(String),
    #[error("logging already initialized: {0}")]
    Logging(String),
}
