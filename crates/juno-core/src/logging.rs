//! Optional `tracing-subscriber` installation.
//!
//! Library code only emits `tracing` events; hosts decide where they go.
//! With the `logging` feature, [`init`] installs a global subscriber with an
//! `EnvFilter` (`JUNO_LOG`, falling back to the given default directive).

/// Output format for [`init`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Pretty,
    /// One JSON object per event.
    Json,
}

/// Environment variable consulted for the filter directive.
pub const LOG_ENV: &str = "JUNO_LOG";

/// Install a global subscriber.
///
/// # Errors
///
/// [`JunoError::Logging`](crate::JunoError::Logging) if a global subscriber
/// is already set.
#[cfg(feature = "logging")]
pub fn init(format: LogFormat, default_directive: &str) -> Result<(), crate::JunoError> {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_env(LOG_ENV)
        .unwrap_or_else(|_| EnvFilter::new(default_directive));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let result = match format {
        LogFormat::Pretty => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    result.map_err(|err| crate::JunoError::Logging(err.to_string()))
}

/// Without the `logging` feature there is nothing to install.
#[cfg(not(feature = "logging"))]
pub fn init(_format: LogFormat, _default_directive: &str) -> Result<(), crate::JunoError> {
    Ok(())
}
