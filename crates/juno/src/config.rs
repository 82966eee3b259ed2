//! Serializable application settings.
//!
//! The subset of [`AppOptions`](crate::AppOptions) that can live in a file:
//!
//! ```toml
//! renderMode = "batch"
//! logLevel = "debug"
//!
//! [states]
//! count = 0
//! user = { name = "Ada" }
//! ```
//!
//! Functions, middleware, and components are code and stay in the builder.

use std::path::Path;
use std::str::FromStr;

use juno_core::RenderMode;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::Level;

/// Configuration loading failure.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid JSON config: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid TOML config: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("could not read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("unsupported config extension: {0:?}")]
    UnknownFormat(String),
    #[error("`states` must be an object, got {0}")]
    StatesNotObject(&'static str),
    #[error("unknown log level: {0:?}")]
    LogLevel(String),
}

/// File-loadable settings.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct AppConfig {
    /// Initial state, merged key by key over the builder's.
    pub states: Map<String, Value>,
    pub render_mode: Option<RenderMode>,
    /// `error`, `warn`, `info`, `debug` or `trace`.
    pub log_level: Option<String>,
}

impl AppConfig {
    /// # Errors
    ///
    /// [`ConfigError::Json`] on malformed input or unknown keys.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let value: Value = serde_json::from_str(text)?;
        if let Some(states) = value.get("states") {
            check_states(states)?;
        }
        Ok(serde_json::from_value(value)?)
    }

    /// # Errors
    ///
    /// [`ConfigError::Toml`] on malformed input or unknown keys.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Load `path`, picking the format from its extension.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Io`] if the file cannot be read,
    /// [`ConfigError::UnknownFormat`] for anything but `.json`/`.toml`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::from_json(&text),
            Some("toml") => Self::from_toml(&text),
            other => Err(ConfigError::UnknownFormat(other.unwrap_or_default().to_owned())),
        }
    }

    /// Parsed [`log_level`](Self::log_level), if set.
    ///
    /// # Errors
    ///
    /// [`ConfigError::LogLevel`] for an unrecognized name.
    pub fn level(&self) -> Result<Option<Level>, ConfigError> {
        self.log_level
            .as_deref()
            .map(|name| Level::from_str(name).map_err(|_| ConfigError::LogLevel(name.to_owned())))
            .transpose()
    }
}

fn check_states(states: &Value) -> Result<(), ConfigError> {
    let kind = match states {
        Value::Object(_) => return Ok(()),
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
    };
    Err(ConfigError::StatesNotObject(kind))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn json_and_toml_agree() {
        let from_json = AppConfig::from_json(
            r#"{"renderMode": "batch", "logLevel": "debug", "states": {"count": 1, "user": {"name": "Ada"}}}"#,
        )
        .unwrap();
        let from_toml = AppConfig::from_toml(
            r#"
            renderMode = "batch"
            logLevel = "debug"

            [states]
            count = 1
            user = { name = "Ada" }
            "#,
        )
        .unwrap();
        assert_eq!(from_json, from_toml);
        assert_eq!(from_json.render_mode, Some(RenderMode::Batch));
        assert_eq!(from_json.level().unwrap(), Some(Level::DEBUG));
        assert_eq!(from_json.states.get("user"), Some(&json!({"name": "Ada"})));
    }

    #[test]
    fn empty_config_is_default() {
        assert_eq!(AppConfig::from_json("{}").unwrap(), AppConfig::default());
        assert_eq!(AppConfig::from_toml("").unwrap(), AppConfig::default());
    }

    #[test]
    fn legacy_mode_name_is_accepted() {
        let config = AppConfig::from_json(r#"{"renderMode": "optimized"}"#).unwrap();
        assert_eq!(config.render_mode, Some(RenderMode::Batch));
    }

    #[test]
    fn bad_input_is_reported() {
        assert!(matches!(
            AppConfig::from_json(r#"{"states": [1, 2]}"#),
            Err(ConfigError::StatesNotObject("an array"))
        ));
        assert!(matches!(AppConfig::from_json(r#"{"colour": "red"}"#), Err(ConfigError::Json(_))));
        assert!(matches!(AppConfig::from_toml("renderMode = 3"), Err(ConfigError::Toml(_))));
        let config = AppConfig {
            log_level: Some("loud".into()),
            ..AppConfig::default()
        };
        assert!(matches!(config.level(), Err(ConfigError::LogLevel(level)) if level == "loud"));
    }

    #[test]
    fn unknown_extension_is_rejected() {
        let dir = std::env::temp_dir().join("juno-config-test.yaml");
        std::fs::write(&dir, "states: {}").unwrap();
        assert!(matches!(AppConfig::load(&dir), Err(ConfigError::UnknownFormat(ext)) if ext == "yaml"));
        let _ = std::fs::remove_file(dir);
    }
}
