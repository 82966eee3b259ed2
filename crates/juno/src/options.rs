//! Construction options for [`App`](crate::App).

use std::fmt;
use std::rc::Rc;

use juno_core::RenderMode;
use juno_runtime::{
    ComponentContext, ComponentError, ComponentFn, ComponentOutput, HeadlessFn, HeadlessOptions, HeadlessOutput, Props,
};
use juno_state::Middleware;
use serde_json::{Map, Value};
use tracing::Level;

use crate::config::{AppConfig, ConfigError};

/// Everything an [`App`](crate::App) is built from.
///
/// ```
/// use juno::prelude::*;
///
/// let options = AppOptions::new()
///     .states(json!({"count": 0}))
///     .render_mode(RenderMode::Batch)
///     .component("Hello", |_props, _cx| Ok(Node::text("hi").into()));
/// # let _ = options;
/// ```
#[derive(Default)]
pub struct AppOptions {
    pub(crate) states: Map<String, Value>,
    pub(crate) middleware: Vec<Rc<dyn Middleware>>,
    pub(crate) render_mode: RenderMode,
    pub(crate) components: Vec<(String, ComponentFn)>,
    pub(crate) headless: Vec<(String, HeadlessFn, HeadlessOptions)>,
    pub(crate) log_level: Option<Level>,
}

impl AppOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Initial state. Non-object values are ignored with a warning.
    #[must_use]
    pub fn states(mut self, states: Value) -> Self {
        match states {
            Value::Object(map) => self.states = map,
            other => tracing::warn!(?other, "initial state must be an object; ignored"),
        }
        self
    }

    /// Append a middleware. Middleware run in the order they were added.
    #[must_use]
    pub fn middleware(mut self, middleware: impl Middleware + 'static) -> Self {
        self.middleware.push(Rc::new(middleware));
        self
    }

    #[must_use]
    pub fn render_mode(mut self, mode: RenderMode) -> Self {
        self.render_mode = mode;
        self
    }

    #[must_use]
    pub fn component<F>(mut self, name: &str, component: F) -> Self
    where
        F: Fn(&Props, &ComponentContext) -> Result<ComponentOutput, ComponentError> + 'static,
    {
        self.components.push((name.to_owned(), Rc::new(component)));
        self
    }

    /// Headless components are registered after every regular component,
    /// in the order added, so an `auto_init` one can rely on them.
    #[must_use]
    pub fn headless_component<F>(mut self, name: &str, component: F, options: HeadlessOptions) -> Self
    where
        F: Fn(&ComponentContext) -> Result<HeadlessOutput, ComponentError> + 'static,
    {
        let component: HeadlessFn = Rc::new(component);
        self.headless.push((name.to_owned(), component, options));
        self
    }

    /// Overlay file settings: `states` keys replace the builder's, and a
    /// present `renderMode`/`logLevel` wins.
    ///
    /// # Errors
    ///
    /// [`ConfigError::LogLevel`] for an unrecognized level.
    pub fn with_config(mut self, config: AppConfig) -> Result<Self, ConfigError> {
        self.log_level = config.level()?.or(self.log_level);
        if let Some(mode) = config.render_mode {
            self.render_mode = mode;
        }
        self.states.extend(config.states);
        Ok(self)
    }

    #[must_use]
    pub fn log_level(&self) -> Option<Level> {
        self.log_level
    }
}

impl fmt::Debug for AppOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppOptions")
            .field("states", &self.states)
            .field("middleware", &self.middleware.iter().map(|m| m.name()).collect::<Vec<_>>())
            .field("render_mode", &self.render_mode)
            .field("components", &self.components.iter().map(|(name, _)| name).collect::<Vec<_>>())
            .field("headless", &self.headless.iter().map(|(name, _, _)| name).collect::<Vec<_>>())
            .field("log_level", &self.log_level)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn config_overlays_builder() {
        let options = AppOptions::new()
            .states(json!({"count": 1, "theme": "light"}))
            .with_config(AppConfig::from_json(r#"{"states": {"theme": "dark"}, "renderMode": "batch"}"#).unwrap())
            .unwrap();
        assert_eq!(Value::Object(options.states.clone()), json!({"count": 1, "theme": "dark"}));
        assert_eq!(options.render_mode, RenderMode::Batch);
        assert_eq!(options.log_level(), None);
    }

    #[test]
    fn non_object_state_is_ignored() {
        let options = AppOptions::new().states(json!([1, 2]));
        assert!(options.states.is_empty());
    }
}
