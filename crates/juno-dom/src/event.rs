//! Events delivered to listeners.

use std::cell::Cell;

use crate::node::NodeId;

/// A touch contact point in client coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TouchPoint {
    pub x: f64,
    pub y: f64,
}

/// Backend-neutral event.
///
/// Carries only what the renderer reads: the type, the target, a timestamp
/// for gesture timing, the primary touch point, and the input value.
#[derive(Debug, Clone)]
pub struct DomEvent {
    pub event_type: String,
    pub target: NodeId,
    /// Milliseconds, monotonic within one page.
    pub time_stamp: f64,
    pub touch: Option<TouchPoint>,
    pub value: Option<String>,
    default_prevented: Cell<bool>,
}

impl DomEvent {
    #[must_use]
    pub fn new(event_type: impl Into<String>, target: NodeId) -> Self {
        Self {
            event_type: event_type.into(),
            target,
            time_stamp: 0.0,
            touch: None,
            value: None,
            default_prevented: Cell::new(false),
        }
    }

    #[must_use]
    pub fn at(mut self, time_stamp: f64) -> Self {
        self.time_stamp = time_stamp;
        self
    }

    #[must_use]
    pub fn with_touch(mut self, x: f64, y: f64) -> Self {
        self.touch = Some(TouchPoint { x, y });
        self
    }

    #[must_use]
    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn prevent_default(&self) {
        self.default_prevented.set(true);
    }

    #[must_use]
    pub fn default_prevented(&self) -> bool {
        self.default_prevented.get()
    }
}
