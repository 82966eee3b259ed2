//! Event handler props.
//!
//! `onInput` listens for `input`, `onKeyDown` for `keydown`, and so on. An
//! `onClick` handler additionally recognizes taps on touch screens: a touch
//! that ends within [`TAP_MAX_DURATION_MS`] and never strays more than
//! [`TAP_MAX_MOVEMENT_PX`] from where it started fires the handler
//! immediately, and the native click that follows it is swallowed.

use std::cell::Cell;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::rc::Rc;

use juno_dom::{DomEvent, ListenerId, NodeId, TouchPoint};
use smallvec::{SmallVec, smallvec};
use tracing::error;

use crate::context::Context;
use crate::error::panic_message;
use crate::props::EventHandler;

/// Longest touch that still counts as a tap.
pub const TAP_MAX_DURATION_MS: f64 = 300.0;
/// Farthest a touch may move and still count as a tap.
pub const TAP_MAX_MOVEMENT_PX: f64 = 10.0;
/// A native click this soon after a tap is the tap's echo.
const CLICK_ECHO_WINDOW_MS: f64 = 500.0;

pub(super) fn is_event_key(key: &str) -> bool {
    key.len() > 2 && key.starts_with("on") && key[2..].starts_with(|c: char| c.is_ascii_uppercase())
}

fn event_name(key: &str) -> String {
    key[2..].to_ascii_lowercase()
}

/// Attach `handler` for prop `key`; returns every listener registered.
pub(super) fn attach(ctx: &Context, node: NodeId, key: &str, handler: EventHandler) -> SmallVec<[ListenerId; 4]> {
    let dom = ctx.dom();
    let name = event_name(key);
    if name != "click" {
        let callback = Rc::new(move |event: &DomEvent| invoke(&handler, event));
        return smallvec![dom.add_event_listener(node, &name, callback)];
    }

    let tap = Rc::new(TapTracker::default());
    let on_click = {
        let (tap, handler) = (Rc::clone(&tap), Rc::clone(&handler));
        Rc::new(move |event: &DomEvent| {
            if !tap.is_echo(event.time_stamp) {
                invoke(&handler, event);
            }
        })
    };
    let on_start = {
        let tap = Rc::clone(&tap);
        Rc::new(move |event: &DomEvent| tap.start(event))
    };
    let on_move = {
        let tap = Rc::clone(&tap);
        Rc::new(move |event: &DomEvent| tap.moved(event))
    };
    let on_end = Rc::new(move |event: &DomEvent| {
        if tap.end(event) {
            event.prevent_default();
            invoke(&handler, event);
        }
    });
    smallvec![
        dom.add_event_listener(node, "click", on_click),
        dom.add_event_listener(node, "touchstart", on_start),
        dom.add_event_listener(node, "touchmove", on_move),
        dom.add_event_listener(node, "touchend", on_end),
    ]
}

fn invoke(handler: &EventHandler, event: &DomEvent) {
    if let Err(payload) = catch_unwind(AssertUnwindSafe(|| handler(event))) {
        error!(
            event = %event.event_type,
            target = %event.target,
            panic = %panic_message(&*payload),
            "event handler panicked"
        );
    }
}

#[derive(Default)]
struct TapTracker {
    origin: Cell<Option<(f64, TouchPoint)>>,
    strayed: Cell<bool>,
    last_tap: Cell<Option<f64>>,
}

impl TapTracker {
    fn start(&self, event: &DomEvent) {
        self.origin.set(event.touch.map(|point| (event.time_stamp, point)));
        self.strayed.set(false);
    }

    fn moved(&self, event: &DomEvent) {
        if let (Some((_, origin)), Some(point)) = (self.origin.get(), event.touch) {
            if distance(origin, point) > TAP_MAX_MOVEMENT_PX {
                self.strayed.set(true);
            }
        }
    }

    /// Whether the touch that just ended was a tap.
    fn end(&self, event: &DomEvent) -> bool {
        let Some((started, origin)) = self.origin.take() else {
            return false;
        };
        let strayed = self.strayed.replace(false)
            || event
                .touch
                .is_some_and(|point| distance(origin, point) > TAP_MAX_MOVEMENT_PX);
        let is_tap = !strayed && event.time_stamp - started <= TAP_MAX_DURATION_MS;
        if is_tap {
            self.last_tap.set(Some(event.time_stamp));
        }
        is_tap
    }

    fn is_echo(&self, click_time: f64) -> bool {
        match self.last_tap.take() {
            Some(tapped) => click_time - tapped <= CLICK_ECHO_WINDOW_MS,
            None => false,
        }
    }
}

fn distance(a: TouchPoint, b: TouchPoint) -> f64 {
    (a.x - b.x).hypot(a.y - b.y)
}
