//! `web_sys::Event` to [`DomEvent`].

use juno_dom::{DomEvent, NodeId};
use wasm_bindgen::JsCast;
use web_sys::{HtmlInputElement, HtmlSelectElement, HtmlTextAreaElement, TouchEvent};

use crate::dom::stored_id;

/// Convert `raw`. The target is the innermost node with an id, falling back
/// to the node the listener sits on.
pub(crate) fn to_dom_event(raw: &web_sys::Event, listener_node: NodeId) -> DomEvent {
    let target = raw.target();
    let target_id = target
        .as_ref()
        .and_then(|target| stored_id(target))
        .unwrap_or(listener_node);
    let mut event = DomEvent::new(raw.type_(), target_id).at(raw.time_stamp());
    if let Some(touch) = raw
        .dyn_ref::<TouchEvent>()
        .and_then(|touch_event| touch_event.changed_touches().get(0))
    {
        event = event.with_touch(f64::from(touch.client_x()), f64::from(touch.client_y()));
    }
    if let Some(value) = target.as_ref().and_then(input_value) {
        event = event.with_value(value);
    }
    event
}

fn input_value(target: &web_sys::EventTarget) -> Option<String> {
    if let Some(input) = target.dyn_ref::<HtmlInputElement>() {
        return Some(input.value());
    }
    if let Some(area) = target.dyn_ref::<HtmlTextAreaElement>() {
        return Some(area.value());
    }
    target.dyn_ref::<HtmlSelectElement>().map(HtmlSelectElement::value)
}
