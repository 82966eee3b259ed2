//! Writing prop values to elements.
//!
//! | key | write |
//! |-----|-------|
//! | `text` | text content (`null` clears) |
//! | `innerHTML` | raw markup |
//! | `style` | object or `"a: b; c: d"` string, merged into inline style |
//! | `className` / `class` | class list; strings, arrays, or `{name: bool}` maps |
//! | `htmlFor` | `for` attribute |
//! | `tabIndex` | property |
//! | `data-*`, `aria-*` | attribute |
//! | anything else | property if writable, attribute otherwise |
//!
//! For attributes, `null` and `false` remove, `true` sets the empty string.

use std::rc::Rc;

use juno_async::{AsyncError, Deferred, resolve_all};
use juno_core::display_text;
use juno_dom::{DomBackend, NodeId};
use serde_json::Value;
use tracing::trace;

use super::binding::Sink;
use crate::context::Context;

const LOADING_CLASS: &str = "juno-loading";
const ERROR_CLASS: &str = "juno-async-error";
const LOADING_OPACITY: &str = "0.6";

/// Sink writing one prop key.
pub(super) fn sink(key: &str) -> Sink<Value> {
    let key = key.to_owned();
    Sink {
        apply: Rc::new(move |ctx: &Context, node, result: Result<Value, AsyncError>| {
            hide_loading(ctx.dom(), node);
            match result {
                Ok(value) => apply_value(ctx, node, &key, &value),
                Err(err) => mark_error(ctx.dom(), node, &key, &err),
            }
        }),
        loading: Some(Rc::new(|ctx: &Context, node| show_loading(ctx.dom(), node))),
    }
}

pub(super) fn apply_value(ctx: &Context, node: NodeId, key: &str, value: &Value) {
    let dom = ctx.dom();
    match key {
        "text" | "textContent" => {
            super::clear_children(ctx, node);
            dom.set_text_content(node, &display_text(value));
        }
        "innerHTML" => {
            super::clear_children(ctx, node);
            dom.set_inner_html(node, &display_text(value));
        }
        "style" => apply_style(dom, node, value),
        _ => apply_attribute(dom, node, key, value),
    }
}

fn apply_attribute(dom: &dyn DomBackend, node: NodeId, key: &str, value: &Value) {
    match key {
        "className" | "class" => {
            let classes = class_list(value);
            if !dom.set_property(node, "className", &Value::String(classes.clone())) {
                set_or_remove(dom, node, "class", &Value::String(classes));
            }
        }
        "htmlFor" => set_or_remove(dom, node, "for", value),
        "tabIndex" => {
            if !dom.set_property(node, "tabIndex", value) {
                set_or_remove(dom, node, "tabindex", value);
            }
        }
        _ if key.starts_with("data-") || key.starts_with("aria-") => set_or_remove(dom, node, key, value),
        _ if dom.has_writable_property(node, key) => {
            dom.set_property(node, key, value);
        }
        _ => set_or_remove(dom, node, key, value),
    }
}

fn set_or_remove(dom: &dyn DomBackend, node: NodeId, name: &str, value: &Value) {
    match value {
        Value::Null | Value::Bool(false) => dom.remove_attribute(node, name),
        Value::Bool(true) => dom.set_attribute(node, name, ""),
        Value::String(s) if s.is_empty() && name == "class" => dom.remove_attribute(node, name),
        other => dom.set_attribute(node, name, &display_text(other)),
    }
}

/// Flatten the accepted class value shapes into a space-separated list.
fn class_list(value: &Value) -> String {
    match value {
        Value::Null | Value::Bool(_) => String::new(),
        Value::String(s) => s.split_whitespace().collect::<Vec<_>>().join(" "),
        Value::Array(items) => items
            .iter()
            .map(class_list)
            .filter(|c| !c.is_empty())
            .collect::<Vec<_>>()
            .join(" "),
        Value::Object(map) => map
            .iter()
            .filter(|(_, on)| truthy(on))
            .map(|(name, _)| name.as_str())
            .collect::<Vec<_>>()
            .join(" "),
        Value::Number(n) => n.to_string(),
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

// ---------------------------------------------------------------------------
// Style
// ---------------------------------------------------------------------------

fn apply_style(dom: &dyn DomBackend, node: NodeId, value: &Value) {
    match value {
        Value::Null => dom.clear_style(node),
        Value::Object(map) => {
            for (name, value) in map {
                let text = match value {
                    Value::Null | Value::Bool(false) => String::new(),
                    other => display_text(other),
                };
                dom.set_style(node, &css_name(name), &text);
            }
        }
        Value::String(css) => {
            for declaration in css.split(';') {
                if let Some((name, value)) = declaration.split_once(':') {
                    dom.set_style(node, &css_name(name.trim()), value.trim());
                }
            }
        }
        other => trace!(%node, style = %other, "unsupported style value ignored"),
    }
}

/// `backgroundColor` → `background-color`. Custom properties pass through.
pub(super) fn css_name(name: &str) -> String {
    if name.starts_with("--") {
        return name.to_owned();
    }
    let mut out = String::with_capacity(name.len() + 4);
    for c in name.chars() {
        if c.is_ascii_uppercase() {
            out.push('-');
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Async attributes
// ---------------------------------------------------------------------------

pub(super) fn show_loading(dom: &dyn DomBackend, node: NodeId) {
    dom.set_attribute(node, "aria-busy", "true");
    dom.add_class(node, LOADING_CLASS);
    dom.set_style(node, "opacity", LOADING_OPACITY);
}

pub(super) fn hide_loading(dom: &dyn DomBackend, node: NodeId) {
    if !dom.has_class(node, LOADING_CLASS) {
        return;
    }
    dom.remove_attribute(node, "aria-busy");
    dom.remove_class(node, LOADING_CLASS);
    dom.set_style(node, "opacity", "");
}

/// Per-prop error marker.
pub(super) fn mark_error(dom: &dyn DomBackend, node: NodeId, key: &str, err: &AsyncError) {
    dom.set_attribute(node, &format!("data-async-error-{}", css_name(key)), &err.to_string());
    dom.add_class(node, ERROR_CLASS);
}

/// Apply a group of deferred props. Already settled ones are written now;
/// the rest resolve concurrently behind a loading indicator.
pub(super) fn apply_deferred(ctx: &Context, node: NodeId, props: Vec<(String, Deferred<Value>)>) {
    let mut pending = Vec::new();
    for (key, deferred) in props {
        match deferred.try_now() {
            Some(Ok(value)) => apply_value(ctx, node, &key, &value),
            Some(Err(err)) => mark_error(ctx.dom(), node, &key, &err),
            None => pending.push((key, deferred)),
        }
    }
    if pending.is_empty() {
        return;
    }

    show_loading(ctx.dom(), node);
    let state = &ctx.rt.renderer;
    let incarnation = state.incarnation(node);
    let cache_key = format!(
        "attrs:{}",
        pending
            .iter()
            .map(|(_, d)| d.id().get().to_string())
            .collect::<Vec<_>>()
            .join(",")
    );
    let deferreds: Vec<Deferred<Value>> = pending.iter().map(|(_, d)| d.clone()).collect();
    let group = state
        .attr_cache
        .borrow_mut()
        .get_or_insert_with(&cache_key, move || Deferred::from_future(resolve_all(deferreds)));
    let keys: Vec<String> = pending.into_iter().map(|(key, _)| key).collect();

    let weak = ctx.downgrade();
    ctx.spawn_tracked(async move {
        let outcome = group.await;
        let Some(ctx) = weak.upgrade() else {
            return;
        };
        if ctx.rt.renderer.incarnation(node) != incarnation {
            trace!(%node, "node was cleaned up; async attributes dropped");
            return;
        }
        let dom = ctx.dom();
        hide_loading(dom, node);
        match outcome {
            Ok(results) => {
                for (key, result) in keys.iter().zip(results) {
                    match result {
                        Ok(value) => apply_value(&ctx, node, key, &value),
                        Err(err) => mark_error(dom, node, key, &err),
                    }
                }
            }
            Err(err) => {
                for key in &keys {
                    mark_error(dom, node, key, &err);
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestHarness;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn attribute_rules() {
        let h = TestHarness::new(json!({}));
        let dom = h.ctx.dom();
        let node = dom.create_element("label");
        for (key, value) in [
            ("className", json!(["a", {"b": true, "c": false}])),
            ("htmlFor", json!("name")),
            ("tabIndex", json!(2)),
            ("data-role", json!("x")),
            ("aria-hidden", json!(true)),
            ("title", json!("tip")),
            ("custom", json!(false)),
        ] {
            apply_value(&h.ctx, node, key, &value);
        }
        assert_eq!(dom.get_attribute(node, "class").as_deref(), Some("a b"));
        assert_eq!(dom.get_attribute(node, "for").as_deref(), Some("name"));
        assert_eq!(dom.get_attribute(node, "tabindex").as_deref(), Some("2"));
        assert_eq!(dom.get_attribute(node, "data-role").as_deref(), Some("x"));
        assert_eq!(dom.get_attribute(node, "aria-hidden").as_deref(), Some(""));
        assert_eq!(dom.get_property(node, "title"), Some(json!("tip")));
        assert_eq!(dom.get_attribute(node, "custom"), None);

        apply_value(&h.ctx, node, "data-role", &Value::Null);
        assert_eq!(dom.get_attribute(node, "data-role"), None);
    }

    #[test]
    fn style_merges_and_converts_names() {
        let h = TestHarness::new(json!({}));
        let dom = h.ctx.dom();
        let node = dom.create_element("div");
        apply_value(&h.ctx, node, "style", &json!({"backgroundColor": "red", "--gap": "4px"}));
        apply_value(&h.ctx, node, "style", &json!("margin-top: 2px; color : blue"));
        assert_eq!(dom.get_style(node, "background-color").as_deref(), Some("red"));
        assert_eq!(dom.get_style(node, "--gap").as_deref(), Some("4px"));
        assert_eq!(dom.get_style(node, "color").as_deref(), Some("blue"));
        apply_value(&h.ctx, node, "style", &json!({"color": null}));
        assert_eq!(dom.get_style(node, "color"), None);
        assert_eq!(dom.get_style(node, "margin-top").as_deref(), Some("2px"));
    }

    #[test]
    fn deferred_group_shows_loading_then_applies() {
        let h = TestHarness::new(json!({}));
        let dom = h.ctx.dom();
        let node = dom.create_element("img");
        let (src, resolve_src) = Deferred::<Value>::pending();
        let (alt, resolve_alt) = Deferred::<Value>::pending();
        apply_deferred(
            &h.ctx,
            node,
            vec![
                ("src".into(), src),
                ("alt".into(), alt),
                ("data-ready".into(), Deferred::ready(json!("yes"))),
            ],
        );
        assert_eq!(dom.get_attribute(node, "data-ready").as_deref(), Some("yes"));
        assert_eq!(dom.get_attribute(node, "aria-busy").as_deref(), Some("true"));
        assert!(dom.has_class(node, LOADING_CLASS));
        assert_eq!(dom.get_style(node, "opacity").as_deref(), Some("0.6"));

        resolve_src.resolve(json!("/a.png"));
        resolve_alt.reject("no caption");
        h.tick();
        assert_eq!(dom.get_attribute(node, "src").as_deref(), Some("/a.png"));
        assert_eq!(
            dom.get_attribute(node, "data-async-error-alt").as_deref(),
            Some("no caption")
        );
        assert!(dom.has_class(node, ERROR_CLASS));
        assert!(!dom.has_class(node, LOADING_CLASS));
        assert_eq!(dom.get_attribute(node, "aria-busy"), None);
    }

    #[test]
    fn css_names() {
        assert_eq!(css_name("fontSize"), "font-size");
        assert_eq!(css_name("color"), "color");
        assert_eq!(css_name("--brandColor"), "--brandColor");
    }
}
