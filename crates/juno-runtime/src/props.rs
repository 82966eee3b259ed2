//! Property values.
//!
//! Every property of a node description is a [`Prop`]. Value-like props
//! carry a [`Dynamic`], the explicit sum type for "literal, closure, or
//! future": the renderer matches on it once and picks the static, reactive,
//! or async binding strategy.

use std::fmt;
use std::rc::Rc;

use juno_async::{AsyncError, Deferred, resolve_all};
use juno_core::deep_equal;
use juno_dom::DomEvent;
use serde_json::{Map, Value, json};

use crate::node::Node;

/// Event listener attached through an `on*` prop.
pub type EventHandler = Rc<dyn Fn(&DomEvent)>;

/// A value that may be static, reactive, or deferred.
pub enum Dynamic<T> {
    /// Applied once.
    Static(T),
    /// Re-evaluated whenever a state path it read changes. May itself return
    /// any variant, including [`Dynamic::Keep`].
    Reactive(Rc<dyn Fn() -> Dynamic<T>>),
    /// Applied when the future settles.
    Deferred(Deferred<T>),
    /// Leave whatever is currently rendered untouched.
    Keep,
}

impl<T: Clone + 'static> Dynamic<T> {
    /// Reactive value from a closure returning anything convertible.
    pub fn reactive<R, F>(f: F) -> Self
    where
        R: Into<Dynamic<T>>,
        F: Fn() -> R + 'static,
    {
        Self::Reactive(Rc::new(move || f().into()))
    }

    #[must_use]
    pub fn is_deferred(&self) -> bool {
        matches!(self, Self::Deferred(_))
    }

    /// Transform the eventual value, preserving the variant.
    pub fn map<U: Clone + 'static>(self, f: Rc<dyn Fn(T) -> U>) -> Dynamic<U> {
        match self {
            Self::Static(value) => Dynamic::Static(f(value)),
            Self::Reactive(eval) => Dynamic::Reactive(Rc::new(move || eval().map(Rc::clone(&f)))),
            Self::Deferred(deferred) => Dynamic::Deferred(deferred.map(move |value| f(value))),
            Self::Keep => Dynamic::Keep,
        }
    }
}

impl<T: Clone + 'static> Clone for Dynamic<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Static(value) => Self::Static(value.clone()),
            Self::Reactive(eval) => Self::Reactive(Rc::clone(eval)),
            Self::Deferred(deferred) => Self::Deferred(deferred.clone()),
            Self::Keep => Self::Keep,
        }
    }
}

impl<T> From<T> for Dynamic<T> {
    fn from(value: T) -> Self {
        Self::Static(value)
    }
}

impl<T> From<Deferred<T>> for Dynamic<T> {
    fn from(deferred: Deferred<T>) -> Self {
        Self::Deferred(deferred)
    }
}

impl<T: fmt::Debug> fmt::Debug for Dynamic<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static(value) => f.debug_tuple("Static").field(value).finish(),
            Self::Reactive(eval) => write!(f, "Reactive({:#x})", closure_id(eval)),
            Self::Deferred(deferred) => f.debug_tuple("Deferred").field(&deferred.id()).finish(),
            Self::Keep => f.write_str("Keep"),
        }
    }
}

/// Address of the closure behind an `Rc`, used as its identity in
/// fingerprints.
fn closure_id<F: ?Sized>(rc: &Rc<F>) -> usize {
    Rc::as_ptr(rc).cast::<()>() as usize
}

/// One property of an element or component.
#[derive(Clone)]
pub enum Prop {
    Value(Dynamic<Value>),
    Children(Dynamic<Node>),
    Handler(EventHandler),
    /// A deferred prop that failed; components see this instead of a value.
    Failed(AsyncError),
}

impl Prop {
    #[must_use]
    pub fn is_deferred(&self) -> bool {
        match self {
            Self::Value(value) => value.is_deferred(),
            Self::Children(children) => children.is_deferred(),
            Self::Handler(_) | Self::Failed(_) => false,
        }
    }

    /// Identity-preserving JSON stand-in. Closures and futures become
    /// markers carrying their identity, so two props fingerprint equal only
    /// if they hold the same closure or future.
    #[must_use]
    pub fn fingerprint(&self) -> Value {
        match self {
            Self::Value(value) => dynamic_fingerprint(value, Value::clone),
            Self::Children(children) => dynamic_fingerprint(children, Node::fingerprint),
            Self::Handler(handler) => json!({ "$handler": closure_id(handler) }),
            Self::Failed(err) => json!({ "$error": err.to_string() }),
        }
    }
}

fn dynamic_fingerprint<T>(value: &Dynamic<T>, stat: impl Fn(&T) -> Value) -> Value {
    match value {
        Dynamic::Static(inner) => stat(inner),
        Dynamic::Reactive(eval) => json!({ "$fn": closure_id(eval) }),
        Dynamic::Deferred(deferred) => json!({ "$deferred": deferred.id().get() }),
        Dynamic::Keep => json!({ "$keep": true }),
    }
}

impl From<Value> for Prop {
    fn from(value: Value) -> Self {
        Self::Value(Dynamic::Static(value))
    }
}

impl From<Dynamic<Value>> for Prop {
    fn from(value: Dynamic<Value>) -> Self {
        Self::Value(value)
    }
}

impl From<Deferred<Value>> for Prop {
    fn from(deferred: Deferred<Value>) -> Self {
        Self::Value(Dynamic::Deferred(deferred))
    }
}

impl fmt::Debug for Prop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Self::Children(children) => f.debug_tuple("Children").field(children).finish(),
            Self::Handler(handler) => write!(f, "Handler({:#x})", closure_id(handler)),
            Self::Failed(err) => f.debug_tuple("Failed").field(err).finish(),
        }
    }
}

/// Ordered property list of a node description.
#[derive(Clone, Default)]
pub struct Props {
    entries: Vec<(String, Prop)>,
}

impl Props {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `key`, replacing any previous value in place.
    pub fn insert(&mut self, key: impl Into<String>, prop: impl Into<Prop>) {
        let key = key.into();
        let prop = prop.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = prop,
            None => self.entries.push((key, prop)),
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<Prop> {
        let index = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(index).1)
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Prop> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, p)| p)
    }

    /// Static value of `key`, if it has one.
    #[must_use]
    pub fn value(&self, key: &str) -> Option<&Value> {
        match self.get(key)? {
            Prop::Value(Dynamic::Static(value)) => Some(value),
            _ => None,
        }
    }

    /// The error a deferred prop failed with.
    #[must_use]
    pub fn error(&self, key: &str) -> Option<&AsyncError> {
        match self.get(key)? {
            Prop::Failed(err) => Some(err),
            _ => None,
        }
    }

    #[must_use]
    pub fn handler(&self, key: &str) -> Option<EventHandler> {
        match self.get(key)? {
            Prop::Handler(handler) => Some(Rc::clone(handler)),
            _ => None,
        }
    }

    /// Explicit reconciliation key.
    #[must_use]
    pub fn key(&self) -> Option<String> {
        self.value("key").map(juno_core::display_text)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Prop)> {
        self.entries.iter().map(|(k, p)| (k.as_str(), p))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn has_deferred(&self) -> bool {
        self.entries.iter().any(|(_, p)| p.is_deferred())
    }

    /// See [`Prop::fingerprint`].
    #[must_use]
    pub fn fingerprint(&self) -> Value {
        let map: Map<String, Value> = self
            .entries
            .iter()
            .map(|(k, p)| (k.clone(), p.fingerprint()))
            .collect();
        Value::Object(map)
    }

    /// Fingerprint equality: same static values, same closures, same
    /// futures.
    #[must_use]
    pub fn same_as(&self, other: &Self) -> bool {
        deep_equal(&self.fingerprint(), &other.fingerprint())
    }

    /// Await every deferred prop concurrently. Successes become static
    /// values; failures become [`Prop::Failed`] without disturbing the rest.
    pub async fn resolved(self) -> Props {
        let mut entries = self.entries;
        let mut values = Vec::new();
        let mut children = Vec::new();
        for (index, (_, prop)) in entries.iter().enumerate() {
            match prop {
                Prop::Value(Dynamic::Deferred(d)) => values.push((index, d.clone())),
                Prop::Children(Dynamic::Deferred(d)) => children.push((index, d.clone())),
                _ => {}
            }
        }
        let (value_results, child_results) = futures::join!(
            resolve_all(values.iter().map(|(_, d)| d.clone())),
            resolve_all(children.iter().map(|(_, d)| d.clone())),
        );
        for ((index, _), result) in values.iter().zip(value_results) {
            entries[*index].1 = match result {
                Ok(value) => Prop::Value(Dynamic::Static(value)),
                Err(err) => Prop::Failed(err),
            };
        }
        for ((index, _), result) in children.iter().zip(child_results) {
            entries[*index].1 = match result {
                Ok(node) => Prop::Children(Dynamic::Static(node)),
                Err(err) => Prop::Failed(err),
            };
        }
        Props { entries }
    }

    // -----------------------------------------------------------------------
    // Builder
    // -----------------------------------------------------------------------

    /// Static attribute or component prop.
    #[must_use]
    pub fn attr(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.insert(key, Prop::Value(Dynamic::Static(value.into())));
        self
    }

    /// Reactive attribute or prop.
    #[must_use]
    pub fn bind<R, F>(mut self, key: &str, f: F) -> Self
    where
        R: Into<Dynamic<Value>>,
        F: Fn() -> R + 'static,
    {
        self.insert(key, Prop::Value(Dynamic::reactive(f)));
        self
    }

    /// Deferred attribute or prop.
    #[must_use]
    pub fn deferred(mut self, key: &str, value: Deferred<Value>) -> Self {
        self.insert(key, Prop::Value(Dynamic::Deferred(value)));
        self
    }

    #[must_use]
    pub fn text(self, text: impl Into<Value>) -> Self {
        self.attr("text", text)
    }

    #[must_use]
    pub fn text_fn<R, F>(self, f: F) -> Self
    where
        R: Into<Dynamic<Value>>,
        F: Fn() -> R + 'static,
    {
        self.bind("text", f)
    }

    #[must_use]
    pub fn children(mut self, nodes: impl IntoIterator<Item = Node>) -> Self {
        self.insert("children", Prop::Children(Dynamic::Static(Node::list(nodes))));
        self
    }

    #[must_use]
    pub fn children_fn<R, F>(mut self, f: F) -> Self
    where
        R: Into<Dynamic<Node>>,
        F: Fn() -> R + 'static,
    {
        self.insert("children", Prop::Children(Dynamic::reactive(f)));
        self
    }

    #[must_use]
    pub fn children_deferred(mut self, nodes: Deferred<Node>) -> Self {
        self.insert("children", Prop::Children(Dynamic::Deferred(nodes)));
        self
    }

    /// Event handler; `key` is the prop name, e.g. `"onClick"`.
    #[must_use]
    pub fn on(mut self, key: &str, handler: impl Fn(&DomEvent) + 'static) -> Self {
        self.insert(key, Prop::Handler(Rc::new(handler)));
        self
    }

    /// Explicit reconciliation key; read back with [`Props::key`].
    #[must_use]
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.insert("key", Prop::Value(Dynamic::Static(Value::String(key.into()))));
        self
    }

    #[must_use]
    pub fn style(self, style: Value) -> Self {
        self.attr("style", style)
    }
}

impl fmt::Debug for Props {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.entries.iter().map(|(k, p)| (k, p)))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;
    use pretty_assertions::assert_eq;

    #[test]
    fn insert_replaces_in_place() {
        let props = Props::new().attr("a", 1).attr("b", 2).attr("a", 3);
        let keys: Vec<&str> = props.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["a", "b"]);
        assert_eq!(props.value("a"), Some(&json!(3)));
    }

    #[test]
    fn fingerprint_distinguishes_closures_by_identity() {
        let shared: Rc<dyn Fn() -> Dynamic<Value>> = Rc::new(|| Dynamic::Static(json!(1)));
        let mut a = Props::new();
        a.insert("x", Prop::Value(Dynamic::Reactive(Rc::clone(&shared))));
        let mut b = Props::new();
        b.insert("x", Prop::Value(Dynamic::Reactive(Rc::clone(&shared))));
        assert!(a.same_as(&b));

        let c = Props::new().bind("x", || json!(1));
        assert!(!a.same_as(&c));
    }

    #[test]
    fn resolved_replaces_deferreds_and_isolates_failures() {
        let props = Props::new()
            .attr("plain", "p")
            .deferred("ok", Deferred::ready(json!(5)))
            .deferred("bad", Deferred::failed(AsyncError::rejected("nope")));
        assert!(props.has_deferred());
        let resolved = block_on(props.resolved());
        assert!(!resolved.has_deferred());
        assert_eq!(resolved.value("plain"), Some(&json!("p")));
        assert_eq!(resolved.value("ok"), Some(&json!(5)));
        assert_eq!(resolved.error("bad"), Some(&AsyncError::rejected("nope")));
    }

    #[test]
    fn explicit_key_is_read_as_text() {
        assert_eq!(Props::new().with_key("a").key(), Some("a".to_owned()));
        assert_eq!(Props::new().attr("key", 7).key(), Some("7".to_owned()));
    }
}
