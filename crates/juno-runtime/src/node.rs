//! Node descriptions.
//!
//! A [`Node`] describes what should be on screen. Element tags that match a
//! registered component are expanded by the component manager; everything
//! else becomes a DOM element.
//!
//! The JSON wire shape is accepted through [`Node::from_json`]:
//!
//! | JSON | Node |
//! |------|------|
//! | `null` | `Empty` |
//! | string / number / bool | `Text` |
//! | array | `List` |
//! | `{"tag": {..props}}` | `Element` |
//! | `{"tag": "text"}` | `Element` with a `text` prop |

use std::fmt;

use juno_core::display_text;
use serde_json::Value;
use tracing::warn;

use crate::error::RenderError;
use crate::props::{Dynamic, Prop, Props};

/// A description of DOM structure.
#[derive(Clone, Default)]
pub enum Node {
    #[default]
    Empty,
    Text(String),
    List(Vec<Node>),
    Element { tag: String, props: Props },
}

impl Node {
    /// Element or component node.
    #[must_use]
    pub fn el(tag: impl Into<String>, props: Props) -> Self {
        Self::Element {
            tag: tag.into(),
            props,
        }
    }

    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    #[must_use]
    pub fn list(nodes: impl IntoIterator<Item = Node>) -> Self {
        Self::List(nodes.into_iter().collect())
    }

    #[must_use]
    pub fn tag(&self) -> Option<&str> {
        match self {
            Self::Element { tag, .. } => Some(tag),
            _ => None,
        }
    }

    #[must_use]
    pub fn props(&self) -> Option<&Props> {
        match self {
            Self::Element { props, .. } => Some(props),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// Parse the JSON wire shape.
    pub fn from_json(value: &Value) -> Result<Self, RenderError> {
        Ok(match value {
            Value::Null => Self::Empty,
            Value::String(s) => Self::Text(s.clone()),
            Value::Bool(_) | Value::Number(_) => Self::Text(display_text(value)),
            Value::Array(items) => Self::List(items.iter().map(Self::from_json).collect::<Result<_, _>>()?),
            Value::Object(map) => {
                let mut entries = map.iter();
                let (Some((tag, body)), None) = (entries.next(), entries.next()) else {
                    return Err(RenderError::InvalidNode(format!(
                        "expected exactly one tag key, found {}",
                        map.len()
                    )));
                };
                Self::el(tag.clone(), props_from_json(body)?)
            }
        })
    }

    /// JSON stand-in used for keys and equality. See
    /// [`Prop::fingerprint`].
    #[must_use]
    pub fn fingerprint(&self) -> Value {
        match self {
            Self::Empty => Value::Null,
            Self::Text(text) => Value::String(text.clone()),
            Self::List(nodes) => Value::Array(nodes.iter().map(Self::fingerprint).collect()),
            Self::Element { tag, props } => {
                let mut map = serde_json::Map::new();
                map.insert(tag.clone(), props.fingerprint());
                Value::Object(map)
            }
        }
    }
}

fn props_from_json(body: &Value) -> Result<Props, RenderError> {
    let mut props = Props::new();
    match body {
        Value::Null => {}
        Value::Object(map) => {
            for (key, value) in map {
                let prop = if key == "children" {
                    Prop::Children(Dynamic::Static(Node::from_json(value)?))
                } else {
                    Prop::Value(Dynamic::Static(value.clone()))
                };
                props.insert(key.clone(), prop);
            }
        }
        scalar => props.insert("text", Prop::Value(Dynamic::Static(scalar.clone()))),
    }
    Ok(props)
}

impl From<Value> for Node {
    /// Lenient conversion: an invalid description becomes `Empty` with a
    /// warning. Use [`Node::from_json`] to see the error.
    fn from(value: Value) -> Self {
        Self::from_json(&value).unwrap_or_else(|err| {
            warn!(%err, "invalid node description ignored");
            Self::Empty
        })
    }
}

impl From<&str> for Node {
    fn from(text: &str) -> Self {
        Self::Text(text.to_owned())
    }
}

impl From<String> for Node {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<Vec<Node>> for Node {
    fn from(nodes: Vec<Node>) -> Self {
        Self::List(nodes)
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("Empty"),
            Self::Text(text) => f.debug_tuple("Text").field(text).finish(),
            Self::List(nodes) => f.debug_list().entries(nodes).finish(),
            Self::Element { tag, props } => f
                .debug_struct("Element")
                .field("tag", tag)
                .field("props", props)
                .finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn parses_wire_shape() {
        let node = Node::from_json(&json!([
            {"li": {"key": "a", "text": "1"}},
            {"p": "hello"},
            null,
            3
        ]))
        .unwrap();
        let Node::List(items) = &node else {
            panic!("expected list, got {node:?}");
        };
        assert_eq!(items.len(), 4);
        assert_eq!(items[0].tag(), Some("li"));
        assert_eq!(items[0].props().and_then(Props::key), Some("a".to_owned()));
        assert_eq!(items[1].props().and_then(|p| p.value("text").cloned()), Some(json!("hello")));
        assert!(items[2].is_empty());
        assert!(matches!(&items[3], Node::Text(t) if t == "3"));
    }

    #[test]
    fn nested_children_become_nodes() {
        let node = Node::from_json(&json!({"ul": {"children": [{"li": {"text": "x"}}]}})).unwrap();
        let props = node.props().unwrap();
        assert!(matches!(props.get("children"), Some(Prop::Children(Dynamic::Static(Node::List(_))))));
    }

    #[test]
    fn multi_key_object_is_rejected() {
        let err = Node::from_json(&json!({"a": {}, "b": {}})).unwrap_err();
        assert!(matches!(err, RenderError::InvalidNode(_)));
        assert!(Node::from(json!({"a": {}, "b": {}})).is_empty());
    }

    #[test]
    fn fingerprint_matches_json_for_static_trees() {
        let source = json!({"div": {"className": "x", "children": ["hi"]}});
        let node = Node::from_json(&source).unwrap();
        assert_eq!(node.fingerprint(), source);
    }
}
