//! Dynamic context nodes.
//!
//! A [`ContextNode`] is a loose, JSON-like value used where no static shape
//! is known: the `@context` binding, and data compiled against a dynamic
//! shape. Nodes remember the node they were reached from, so [`ContextNode::find`]
//! can continue a lookup outward.

use std::fmt;
use std::sync::{Arc, OnceLock};

use serde_json::{Map, Value};

/// Host lookup backing a function node.
pub type LookupFn = dyn Fn(&str) -> Option<Value> + Send + Sync;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NodeError {
    #[error("a context node cannot wrap another context node")]
    NestedNode,
}

/// What a node is built from.
#[derive(Clone)]
pub enum NodeSource {
    /// Objects become mappings, arrays sequences, anything else a leaf.
    Value(Value),
    Optional(Option<Value>),
    Function(Arc<LookupFn>),
    /// Rejected: nodes are never wrapped twice.
    Node(ContextNode),
}

impl NodeSource {
    pub fn function(lookup: impl Fn(&str) -> Option<Value> + Send + Sync + 'static) -> Self {
        NodeSource::Function(Arc::new(lookup))
    }
}

impl From<Value> for NodeSource {
    fn from(value: Value) -> Self {
        NodeSource::Value(value)
    }
}

impl From<ContextNode> for NodeSource {
    fn from(node: ContextNode) -> Self {
        NodeSource::Node(node)
    }
}

#[derive(Clone)]
enum NodeKind {
    Mapping(Map<String, Value>),
    Sequence(Vec<Value>),
    Optional(Option<Value>),
    Function(Arc<LookupFn>),
    Leaf(Value),
    Empty,
}

impl NodeKind {
    fn from_value(value: Value) -> Self {
        match value {
            Value::Object(map) => NodeKind::Mapping(map),
            Value::Array(items) => NodeKind::Sequence(items),
            other => NodeKind::Leaf(other),
        }
    }
}

struct Inner {
    kind: NodeKind,
    parent: Option<ContextNode>,
}

#[derive(Clone)]
pub struct ContextNode {
    inner: Arc<Inner>,
}

impl ContextNode {
    /// A root node.
    pub fn of(source: impl Into<NodeSource>) -> Result<Self, NodeError> {
        Self::build(source.into(), None)
    }

    /// A node reached from `parent`.
    pub fn of_child(parent: &ContextNode, source: impl Into<NodeSource>) -> Result<Self, NodeError> {
        Self::build(source.into(), Some(parent.clone()))
    }

    /// The canonical empty node. Always falsey; missing lookups resolve to it.
    pub fn empty() -> Self {
        static EMPTY: OnceLock<ContextNode> = OnceLock::new();
        EMPTY
            .get_or_init(|| Self::with_kind(NodeKind::Empty, None))
            .clone()
    }

    fn build(source: NodeSource, parent: Option<ContextNode>) -> Result<Self, NodeError> {
        let kind = match source {
            NodeSource::Value(value) => NodeKind::from_value(value),
            NodeSource::Optional(value) => NodeKind::Optional(value),
            NodeSource::Function(lookup) => NodeKind::Function(lookup),
            NodeSource::Node(_) => return Err(NodeError::NestedNode),
        };
        Ok(Self::with_kind(kind, parent))
    }

    fn with_kind(kind: NodeKind, parent: Option<ContextNode>) -> Self {
        Self {
            inner: Arc::new(Inner { kind, parent }),
        }
    }

    fn child(&self, value: Value) -> Self {
        Self::with_kind(NodeKind::from_value(value), Some(self.clone()))
    }

    pub fn parent(&self) -> Option<&ContextNode> {
        self.inner.parent.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        matches!(self.inner.kind, NodeKind::Empty)
    }

    /// Direct child: a mapping key, a sequence index or a function result.
    /// Null children count as missing.
    pub fn get(&self, name: &str) -> Option<ContextNode> {
        let value = match &self.inner.kind {
            NodeKind::Mapping(map) => map.get(name).cloned(),
            NodeKind::Sequence(items) => name
                .parse::<usize>()
                .ok()
                .and_then(|index| items.get(index))
                .cloned(),
            NodeKind::Function(lookup) => lookup(name),
            NodeKind::Optional(_) | NodeKind::Leaf(_) | NodeKind::Empty => None,
        }?;
        (!value.is_null()).then(|| self.child(value))
    }

    /// [`get`](Self::get), then the same lookup on each parent in turn. A
    /// match found further out is re-parented under this node.
    pub fn find(&self, name: &str) -> Option<ContextNode> {
        if let Some(child) = self.get(name) {
            return Some(child);
        }
        let found = self.parent()?.find(name)?;
        Some(Self::with_kind(found.inner.kind.clone(), Some(self.clone())))
    }

    /// Children of a sequence, the value of a present optional, nothing when
    /// falsey, otherwise this node once.
    pub fn iter(&self) -> std::vec::IntoIter<ContextNode> {
        let nodes = match &self.inner.kind {
            NodeKind::Sequence(items) => items.iter().map(|item| self.child(item.clone())).collect(),
            NodeKind::Optional(Some(value)) if !value.is_null() => vec![self.child(value.clone())],
            _ if self.is_falsey() => Vec::new(),
            _ => vec![self.clone()],
        };
        nodes.into_iter()
    }

    /// Null, `false`, an empty sequence, an absent optional and the empty
    /// node are falsey. An empty mapping is not.
    pub fn is_falsey(&self) -> bool {
        match &self.inner.kind {
            NodeKind::Mapping(_) | NodeKind::Function(_) => false,
            NodeKind::Sequence(items) => items.is_empty(),
            NodeKind::Optional(value) => value.as_ref().map_or(true, Value::is_null),
            NodeKind::Leaf(value) => matches!(value, Value::Null | Value::Bool(false)),
            NodeKind::Empty => true,
        }
    }

    /// The wrapped data. Function nodes have none.
    pub fn value(&self) -> Value {
        match &self.inner.kind {
            NodeKind::Mapping(map) => Value::Object(map.clone()),
            NodeKind::Sequence(items) => Value::Array(items.clone()),
            NodeKind::Optional(value) => value.clone().unwrap_or(Value::Null),
            NodeKind::Leaf(value) => value.clone(),
            NodeKind::Function(_) | NodeKind::Empty => Value::Null,
        }
    }

    /// Strings verbatim, null as "", mappings and sequences as compact JSON.
    pub fn render(&self) -> String {
        match self.value() {
            Value::String(text) => text,
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }
}

impl fmt::Display for ContextNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

impl fmt::Debug for ContextNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.inner.kind {
            NodeKind::Mapping(_) => "mapping",
            NodeKind::Sequence(_) => "sequence",
            NodeKind::Optional(_) => "optional",
            NodeKind::Function(_) => "function",
            NodeKind::Leaf(_) => "leaf",
            NodeKind::Empty => "empty",
        };
        f.debug_struct("ContextNode")
            .field("kind", &kind)
            .field("value", &self.value())
            .field("has_parent", &self.inner.parent.is_some())
            .finish()
    }
}
