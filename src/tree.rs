//! Error trees
//!
//! An [`ErrorTree`] mirrors the shape of the schema that produced it: leaf
//! fields map to a list of messages, nested fields map to a child tree, and
//! collections are keyed by element index.
//!
//! ```text
//! {
//!   "name": ["Missing data for required field."],
//!   "address": { "zip": ["Not a valid string."] },
//!   "tags": { "1": ["Not a valid string."] }
//! }
//! ```

use std::fmt;

use indexmap::IndexMap;
use serde::ser::{Serialize, SerializeMap, Serializer};

/// Key used for errors that belong to the schema as a whole
pub const SCHEMA_KEY: &str = "_schema";

/// A single step in an error path
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ErrorKey {
    /// A field name (or unknown input key)
    Field(String),
    /// A position inside a collection
    Index(usize),
}

impl fmt::Display for ErrorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKey::Field(name) => write!(f, "{}", name),
            ErrorKey::Index(idx) => write!(f, "{}", idx),
        }
    }
}

impl From<&str> for ErrorKey {
    fn from(s: &str) -> Self {
        ErrorKey::Field(s.to_string())
    }
}

impl From<String> for ErrorKey {
    fn from(s: String) -> Self {
        ErrorKey::Field(s)
    }
}

impl From<usize> for ErrorKey {
    fn from(idx: usize) -> Self {
        ErrorKey::Index(idx)
    }
}

/// Errors recorded at one key
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorNode {
    /// Leaf field failure messages
    Messages(Vec<String>),
    /// Failures inside a nested schema or collection
    Tree(ErrorTree),
}

impl ErrorNode {
    /// Build a leaf node holding one message
    pub fn message(msg: impl Into<String>) -> Self {
        ErrorNode::Messages(vec![msg.into()])
    }

    pub fn as_messages(&self) -> Option<&[String]> {
        match self {
            ErrorNode::Messages(m) => Some(m),
            ErrorNode::Tree(_) => None,
        }
    }

    pub fn as_tree(&self) -> Option<&ErrorTree> {
        match self {
            ErrorNode::Tree(t) => Some(t),
            ErrorNode::Messages(_) => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            ErrorNode::Messages(m) => m.is_empty(),
            ErrorNode::Tree(t) => t.is_empty(),
        }
    }

    fn to_value(&self) -> serde_json::Value {
        match self {
            ErrorNode::Messages(m) => serde_json::Value::from(m.clone()),
            ErrorNode::Tree(t) => t.to_value(),
        }
    }
}

impl From<String> for ErrorNode {
    fn from(msg: String) -> Self {
        ErrorNode::Messages(vec![msg])
    }
}

impl From<&str> for ErrorNode {
    fn from(msg: &str) -> Self {
        ErrorNode::message(msg)
    }
}

impl From<ErrorTree> for ErrorNode {
    fn from(tree: ErrorTree) -> Self {
        ErrorNode::Tree(tree)
    }
}

/// Hierarchical field path → failure messages
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ErrorTree {
    entries: IndexMap<ErrorKey, ErrorNode>,
}

impl ErrorTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, key: impl Into<ErrorKey>) -> Option<&ErrorNode> {
        self.entries.get(&key.into())
    }

    /// Messages recorded directly at `key`
    pub fn messages(&self, key: impl Into<ErrorKey>) -> Option<&[String]> {
        self.get(key).and_then(ErrorNode::as_messages)
    }

    /// Child tree recorded at `key`
    pub fn child(&self, key: impl Into<ErrorKey>) -> Option<&ErrorTree> {
        self.get(key).and_then(ErrorNode::as_tree)
    }

    pub fn contains(&self, key: impl Into<ErrorKey>) -> bool {
        self.entries.contains_key(&key.into())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ErrorKey, &ErrorNode)> {
        self.entries.iter()
    }

    /// Append one message at `key`
    pub fn add_message(&mut self, key: impl Into<ErrorKey>, msg: impl Into<String>) {
        self.insert(key, ErrorNode::message(msg));
    }

    /// Record `node` at `key`, merging with whatever is already there.
    ///
    /// Messages are appended and trees are merged key by key. Empty nodes are
    /// dropped so a tree never reports a failure it does not contain.
    pub fn insert(&mut self, key: impl Into<ErrorKey>, node: ErrorNode) {
        if node.is_empty() {
            return;
        }
        let key = key.into();
        match self.entries.get_mut(&key) {
            None => {
                self.entries.insert(key, node);
            }
            Some(existing) => {
                let old = std::mem::replace(existing, ErrorNode::Messages(Vec::new()));
                *existing = combine(old, node);
            }
        }
    }

    /// Merge every entry of `other` into this tree
    pub fn merge(&mut self, other: ErrorTree) {
        for (key, node) in other.entries {
            self.insert(key, node);
        }
    }

    /// Flatten into `(dotted.path, message)` pairs in traversal order
    pub fn flatten(&self) -> Vec<(String, String)> {
        let mut out = Vec::new();
        self.flatten_into("", &mut out);
        out
    }

    fn flatten_into(&self, prefix: &str, out: &mut Vec<(String, String)>) {
        for (key, node) in &self.entries {
            let path = if prefix.is_empty() {
                key.to_string()
            } else {
                format!("{}.{}", prefix, key)
            };
            match node {
                ErrorNode::Messages(msgs) => {
                    out.extend(msgs.iter().map(|m| (path.clone(), m.clone())));
                }
                ErrorNode::Tree(tree) => tree.flatten_into(&path, out),
            }
        }
    }

    /// Render as a primitive mapping, the same shape callers encode
    pub fn to_value(&self) -> serde_json::Value {
        let map = self
            .entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_value()))
            .collect::<serde_json::Map<_, _>>();
        serde_json::Value::Object(map)
    }
}

// A message landing on a nested tree is a failure of the object itself.
fn combine(old: ErrorNode, new: ErrorNode) -> ErrorNode {
    match (old, new) {
        (ErrorNode::Messages(mut old), ErrorNode::Messages(new)) => {
            old.extend(new);
            ErrorNode::Messages(old)
        }
        (ErrorNode::Tree(mut old), ErrorNode::Tree(new)) => {
            old.merge(new);
            ErrorNode::Tree(old)
        }
        (ErrorNode::Tree(mut tree), ErrorNode::Messages(msgs))
        | (ErrorNode::Messages(msgs), ErrorNode::Tree(mut tree)) => {
            for msg in msgs {
                tree.add_message(SCHEMA_KEY, msg);
            }
            ErrorNode::Tree(tree)
        }
    }
}

impl Serialize for ErrorTree {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, node) in &self.entries {
            match node {
                ErrorNode::Messages(msgs) => map.serialize_entry(&key.to_string(), msgs)?,
                ErrorNode::Tree(tree) => map.serialize_entry(&key.to_string(), tree)?,
            }
        }
        map.end()
    }
}

impl fmt::Display for ErrorTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_value())
    }
}
