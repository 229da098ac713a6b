//! Flattening of nested heartbeat responses.
//!
//! Environments report health as an arbitrarily nested JSON object where a
//! service is any object carrying a `status` field and every other object is a
//! grouping of further services. The response is parsed once into
//! [`HeartbeatNode`] and flattened into a [`FlatHeartbeatMap`] keyed by the
//! service's own name.

use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};
use std::collections::HashMap;

use crate::types::HeartbeatLeaf;

/// Separator used by skip-list entries, e.g. `Storage.StorageAPI`.
pub const PATH_SEPARATOR: char = '.';

#[derive(Debug, Clone, PartialEq)]
pub enum HeartbeatNode {
    Leaf(HeartbeatLeaf),
    /// Children in response order.
    Node(Vec<(String, HeartbeatNode)>),
}

impl HeartbeatNode {
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Object(map) if map.contains_key("status") => HeartbeatNode::Leaf(leaf_from_object(map)),
            Value::Object(map) => HeartbeatNode::Node(
                map.iter()
                    .map(|(name, child)| (name.clone(), HeartbeatNode::from_value(child)))
                    .collect(),
            ),
            // Scalars and arrays next to services carry no health information.
            _ => HeartbeatNode::Node(Vec::new()),
        }
    }
}

impl<'de> Deserialize<'de> for HeartbeatNode {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        Ok(HeartbeatNode::from_value(&value))
    }
}

fn leaf_from_object(map: &Map<String, Value>) -> HeartbeatLeaf {
    // A status that is not an integer cannot be healthy; 0 keeps it that way.
    let status = match map.get("status") {
        Some(Value::Number(n)) => n.as_i64().unwrap_or(0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    };
    HeartbeatLeaf {
        status,
        version: text_field(map.get("version")),
        message: text_field(map.get("message")),
    }
}

fn text_field(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// Service name to leaf, in the order services were first seen.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlatHeartbeatMap {
    entries: Vec<(String, HeartbeatLeaf)>,
    index: HashMap<String, usize>,
}

impl FlatHeartbeatMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a leaf; a name seen before keeps its position but takes the new value.
    pub fn insert(&mut self, name: String, leaf: HeartbeatLeaf) {
        match self.index.get(&name) {
            Some(&pos) => self.entries[pos].1 = leaf,
            None => {
                self.index.insert(name.clone(), self.entries.len());
                self.entries.push((name, leaf));
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&HeartbeatLeaf> {
        self.index.get(name).map(|&pos| &self.entries[pos].1)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &HeartbeatLeaf)> {
        self.entries.iter().map(|(name, leaf)| (name.as_str(), leaf))
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|(name, _)| name.as_str()).collect()
    }
}

pub fn flatten(tree: &HeartbeatNode) -> FlatHeartbeatMap {
    flatten_with_skip(tree, &[])
}

/// Flattens `tree`, leaving out every subtree whose dotted path is in `skip`.
///
/// A skip entry naming a grouping node removes all services below it. A leaf
/// at the root has no service name and is ignored.
pub fn flatten_with_skip(tree: &HeartbeatNode, skip: &[String]) -> FlatHeartbeatMap {
    let mut flat = FlatHeartbeatMap::new();
    let children = match tree {
        HeartbeatNode::Leaf(_) => return flat,
        HeartbeatNode::Node(children) => children,
    };

    // Depth-first in response order: children are pushed reversed.
    let mut stack: Vec<(String, &str, &HeartbeatNode)> = children
        .iter()
        .rev()
        .map(|(name, node)| (name.clone(), name.as_str(), node))
        .collect();

    while let Some((path, name, node)) = stack.pop() {
        if is_skipped(&path, skip) {
            continue;
        }
        match node {
            HeartbeatNode::Leaf(leaf) => flat.insert(name.to_string(), leaf.clone()),
            HeartbeatNode::Node(children) => {
                for (child_name, child) in children.iter().rev() {
                    let child_path = format!("{}{}{}", path, PATH_SEPARATOR, child_name);
                    stack.push((child_path, child_name.as_str(), child));
                }
            }
        }
    }

    flat
}

fn is_skipped(path: &str, skip: &[String]) -> bool {
    skip.iter().any(|entry| {
        let entry = entry.trim();
        path == entry
            || (path.starts_with(entry)
                && path[entry.len()..].starts_with(PATH_SEPARATOR))
    })
}
