//! The live response tree.
//!
//! Branch results are merged into one [`Node`] tree as they arrive. Besides the
//! JSON shapes, a node can be an [`ErrorLeaf`]: a slot that holds the errors
//! reported for exactly that path. Error leaves serialize as `null`.

use crate::error::GraphQLError;
use crate::path::{PathSegment, ResponsePath};
use indexmap::IndexMap;
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};

/// Errors accumulated at one leaf of the response tree.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ErrorLeaf {
    errors: Vec<GraphQLError>,
}

impl ErrorLeaf {
    #[must_use]
    pub fn new(error: GraphQLError) -> Self {
        Self {
            errors: vec![error],
        }
    }

    pub fn push(&mut self, error: GraphQLError) {
        self.errors.push(error);
    }

    #[must_use]
    pub fn errors(&self) -> &[GraphQLError] {
        &self.errors
    }
}

/// A node of the response tree.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Node {
    #[default]
    Null,
    /// A boolean, number or string.
    Scalar(serde_json::Value),
    List(Vec<Node>),
    Object(IndexMap<String, Node>),
    /// Errors reported for this exact path.
    Errors(ErrorLeaf),
}

impl Node {
    /// An empty object.
    #[must_use]
    pub fn object() -> Self {
        Self::Object(IndexMap::new())
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub fn as_list(&self) -> Option<&[Node]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_error_leaf(&self) -> Option<&ErrorLeaf> {
        match self {
            Self::Errors(leaf) => Some(leaf),
            _ => None,
        }
    }

    /// Looks up the node at `path`.
    #[must_use]
    pub fn get(&self, path: &ResponsePath) -> Option<&Node> {
        path.segments()
            .iter()
            .try_fold(self, |node, segment| match (node, segment) {
                (Self::Object(fields), PathSegment::Field(name)) => fields.get(name),
                (Self::List(items), PathSegment::Index(index)) => items.get(*index),
                _ => None,
            })
    }

    /// Mutable lookup of the node at `path`.
    pub fn get_mut(&mut self, path: &ResponsePath) -> Option<&mut Node> {
        let mut node = self;
        for segment in path.segments() {
            node = match (node, segment) {
                (Self::Object(fields), PathSegment::Field(name)) => fields.get_mut(name)?,
                (Self::List(items), PathSegment::Index(index)) => items.get_mut(*index)?,
                _ => return None,
            };
        }
        Some(node)
    }

    /// Returns the slot at `path`, creating a missing final field or the next
    /// list element as `null`. Intermediate nodes must already exist.
    fn slot_mut(&mut self, path: &ResponsePath) -> Option<&mut Node> {
        let mut node = self;
        for segment in path.segments() {
            node = match (node, segment) {
                (Self::Object(fields), PathSegment::Field(name)) => {
                    fields.entry(name.clone()).or_default()
                }
                (Self::List(items), PathSegment::Index(index)) => {
                    if *index == items.len() {
                        items.push(Self::Null);
                    }
                    items.get_mut(*index)?
                }
                _ => return None,
            };
        }
        Some(node)
    }

    /// Refines this node with `incoming`.
    ///
    /// Objects merge key by key and lists element by element. A `null` slot
    /// takes the incoming value; a populated slot is never replaced.
    pub fn merge(&mut self, incoming: Node) {
        match (self, incoming) {
            (_, Self::Null) => {}
            (Self::Object(existing), Self::Object(fields)) => {
                for (key, value) in fields {
                    match existing.get_mut(&key) {
                        Some(slot) => slot.merge(value),
                        None => {
                            existing.insert(key, value);
                        }
                    }
                }
            }
            (Self::List(existing), Self::List(items)) => {
                for (index, item) in items.into_iter().enumerate() {
                    match existing.get_mut(index) {
                        Some(slot) => slot.merge(item),
                        None => existing.push(item),
                    }
                }
            }
            (Self::Errors(existing), Self::Errors(leaf)) => {
                existing.errors.extend(leaf.errors);
            }
            (slot, value) if slot.is_null() => *slot = value,
            _ => {}
        }
    }

    /// Merges `incoming` at `path`. Returns false if the path does not exist.
    pub fn merge_at(&mut self, path: &ResponsePath, incoming: Node) -> bool {
        match self.slot_mut(path) {
            Some(slot) => {
                slot.merge(incoming);
                true
            }
            None => false,
        }
    }

    /// Overwrites the slot at `path`. Returns false if the path does not exist.
    pub fn set_at(&mut self, path: &ResponsePath, value: Node) -> bool {
        match self.slot_mut(path) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    /// Places `items` into the list at `path`, starting at `start`.
    ///
    /// Returns the new list length, or `None` if `path` does not hold a list.
    pub fn append_items(
        &mut self,
        path: &ResponsePath,
        start: usize,
        items: Vec<Node>,
    ) -> Option<usize> {
        let Self::List(list) = self.get_mut(path)? else {
            return None;
        };
        for (offset, item) in items.into_iter().enumerate() {
            match list.get_mut(start + offset) {
                Some(slot) => slot.merge(item),
                None => list.push(item),
            }
        }
        Some(list.len())
    }

    /// Converts to plain JSON; error leaves become `null`.
    #[must_use]
    pub fn to_value(&self) -> serde_json::Value {
        match self {
            Self::Null | Self::Errors(_) => serde_json::Value::Null,
            Self::Scalar(value) => value.clone(),
            Self::List(items) => items.iter().map(Self::to_value).collect(),
            Self::Object(fields) => fields
                .iter()
                .map(|(k, v)| (k.clone(), v.to_value()))
                .collect::<serde_json::Map<_, _>>()
                .into(),
        }
    }
}

impl From<serde_json::Value> for Node {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Array(items) => {
                Self::List(items.into_iter().map(Self::from).collect())
            }
            serde_json::Value::Object(fields) => Self::Object(
                fields
                    .into_iter()
                    .map(|(k, v)| (k, Self::from(v)))
                    .collect(),
            ),
            scalar => Self::Scalar(scalar),
        }
    }
}

impl Serialize for Node {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Null | Self::Errors(_) => serializer.serialize_unit(),
            Self::Scalar(value) => value.serialize(serializer),
            Self::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Self::Object(fields) => {
                let mut map = serializer.serialize_map(Some(fields.len()))?;
                for (key, value) in fields {
                    map.serialize_entry(key, value)?;
                }
                map.end()
            }
        }
    }
}
