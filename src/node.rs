//! Node identifiers and arena-resident node data.

use derive_more::{Display, From, Into};
use slotmap::new_key_type;

new_key_type! {
    /// The arena slot a node occupies. Never exposed outside this crate:
    /// callers only ever see [`NodeId`], the caller-assigned integer.
    pub(crate) struct NodeSlot;
}

/// A caller-assigned, forest-unique individual identifier.
///
/// Wrapping the bare `i64` prevents accidentally passing a raw distance or
/// array index where a node identifier is expected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, From, Into, Display)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NodeId(pub i64);

/// Data held in the arena for a single node.
///
/// Children are kept in insertion order: the order in which `add_child` was
/// called, which is also the order a serialized stream preserves.
#[derive(Debug, Clone)]
pub(crate) struct NodeData {
    pub id: NodeId,
    pub parent: Option<NodeSlot>,
    pub children: Vec<NodeSlot>,
}

impl NodeData {
    pub fn genesis(id: NodeId) -> Self {
        Self {
            id,
            parent: None,
            children: Vec::new(),
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}
