//! Append-only store of nodes keyed by caller-assigned identifier.

use fxhash::{FxHashMap, FxHashSet};
use slotmap::SlotMap;
use thiserror::Error;

use crate::node::{NodeData, NodeSlot};
use crate::telemetry::trace_debug;
use crate::NodeId;

/// Errors raised by [`Forest::genesis`] and [`Forest::add_child`].
///
/// Every variant names a precondition from the store's contract. None of
/// them leave the forest partially mutated: the checks run before any
/// arena write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ForestError {
    /// `genesis` was called with the same ID twice.
    #[error("duplicate genesis id {0}")]
    DuplicateGenesisId(NodeId),
    /// `add_child`'s parent ID is not a node in the forest.
    #[error("parent id {0} is not present in the forest")]
    UnknownParent(NodeId),
    /// `add_child`'s child ID already names a node in the forest.
    #[error("child id {0} is already present in the forest")]
    DuplicateChildId(NodeId),
    /// `add_child`'s child ID does not strictly exceed the parent's ID.
    #[error("child id {child} must be strictly greater than parent id {parent}")]
    NonIncreasingId {
        /// The parent ID passed to `add_child`.
        parent: NodeId,
        /// The child ID passed to `add_child`.
        child: NodeId,
    },
}

/// An append-only forest of integer-identified individuals.
///
/// Nodes live in a slot arena; a side table maps the caller-assigned
/// [`NodeId`] to its arena slot, so lookup by ID is O(1) while internal
/// traversal and pruning stay index-based rather than pointer-based.
#[derive(Debug, Clone, Default)]
pub struct Forest {
    arena: SlotMap<NodeSlot, NodeData>,
    index: FxHashMap<NodeId, NodeSlot>,
    genesis: Vec<NodeSlot>,
    leaves: FxHashSet<NodeSlot>,
    mrca: Option<NodeId>,
}

impl Forest {
    /// Build a forest whose genesis roots are exactly `ids`, each also a
    /// leaf, with no cached MRCA.
    ///
    /// Fails if `ids` contains a duplicate; the forest is not constructed at
    /// all in that case.
    pub fn genesis(ids: impl IntoIterator<Item = NodeId>) -> Result<Self, ForestError> {
        let mut forest = Self::default();
        for id in ids {
            if forest.index.contains_key(&id) {
                return Err(ForestError::DuplicateGenesisId(id));
            }
            let slot = forest.arena.insert(NodeData::genesis(id));
            forest.index.insert(id, slot);
            forest.genesis.push(slot);
            forest.leaves.insert(slot);
        }
        trace_debug!(count = forest.genesis.len(), "constructed genesis forest");
        Ok(forest)
    }

    /// Add `child_id` as a new leaf child of `parent_id`.
    ///
    /// Preconditions (each checked before any mutation): `parent_id` is in
    /// the forest, `child_id` is not, and `child_id > parent_id`. On success
    /// the parent is removed from the leaf set, the child is inserted into
    /// it, and the child is appended to the parent's child sequence.
    pub fn add_child(&mut self, parent_id: NodeId, child_id: NodeId) -> Result<(), ForestError> {
        let Some(&parent_slot) = self.index.get(&parent_id) else {
            return Err(ForestError::UnknownParent(parent_id));
        };
        if self.index.contains_key(&child_id) {
            return Err(ForestError::DuplicateChildId(child_id));
        }
        if child_id.0 <= parent_id.0 {
            return Err(ForestError::NonIncreasingId {
                parent: parent_id,
                child: child_id,
            });
        }

        let child_slot = self.arena.insert(NodeData {
            id: child_id,
            parent: Some(parent_slot),
            children: Vec::new(),
        });
        self.index.insert(child_id, child_slot);
        self.arena[parent_slot].children.push(child_slot);
        self.leaves.remove(&parent_slot);
        self.leaves.insert(child_slot);

        trace_debug!(%parent_id, %child_id, "added child");
        Ok(())
    }

    /// Rebuild a forest from an already-wired arena and id index.
    ///
    /// Used only by the persistence codec, which establishes parent/child
    /// links itself in two flat passes (see `serialization.rs`) and then
    /// hands the result here to recompute `genesis` and `leaves` rather than
    /// duplicating that bookkeeping.
    pub(crate) fn from_wired_arena(
        arena: SlotMap<NodeSlot, NodeData>,
        index: FxHashMap<NodeId, NodeSlot>,
    ) -> Self {
        let genesis = arena
            .iter()
            .filter(|(_, data)| data.parent.is_none())
            .map(|(slot, _)| slot)
            .collect();
        let leaves = arena
            .iter()
            .filter(|(_, data)| data.is_leaf())
            .map(|(slot, _)| slot)
            .collect();
        Self {
            arena,
            index,
            genesis,
            leaves,
            mrca: None,
        }
    }

    /// Number of nodes currently in the forest.
    pub fn len(&self) -> usize {
        self.arena.len()
    }

    /// Whether the forest has no nodes at all.
    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    /// Whether `id` names a node currently in the forest.
    pub fn contains(&self, id: NodeId) -> bool {
        self.index.contains_key(&id)
    }

    /// Whether `id` names a current leaf (a node with no children).
    ///
    /// Returns `false` if `id` is absent from the forest; use [`contains`](Self::contains)
    /// first if the distinction matters.
    pub fn is_leaf(&self, id: NodeId) -> bool {
        self.index
            .get(&id)
            .is_some_and(|slot| self.leaves.contains(slot))
    }

    /// The parent of `id`, if it has one.
    ///
    /// Returns `None` both when `id` is a genesis root and when `id` is not
    /// in the forest at all; use [`contains`](Self::contains) to tell them apart.
    pub fn parent_of(&self, id: NodeId) -> Option<NodeId> {
        let slot = *self.index.get(&id)?;
        let parent_slot = self.arena[slot].parent?;
        Some(self.arena[parent_slot].id)
    }

    /// The children of `id`, in the order they were added.
    ///
    /// Empty both when `id` is a leaf and when `id` is not in the forest.
    pub fn children_of(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        let slots: &[NodeSlot] = self
            .index
            .get(&id)
            .map(|&slot| self.arena[slot].children.as_slice())
            .unwrap_or(&[]);
        slots.iter().map(move |&slot| self.arena[slot].id)
    }

    /// All node IDs currently in the forest, in no particular order.
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.arena.values().map(|data| data.id)
    }

    /// The genesis roots, in construction order.
    pub fn genesis_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.genesis.iter().map(move |&slot| self.arena[slot].id)
    }

    /// All current leaves, in no particular order.
    pub fn leaf_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.leaves.iter().map(move |&slot| self.arena[slot].id)
    }

    /// The MRCA cached by the most recent [`crate::compute_pairwise_distances`]
    /// call, if any. Not an authoritative invariant between calls: it is
    /// simply the last value the engine computed.
    pub fn cached_mrca(&self) -> Option<NodeId> {
        self.mrca
    }

    pub(crate) fn set_cached_mrca(&mut self, mrca: Option<NodeId>) {
        self.mrca = mrca;
    }

    /// Restore every node not in `visited` unreachable, and sever `mrca`'s
    /// parent link if present. Used only by the distance engine's pruning
    /// option; kept here so arena invariants are maintained in one place.
    pub(crate) fn prune_to(&mut self, visited: &FxHashSet<NodeId>, mrca: Option<NodeId>) {
        if let Some(mrca_id) = mrca {
            if let Some(&mrca_slot) = self.index.get(&mrca_id) {
                self.arena[mrca_slot].parent = None;
            }
        }

        let doomed: Vec<NodeSlot> = self
            .arena
            .iter()
            .filter(|(_, data)| !visited.contains(&data.id))
            .map(|(slot, _)| slot)
            .collect();
        let doomed_set: FxHashSet<NodeSlot> = doomed.iter().copied().collect();

        for (_, data) in self.arena.iter_mut() {
            data.children.retain(|slot| !doomed_set.contains(slot));
        }
        for &slot in &doomed {
            let id = self.arena[slot].id;
            self.arena.remove(slot);
            self.index.remove(&id);
        }
        // Recompute genesis from scratch rather than just filtering the old
        // list: severing the MRCA's parent link above may have turned it
        // into a fresh root that was never a genesis node before.
        self.genesis = self
            .arena
            .iter()
            .filter(|(_, data)| data.parent.is_none())
            .map(|(slot, _)| slot)
            .collect();
        self.leaves = self
            .arena
            .iter()
            .filter(|(_, data)| data.is_leaf())
            .map(|(slot, _)| slot)
            .collect();

        trace_debug!(removed = doomed.len(), "pruned unreachable nodes");
    }
}
