//! Structural equality for nodes and forests.
//!
//! Node equality is deep on children but shallow on parents by definition.
//! Genesis subtrees can run 10^5+ nodes deep, so the walk below uses an
//! explicit stack rather than recursing one call frame per level.

use fxhash::FxHashSet;

use crate::forest::Forest;
use crate::NodeId;

impl Forest {
    /// Compare the subtree rooted at `id` in `self` against the subtree
    /// rooted at `other_id` in `other` (which may be the same forest).
    ///
    /// Two nodes are equal iff: same ID; parents both absent or both
    /// present with equal IDs (one hop only, the grandparent is never
    /// inspected); same number of children; children equal pairwise in
    /// order. Absent nodes never compare equal to anything.
    pub fn node_subtree_eq(&self, id: NodeId, other: &Forest, other_id: NodeId) -> bool {
        let mut stack = vec![(id, other_id)];
        while let Some((a, b)) = stack.pop() {
            if a != b {
                return false;
            }
            if !self.contains(a) || !other.contains(b) {
                return false;
            }
            if self.parent_of(a) != other.parent_of(b) {
                return false;
            }
            let a_children: Vec<NodeId> = self.children_of(a).collect();
            let b_children: Vec<NodeId> = other.children_of(b).collect();
            if a_children.len() != b_children.len() {
                return false;
            }
            stack.extend(a_children.into_iter().zip(b_children));
        }
        true
    }
}

impl PartialEq for Forest {
    /// Two forests are equal iff they share the same set of genesis IDs
    /// (order-independent: the codec does not promise to preserve genesis
    /// order, see `serialization.rs`) and, for every genesis ID, the
    /// subtrees rooted at it are equal under [`Forest::node_subtree_eq`].
    fn eq(&self, other: &Self) -> bool {
        let mut self_genesis: Vec<NodeId> = self.genesis_ids().collect();
        let mut other_genesis: Vec<NodeId> = other.genesis_ids().collect();
        self_genesis.sort_unstable();
        other_genesis.sort_unstable();
        if self_genesis != other_genesis {
            return false;
        }

        let mut seen = FxHashSet::default();
        for root in self_genesis {
            if !seen.insert(root) {
                continue;
            }
            if !self.node_subtree_eq(root, other, root) {
                return false;
            }
        }
        true
    }
}

impl Eq for Forest {}
