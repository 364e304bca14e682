//! The pairwise-distance engine.
//!
//! [`compute_pairwise_distances`] performs a single bottom-up sweep over a
//! query set: it climbs from every query ID towards the root(s), processing
//! nodes in strictly decreasing ID order (a valid postorder, since every
//! child ID exceeds its parent's), folding per-subtree offspring-distance
//! maps as it goes. One call produces all pairwise distances between
//! ancestors of the query set, the MRCA if the query set shares one, and the
//! MRCA's distances to its visited descendants.

use std::collections::BinaryHeap;

use fxhash::{FxHashMap, FxHashSet};
use itertools::Itertools;
use thiserror::Error;

use crate::forest::Forest;
use crate::node::NodeId;
use crate::telemetry::trace_debug;

/// Options controlling a [`compute_pairwise_distances`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DistanceOptions {
    /// Prune the forest of every node the sweep never visited, once the
    /// call completes. Severs the MRCA's parent link (if it has one) so the
    /// pruned-away upper tree becomes collectible. See the crate docs for
    /// why this makes pruning and later re-parenting above the MRCA
    /// incompatible.
    pub remove_unreachable_nodes: bool,
    /// Distances strictly greater than this are neither recorded in the
    /// pairwise map nor propagated further up the tree. Defaults to
    /// `i64::MAX`, i.e. effectively unbounded.
    pub max_distance: i64,
}

impl Default for DistanceOptions {
    fn default() -> Self {
        Self {
            remove_unreachable_nodes: false,
            max_distance: i64::MAX,
        }
    }
}

/// The outputs of one [`compute_pairwise_distances`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DistanceResult {
    /// The most recent common ancestor of the query set, present only when
    /// every query ID descends from the same genesis root and the sweep
    /// reaches it before its queue empties.
    pub mrca: Option<NodeId>,
    /// `(min_id, max_id) -> distance` for every pair the sweep reached.
    /// Always contains `(id, id) -> 0` for every node the sweep visited.
    pub pairwise: FxHashMap<(NodeId, NodeId), i64>,
    /// Distances from the MRCA down to every node in its visited subtree.
    /// Empty when no MRCA was found.
    pub mrca_distances: FxHashMap<NodeId, i64>,
}

/// Errors raised by [`compute_pairwise_distances`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DistanceError {
    /// A query ID does not name a node currently in the forest. Raised
    /// before the sweep starts; the forest is left untouched.
    #[error("query id {0} is not present in the forest")]
    UnknownQueryId(NodeId),
}

/// Run the upward sweep over `query_ids` and return its three outputs.
///
/// Fails without touching the forest if any ID in `query_ids` is absent.
/// On success, the forest's cached MRCA is updated, and if
/// `options.remove_unreachable_nodes` is set, every node the sweep never
/// visited is dropped (see [`DistanceOptions::remove_unreachable_nodes`]).
///
/// ## The MRCA-enqueue corner case
///
/// A node's parent is enqueued only when the queue is still non-empty right
/// after that node is popped; this is what terminates the sweep at the
/// lowest common ancestor instead of always climbing to a genesis root. One
/// consequence: if the true lowest common ancestor of the query set is
/// popped while it is the sole remaining queue entry, its own parent is
/// never enqueued and never visited — the MRCA reported is then that
/// lowest common ancestor. Multiple query roots never report an MRCA at
/// all: the first genesis node popped marks a root as seen, which
/// disqualifies every later genesis node (and the sweep as a whole) from
/// being flagged.
pub fn compute_pairwise_distances(
    forest: &mut Forest,
    query_ids: impl IntoIterator<Item = NodeId>,
    options: DistanceOptions,
) -> Result<DistanceResult, DistanceError> {
    let query_ids: FxHashSet<NodeId> = query_ids.into_iter().collect();
    for &id in &query_ids {
        if !forest.contains(id) {
            return Err(DistanceError::UnknownQueryId(id));
        }
    }

    let mut heap: BinaryHeap<NodeId> = query_ids.iter().copied().collect();
    let mut enqueued: FxHashSet<NodeId> = query_ids.clone();
    let mut seen_roots: FxHashSet<NodeId> = FxHashSet::default();
    let mut offspring: FxHashMap<NodeId, FxHashMap<NodeId, i64>> = FxHashMap::default();
    let mut pairwise: FxHashMap<(NodeId, NodeId), i64> = FxHashMap::default();
    let mut visited: FxHashSet<NodeId> = FxHashSet::default();
    let mut mrca: Option<NodeId> = None;

    while let Some(n) = heap.pop() {
        visited.insert(n);

        // Phase 1: MRCA detection, checked against the seen-roots state as
        // it stood *before* this node's own root-ness (if any) is recorded
        // below in phase 2.
        if heap.is_empty() && seen_roots.is_empty() {
            mrca = Some(n);
        }

        // Phase 2: enqueue the parent, unless the queue just emptied (that
        // terminates the climb here), or record a seen root.
        match forest.parent_of(n) {
            Some(parent) if !heap.is_empty() => {
                if enqueued.insert(parent) {
                    heap.push(parent);
                }
            }
            Some(_) => {}
            None => {
                seen_roots.insert(n);
            }
        }

        // Phase 3: fold n's visited children's offspring-distance maps into
        // n's own, emitting pairwise entries as we go.
        let mut my_offspring: FxHashMap<NodeId, i64> = FxHashMap::default();
        my_offspring.insert(n, 0);
        pairwise.insert((n, n), 0);

        let visited_children: Vec<NodeId> = forest
            .children_of(n)
            .filter(|c| offspring.contains_key(c))
            .collect();

        for &child in &visited_children {
            for (&descendant, &dist) in &offspring[&child] {
                let new_dist = dist + 1;
                if new_dist > options.max_distance {
                    continue;
                }
                my_offspring.insert(descendant, new_dist);
                pairwise.insert(canonical_pair(n, descendant), new_dist);
            }
        }

        for (c1, c2) in visited_children.iter().tuple_combinations() {
            for (&d1, &dist1) in &offspring[c1] {
                if dist1 > options.max_distance {
                    continue;
                }
                for (&d2, &dist2) in &offspring[c2] {
                    let new_dist = dist1 + dist2 + 2;
                    if new_dist > options.max_distance {
                        continue;
                    }
                    pairwise.insert(canonical_pair(d1, d2), new_dist);
                }
            }
        }

        offspring.insert(n, my_offspring);
    }

    let mrca_distances = mrca
        .and_then(|m| offspring.get(&m).cloned())
        .unwrap_or_default();

    forest.set_cached_mrca(mrca);
    if options.remove_unreachable_nodes {
        forest.prune_to(&visited, mrca);
    }

    trace_debug!(
        visited = visited.len(),
        pairwise = pairwise.len(),
        "computed pairwise distances"
    );

    Ok(DistanceResult {
        mrca,
        pairwise,
        mrca_distances,
    })
}

fn canonical_pair(a: NodeId, b: NodeId) -> (NodeId, NodeId) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Forest;

    fn id(n: i64) -> NodeId {
        NodeId(n)
    }

    fn chain_forest() -> Forest {
        // genesis [1]; 1->2, 2->3, 2->4, 3->5, 4->6, 6->7
        let mut f = Forest::genesis([id(1)]).unwrap();
        f.add_child(id(1), id(2)).unwrap();
        f.add_child(id(2), id(3)).unwrap();
        f.add_child(id(2), id(4)).unwrap();
        f.add_child(id(3), id(5)).unwrap();
        f.add_child(id(4), id(6)).unwrap();
        f.add_child(id(6), id(7)).unwrap();
        f
    }

    #[test]
    fn scenario_1_linear_chain() {
        let mut forest = chain_forest();
        let result =
            compute_pairwise_distances(&mut forest, [id(5), id(7)], DistanceOptions::default())
                .unwrap();

        // Node 2 is popped last while the queue is already a singleton, so
        // the queue is empty right after that pop and node 2's own parent
        // (node 1) is never enqueued or visited. The MRCA is node 2.
        assert_eq!(result.mrca, Some(id(2)));
        let get = |a: i64, b: i64| result.pairwise.get(&canonical_pair(id(a), id(b))).copied();
        assert_eq!(get(5, 7), Some(5));
        assert_eq!(get(3, 4), Some(2));
        assert_eq!(get(3, 7), Some(4));
        assert_eq!(get(6, 7), Some(1));
        assert_eq!(get(2, 5), Some(2));
        assert_eq!(get(3, 6), Some(3));
        assert_eq!(get(1, 2), None, "node 1 is never visited by this sweep");
        assert!(forest.contains(id(1)), "no pruning requested, node 1 still present");
    }

    #[test]
    fn scenario_2_disconnected_genesis_roots() {
        let mut forest = Forest::genesis([id(1), id(2)]).unwrap();
        forest.add_child(id(1), id(3)).unwrap();
        forest.add_child(id(2), id(4)).unwrap();

        let result =
            compute_pairwise_distances(&mut forest, [id(3), id(4)], DistanceOptions::default())
                .unwrap();

        assert_eq!(result.mrca, None);
        assert!(result.mrca_distances.is_empty());
        assert_eq!(result.pairwise.get(&(id(1), id(3))), Some(&1));
        assert_eq!(result.pairwise.get(&(id(2), id(4))), Some(&1));
        assert_eq!(result.pairwise.get(&canonical_pair(id(3), id(4))), None);
    }

    #[test]
    fn scenario_3_mrca_at_genesis_then_deeper() {
        let mut forest = Forest::genesis([id(1), id(2)]).unwrap();
        forest.add_child(id(1), id(3)).unwrap();
        forest.add_child(id(1), id(4)).unwrap();

        let result =
            compute_pairwise_distances(&mut forest, [id(3), id(4)], DistanceOptions::default())
                .unwrap();
        assert_eq!(result.mrca, Some(id(1)));

        forest.add_child(id(3), id(5)).unwrap();
        forest.add_child(id(4), id(6)).unwrap();
        let result =
            compute_pairwise_distances(&mut forest, [id(5), id(6)], DistanceOptions::default())
                .unwrap();
        assert_eq!(result.mrca, Some(id(1)));
        assert_eq!(result.pairwise.get(&canonical_pair(id(5), id(6))), Some(&4));
    }

    #[test]
    fn scenario_4_subset_with_sibling_skip_and_pruning() {
        let mut forest = Forest::genesis([id(1), id(2)]).unwrap();
        forest.add_child(id(1), id(3)).unwrap();
        forest.add_child(id(1), id(4)).unwrap();

        let result =
            compute_pairwise_distances(&mut forest, [id(2), id(3)], DistanceOptions::default())
                .unwrap();
        assert_eq!(result.mrca, None);
        assert_eq!(result.pairwise.get(&canonical_pair(id(1), id(2))), None);
        assert_eq!(result.pairwise.get(&canonical_pair(id(1), id(4))), None);
        assert_eq!(result.pairwise.get(&canonical_pair(id(1), id(3))), Some(&1));

        let options = DistanceOptions {
            remove_unreachable_nodes: true,
            ..Default::default()
        };
        compute_pairwise_distances(&mut forest, [id(2), id(3)], options).unwrap();
        assert!(!forest.contains(id(4)));
        assert!(forest.contains(id(1)));
        assert!(forest.contains(id(2)));
        assert!(forest.contains(id(3)));
    }

    #[test]
    fn unknown_query_id_fails_without_mutating() {
        let mut forest = chain_forest();
        let before = forest.len();
        let err =
            compute_pairwise_distances(&mut forest, [id(999)], DistanceOptions::default())
                .unwrap_err();
        assert_eq!(err, DistanceError::UnknownQueryId(id(999)));
        assert_eq!(forest.len(), before);
    }

    #[test]
    fn max_distance_caps_every_pairwise_entry() {
        // balanced binary tree of depth 13 rooted at 0, query last-level leaves
        let mut forest = Forest::genesis([id(0)]).unwrap();
        let mut next_id: i64 = 1;
        let mut frontier = vec![id(0)];
        let depth = 13;
        let mut last_level = vec![id(0)];
        for _level in 0..depth {
            let mut next_frontier = Vec::new();
            for &parent in &frontier {
                for _ in 0..2 {
                    let child = id(next_id);
                    next_id += 1;
                    forest.add_child(parent, child).unwrap();
                    next_frontier.push(child);
                }
            }
            last_level = next_frontier.clone();
            frontier = next_frontier;
        }
        assert_eq!(last_level.len(), 1 << depth);

        let options = DistanceOptions {
            remove_unreachable_nodes: false,
            max_distance: 12,
        };
        let result = compute_pairwise_distances(&mut forest, last_level, options).unwrap();
        assert!(result.pairwise.values().all(|&d| d <= 12));
        assert!(!result.pairwise.is_empty());
    }

    #[test]
    fn scenario_4_pairwise_map_structural_dump() {
        // A full assertion chain over every entry of a pairwise map is more
        // tedious to read than the map itself; dump it as a sorted snapshot
        // instead.
        let mut forest = Forest::genesis([id(1), id(2)]).unwrap();
        forest.add_child(id(1), id(3)).unwrap();
        forest.add_child(id(1), id(4)).unwrap();
        forest.add_child(id(3), id(5)).unwrap();
        forest.add_child(id(4), id(6)).unwrap();

        let result = compute_pairwise_distances(
            &mut forest,
            [id(5), id(6)],
            DistanceOptions::default(),
        )
        .unwrap();

        let mut pairwise: Vec<((i64, i64), i64)> = result
            .pairwise
            .iter()
            .map(|(&(a, b), &d)| ((a.0, b.0), d))
            .collect();
        pairwise.sort_unstable();

        insta::assert_debug_snapshot!(pairwise, @r###"
        [
            (
                (
                    1,
                    1,
                ),
                0,
            ),
            (
                (
                    1,
                    3,
                ),
                1,
            ),
            (
                (
                    1,
                    4,
                ),
                1,
            ),
            (
                (
                    1,
                    5,
                ),
                2,
            ),
            (
                (
                    1,
                    6,
                ),
                2,
            ),
            (
                (
                    3,
                    3,
                ),
                0,
            ),
            (
                (
                    3,
                    4,
                ),
                2,
            ),
            (
                (
                    3,
                    5,
                ),
                1,
            ),
            (
                (
                    3,
                    6,
                ),
                3,
            ),
            (
                (
                    4,
                    4,
                ),
                0,
            ),
            (
                (
                    4,
                    5,
                ),
                3,
            ),
            (
                (
                    4,
                    6,
                ),
                1,
            ),
            (
                (
                    5,
                    5,
                ),
                0,
            ),
            (
                (
                    5,
                    6,
                ),
                4,
            ),
            (
                (
                    6,
                    6,
                ),
                0,
            ),
        ]
        "###);
        assert_eq!(result.mrca, Some(id(1)));
    }

    #[test]
    fn pruning_keeps_exactly_the_visited_set() {
        let mut forest = chain_forest();
        let options = DistanceOptions {
            remove_unreachable_nodes: true,
            ..Default::default()
        };
        compute_pairwise_distances(&mut forest, [id(5), id(7)], options).unwrap();

        let surviving: FxHashSet<NodeId> = forest.node_ids().collect();
        assert_eq!(
            surviving,
            [2, 3, 4, 5, 6, 7].into_iter().map(id).collect::<FxHashSet<_>>()
        );
        // MRCA's parent link is severed: 2 is now a genesis root.
        assert!(forest.genesis_ids().any(|g| g == id(2)));
        assert_eq!(forest.parent_of(id(2)), None);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn distance_options_round_trip_through_json() {
        let options = DistanceOptions {
            remove_unreachable_nodes: true,
            max_distance: 7,
        };
        let json = serde_json::to_string(&options).unwrap();
        let restored: DistanceOptions = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, options);
    }
}
