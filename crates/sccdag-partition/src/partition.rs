//! The set-level partition graph.
//!
//! `SccDagPartition` groups the SCCs of a dependence graph into sets and
//! keeps a directed graph over those sets: an edge `A -> B` means some SCC
//! in `A` has a dependence reaching some SCC in `B`. Three invariants hold
//! between public calls:
//!
//! 1. Every tracked SCC belongs to exactly one live set.
//! 2. At most one edge exists per ordered pair of distinct sets, and no set
//!    has an edge to itself.
//! 3. After `collapse_cycles` (and therefore after
//!    `merge_sets_and_collapse_resulting_cycles`) the graph is acyclic.
//!
//! ## Storage
//!
//! Sets live in a dense arena indexed by `SetId`. Merging never frees a slot
//! mid-traversal: the merged sets' slots are emptied and a fresh slot is
//! appended for the replacement. Slots are never reused, so a handle to a
//! merged-away set is detected as stale instead of silently aliasing a newer
//! set.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};

use sccdag_schemas::{SccId, ValueId};
use tracing::debug;

use crate::dependence::DependenceGraph;
use crate::error::{PartitionError, PartitionErrorKind};
use crate::set::{SccSet, SetId};
use crate::tarjan::strongly_connected_components;

/// A live arena slot: one set and its incident edges.
#[derive(Debug)]
struct SetNode {
    set: SccSet,
    parents: BTreeSet<SetId>,
    children: BTreeSet<SetId>,
}

/// Directed graph of SCC sets over an external dependence graph.
///
/// The dependence graph is borrowed read-only; the partition owns only the
/// sets, the edges between them, and the SCC-to-set membership map.
pub struct SccDagPartition<'a, D: ?Sized> {
    sccdag: &'a D,
    nodes: Vec<Option<SetNode>>,
    scc_to_set: HashMap<SccId, SetId>,
    live: usize,
}

/// Converts an arena position to a handle.
fn slot_id(index: usize) -> SetId {
    SetId(u32::try_from(index).expect("set arena exceeds u32 handles"))
}

impl<'a, D: DependenceGraph + ?Sized> SccDagPartition<'a, D> {
    /// Builds the partition from an initial cover and a parent map.
    ///
    /// One set is created per non-empty initial set. Then, for every tracked
    /// SCC and every tracked parent of it, an edge `parent set -> child set`
    /// is added unless both already share a set or the edge exists. SCCs of
    /// the parent map that no initial set covers are ignored, which lets the
    /// caller partition only a subgraph of interest.
    ///
    /// # Errors
    ///
    /// Returns an overlapping-sets error if an SCC appears in two initial
    /// sets.
    pub fn new(
        sccdag: &'a D,
        initial_sets: impl IntoIterator<Item = SccSet>,
        scc_to_parents: &BTreeMap<SccId, BTreeSet<SccId>>,
    ) -> Result<Self, PartitionError> {
        let mut partition = Self {
            sccdag,
            nodes: Vec::new(),
            scc_to_set: HashMap::new(),
            live: 0,
        };

        for set in initial_sets {
            if set.is_empty() {
                continue;
            }
            let id = slot_id(partition.nodes.len());
            for scc in set.iter() {
                if partition.scc_to_set.insert(scc, id).is_some() {
                    return Err(PartitionError::new(
                        PartitionErrorKind::OverlappingSets(scc),
                    ));
                }
            }
            partition.nodes.push(Some(SetNode {
                set,
                parents: BTreeSet::new(),
                children: BTreeSet::new(),
            }));
            partition.live += 1;
        }

        for (scc, parents) in scc_to_parents {
            let Some(&child) = partition.scc_to_set.get(scc) else {
                continue;
            };
            for parent in parents {
                let Some(&parent_set) = partition.scc_to_set.get(parent) else {
                    continue;
                };
                if parent_set != child {
                    partition.add_edge(parent_set, child);
                }
            }
        }

        debug!(
            sets = partition.live,
            edges = partition.num_edges(),
            sccs = partition.scc_to_set.len(),
            "Built SCC-DAG partition"
        );
        Ok(partition)
    }

    /// The dependence graph this partition was built over.
    pub fn sccdag(&self) -> &'a D {
        self.sccdag
    }

    /// Resolves the SCC owning `value` through the dependence graph.
    pub fn scc_of_value(&self, value: ValueId) -> Option<SccId> {
        self.sccdag.scc_of_value(value)
    }

    /// Returns the set that currently owns `scc`.
    ///
    /// # Errors
    ///
    /// Returns an untracked-SCC error if `scc` is not part of the
    /// partitioning.
    pub fn set_of_scc(&self, scc: SccId) -> Result<SetId, PartitionError> {
        self.scc_to_set.get(&scc).copied().ok_or_else(|| {
            PartitionError::new(PartitionErrorKind::UntrackedScc(scc))
        })
    }

    /// True if `scc` is tracked by this partition.
    pub fn is_included_in_partitioning(&self, scc: SccId) -> bool {
        self.scc_to_set.contains_key(&scc)
    }

    /// Returns the members of a live set.
    pub fn set(&self, id: SetId) -> Result<&SccSet, PartitionError> {
        self.node(id).map(|node| &node.set)
    }

    /// Direct predecessors of a live set.
    pub fn parents(&self, id: SetId) -> Result<&BTreeSet<SetId>, PartitionError> {
        self.node(id).map(|node| &node.parents)
    }

    /// Direct successors of a live set.
    pub fn children(
        &self,
        id: SetId,
    ) -> Result<&BTreeSet<SetId>, PartitionError> {
        self.node(id).map(|node| &node.children)
    }

    /// All live sets, in ascending handle order.
    pub fn sets(&self) -> impl Iterator<Item = SetId> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, node)| node.is_some())
            .map(|(index, _)| slot_id(index))
    }

    /// Live sets without incoming edges.
    pub fn roots(&self) -> impl Iterator<Item = SetId> + '_ {
        self.sets().filter(|&id| self.live_node(id).parents.is_empty())
    }

    /// Every edge as a `(from, to)` pair.
    pub fn edges(&self) -> impl Iterator<Item = (SetId, SetId)> + '_ {
        self.sets().flat_map(move |from| {
            self.live_node(from)
                .children
                .iter()
                .map(move |&to| (from, to))
        })
    }

    /// True if `from` has a direct edge to `to`. Stale handles have none.
    pub fn has_edge(&self, from: SetId, to: SetId) -> bool {
        self.node(from)
            .is_ok_and(|node| node.children.contains(&to))
    }

    /// Number of live sets.
    pub fn num_sets(&self) -> usize {
        self.live
    }

    /// Number of set-level edges.
    pub fn num_edges(&self) -> usize {
        self.nodes
            .iter()
            .flatten()
            .map(|node| node.children.len())
            .sum()
    }

    /// Every tracked SCC, in ascending id order.
    pub fn tracked_sccs(&self) -> BTreeSet<SccId> {
        self.scc_to_set.keys().copied().collect()
    }

    /// Number of SCCs the partition covers.
    pub fn num_tracked_sccs(&self) -> usize {
        self.scc_to_set.len()
    }

    /// True if `ancestor` reaches `descendant` by following edges forward.
    ///
    /// Walks incoming edges breadth-first starting at `descendant`. A set is
    /// not its own ancestor.
    pub fn is_ancestor(
        &self,
        ancestor: SetId,
        descendant: SetId,
    ) -> Result<bool, PartitionError> {
        self.node(ancestor)?;
        let mut visited = HashSet::from([descendant]);
        let mut queue: VecDeque<SetId> =
            self.node(descendant)?.parents.iter().copied().collect();

        while let Some(set) = queue.pop_front() {
            if set == ancestor {
                return Ok(true);
            }
            if !visited.insert(set) {
                continue;
            }
            queue.extend(self.live_node(set).parents.iter().copied());
        }
        Ok(false)
    }

    /// Merges the given sets into one fresh set and returns its handle.
    ///
    /// Member SCCs are repointed to the replacement. Edges between merged
    /// sets disappear; every other incident edge is moved onto the
    /// replacement, collapsing duplicates. The merged sets' handles are
    /// retired.
    ///
    /// A group with a single distinct set is left untouched and that set is
    /// returned. This call alone may leave a cycle behind (merging `A` and
    /// `C` of `A -> B -> C` does); use
    /// [`merge_sets_and_collapse_resulting_cycles`] to restore acyclicity.
    ///
    /// # Errors
    ///
    /// Fails without modifying anything if `sets` is empty or names a set
    /// that is not live.
    ///
    /// [`merge_sets_and_collapse_resulting_cycles`]: Self::merge_sets_and_collapse_resulting_cycles
    pub fn merge_sets(&mut self, sets: &[SetId]) -> Result<SetId, PartitionError> {
        let group: BTreeSet<SetId> = sets.iter().copied().collect();
        if group.is_empty() {
            return Err(PartitionError::new(PartitionErrorKind::EmptyMerge));
        }
        for &id in &group {
            self.node(id)?;
        }
        Ok(self.merge_live(&group))
    }

    /// Merges the given sets, then collapses any cycle the merge created.
    ///
    /// Returns the set that finally holds the merged SCCs, which differs
    /// from the immediate merge result if that set was itself folded into a
    /// collapsed cycle.
    pub fn merge_sets_and_collapse_resulting_cycles(
        &mut self,
        sets: &[SetId],
    ) -> Result<SetId, PartitionError> {
        let merged = self.merge_sets(sets)?;
        let anchor = self
            .live_node(merged)
            .set
            .any_scc()
            .expect("live sets are never empty");
        self.collapse_cycles();
        self.set_of_scc(anchor)
    }

    /// Merges every cycle of the current graph into a single set.
    ///
    /// Detection runs once over a fixed snapshot; merges are applied only
    /// after it finishes. One pass is enough: each cycle found is a maximal
    /// strongly connected component, and the quotient of a graph by its
    /// components is acyclic. Returns the number of cycles collapsed.
    pub fn collapse_cycles(&mut self) -> usize {
        let snapshot: Vec<SetId> = self.sets().collect();
        let cycles: Vec<BTreeSet<SetId>> =
            strongly_connected_components(snapshot, |id| {
                self.live_node(id)
                    .children
                    .iter()
                    .copied()
                    .collect::<Vec<_>>()
            })
            .into_iter()
            .filter(|component| component.len() > 1)
            .map(|component| component.into_iter().collect())
            .collect();

        for cycle in &cycles {
            let merged = self.merge_live(cycle);
            debug!(sets = cycle.len(), %merged, "Collapsed cycle");
        }
        cycles.len()
    }

    /// Orders live sets so that every set follows all of its parents.
    ///
    /// Breadth-first from the roots; a set is emitted once all of its
    /// parents have been emitted. An empty partition yields an empty order.
    ///
    /// # Errors
    ///
    /// Returns a residual-cycle error if some sets could not be ordered,
    /// which means the graph still contains a cycle.
    pub fn depth_ordered_sets(&self) -> Result<Vec<SetId>, PartitionError> {
        let mut ordered = Vec::with_capacity(self.live);
        let mut emitted: HashSet<SetId> = HashSet::with_capacity(self.live);
        let mut queue: VecDeque<SetId> = self.roots().collect();

        while let Some(id) = queue.pop_front() {
            // A set with several parents is enqueued once per parent.
            if emitted.contains(&id) {
                continue;
            }
            let node = self.live_node(id);

            // One of the parents not yet emitted will enqueue this set again.
            if !node.parents.iter().all(|parent| emitted.contains(parent)) {
                continue;
            }

            emitted.insert(id);
            ordered.push(id);
            queue.extend(
                node.children
                    .iter()
                    .copied()
                    .filter(|child| !emitted.contains(child)),
            );
        }

        if ordered.len() != self.live {
            return Err(PartitionError::new(PartitionErrorKind::ResidualCycle {
                ordered: ordered.len(),
                total: self.live,
            }));
        }
        Ok(ordered)
    }

    /// Lookup that rejects stale handles.
    fn node(&self, id: SetId) -> Result<&SetNode, PartitionError> {
        self.nodes
            .get(id.index())
            .and_then(Option::as_ref)
            .ok_or_else(|| PartitionError::new(PartitionErrorKind::UnknownSet(id)))
    }

    /// Lookup for handles known to be live (edge endpoints, map entries).
    fn live_node(&self, id: SetId) -> &SetNode {
        self.nodes[id.index()]
            .as_ref()
            .expect("edges and memberships only reference live sets")
    }

    /// Mutable form of `live_node`.
    fn live_node_mut(&mut self, id: SetId) -> &mut SetNode {
        self.nodes[id.index()]
            .as_mut()
            .expect("edges and memberships only reference live sets")
    }

    /// Adds `from -> to` unless it exists. Returns true if added.
    fn add_edge(&mut self, from: SetId, to: SetId) -> bool {
        let added = self.live_node_mut(from).children.insert(to);
        if added {
            self.live_node_mut(to).parents.insert(from);
        }
        added
    }

    /// Merges a non-empty group of live sets.
    fn merge_live(&mut self, group: &BTreeSet<SetId>) -> SetId {
        if let (1, Some(&only)) = (group.len(), group.first()) {
            return only;
        }

        let merged_id = slot_id(self.nodes.len());
        let mut merged = SetNode {
            set: SccSet::new(),
            parents: BTreeSet::new(),
            children: BTreeSet::new(),
        };

        for &id in group {
            let node = self.nodes[id.index()]
                .take()
                .expect("merge groups only contain live sets");
            self.live -= 1;

            // Edges to other members become internal and vanish; the rest
            // are rewired onto the replacement.
            for parent in node.parents {
                if group.contains(&parent) {
                    continue;
                }
                let parent_node = self.live_node_mut(parent);
                parent_node.children.remove(&id);
                parent_node.children.insert(merged_id);
                merged.parents.insert(parent);
            }
            for child in node.children {
                if group.contains(&child) {
                    continue;
                }
                let child_node = self.live_node_mut(child);
                child_node.parents.remove(&id);
                child_node.parents.insert(merged_id);
                merged.children.insert(child);
            }
            merged.set.absorb(node.set);
        }

        for scc in merged.set.iter() {
            self.scc_to_set.insert(scc, merged_id);
        }
        debug!(
            sets = group.len(),
            sccs = merged.set.len(),
            %merged_id,
            "Merged sets"
        );
        self.nodes.push(Some(merged));
        self.live += 1;
        merged_id
    }
}
