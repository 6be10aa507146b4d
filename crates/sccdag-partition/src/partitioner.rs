//! Merge policy on top of the partition graph.
//!
//! `SccDagPartitioner` owns one `SccDagPartition` scoped to a root loop and
//! decides which sets must share a partition for correctness: endpoints of a
//! loop-carried memory dependence, and LCSSA phis with the values they relay
//! out of a nested loop. Callers layer their own merges on top through
//! `merge_pair` and `merge_all_pairs`.
//!
//! ## Debug order
//!
//! The partitioner numbers tracked SCCs in program-forward order (a DFS over
//! the root loop's blocks starting at its header). The numbering is session
//! state with an explicit dirty flag. These operations mark it stale:
//!
//! - `merge_pair`
//! - `merge_all_pairs`, when at least one merge happened
//! - `merge_loop_carried_dependencies` and
//!   `merge_lcssa_phis_with_the_values_they_propagate`, through
//!   `merge_all_pairs`
//! - `partition_graph_mut`
//!
//! While stale, `debug_order`, `debug_index`, `debug_index_of_value` and
//! `describe_set` fail with a stale-debug-order error until
//! `reset_partitioner` recomputes it.

use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use itertools::Itertools;
use sccdag_schemas::{LoopId, SccId, ValueId};
use tracing::{debug, debug_span, error};

use crate::dependence::Program;
use crate::error::{PartitionError, PartitionErrorKind};
use crate::partition::SccDagPartition;
use crate::set::{SccSet, SetId};

/// Program-forward numbering of the tracked SCCs.
#[derive(Debug, Default)]
struct DebugOrder {
    order: Vec<SccId>,
    index: HashMap<SccId, usize>,
    dirty: bool,
}

/// Partition graph plus the loop context its merge passes need.
pub struct SccDagPartitioner<'a, P> {
    partition: SccDagPartition<'a, P>,
    root_loop: LoopId,
    /// The root loop followed by its descendants in ascending id order.
    all_loops: Vec<LoopId>,
    debug: DebugOrder,
}

impl<'a, P: Program> SccDagPartitioner<'a, P> {
    /// Builds the partition graph and computes the initial debug order.
    ///
    /// # Errors
    ///
    /// Returns an unknown-loop error if `root_loop` is not part of the loop
    /// forest, propagates construction errors of the partition graph, and
    /// returns a debug-order mismatch if some tracked SCC has no instruction
    /// reachable from the root loop's header.
    pub fn new(
        program: &'a P,
        initial_sets: impl IntoIterator<Item = SccSet>,
        scc_to_parents: &BTreeMap<SccId, BTreeSet<SccId>>,
        root_loop: LoopId,
    ) -> Result<Self, PartitionError> {
        if program.header(root_loop).is_none() {
            return Err(PartitionError::new(PartitionErrorKind::UnknownLoop(
                root_loop,
            )));
        }
        let partition =
            SccDagPartition::new(program, initial_sets, scc_to_parents)?;
        let mut all_loops = vec![root_loop];
        all_loops.extend(
            program
                .descendants(root_loop)
                .into_iter()
                .filter(|&lp| lp != root_loop),
        );

        let mut partitioner = Self {
            partition,
            root_loop,
            all_loops,
            debug: DebugOrder::default(),
        };
        partitioner.reset_partitioner()?;
        Ok(partitioner)
    }

    /// Recomputes the debug order and clears the dirty flag.
    ///
    /// Walks the blocks of the root loop depth-first from its header,
    /// visiting each block once, and numbers every tracked SCC at its first
    /// instruction.
    ///
    /// # Errors
    ///
    /// Returns a debug-order mismatch if the walk does not discover every
    /// tracked SCC. The previous order stays stale in that case.
    pub fn reset_partitioner(&mut self) -> Result<(), PartitionError> {
        let program = self.partition.sccdag();
        let expected = self.partition.num_tracked_sccs();
        let mut order = Vec::with_capacity(expected);
        let mut index = HashMap::with_capacity(expected);

        let header = program.header(self.root_loop).ok_or_else(|| {
            PartitionError::new(PartitionErrorKind::UnknownLoop(self.root_loop))
        })?;
        let mut visited = HashSet::new();
        let mut todo = vec![header];
        while let Some(block) = todo.pop() {
            if !program.contains_block(self.root_loop, block)
                || !visited.insert(block)
            {
                continue;
            }

            for inst in program.instructions(block) {
                let Some(scc) = program.scc_of_value(inst.value) else {
                    continue;
                };
                if !self.partition.is_included_in_partitioning(scc) {
                    continue;
                }
                if let Entry::Vacant(slot) = index.entry(scc) {
                    slot.insert(order.len());
                    order.push(scc);
                }
            }

            todo.extend(
                program
                    .successors(block)
                    .iter()
                    .copied()
                    .filter(|succ| !visited.contains(succ)),
            );
        }

        if order.len() != expected {
            error!(
                found = order.len(),
                expected,
                root_loop = %self.root_loop,
                "Program-forward walk missed tracked SCCs"
            );
            self.debug.dirty = true;
            return Err(PartitionError::new(
                PartitionErrorKind::DebugOrderMismatch {
                    found: order.len(),
                    expected,
                },
            ));
        }

        debug!(sccs = order.len(), blocks = visited.len(), "Reset debug order");
        self.debug = DebugOrder {
            order,
            index,
            dirty: false,
        };
        Ok(())
    }

    /// True if a mutation happened since the last `reset_partitioner`.
    pub fn is_debug_order_stale(&self) -> bool {
        self.debug.dirty
    }

    /// Tracked SCCs in program-forward order.
    ///
    /// # Errors
    ///
    /// Fails with a stale-debug-order error after a mutation.
    pub fn debug_order(&self) -> Result<&[SccId], PartitionError> {
        Ok(&self.fresh_debug_order()?.order)
    }

    /// Position of `scc` in the debug order.
    ///
    /// # Errors
    ///
    /// Fails if the order is stale or `scc` is not tracked.
    pub fn debug_index(&self, scc: SccId) -> Result<usize, PartitionError> {
        self.fresh_debug_order()?
            .index
            .get(&scc)
            .copied()
            .ok_or_else(|| {
                PartitionError::new(PartitionErrorKind::UntrackedScc(scc))
            })
    }

    /// Position in the debug order of the SCC that owns `value`.
    pub fn debug_index_of_value(
        &self,
        value: ValueId,
    ) -> Result<usize, PartitionError> {
        let scc = self
            .partition
            .scc_of_value(value)
            .filter(|&scc| self.partition.is_included_in_partitioning(scc))
            .ok_or_else(|| {
                PartitionError::new(PartitionErrorKind::UntrackedValue(value))
            })?;
        self.debug_index(scc)
    }

    /// Renders a set as its members' sorted debug indices: `Set: 0 3 4`.
    pub fn describe_set(&self, set: SetId) -> Result<String, PartitionError> {
        let mut indices = self
            .partition
            .set(set)?
            .iter()
            .map(|scc| self.debug_index(scc))
            .collect::<Result<Vec<_>, _>>()?;
        indices.sort_unstable();
        Ok(format!("Set: {}", indices.iter().join(" ")))
    }

    /// True if merging `a` and `b` would close a cycle, that is, if either
    /// set is an ancestor of the other.
    pub fn is_merge_introducing_cycle(
        &self,
        a: SetId,
        b: SetId,
    ) -> Result<bool, PartitionError> {
        Ok(self.partition.is_ancestor(a, b)?
            || self.partition.is_ancestor(b, a)?)
    }

    /// Direct predecessors of `set`.
    pub fn get_parents(
        &self,
        set: SetId,
    ) -> Result<&BTreeSet<SetId>, PartitionError> {
        self.partition.parents(set)
    }

    /// Direct successors of `set`.
    pub fn get_children(
        &self,
        set: SetId,
    ) -> Result<&BTreeSet<SetId>, PartitionError> {
        self.partition.children(set)
    }

    /// Live sets in handle order.
    pub fn get_sets(&self) -> Vec<SetId> {
        self.partition.sets().collect()
    }

    /// Live sets with no parent.
    pub fn get_roots(&self) -> Vec<SetId> {
        self.partition.roots().collect()
    }

    /// Sets ordered so that every set follows all of its parents.
    pub fn get_depth_ordered_sets(&self) -> Result<Vec<SetId>, PartitionError> {
        self.partition.depth_ordered_sets()
    }

    /// Merges `a` and `b`, collapsing any cycle the merge creates, and
    /// returns the set now holding the SCCs of `a`.
    pub fn merge_pair(
        &mut self,
        a: SetId,
        b: SetId,
    ) -> Result<SetId, PartitionError> {
        let merged = self
            .partition
            .merge_sets_and_collapse_resulting_cycles(&[a, b])?;
        self.debug.dirty = true;
        Ok(merged)
    }

    /// Puts the two SCCs of every `(producer, consumer)` pair in one set.
    ///
    /// Pairs already sharing a set are skipped without touching the graph.
    /// The final partition does not depend on the iteration order. Returns
    /// the number of merges performed.
    ///
    /// # Errors
    ///
    /// Fails with an untracked-SCC error if a pair names an SCC outside the
    /// partitioning. Merges applied before the failing pair are kept.
    pub fn merge_all_pairs(
        &mut self,
        pairs: &BTreeSet<(SccId, SccId)>,
    ) -> Result<usize, PartitionError> {
        let mut merges = 0;
        for &(producer, consumer) in pairs {
            let producer_set = self.partition.set_of_scc(producer)?;
            let consumer_set = self.partition.set_of_scc(consumer)?;
            if producer_set == consumer_set {
                continue;
            }
            self.partition
                .merge_sets_and_collapse_resulting_cycles(&[
                    producer_set,
                    consumer_set,
                ])?;
            self.debug.dirty = true;
            merges += 1;
        }
        Ok(merges)
    }

    /// Co-locates the endpoints of every loop-carried memory dependence of
    /// the root loop and its descendants.
    ///
    /// Register dependences are left alone, as are dependences with an
    /// endpoint outside the partitioning. Returns the number of merges.
    pub fn merge_loop_carried_dependencies(
        &mut self,
    ) -> Result<usize, PartitionError> {
        let _span = debug_span!("merge_loop_carried_dependencies").entered();
        let program = self.partition.sccdag();

        let mut pairs = BTreeSet::new();
        for &lp in &self.all_loops {
            for dep in program.loop_carried_dependencies(lp) {
                if !dep.memory {
                    continue;
                }
                let (Some(producer), Some(consumer)) = (
                    self.tracked_scc_of(dep.producer),
                    self.tracked_scc_of(dep.consumer),
                ) else {
                    continue;
                };
                if producer != consumer {
                    pairs.insert((producer, consumer));
                }
            }
        }

        let merges = self.merge_all_pairs(&pairs)?;
        debug!(pairs = pairs.len(), merges, "Merged loop-carried memory dependences");
        Ok(merges)
    }

    /// Puts each LCSSA phi in the set of every tracked value it relays.
    ///
    /// LCSSA phis are the phis heading the exit blocks of the nested loops
    /// (the root loop's own exits are outside the partitioning). Returns the
    /// number of merges.
    pub fn merge_lcssa_phis_with_the_values_they_propagate(
        &mut self,
    ) -> Result<usize, PartitionError> {
        let _span = debug_span!("merge_lcssa_phis").entered();
        let program = self.partition.sccdag();

        let mut pairs = BTreeSet::new();
        let mut phis = 0;
        for &lp in self.all_loops.iter().filter(|&&lp| lp != self.root_loop) {
            for exit in program.exit_blocks(lp) {
                for (phi, incoming) in program
                    .instructions(exit)
                    .iter()
                    .map_while(|inst| Some((inst.value, inst.phi_incoming()?)))
                {
                    phis += 1;
                    let Some(consumer) = self.tracked_scc_of(phi) else {
                        continue;
                    };
                    for &value in incoming {
                        if let Some(producer) = self.tracked_scc_of(value) {
                            pairs.insert((producer, consumer));
                        }
                    }
                }
            }
        }

        let merges = self.merge_all_pairs(&pairs)?;
        debug!(phis, pairs = pairs.len(), merges, "Merged LCSSA phis");
        Ok(merges)
    }

    /// Number of sets currently in the partition.
    /// Number of live sets.
    pub fn number_of_partitions(&self) -> usize {
        self.partition.num_sets()
    }

    /// Read-only access to the partition graph.
    pub fn partition_graph(&self) -> &SccDagPartition<'a, P> {
        &self.partition
    }

    /// Mutable access to the partition graph. Marks the debug order stale.
    pub fn partition_graph_mut(&mut self) -> &mut SccDagPartition<'a, P> {
        self.debug.dirty = true;
        &mut self.partition
    }

    /// The loop this partitioner is scoped to.
    pub fn root_loop(&self) -> LoopId {
        self.root_loop
    }

    /// The root loop followed by every loop nested in it.
    pub fn loops(&self) -> &[LoopId] {
        &self.all_loops
    }

    /// The debug order, or an error if merges have made it stale.
    fn fresh_debug_order(&self) -> Result<&DebugOrder, PartitionError> {
        if self.debug.dirty {
            return Err(PartitionError::new(PartitionErrorKind::StaleDebugOrder));
        }
        Ok(&self.debug)
    }

    /// SCC of `value` if the partition tracks it.
    fn tracked_scc_of(&self, value: ValueId) -> Option<SccId> {
        self.partition
            .scc_of_value(value)
            .filter(|&scc| self.partition.is_included_in_partitioning(scc))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dependence::DependenceGraph;
    use crate::model::ProgramModel;
    use crate::testutil::{
        block, carried, dep, lcssa_nest, loop_of, mem_carried, program,
    };

    /// One singleton set per SCC of the root loop.
    fn partitioner(
        model: &ProgramModel,
    ) -> SccDagPartitioner<'_, ProgramModel> {
        let cover = model
            .sccs_in_loop(model.root_loop())
            .into_iter()
            .map(|scc| std::iter::once(scc).collect::<SccSet>());
        SccDagPartitioner::new(
            model,
            cover,
            model.scc_parents(),
            model.root_loop(),
        )
        .unwrap()
    }

    /// SCC defining `%value`.
    fn scc(model: &ProgramModel, value: u32) -> SccId {
        model.scc_of_value(ValueId(value)).unwrap()
    }

    /// Set currently holding `%value`.
    fn set_of(
        p: &SccDagPartitioner<'_, ProgramModel>,
        model: &ProgramModel,
        value: u32,
    ) -> SetId {
        p.partition_graph().set_of_scc(scc(model, value)).unwrap()
    }

    /// SCCs are numbered in the order a DFS from the header meets them.
    #[test]
    fn test_debug_order_follows_program_order() {
        let model = ProgramModel::new(lcssa_nest()).unwrap();
        let p = partitioner(&model);

        // %6 lives outside the root loop and is not tracked.
        let expected: Vec<SccId> =
            [0, 1, 2, 4, 5].iter().map(|&v| scc(&model, v)).collect();
        assert_eq!(p.debug_order().unwrap(), expected.as_slice());
        assert_eq!(p.debug_index(scc(&model, 3)).unwrap(), 2);
        assert_eq!(p.debug_index_of_value(ValueId(5)).unwrap(), 4);
        assert!(
            p.debug_index_of_value(ValueId(6))
                .unwrap_err()
                .is_untracked_value()
        );
        assert!(p.debug_index(scc(&model, 6)).unwrap_err().is_untracked_scc());
        assert_eq!(p.loops(), &[LoopId(0), LoopId(1)]);
        assert_eq!(p.root_loop(), LoopId(0));
    }

    /// Memory dependences carried by a nested loop are merged; register
    /// ones are not.
    #[test]
    fn test_loop_carried_memory_merge_scenario() {
        let model = ProgramModel::new(program(
            vec![block(0, &[1, 2], &[1]), block(1, &[3, 4], &[1, 0])],
            vec![loop_of(0, 0, &[0, 1], None), loop_of(1, 1, &[1], Some(0))],
            vec![dep(1, 2), dep(3, 4), mem_carried(4, 2, 1), carried(3, 1, 0)],
        ))
        .unwrap();
        let mut p = partitioner(&model);
        assert_eq!(p.number_of_partitions(), 4);
        assert_ne!(set_of(&p, &model, 4), set_of(&p, &model, 2));

        assert_eq!(p.merge_loop_carried_dependencies().unwrap(), 1);

        assert_eq!(set_of(&p, &model, 4), set_of(&p, &model, 2));
        assert_ne!(set_of(&p, &model, 3), set_of(&p, &model, 1));
        assert_eq!(p.number_of_partitions(), 3);
        assert!(p.is_debug_order_stale());
        assert_eq!(p.get_depth_ordered_sets().unwrap().len(), 3);
    }

    /// An LCSSA phi joins the set of the value it relays.
    #[test]
    fn test_lcssa_relay_merge_scenario() {
        let model = ProgramModel::new(lcssa_nest()).unwrap();
        let mut p = partitioner(&model);
        assert_ne!(set_of(&p, &model, 4), set_of(&p, &model, 3));

        assert_eq!(p.merge_lcssa_phis_with_the_values_they_propagate().unwrap(), 1);

        assert_eq!(set_of(&p, &model, 4), set_of(&p, &model, 3));
        assert_eq!(set_of(&p, &model, 4), set_of(&p, &model, 2));
        assert_ne!(set_of(&p, &model, 5), set_of(&p, &model, 4));
        assert_eq!(p.number_of_partitions(), 4);

        p.reset_partitioner().unwrap();
        let merged = set_of(&p, &model, 4);
        assert_eq!(p.describe_set(merged).unwrap(), "Set: 2 3");
    }

    /// Merges mark the debug order stale until it is reset.
    #[test]
    fn test_merges_mark_debug_order_stale_until_reset() {
        let model = ProgramModel::new(lcssa_nest()).unwrap();
        let mut p = partitioner(&model);
        assert!(!p.is_debug_order_stale());

        let (a, b) = (set_of(&p, &model, 0), set_of(&p, &model, 5));
        p.merge_pair(a, b).unwrap();
        assert!(p.debug_order().unwrap_err().is_stale_debug_order());
        assert!(
            p.debug_index(scc(&model, 0))
                .unwrap_err()
                .is_stale_debug_order()
        );
        assert!(p.describe_set(set_of(&p, &model, 0)).is_err());

        p.reset_partitioner().unwrap();
        assert_eq!(p.debug_order().unwrap().len(), 5);

        let _ = p.partition_graph_mut();
        assert!(p.is_debug_order_stale());
    }

    /// Merging both ends of a path folds everything between them.
    #[test]
    fn test_merge_pair_collapses_the_path_between() {
        let model = ProgramModel::new(lcssa_nest()).unwrap();
        let mut p = partitioner(&model);
        let (first, last) = (set_of(&p, &model, 0), set_of(&p, &model, 5));
        assert!(p.is_merge_introducing_cycle(first, last).unwrap());
        assert!(p.is_merge_introducing_cycle(last, first).unwrap());

        let merged = p.merge_pair(first, last).unwrap();

        // 0 -> 1 -> {2,3} -> 4 -> 5 folds into one set.
        assert_eq!(p.number_of_partitions(), 1);
        assert_eq!(p.get_sets(), vec![merged]);
        assert_eq!(p.get_roots(), vec![merged]);
        assert!(p.get_parents(merged).unwrap().is_empty());
        assert!(p.get_children(merged).unwrap().is_empty());
        assert!(p.get_parents(first).unwrap_err().is_unknown_set());
    }

    /// Pairs already sharing a set leave the graph untouched.
    #[test]
    fn test_merge_all_pairs_skips_pairs_already_together() {
        let model = ProgramModel::new(lcssa_nest()).unwrap();
        let mut p = partitioner(&model);
        let edges_before = p.partition_graph().num_edges();

        let same = BTreeSet::from([(scc(&model, 2), scc(&model, 3))]);
        assert_eq!(p.merge_all_pairs(&same).unwrap(), 0);
        assert_eq!(p.partition_graph().num_edges(), edges_before);
        assert!(!p.is_debug_order_stale());

        let untracked = BTreeSet::from([(scc(&model, 0), scc(&model, 6))]);
        assert!(p.merge_all_pairs(&untracked).unwrap_err().is_untracked_scc());
    }

    /// Siblings can merge without closing a cycle.
    #[test]
    fn test_siblings_do_not_introduce_cycles() {
        // %1 feeds both %2 and %3.
        let model = ProgramModel::new(program(
            vec![block(0, &[1, 2, 3], &[0])],
            vec![loop_of(0, 0, &[0], None)],
            vec![dep(1, 2), dep(1, 3)],
        ))
        .unwrap();
        let p = partitioner(&model);
        let (s2, s3) = (set_of(&p, &model, 2), set_of(&p, &model, 3));
        assert!(!p.is_merge_introducing_cycle(s2, s3).unwrap());
        assert!(!p.is_merge_introducing_cycle(s3, s2).unwrap());
    }

    /// A tracked SCC the walk never reaches is a mismatch.
    #[test]
    fn test_unreachable_tracked_scc_is_a_mismatch() {
        // bb1 belongs to the loop but nothing branches to it.
        let model = ProgramModel::new(program(
            vec![block(0, &[1], &[0]), block(1, &[2], &[0])],
            vec![loop_of(0, 0, &[0, 1], None)],
            vec![dep(1, 2)],
        ))
        .unwrap();
        let cover = model
            .sccs_in_loop(LoopId(0))
            .into_iter()
            .map(|scc| std::iter::once(scc).collect::<SccSet>());
        let err = SccDagPartitioner::new(
            &model,
            cover,
            model.scc_parents(),
            LoopId(0),
        )
        .err()
        .unwrap();
        assert!(err.is_debug_order_mismatch());
        assert!(err.is_contract_violation());
    }

    /// A root loop the loop forest does not know is a typed error.
    #[test]
    fn test_unknown_root_loop_is_rejected() {
        let model = ProgramModel::new(lcssa_nest()).unwrap();
        let cover = model
            .sccs_in_loop(model.root_loop())
            .into_iter()
            .map(|scc| std::iter::once(scc).collect::<SccSet>());
        let err = SccDagPartitioner::new(
            &model,
            cover,
            model.scc_parents(),
            LoopId(9),
        )
        .err()
        .unwrap();
        assert!(err.is_unknown_loop());
        assert!(err.is_contract_violation());
        assert!(err.to_string().contains("loop9"));
    }
}
