//! In-memory program model backing the collaborator traits.
//!
//! `ProgramModel` wraps a validated `LoopProgram` and provides everything the
//! partitioner reads from upstream: the condensed dependence graph, the
//! control-flow graph and the loop forest. It is what the CLI feeds to the
//! partitioner, and what the tests use to describe realistic loop nests.
//!
//! ## SCC construction
//!
//! 1. Index every defined value in definition order
//! 2. Build a `DiGraph` with one node per value and one edge per dependence
//!    (loop-carried dependences included, since they close the cycles)
//! 3. Run petgraph's `condensation`, which also drops self loops and
//!    duplicate edges between SCCs
//! 4. Condensed node `i` becomes `SccId(i)`

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use indexmap::IndexSet;
use petgraph::algo::condensation;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use sccdag_schemas::{
    Block, BlockId, Instruction, Loop, LoopId, LoopProgram, SccId, ValueId,
};
use tracing::debug;

use crate::dependence::{
    ControlFlow, DependenceGraph, LoopCarriedDependence,
    LoopCarriedDependencies, LoopForest,
};
use crate::error::{PartitionError, PartitionErrorKind};

/// A validated loop program with its condensed dependence graph.
#[derive(Debug)]
pub struct ProgramModel {
    program: LoopProgram,
    block_index: HashMap<BlockId, usize>,
    loop_index: HashMap<LoopId, usize>,
    /// Defined values; the position is the dependence-graph node index.
    values: IndexSet<ValueId>,
    value_to_scc: Vec<SccId>,
    scc_values: Vec<Vec<ValueId>>,
    scc_parents: BTreeMap<SccId, BTreeSet<SccId>>,
    loop_children: HashMap<LoopId, Vec<LoopId>>,
}

/// Shorthand for an invalid-program error.
fn invalid(msg: String) -> PartitionError {
    PartitionError::new(PartitionErrorKind::InvalidProgram(msg))
}

impl ProgramModel {
    /// Validates `program` and condenses its dependences into SCCs.
    ///
    /// # Errors
    ///
    /// Returns an invalid-program error for duplicate block, loop or value
    /// definitions, references to unknown blocks, loops or values, a loop
    /// header outside its loop, or an unknown root loop.
    #[expect(
        clippy::cast_possible_truncation,
        reason = "SCC count is bounded by the value count, far below 2^32"
    )]
    pub fn new(program: LoopProgram) -> Result<Self, PartitionError> {
        // Step 1: Index blocks, loops and values.
        let mut block_index = HashMap::with_capacity(program.blocks.len());
        let mut values: IndexSet<ValueId> = IndexSet::new();
        for (position, block) in program.blocks.iter().enumerate() {
            if block_index.insert(block.id, position).is_some() {
                return Err(invalid(format!("{} is defined twice", block.id)));
            }
            for inst in &block.instructions {
                if !values.insert(inst.value) {
                    return Err(invalid(format!(
                        "{} is defined twice",
                        inst.value
                    )));
                }
            }
        }

        let mut loop_index = HashMap::with_capacity(program.loops.len());
        for (position, lp) in program.loops.iter().enumerate() {
            if loop_index.insert(lp.id, position).is_some() {
                return Err(invalid(format!("{} is defined twice", lp.id)));
            }
        }

        // Step 2: Check every cross reference.
        for block in &program.blocks {
            for succ in &block.successors {
                if !block_index.contains_key(succ) {
                    return Err(invalid(format!(
                        "{} branches to unknown {succ}",
                        block.id
                    )));
                }
            }
        }

        let mut loop_children: HashMap<LoopId, Vec<LoopId>> = HashMap::new();
        for lp in &program.loops {
            if let Some(unknown) =
                lp.blocks.iter().find(|b| !block_index.contains_key(b))
            {
                return Err(invalid(format!(
                    "{} contains unknown {unknown}",
                    lp.id
                )));
            }
            if !lp.blocks.contains(&lp.header) {
                return Err(invalid(format!(
                    "header {} of {} is not one of its blocks",
                    lp.header, lp.id
                )));
            }
            if let Some(parent) = lp.parent {
                if !loop_index.contains_key(&parent) || parent == lp.id {
                    return Err(invalid(format!(
                        "{} has invalid parent {parent}",
                        lp.id
                    )));
                }
                loop_children.entry(parent).or_default().push(lp.id);
            }
        }
        for children in loop_children.values_mut() {
            children.sort_unstable();
        }

        // Every parent chain must end at an outermost loop.
        for lp in &program.loops {
            let mut chain = HashSet::from([lp.id]);
            let mut current = lp.parent;
            while let Some(parent) = current {
                if !chain.insert(parent) {
                    return Err(invalid(format!(
                        "{} is nested in itself through {parent}",
                        lp.id
                    )));
                }
                current = program.loops[loop_index[&parent]].parent;
            }
        }

        if !loop_index.contains_key(&program.root_loop) {
            return Err(invalid(format!(
                "root loop {} is not defined",
                program.root_loop
            )));
        }

        for dep in &program.dependences {
            for value in [dep.producer, dep.consumer] {
                if !values.contains(&value) {
                    return Err(invalid(format!(
                        "dependence {} -> {} references undefined {value}",
                        dep.producer, dep.consumer
                    )));
                }
            }
            if let Some(lp) = dep.loop_carried
                && !loop_index.contains_key(&lp)
            {
                return Err(invalid(format!(
                    "dependence {} -> {} is carried by unknown {lp}",
                    dep.producer, dep.consumer
                )));
            }
        }

        // Step 3: Build the value-level dependence graph and condense it.
        let mut graph =
            DiGraph::<ValueId, ()>::with_capacity(values.len(), program.dependences.len());
        for &value in &values {
            graph.add_node(value);
        }
        for dep in &program.dependences {
            let from = values.get_index_of(&dep.producer).expect("validated above");
            let to = values.get_index_of(&dep.consumer).expect("validated above");
            graph.add_edge(NodeIndex::new(from), NodeIndex::new(to), ());
        }
        let condensed = condensation(graph, true);

        // Step 4: Map values to SCCs and collect SCC-level parents.
        let mut value_to_scc = vec![SccId(0); values.len()];
        let mut scc_values = Vec::with_capacity(condensed.node_count());
        for node in condensed.node_indices() {
            let scc = SccId(node.index() as u32);
            let mut members = condensed[node].clone();
            members.sort_unstable();
            for value in &members {
                let position =
                    values.get_index_of(value).expect("condensed from values");
                value_to_scc[position] = scc;
            }
            scc_values.push(members);
        }

        let mut scc_parents: BTreeMap<SccId, BTreeSet<SccId>> = BTreeMap::new();
        for edge in condensed.edge_references() {
            let parent = SccId(edge.source().index() as u32);
            let child = SccId(edge.target().index() as u32);
            scc_parents.entry(child).or_default().insert(parent);
        }

        debug!(
            values = values.len(),
            dependences = program.dependences.len(),
            sccs = scc_values.len(),
            "Condensed dependence graph"
        );

        Ok(Self {
            program,
            block_index,
            loop_index,
            values,
            value_to_scc,
            scc_values,
            scc_parents,
            loop_children,
        })
    }

    /// The validated program description.
    pub fn program(&self) -> &LoopProgram {
        &self.program
    }

    pub fn root_loop(&self) -> LoopId {
        self.program.root_loop
    }

    /// Number of SCCs in the condensed dependence graph.
    pub fn scc_count(&self) -> usize {
        self.scc_values.len()
    }

    /// Values belonging to `scc`, ascending. Empty for unknown SCCs.
    pub fn scc_values(&self, scc: SccId) -> &[ValueId] {
        self.scc_values.get(scc.index()).map_or(&[], Vec::as_slice)
    }

    /// For each SCC with incoming dependences, the SCCs it depends on.
    pub fn scc_parents(&self) -> &BTreeMap<SccId, BTreeSet<SccId>> {
        &self.scc_parents
    }

    /// True if `value` is defined by some instruction of the program.
    pub fn defines(&self, value: ValueId) -> bool {
        self.values.contains(&value)
    }

    /// SCCs owning at least one instruction inside `lp`.
    pub fn sccs_in_loop(&self, lp: LoopId) -> BTreeSet<SccId> {
        let Some(lp) = self.find_loop(lp) else {
            return BTreeSet::new();
        };
        lp.blocks
            .iter()
            .flat_map(|&block| self.instructions(block))
            .filter_map(|inst| self.scc_of_value(inst.value))
            .collect()
    }

    /// Position lookup through the block index.
    fn find_block(&self, block: BlockId) -> Option<&Block> {
        self.block_index
            .get(&block)
            .map(|&position| &self.program.blocks[position])
    }

    /// Position lookup through the loop index.
    fn find_loop(&self, lp: LoopId) -> Option<&Loop> {
        self.loop_index
            .get(&lp)
            .map(|&position| &self.program.loops[position])
    }
}

impl DependenceGraph for ProgramModel {
    fn scc_of_value(&self, value: ValueId) -> Option<SccId> {
        self.values
            .get_index_of(&value)
            .map(|position| self.value_to_scc[position])
    }
}

impl ControlFlow for ProgramModel {
    fn instructions(&self, block: BlockId) -> &[Instruction] {
        self.find_block(block)
            .map_or(&[], |b| b.instructions.as_slice())
    }

    fn successors(&self, block: BlockId) -> &[BlockId] {
        self.find_block(block).map_or(&[], |b| b.successors.as_slice())
    }
}

impl LoopForest for ProgramModel {
    fn header(&self, lp: LoopId) -> Option<BlockId> {
        self.find_loop(lp).map(|l| l.header)
    }

    fn contains_block(&self, lp: LoopId, block: BlockId) -> bool {
        self.find_loop(lp).is_some_and(|l| l.blocks.contains(&block))
    }

    fn descendants(&self, lp: LoopId) -> Vec<LoopId> {
        let mut visited = HashSet::from([lp]);
        let mut descendants = Vec::new();
        let mut stack: Vec<LoopId> = vec![lp];
        while let Some(current) = stack.pop() {
            let Some(children) = self.loop_children.get(&current) else {
                continue;
            };
            for &child in children.iter().rev() {
                if visited.insert(child) {
                    descendants.push(child);
                    stack.push(child);
                }
            }
        }
        descendants.sort_unstable();
        descendants
    }

    fn exit_blocks(&self, lp: LoopId) -> Vec<BlockId> {
        let Some(l) = self.find_loop(lp) else {
            return Vec::new();
        };
        let mut seen = HashSet::new();
        let mut exits = Vec::new();
        for &block in &l.blocks {
            for &succ in self.successors(block) {
                if !l.blocks.contains(&succ) && seen.insert(succ) {
                    exits.push(succ);
                }
            }
        }
        exits
    }
}

impl LoopCarriedDependencies for ProgramModel {
    fn loop_carried_dependencies(&self, lp: LoopId) -> Vec<LoopCarriedDependence> {
        self.program
            .dependences
            .iter()
            .filter(|dep| dep.loop_carried == Some(lp))
            .map(|dep| LoopCarriedDependence {
                producer: dep.producer,
                consumer: dep.consumer,
                memory: dep.memory,
            })
            .collect()
    }
}
