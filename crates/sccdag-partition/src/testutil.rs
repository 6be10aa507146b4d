//! Shared fixtures for unit tests.

use std::collections::{BTreeMap, BTreeSet};

use sccdag_schemas::{
    Block, BlockId, Dependence, Instruction, Loop, LoopId, LoopProgram, SccId,
    ValueId,
};

use crate::dependence::DependenceGraph;
use crate::set::SccSet;

/// A dependence graph with no values, for tests that only exercise the
/// set-level graph.
pub struct NoValues;

impl DependenceGraph for NoValues {
    fn scc_of_value(&self, _value: ValueId) -> Option<SccId> {
        None
    }
}

/// One singleton set per SCC `0..n`.
pub fn singletons(n: u32) -> Vec<SccSet> {
    (0..n).map(|i| [SccId(i)].into_iter().collect()).collect()
}

/// Builds a child-to-parents map from `(parent, child)` SCC edges.
pub fn parents_from_edges(
    edges: &[(u32, u32)],
) -> BTreeMap<SccId, BTreeSet<SccId>> {
    let mut parents: BTreeMap<SccId, BTreeSet<SccId>> = BTreeMap::new();
    for &(parent, child) in edges {
        parents.entry(SccId(child)).or_default().insert(SccId(parent));
    }
    parents
}

/// A block of plain instructions defining `values`.
pub fn block(id: u32, values: &[u32], successors: &[u32]) -> Block {
    Block {
        id: BlockId(id),
        instructions: values
            .iter()
            .map(|&v| Instruction::plain(ValueId(v)))
            .collect(),
        successors: successors.iter().map(|&b| BlockId(b)).collect(),
    }
}

/// A block starting with phis (`(value, incoming)` pairs) followed by plain
/// instructions.
pub fn phi_block(
    id: u32,
    phis: &[(u32, &[u32])],
    values: &[u32],
    successors: &[u32],
) -> Block {
    let mut b = block(id, values, successors);
    let mut instructions: Vec<Instruction> = phis
        .iter()
        .map(|&(v, incoming)| {
            Instruction::phi(
                ValueId(v),
                incoming.iter().map(|&i| ValueId(i)).collect(),
            )
        })
        .collect();
    instructions.append(&mut b.instructions);
    b.instructions = instructions;
    b
}

/// Loop `id` with header block `header`, optionally nested in `parent`.
pub fn loop_of(id: u32, header: u32, blocks: &[u32], parent: Option<u32>) -> Loop {
    Loop {
        id: LoopId(id),
        header: BlockId(header),
        blocks: blocks.iter().map(|&b| BlockId(b)).collect(),
        parent: parent.map(LoopId),
    }
}

/// A plain register dependence.
pub fn dep(producer: u32, consumer: u32) -> Dependence {
    Dependence {
        producer: ValueId(producer),
        consumer: ValueId(consumer),
        memory: false,
        loop_carried: None,
    }
}

/// A register dependence carried by loop `lp`.
pub fn carried(producer: u32, consumer: u32, lp: u32) -> Dependence {
    Dependence {
        loop_carried: Some(LoopId(lp)),
        ..dep(producer, consumer)
    }
}

/// A memory dependence carried by loop `lp`.
pub fn mem_carried(producer: u32, consumer: u32, lp: u32) -> Dependence {
    Dependence {
        memory: true,
        ..carried(producer, consumer, lp)
    }
}

/// A program rooted at loop 0.
pub fn program(
    blocks: Vec<Block>,
    loops: Vec<Loop>,
    dependences: Vec<Dependence>,
) -> LoopProgram {
    LoopProgram {
        root_loop: LoopId(0),
        blocks,
        loops,
        dependences,
        merge_requests: Vec::new(),
    }
}

/// Outer loop 0 = {bb0, bb1, bb2} around inner loop 1 = {bb1}.
///
/// ```text
/// bb0: %0 %1                -> bb1
/// bb1: %2 %3                -> bb1 bb2   (inner accumulator {%2, %3})
/// bb2: %4 = phi [%3]; %5    -> bb0 bb3   (%4 relays the inner result)
/// bb3: %6                                (outside the nest)
/// ```
///
/// Every value is its own SCC except the accumulator `{%2, %3}`.
pub fn lcssa_nest() -> LoopProgram {
    program(
        vec![
            block(0, &[0, 1], &[1]),
            block(1, &[2, 3], &[1, 2]),
            phi_block(2, &[(4, &[3])], &[5], &[0, 3]),
            block(3, &[6], &[]),
        ],
        vec![loop_of(0, 0, &[0, 1, 2], None), loop_of(1, 1, &[1], Some(0))],
        vec![
            dep(0, 1),
            dep(1, 2),
            dep(2, 3),
            carried(3, 2, 1),
            dep(3, 4),
            dep(4, 5),
            dep(5, 6),
        ],
    )
}
