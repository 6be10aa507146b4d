//! Interfaces to the analyses the partitioner consumes.
//!
//! The partitioner never builds dependence graphs, control-flow graphs or
//! loop forests itself. It reads them through these traits, implemented by
//! whatever upstream analysis owns them (see `model::ProgramModel` for the
//! in-memory implementation used by the CLI and the tests).

use sccdag_schemas::{BlockId, Instruction, LoopId, SccId, ValueId};

/// Value-to-SCC resolution on the condensed dependence graph.
pub trait DependenceGraph {
    /// Returns the SCC that owns `value`, or `None` if the value is not part
    /// of the dependence graph.
    fn scc_of_value(&self, value: ValueId) -> Option<SccId>;
}

/// Read access to the control-flow graph.
pub trait ControlFlow {
    /// Instructions of `block` in program order.
    fn instructions(&self, block: BlockId) -> &[Instruction];

    /// Control-flow successors of `block`.
    fn successors(&self, block: BlockId) -> &[BlockId];
}

/// Structural queries on the loop forest.
pub trait LoopForest {
    /// Header block of `lp`, or `None` if `lp` is not a loop of the forest.
    fn header(&self, lp: LoopId) -> Option<BlockId>;

    /// True if `block` belongs to `lp`, nested loops included.
    fn contains_block(&self, lp: LoopId, block: BlockId) -> bool;

    /// Every loop transitively nested in `lp`, excluding `lp` itself.
    fn descendants(&self, lp: LoopId) -> Vec<LoopId>;

    /// Blocks outside `lp` that are control-flow successors of a block
    /// inside it, without duplicates.
    fn exit_blocks(&self, lp: LoopId) -> Vec<BlockId>;
}

/// A dependence between two dynamic instances of values in different
/// iterations of a loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopCarriedDependence {
    pub producer: ValueId,
    pub consumer: ValueId,
    /// True if the dependence flows through memory.
    pub memory: bool,
}

/// Enumeration of loop-carried dependences.
pub trait LoopCarriedDependencies {
    /// Dependences carried by `lp` specifically.
    fn loop_carried_dependencies(&self, lp: LoopId) -> Vec<LoopCarriedDependence>;
}

/// Everything the partitioner needs from upstream, in one bound.
pub trait Program:
    DependenceGraph + ControlFlow + LoopForest + LoopCarriedDependencies
{
}

impl<T> Program for T where
    T: DependenceGraph + ControlFlow + LoopForest + LoopCarriedDependencies
{
}
