//! Schema definitions for the SCC-DAG partitioning pipeline.
//!
//! This crate contains the data structures exchanged with the outside world:
//! the `LoopProgram` that describes a loop nest and its dependences (input),
//! and the `PartitionReport` that describes the resulting sets (output).
//! Both serialize to JSON and carry JSON Schema descriptions.
//!
//! The identifier newtypes (`SccId`, `ValueId`, `BlockId`, `LoopId`) live
//! here as well, so every crate in the workspace agrees on them.

mod ids;
mod loop_program;
mod partition_report;
#[cfg(test)]
mod testutil;

#[doc(inline)]
pub use ids::*;
#[doc(inline)]
pub use loop_program::*;
#[doc(inline)]
pub use partition_report::*;
