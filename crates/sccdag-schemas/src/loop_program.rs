//! Input schema: a loop nest together with its value-level dependences.
//!
//! A `LoopProgram` is the minimal description of a function region that the
//! partitioner needs from upstream analyses: the control-flow graph of the
//! blocks involved, the loop forest over those blocks, and the dependence
//! edges between the values the blocks define. The partitioning pipeline
//! condenses the dependences into SCCs itself.
//!
//! ## Conventions
//!
//! - Every instruction defines exactly one value, identified by `ValueId`.
//!   Value ids must be unique across the whole program.
//! - Dependence edges point from producer to consumer.
//! - A dependence tagged `loop_carried` crosses iterations of that loop.
//! - Loop membership is explicit: `blocks` lists every block of the loop,
//!   including blocks of nested loops.

use std::collections::BTreeSet;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{BlockId, LoopId, ValueId};

/// Root structure describing the region to partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct LoopProgram {
    /// The outermost loop whose body is being partitioned.
    pub root_loop: LoopId,

    /// Basic blocks of the region, each with its instructions in program
    /// order.
    pub blocks: Vec<Block>,

    /// All loops of the region. Nesting is expressed via `parent`.
    pub loops: Vec<Loop>,

    /// Value-level dependence edges (the program dependence graph).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependences: Vec<Dependence>,

    /// Additional caller-driven merges: the SCCs owning the two values must
    /// end up in the same partition.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub merge_requests: Vec<MergeRequest>,
}

/// A basic block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Block {
    /// Unique block identifier.
    pub id: BlockId,

    /// Instructions in program order. Phis come first by convention, but
    /// nothing relies on it.
    #[serde(default)]
    pub instructions: Vec<Instruction>,

    /// Control-flow successors, in branch order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub successors: Vec<BlockId>,
}

/// A single instruction and the value it defines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Instruction {
    /// The value this instruction defines.
    pub value: ValueId,

    /// What kind of instruction this is. Only phis matter to partitioning.
    #[serde(default, skip_serializing_if = "InstructionKind::is_plain")]
    pub kind: InstructionKind,
}

impl Instruction {
    /// Creates a non-phi instruction.
    pub fn plain(value: ValueId) -> Self {
        Self {
            value,
            kind: InstructionKind::Plain,
        }
    }

    /// Creates a phi merging the given incoming values.
    pub fn phi(value: ValueId, incoming: Vec<ValueId>) -> Self {
        Self {
            value,
            kind: InstructionKind::Phi { incoming },
        }
    }

    /// Returns the incoming values if this instruction is a phi.
    pub fn phi_incoming(&self) -> Option<&[ValueId]> {
        match &self.kind {
            InstructionKind::Phi { incoming } => Some(incoming),
            InstructionKind::Plain => None,
        }
    }
}

/// Instruction classification.
#[derive(
    Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum InstructionKind {
    /// Any instruction that is not a phi.
    #[default]
    Plain,
    /// A phi node selecting among values flowing in from predecessors.
    Phi {
        /// Incoming values, one per predecessor edge.
        incoming: Vec<ValueId>,
    },
}

impl InstructionKind {
    /// Returns true for non-phi instructions.
    pub fn is_plain(&self) -> bool {
        matches!(self, InstructionKind::Plain)
    }
}

/// A natural loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Loop {
    /// Unique loop identifier.
    pub id: LoopId,

    /// The loop header. Must be a member of `blocks`.
    pub header: BlockId,

    /// Every block belonging to the loop, including nested loop blocks.
    pub blocks: BTreeSet<BlockId>,

    /// The immediately enclosing loop, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<LoopId>,
}

/// A dependence from `producer` to `consumer`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Dependence {
    /// The value whose definition must happen first.
    pub producer: ValueId,

    /// The value that depends on the producer.
    pub consumer: ValueId,

    /// True if the dependence flows through memory rather than a register.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub memory: bool,

    /// The loop across whose iterations this dependence is carried.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loop_carried: Option<LoopId>,
}

/// A caller request to co-locate the SCCs of two values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MergeRequest {
    /// The producing side of the pair.
    pub producer: ValueId,
    /// The consuming side of the pair.
    pub consumer: ValueId,
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Omitted collections deserialize as empty.
    #[test]
    fn test_minimal_program_uses_defaults() {
        let json = r#"{
            "root_loop": 0,
            "blocks": [
                {"id": 0, "instructions": [{"value": 1}], "successors": [0, 1]},
                {"id": 1}
            ],
            "loops": [{"id": 0, "header": 0, "blocks": [0]}]
        }"#;
        let program: LoopProgram = serde_json::from_str(json).unwrap();

        assert_eq!(program.root_loop, LoopId(0));
        assert_eq!(program.blocks.len(), 2);
        assert!(program.blocks[1].instructions.is_empty());
        assert_eq!(program.blocks[0].instructions[0].kind, InstructionKind::Plain);
        assert!(program.dependences.is_empty());
        assert!(program.merge_requests.is_empty());
        assert_eq!(program.loops[0].parent, None);
    }

    /// A phi carries its incoming values through JSON.
    #[test]
    fn test_phi_instruction_parses_incoming_values() {
        let json = r#"{"value": 9, "kind": {"phi": {"incoming": [4, 5]}}}"#;
        let inst: Instruction = serde_json::from_str(json).unwrap();

        assert_eq!(inst.phi_incoming(), Some(&[ValueId(4), ValueId(5)][..]));
        assert_eq!(Instruction::plain(ValueId(1)).phi_incoming(), None);
    }

    /// Unset dependence flags are left out of the JSON.
    #[test]
    fn test_dependence_flags_are_omitted_when_unset() {
        let dep = Dependence {
            producer: ValueId(1),
            consumer: ValueId(2),
            memory: false,
            loop_carried: None,
        };
        let json = serde_json::to_string(&dep).unwrap();
        assert_eq!(json, r#"{"producer":1,"consumer":2}"#);

        let carried = Dependence {
            memory: true,
            loop_carried: Some(LoopId(0)),
            ..dep
        };
        let json = serde_json::to_string(&carried).unwrap();
        assert!(json.contains(r#""memory":true"#));
        assert!(json.contains(r#""loop_carried":0"#));
    }

    /// The generated JSON Schema names the top-level fields.
    #[test]
    fn test_json_schema_describes_program() {
        let schema = schemars::schema_for!(LoopProgram);
        let json = serde_json::to_string(&schema).unwrap();
        assert!(json.contains("root_loop"));
        assert!(json.contains("dependences"));
    }
}
