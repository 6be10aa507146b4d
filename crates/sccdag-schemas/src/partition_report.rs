//! Output schema: the final partitioning of a loop's SCCs into sets.
//!
//! Sets are listed in depth order: every set appears after all of the sets
//! it depends on, so a consumer can assign stages by walking the list once.
//! SCCs are identified both by their `SccId` and by their debug index, the
//! position of the SCC in a program-forward walk of the root loop.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{LoopId, SccId, ValueId};

/// Root structure of the partitioning output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PartitionReport {
    /// The loop whose body was partitioned.
    pub root_loop: LoopId,

    /// Number of SCCs tracked by the partition.
    pub scc_count: usize,

    /// Final sets in depth order. `ReportedSet::index` equals the position
    /// in this vector.
    pub sets: Vec<ReportedSet>,
}

impl PartitionReport {
    /// Returns the index of the set containing `value`, if any.
    pub fn set_of_value(&self, value: ValueId) -> Option<usize> {
        self.sets
            .iter()
            .find(|set| set.sccs.iter().any(|scc| scc.values.contains(&value)))
            .map(|set| set.index)
    }

    /// Returns the index of the set containing `scc`, if any.
    pub fn set_of_scc(&self, scc: SccId) -> Option<usize> {
        self.sets
            .iter()
            .find(|set| set.sccs.iter().any(|s| s.id == scc))
            .map(|set| set.index)
    }
}

/// One partition: a group of SCCs that will execute together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ReportedSet {
    /// Position of this set in the depth order.
    pub index: usize,

    /// Member SCCs, sorted by debug index.
    pub sccs: Vec<ReportedScc>,

    /// Indices of the sets with an edge into this one. Always smaller than
    /// `index`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parents: Vec<usize>,
}

/// An SCC as it appears in the report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ReportedScc {
    /// Identifier assigned by the dependence graph.
    pub id: SccId,

    /// Program-forward debug index of this SCC.
    pub debug_index: usize,

    /// Values belonging to this SCC, ascending.
    pub values: Vec<ValueId>,
}
