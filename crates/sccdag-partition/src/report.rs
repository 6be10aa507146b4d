//! Conversion of a finished partitioning into the output schema.

use std::collections::HashMap;

use sccdag_schemas::{PartitionReport, ReportedScc, ReportedSet};

use crate::error::PartitionError;
use crate::model::ProgramModel;
use crate::partitioner::SccDagPartitioner;
use crate::set::SetId;

/// Builds the report for the current partition.
///
/// Sets are listed in depth order and their SCCs by debug index, so the
/// report is deterministic for a given input. The debug order must be fresh.
///
/// # Errors
///
/// Fails with a residual-cycle error if the graph is not acyclic, and with a
/// stale-debug-order error if a merge happened since the last reset.
pub(crate) fn build_report(
    partitioner: &SccDagPartitioner<'_, ProgramModel>,
) -> Result<PartitionReport, PartitionError> {
    let graph = partitioner.partition_graph();
    let model = graph.sccdag();
    let order = partitioner.get_depth_ordered_sets()?;
    let position: HashMap<SetId, usize> = order
        .iter()
        .enumerate()
        .map(|(index, &set)| (set, index))
        .collect();

    let mut sets = Vec::with_capacity(order.len());
    for (index, &set) in order.iter().enumerate() {
        let mut sccs = graph
            .set(set)?
            .iter()
            .map(|scc| {
                Ok(ReportedScc {
                    id: scc,
                    debug_index: partitioner.debug_index(scc)?,
                    values: model.scc_values(scc).to_vec(),
                })
            })
            .collect::<Result<Vec<_>, PartitionError>>()?;
        sccs.sort_by_key(|scc| scc.debug_index);

        // Depth order puts every parent before its child.
        let mut parents: Vec<usize> = partitioner
            .get_parents(set)?
            .iter()
            .map(|parent| position[parent])
            .collect();
        parents.sort_unstable();

        sets.push(ReportedSet {
            index,
            sccs,
            parents,
        });
    }

    Ok(PartitionReport {
        root_loop: partitioner.root_loop(),
        scc_count: graph.num_tracked_sccs(),
        sets,
    })
}
