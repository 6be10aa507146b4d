//! Partitioning of a loop's SCC-DAG into ordered sets.
//!
//! Given a loop whose dependence graph has already been condensed into
//! strongly connected components, this crate groups the SCCs into sets
//! ("stages") and keeps the set-level graph acyclic while sets are merged.
//!
//! ## Layers
//!
//! 1. [`SccDagPartition`]: the set-level graph. Owns the sets, the
//!    SCC-to-set membership map and the deduplicated edges; merges sets and
//!    collapses the cycles a merge can introduce
//! 2. [`SccDagPartitioner`]: merge policy scoped to a root loop. Co-locates
//!    loop-carried memory dependences and LCSSA relays, and keeps a
//!    program-forward debug order of the SCCs
//! 3. [`run`]: the stream-oriented pipeline used by the CLI, reading a
//!    [`LoopProgram`] and writing a [`PartitionReport`]
//!
//! The upstream analyses are consumed through the traits in [`dependence`];
//! [`ProgramModel`] implements them over a `LoopProgram` description.
//!
//! ## Usage
//!
//! ```no_run
//! use sccdag_partition::{PartitionOptions, run};
//!
//! let input = std::io::stdin().lock();
//! let mut output = Vec::new();
//! run(input, &mut output, &PartitionOptions::default()).unwrap();
//! ```

pub mod dependence;
mod error;
mod model;
mod partition;
mod partitioner;
mod report;
mod set;
mod tarjan;
#[cfg(test)]
mod testutil;

use std::collections::BTreeSet;
use std::io::{Read, Write};

use sccdag_schemas::{LoopProgram, PartitionReport};
use tracing::{debug, debug_span, warn};

#[doc(inline)]
pub use crate::error::PartitionError;
use crate::error::PartitionErrorKind;
#[doc(inline)]
pub use crate::model::ProgramModel;
#[doc(inline)]
pub use crate::partition::SccDagPartition;
#[doc(inline)]
pub use crate::partitioner::SccDagPartitioner;
use crate::report::build_report;
#[doc(inline)]
pub use crate::set::{SccSet, SetId};
#[doc(inline)]
pub use crate::tarjan::strongly_connected_components;

/// Which merge passes `run` applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionOptions {
    /// Co-locate the endpoints of loop-carried memory dependences.
    pub merge_loop_carried: bool,
    /// Co-locate LCSSA phis with the values they relay.
    pub merge_lcssa: bool,
    /// Apply the `merge_requests` listed in the input.
    pub merge_requests: bool,
}

impl Default for PartitionOptions {
    fn default() -> Self {
        Self {
            merge_loop_carried: true,
            merge_lcssa: true,
            merge_requests: true,
        }
    }
}

/// Run the partitioning pipeline.
///
/// Reads a `LoopProgram` from the input, condenses its dependences, starts
/// from one set per SCC of the root loop, applies the enabled merge passes
/// and writes the resulting `PartitionReport`.
///
/// # Errors
///
/// Returns [`PartitionError`] if:
/// - Reading from input fails ([`PartitionError::is_io`])
/// - The input is not valid JSON ([`PartitionError::is_deserialization`])
/// - The program description is inconsistent
///   ([`PartitionError::is_invalid_program`])
/// - A tracked SCC is unreachable from the root loop's header
///   ([`PartitionError::is_debug_order_mismatch`])
/// - Writing to output fails ([`PartitionError::is_io`])
/// - JSON serialization fails ([`PartitionError::is_serialization`])
pub fn run(
    mut input: impl Read,
    mut output: impl Write,
    options: &PartitionOptions,
) -> Result<(), PartitionError> {
    let _span = debug_span!("run").entered();

    // Step 1: Read and parse input JSON.
    let mut json = String::new();
    input.read_to_string(&mut json)?;
    let program: LoopProgram = serde_json::from_str(&json).map_err(|e| {
        PartitionError::new(PartitionErrorKind::Deserialization(e))
    })?;

    // Step 2: Validate and condense.
    let model = ProgramModel::new(program)?;

    // Step 3: Partition.
    let report = partition_program(&model, options)?;

    // Step 4: Write output JSON.
    serde_json::to_writer_pretty(&mut output, &report).map_err(|e| {
        PartitionError::new(PartitionErrorKind::Serialization(e))
    })?;
    writeln!(output)?;

    Ok(())
}

/// Partitions the root loop of `model` and builds its report.
///
/// # Errors
///
/// Propagates contract violations raised by the partitioner.
pub fn partition_program(
    model: &ProgramModel,
    options: &PartitionOptions,
) -> Result<PartitionReport, PartitionError> {
    let root_loop = model.root_loop();
    let cover = model
        .sccs_in_loop(root_loop)
        .into_iter()
        .map(|scc| std::iter::once(scc).collect::<SccSet>());
    let mut partitioner =
        SccDagPartitioner::new(model, cover, model.scc_parents(), root_loop)?;
    let initial = partitioner.number_of_partitions();

    if options.merge_loop_carried {
        partitioner.merge_loop_carried_dependencies()?;
    }
    if options.merge_lcssa {
        partitioner.merge_lcssa_phis_with_the_values_they_propagate()?;
    }
    if options.merge_requests {
        merge_requested_pairs(&mut partitioner, model)?;
    }

    partitioner.reset_partitioner()?;
    debug!(
        %root_loop,
        initial,
        partitions = partitioner.number_of_partitions(),
        "Partitioned root loop"
    );
    build_report(&partitioner)
}

/// Applies the caller-listed merges, skipping values outside the
/// partitioning.
fn merge_requested_pairs(
    partitioner: &mut SccDagPartitioner<'_, ProgramModel>,
    model: &ProgramModel,
) -> Result<usize, PartitionError> {
    let _span = debug_span!("merge_requests").entered();
    let graph = partitioner.partition_graph();

    let mut pairs = BTreeSet::new();
    for request in &model.program().merge_requests {
        let producer = graph
            .scc_of_value(request.producer)
            .filter(|&scc| graph.is_included_in_partitioning(scc));
        let consumer = graph
            .scc_of_value(request.consumer)
            .filter(|&scc| graph.is_included_in_partitioning(scc));
        match (producer, consumer) {
            (Some(producer), Some(consumer)) => {
                pairs.insert((producer, consumer));
            }
            _ => warn!(
                producer = %request.producer,
                consumer = %request.consumer,
                "Skipping merge request outside the partitioned loop"
            ),
        }
    }

    let merges = partitioner.merge_all_pairs(&pairs)?;
    debug!(requests = model.program().merge_requests.len(), merges, "Applied merge requests");
    Ok(merges)
}

#[cfg(test)]
mod tests {
    use sccdag_schemas::{MergeRequest, ValueId};

    use super::*;
    use crate::testutil::{block, dep, lcssa_nest, loop_of, program};

    /// Runs the pipeline in memory and parses the report back.
    fn run_on(program: &LoopProgram, options: &PartitionOptions) -> PartitionReport {
        let input = serde_json::to_string(program).unwrap();
        let mut output = Vec::new();
        run(input.as_bytes(), &mut output, options).unwrap();
        assert_eq!(output.last(), Some(&b'\n'));
        serde_json::from_slice(&output)
            .expect("output should be valid PartitionReport JSON")
    }

    /// The default passes fold the LCSSA relay into its source.
    #[test]
    fn test_run_applies_lcssa_merge() {
        let report = run_on(&lcssa_nest(), &PartitionOptions::default());

        assert_eq!(report.scc_count, 5);
        assert_eq!(report.sets.len(), 4);
        assert_eq!(
            report.set_of_value(ValueId(4)),
            report.set_of_value(ValueId(3))
        );
    }

    /// With every pass disabled each SCC stays alone.
    #[test]
    fn test_run_without_passes_keeps_singletons() {
        let options = PartitionOptions {
            merge_loop_carried: false,
            merge_lcssa: false,
            merge_requests: false,
        };
        let report = run_on(&lcssa_nest(), &options);

        assert_eq!(report.sets.len(), 5);
        assert_ne!(
            report.set_of_value(ValueId(4)),
            report.set_of_value(ValueId(3))
        );
    }

    /// Requests naming values outside the root loop are skipped.
    #[test]
    fn test_merge_requests_skip_untracked_values() {
        let mut nest = lcssa_nest();
        nest.merge_requests = vec![
            MergeRequest {
                producer: ValueId(0),
                consumer: ValueId(1),
            },
            // %6 is outside the root loop, %42 is not defined at all.
            MergeRequest {
                producer: ValueId(5),
                consumer: ValueId(6),
            },
            MergeRequest {
                producer: ValueId(42),
                consumer: ValueId(0),
            },
        ];
        let report = run_on(&nest, &PartitionOptions::default());

        assert_eq!(report.sets.len(), 3);
        assert_eq!(report.set_of_value(ValueId(0)), Some(0));
        assert_eq!(report.set_of_value(ValueId(1)), Some(0));
        assert_eq!(report.set_of_value(ValueId(6)), None);
    }

    /// An inconsistent program fails before anything is written.
    #[test]
    fn test_run_rejects_inconsistent_program() {
        let broken = program(
            vec![block(0, &[1], &[])],
            vec![loop_of(0, 0, &[0], None)],
            vec![dep(1, 2)],
        );
        let input = serde_json::to_string(&broken).unwrap();
        let mut output = Vec::new();

        let err = run(input.as_bytes(), &mut output, &PartitionOptions::default())
            .unwrap_err();
        assert!(err.is_invalid_program());
        assert!(output.is_empty());
    }

    /// Loops nested in each other are rejected instead of hanging the run.
    #[test]
    fn test_run_rejects_cyclic_loop_nesting() {
        let nested = program(
            vec![block(0, &[1], &[1]), block(1, &[2], &[0])],
            vec![
                loop_of(0, 0, &[0, 1], Some(1)),
                loop_of(1, 1, &[0, 1], Some(0)),
            ],
            vec![dep(1, 2)],
        );
        let input = serde_json::to_string(&nested).unwrap();
        let mut output = Vec::new();

        let err = run(input.as_bytes(), &mut output, &PartitionOptions::default())
            .unwrap_err();
        assert!(err.is_invalid_program());
        assert!(output.is_empty());
    }

    /// Invalid JSON should yield a deserialization error classification.
    #[test]
    fn test_run_invalid_json() {
        let mut output = Vec::new();
        let result = run(
            "not valid json".as_bytes(),
            &mut output,
            &PartitionOptions::default(),
        );

        assert!(result.unwrap_err().is_deserialization());
    }
}
