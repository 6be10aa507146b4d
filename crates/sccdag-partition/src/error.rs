//! Error types for the sccdag-partition crate.

use std::backtrace::Backtrace;
use std::fmt;

use sccdag_schemas::{LoopId, SccId, ValueId};

use crate::set::SetId;

/// Error type for partitioning operations.
///
/// Covers two families of failure. Contract violations (an untracked SCC, a
/// stale set handle, a residual cycle, a stale debug order) mean the caller
/// or the partition itself is inconsistent; they must not be retried or
/// ignored. Input failures (bad JSON, an inconsistent program description,
/// I/O) come from the `run` pipeline.
///
/// Uses the canonical struct pattern with backtrace capture and `is_xxx()`
/// helper methods.
#[derive(Debug)]
pub struct PartitionError {
    kind: PartitionErrorKind,
    backtrace: Backtrace,
}

/// Internal error variants. Not exposed publicly; use `is_xxx()` methods.
#[derive(Debug)]
pub(crate) enum PartitionErrorKind {
    /// An SCC outside the tracked universe was used where a tracked one is
    /// required.
    UntrackedScc(SccId),
    /// A value whose SCC is not tracked was used where a tracked one is
    /// required.
    UntrackedValue(ValueId),
    /// A set handle that was merged away or never existed.
    UnknownSet(SetId),
    /// A loop that the loop forest does not know.
    UnknownLoop(LoopId),
    /// `merge_sets` was asked to merge nothing.
    EmptyMerge,
    /// The initial cover assigns an SCC to more than one set.
    OverlappingSets(SccId),
    /// The set-level graph still contains a cycle.
    ResidualCycle { ordered: usize, total: usize },
    /// The program-forward walk did not discover every tracked SCC.
    DebugOrderMismatch { found: usize, expected: usize },
    /// The debug order was queried after a mutation without a reset.
    StaleDebugOrder,
    /// The program description references something that does not exist.
    InvalidProgram(String),
    /// Failed to deserialize input JSON.
    Deserialization(serde_json::Error),
    /// Failed to serialize output to JSON.
    Serialization(serde_json::Error),
    /// I/O error when reading input or writing output.
    Io(std::io::Error),
}

impl PartitionError {
    /// Creates an error from an error kind, capturing a backtrace.
    pub(crate) fn new(kind: PartitionErrorKind) -> Self {
        Self {
            kind,
            backtrace: Backtrace::capture(),
        }
    }

    /// Returns true if an untracked SCC was queried.
    pub fn is_untracked_scc(&self) -> bool {
        matches!(self.kind, PartitionErrorKind::UntrackedScc(_))
    }

    /// Returns true if a value with an untracked SCC was queried.
    pub fn is_untracked_value(&self) -> bool {
        matches!(self.kind, PartitionErrorKind::UntrackedValue(_))
    }

    /// Returns true if a stale or foreign set handle was used.
    pub fn is_unknown_set(&self) -> bool {
        matches!(self.kind, PartitionErrorKind::UnknownSet(_))
    }

    /// Returns true if a loop unknown to the loop forest was named.
    pub fn is_unknown_loop(&self) -> bool {
        matches!(self.kind, PartitionErrorKind::UnknownLoop(_))
    }

    /// Returns true if an empty merge was requested.
    pub fn is_empty_merge(&self) -> bool {
        matches!(self.kind, PartitionErrorKind::EmptyMerge)
    }

    /// Returns true if the initial cover was not disjoint.
    pub fn is_overlapping_sets(&self) -> bool {
        matches!(self.kind, PartitionErrorKind::OverlappingSets(_))
    }

    /// Returns true if a depth order was requested over a cyclic graph.
    pub fn is_residual_cycle(&self) -> bool {
        matches!(self.kind, PartitionErrorKind::ResidualCycle { .. })
    }

    /// Returns true if the debug-order walk missed tracked SCCs.
    pub fn is_debug_order_mismatch(&self) -> bool {
        matches!(self.kind, PartitionErrorKind::DebugOrderMismatch { .. })
    }

    /// Returns true if the debug order must be recomputed first.
    pub fn is_stale_debug_order(&self) -> bool {
        matches!(self.kind, PartitionErrorKind::StaleDebugOrder)
    }

    /// Returns true if the program description is inconsistent.
    pub fn is_invalid_program(&self) -> bool {
        matches!(self.kind, PartitionErrorKind::InvalidProgram(_))
    }

    /// Returns true if this error is due to deserialization failure.
    pub fn is_deserialization(&self) -> bool {
        matches!(self.kind, PartitionErrorKind::Deserialization(_))
    }

    /// Returns true if this error is due to serialization failure.
    pub fn is_serialization(&self) -> bool {
        matches!(self.kind, PartitionErrorKind::Serialization(_))
    }

    /// Returns true if this error is due to I/O failure.
    pub fn is_io(&self) -> bool {
        matches!(self.kind, PartitionErrorKind::Io(_))
    }

    /// Returns true for every error that signals caller misuse or a broken
    /// partition invariant, as opposed to bad input.
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self.kind,
            PartitionErrorKind::UntrackedScc(_)
                | PartitionErrorKind::UntrackedValue(_)
                | PartitionErrorKind::UnknownSet(_)
                | PartitionErrorKind::UnknownLoop(_)
                | PartitionErrorKind::EmptyMerge
                | PartitionErrorKind::OverlappingSets(_)
                | PartitionErrorKind::ResidualCycle { .. }
                | PartitionErrorKind::DebugOrderMismatch { .. }
                | PartitionErrorKind::StaleDebugOrder
        )
    }

    /// Returns the backtrace captured when this error was created.
    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }
}

impl fmt::Display for PartitionErrorKind {
    /// Formats the error kind as a human-readable message.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartitionErrorKind::UntrackedScc(scc) => {
                write!(f, "{scc} is not in any partition")
            }
            PartitionErrorKind::UntrackedValue(value) => {
                write!(f, "the SCC of {value} is not in any partition")
            }
            PartitionErrorKind::UnknownSet(set) => {
                write!(f, "{set} does not name a live set")
            }
            PartitionErrorKind::UnknownLoop(lp) => {
                write!(f, "{lp} is not a loop of the program")
            }
            PartitionErrorKind::EmptyMerge => {
                write!(f, "cannot merge an empty group of sets")
            }
            PartitionErrorKind::OverlappingSets(scc) => {
                write!(f, "{scc} belongs to more than one initial set")
            }
            PartitionErrorKind::ResidualCycle { ordered, total } => write!(
                f,
                "a cycle exists and sets cannot be depth ordered \
                 ({ordered} of {total} sets ordered)"
            ),
            PartitionErrorKind::DebugOrderMismatch { found, expected } => {
                write!(
                    f,
                    "mismatch # of SCCs encountered in program forward order: \
                     {found} versus {expected} tracked SCCs"
                )
            }
            PartitionErrorKind::StaleDebugOrder => write!(
                f,
                "the debug order is stale; call reset_partitioner after merging"
            ),
            PartitionErrorKind::InvalidProgram(msg) => {
                write!(f, "invalid program: {msg}")
            }
            PartitionErrorKind::Deserialization(err) => {
                write!(f, "failed to deserialize input: {err}")
            }
            PartitionErrorKind::Serialization(err) => {
                write!(f, "failed to serialize output: {err}")
            }
            PartitionErrorKind::Io(err) => write!(f, "I/O error: {err}"),
        }
    }
}

impl fmt::Display for PartitionError {
    /// Formats the error message followed by the captured backtrace.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.kind)?;

        // Empty unless RUST_BACKTRACE is set.
        write!(f, "{}", self.backtrace)
    }
}

impl std::error::Error for PartitionError {
    /// Returns the underlying JSON or I/O error, if any.
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.kind {
            PartitionErrorKind::Deserialization(err)
            | PartitionErrorKind::Serialization(err) => Some(err),
            PartitionErrorKind::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for PartitionError {
    /// Wraps an I/O error as a `PartitionError`.
    fn from(err: std::io::Error) -> Self {
        Self::new(PartitionErrorKind::Io(err))
    }
}
