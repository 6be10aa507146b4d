//! SCC sets: the unit the partition graph works on.

use std::collections::BTreeSet;
use std::fmt;

use sccdag_schemas::SccId;

/// Handle to a set owned by an `SccDagPartition`.
///
/// Handles are never reused. Once a set is merged away its handle is
/// retired and every lookup through it fails with an unknown-set error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SetId(pub(crate) u32);

impl SetId {
    /// Returns the arena slot of this handle.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for SetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "set{}", self.0)
    }
}

/// A partition candidate: an unordered bag of unique SCCs.
///
/// Members are kept in a `BTreeSet` so iteration, and therefore every
/// traversal that starts from a set's members, is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SccSet {
    sccs: BTreeSet<SccId>,
}

impl SccSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts an SCC, returning false if it was already present.
    pub fn insert(&mut self, scc: SccId) -> bool {
        self.sccs.insert(scc)
    }

    /// Moves every member of `other` into this set.
    pub fn absorb(&mut self, other: SccSet) {
        self.sccs.extend(other.sccs);
    }

    pub fn contains(&self, scc: SccId) -> bool {
        self.sccs.contains(&scc)
    }

    pub fn len(&self) -> usize {
        self.sccs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sccs.is_empty()
    }

    /// Iterates members in ascending id order.
    pub fn iter(&self) -> impl ExactSizeIterator<Item = SccId> + '_ {
        self.sccs.iter().copied()
    }

    /// Returns the smallest member. Any member identifies the set through
    /// the membership map.
    pub fn any_scc(&self) -> Option<SccId> {
        self.sccs.first().copied()
    }
}

impl FromIterator<SccId> for SccSet {
    fn from_iter<I: IntoIterator<Item = SccId>>(iter: I) -> Self {
        Self {
            sccs: iter.into_iter().collect(),
        }
    }
}

impl fmt::Display for SccSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SCC set:")?;
        for scc in &self.sccs {
            write!(f, " {scc}")?;
        }
        Ok(())
    }
}
