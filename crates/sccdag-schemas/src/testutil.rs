//! Shared proptest strategies for schema tests.

use proptest::prelude::*;

use crate::{SccId, ValueId};

/// Strategy for generating SCC identifiers from a small range so that
/// collisions between generated SCCs actually happen.
pub fn arb_scc_id() -> impl Strategy<Value = SccId> {
    (0u32..32).prop_map(SccId)
}

/// Strategy for generating value identifiers.
pub fn arb_value_id() -> impl Strategy<Value = ValueId> {
    any::<u32>().prop_map(ValueId)
}
