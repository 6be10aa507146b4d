//! Opaque identifiers shared by every phase of the partitioning pipeline.
//!
//! All identifiers are dense `u32` newtypes. They serialize transparently as
//! plain integers so hand-written JSON programs stay readable.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(
            Debug,
            Clone,
            Copy,
            PartialEq,
            Eq,
            PartialOrd,
            Ord,
            Hash,
            Serialize,
            Deserialize,
            JsonSchema,
        )]
        #[serde(transparent)]
        pub struct $name(pub u32);

        impl $name {
            /// Returns the identifier as a `usize`, suitable for indexing.
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }
    };
}

id_newtype!(
    /// A strongly connected component of the value-level dependence graph.
    ///
    /// SCCs are owned by the upstream dependence graph. The partitioner only
    /// ever holds their identity.
    SccId,
    "scc"
);

id_newtype!(
    /// A program value. Every instruction defines exactly one value.
    ValueId,
    "%"
);

id_newtype!(
    /// A basic block of the control-flow graph.
    BlockId,
    "bb"
);

id_newtype!(
    /// A natural loop in the loop forest.
    LoopId,
    "loop"
);
