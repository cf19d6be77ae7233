//! Register allocation.
//!
//! The allocator runs per register class in three coordinated stages over the scheduled IR:
//! the Belady spiller bounds the register pressure, the constraint handler resolves
//! pinned-operand instructions by permutation and matching, and the chordal colorer assigns
//! the remaining registers along a perfect elimination ordering of the dominator tree.

pub mod borders;
pub mod coloring;
pub mod constraints;
pub mod liveness;
pub mod matching;
pub mod register_set;
pub mod spill_env;
pub mod spilling;

pub use self::coloring::Coloring;
pub use self::constraints::Constraints;
pub use self::liveness::{Liveness, NextUses, Distance, DIST_INFINITY};
pub use self::register_set::RegisterSet;
pub use self::spill_env::SpillEnv;
pub use self::spilling::Spilling;
