//! Gantry code generation backend.
//!
//! This crate lowers an unscheduled sea-of-nodes IR into a scheduled, register-allocated
//! instruction stream for a 32-bit x86-class target. The pipeline is a list scheduler, a
//! Belady spill/reload inserter and a chordal-graph register allocator with bipartite matching
//! for pinned operands, run per register class by the `Context` driver.

#![deny(missing_docs, trivial_numeric_casts, unused_extern_crates)]
#![warn(unused_import_braces)]

pub use crate::context::Context;
pub use crate::result::{CodegenError, CodegenResult};

pub use gantry_entity as entity;

pub mod dominator_tree;
pub mod flowgraph;
pub mod ir;
pub mod isa;
pub mod regalloc;
pub mod schedule;
pub mod settings;
pub mod timing;
pub mod verifier;

mod context;
mod result;

/// Version number of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
