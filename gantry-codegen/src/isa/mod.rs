//! Target description.
//!
//! The pipeline is target-parametric only through the tables in this module: the register classes
//! with their typed registers, and the per-opcode operand constraints. Both are pre-generated
//! static data; nothing here is computed at run time.

pub mod registers;
pub mod x86;

pub use self::registers::{
    RegClass, RegClassData, RegClassIndex, RegInfo, RegReq, RegType, RegUnit, RegUnitMask,
};
