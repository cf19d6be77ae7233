//! The 32-bit x86 target.
//!
//! This module is the processed form of the operation specification input: the register tables
//! and, for every opcode with pinned operands, the operand constraint records the pipeline
//! consumes. Opcodes without an entry get the default requirement of "any allocatable register of
//! the mode's class" on all operands.

pub mod registers;

use crate::ir::Opcode;
use crate::isa::registers::RegUnitMask;
use registers::{unit_mask, EAX, ECX, EDX, ESP};

/// Constraint on one operand position of one opcode.
///
/// A missing field means the default: any allocatable register of the class implied by the
/// operand's mode.
#[derive(Clone, Copy, Debug, Default)]
pub struct OperandSpec {
    /// Admissible register units, when the operand is pinned.
    pub limited: Option<RegUnitMask>,

    /// For outputs: the `in_rN` idiom, naming the input whose register this output reuses.
    pub same_as_input: Option<u8>,

    /// The operand must not share a register with the named sibling operand.
    pub differ_from: Option<u8>,

    /// The operand lives in an ignore-type register (stack pointer idiom).
    pub ignore: bool,

    /// The operand produces the stack pointer.
    pub produces_sp: bool,
}

/// Per-opcode operand constraints.
///
/// `ins` is indexed by input position, `outs` by projection number for tuple producers and by 0
/// for plain value producers. Positions beyond the listed arrays take the default.
#[derive(Debug)]
pub struct OpConstraints {
    /// Input operand constraints.
    pub ins: &'static [OperandSpec],

    /// Output operand constraints.
    pub outs: &'static [OperandSpec],

    /// May the inputs be swapped?
    pub commutative: bool,

    /// Issue-to-result latency in cycles, for selector heuristics.
    pub latency: u8,
}

const ANY: OperandSpec = OperandSpec {
    limited: None,
    same_as_input: None,
    differ_from: None,
    ignore: false,
    produces_sp: false,
};

const fn pinned(mask: RegUnitMask) -> OperandSpec {
    OperandSpec {
        limited: Some(mask),
        same_as_input: None,
        differ_from: None,
        ignore: false,
        produces_sp: false,
    }
}

const fn in_r(n: u8) -> OperandSpec {
    OperandSpec {
        limited: None,
        same_as_input: Some(n),
        differ_from: None,
        ignore: false,
        produces_sp: false,
    }
}

const SP_IN: OperandSpec = OperandSpec {
    limited: Some(unit_mask(ESP)),
    same_as_input: None,
    differ_from: None,
    ignore: true,
    produces_sp: false,
};

const SP_OUT: OperandSpec = OperandSpec {
    limited: Some(unit_mask(ESP)),
    same_as_input: None,
    differ_from: None,
    ignore: true,
    produces_sp: true,
};

// Two-address arithmetic: the result is written over the first input.
static TWO_ADDRESS: OpConstraints = OpConstraints {
    ins: &[ANY, ANY],
    outs: &[in_r(0)],
    commutative: false,
    latency: 1,
};

static TWO_ADDRESS_COMM: OpConstraints = OpConstraints {
    ins: &[ANY, ANY],
    outs: &[in_r(0)],
    commutative: true,
    latency: 1,
};

// Widening multiply: low result in %eax, high in %edx, first operand in %eax.
static MUL: OpConstraints = OpConstraints {
    ins: &[pinned(unit_mask(EAX)), ANY],
    outs: &[pinned(unit_mask(EAX)), pinned(unit_mask(EDX))],
    commutative: true,
    latency: 3,
};

// Division: dividend in %eax, quotient in %eax, remainder in %edx. The divisor may not be
// %eax or %edx, they are busy with the dividend.
static DIV: OpConstraints = OpConstraints {
    ins: &[
        pinned(unit_mask(EAX)),
        pinned(!(unit_mask(EAX) | unit_mask(EDX))),
    ],
    outs: &[pinned(unit_mask(EAX)), pinned(unit_mask(EDX))],
    commutative: false,
    latency: 25,
};

// Shifts: the count must be in %cl.
static SHIFT: OpConstraints = OpConstraints {
    ins: &[ANY, pinned(unit_mask(ECX))],
    outs: &[in_r(0)],
    commutative: false,
    latency: 1,
};

// Min/max lower to compare-and-cmov over the first input.
static MINMAX: OpConstraints = OpConstraints {
    ins: &[ANY, ANY],
    outs: &[in_r(0)],
    commutative: true,
    latency: 2,
};

// The return value travels in %eax.
static RETURN: OpConstraints = OpConstraints {
    ins: &[pinned(unit_mask(EAX))],
    outs: &[],
    commutative: false,
    latency: 0,
};

// Calls produce a memory token (projection 0) and the result in %eax (projection 1).
static CALL: OpConstraints = OpConstraints {
    ins: &[],
    outs: &[ANY, pinned(unit_mask(EAX))],
    commutative: false,
    latency: 10,
};

static INCSP: OpConstraints = OpConstraints {
    ins: &[SP_IN],
    outs: &[SP_OUT],
    commutative: false,
    latency: 1,
};

static ADDSP: OpConstraints = OpConstraints {
    ins: &[SP_IN, ANY],
    outs: &[SP_OUT],
    commutative: false,
    latency: 1,
};

static LOAD: OpConstraints = OpConstraints {
    ins: &[ANY, ANY],
    outs: &[ANY],
    commutative: false,
    latency: 3,
};

/// Look up the operand constraints of `opcode`.
///
/// Returns `None` for opcodes all of whose operands take the default requirement.
pub fn op_constraints(opcode: Opcode) -> Option<&'static OpConstraints> {
    match opcode {
        Opcode::Add | Opcode::And | Opcode::Or | Opcode::Xor => Some(&TWO_ADDRESS_COMM),
        Opcode::Sub => Some(&TWO_ADDRESS),
        Opcode::Mul => Some(&MUL),
        Opcode::Div => Some(&DIV),
        Opcode::Shl | Opcode::Shr => Some(&SHIFT),
        Opcode::Min | Opcode::Max => Some(&MINMAX),
        Opcode::Return => Some(&RETURN),
        Opcode::Call => Some(&CALL),
        Opcode::IncSP => Some(&INCSP),
        Opcode::AddSP | Opcode::SubSP => Some(&ADDSP),
        Opcode::Load => Some(&LOAD),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_lookup() {
        let mul = op_constraints(Opcode::Mul).unwrap();
        assert_eq!(mul.ins[0].limited, Some(unit_mask(EAX)));
        assert_eq!(mul.outs[1].limited, Some(unit_mask(EDX)));
        assert!(mul.commutative);

        let shl = op_constraints(Opcode::Shl).unwrap();
        assert_eq!(shl.ins[1].limited, Some(unit_mask(ECX)));
        assert_eq!(shl.outs[0].same_as_input, Some(0));

        assert!(op_constraints(Opcode::Const).is_none());
        assert!(op_constraints(Opcode::Phi).is_none());
    }

    #[test]
    fn divisor_avoids_dividend_registers() {
        let div = op_constraints(Opcode::Div).unwrap();
        let divisor = div.ins[1].limited.unwrap();
        assert_eq!(divisor & unit_mask(EAX), 0);
        assert_eq!(divisor & unit_mask(EDX), 0);
    }
}
