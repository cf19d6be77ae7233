//! Register tables for the 32-bit x86 target.
//!
//! Two register classes: the general purpose registers and the SSE registers. `%esp` and `%ebp`
//! are ignore-type units reserved for the stack and frame pointers. Each class ends with two
//! synthetic units, the no-reg and unknown placeholders.

use crate::ir::Mode;
use crate::isa::registers::{RegClassData, RegInfo, RegType, RegUnit, RegUnitMask};

/// Unit numbers of the general purpose registers.
pub const EAX: RegUnit = 0;
/// `%ecx`, the only register the shift count may live in.
pub const ECX: RegUnit = 1;
/// `%edx`, the high half of widening multiplies and divisions.
pub const EDX: RegUnit = 2;
/// `%ebx`.
pub const EBX: RegUnit = 3;
/// `%esp`, the stack pointer. Never allocated.
pub const ESP: RegUnit = 4;
/// `%ebp`, the frame pointer. Never allocated.
pub const EBP: RegUnit = 5;
/// `%esi`.
pub const ESI: RegUnit = 6;
/// `%edi`.
pub const EDI: RegUnit = 7;

/// First unit of the SSE register bank.
pub const XMM0: RegUnit = 16;

use self::RegType::{CalleeSave, CallerSave, Ignore, Synthetic};

/// The general purpose register class.
pub static GPR_DATA: RegClassData = RegClassData {
    name: "GPR",
    index: 0,
    first: 0,
    names: &[
        "eax", "ecx", "edx", "ebx", "esp", "ebp", "esi", "edi", "gp_noreg", "gp_unknown",
    ],
    types: &[
        CallerSave, CallerSave, CallerSave, CalleeSave, Ignore, Ignore, CalleeSave, CalleeSave,
        Synthetic, Synthetic,
    ],
    mode: Mode::P32,
    mask: 0x03ff,
    // Six registers: esp/ebp are ignore-type, and the synthetic units are placeholders.
    allocatable: 0x00cf,
};

/// The SSE register class.
pub static XMM_DATA: RegClassData = RegClassData {
    name: "XMM",
    index: 1,
    first: XMM0,
    names: &[
        "xmm0", "xmm1", "xmm2", "xmm3", "xmm4", "xmm5", "xmm6", "xmm7", "xmm_noreg", "xmm_unknown",
    ],
    types: &[
        CallerSave, CallerSave, CallerSave, CallerSave, CallerSave, CallerSave, CallerSave,
        CallerSave, Synthetic, Synthetic,
    ],
    mode: Mode::F64,
    mask: 0x03ff_0000,
    allocatable: 0x00ff_0000,
};

/// Register information for the 32-bit x86 target.
pub static INFO: RegInfo = RegInfo {
    classes: &[&GPR_DATA, &XMM_DATA],
};

/// Mask with a single register unit set.
pub const fn unit_mask(unit: RegUnit) -> RegUnitMask {
    1 << unit
}
