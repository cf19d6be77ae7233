//! Data structures describing the registers of the target.
//!
//! The target's registers are partitioned into register classes. Values of a data mode live in
//! registers of exactly one class, and every operand position of an instruction carries a
//! register requirement naming the class and, for pinned operands, the admissible registers
//! within it.

use crate::ir::Mode;
use core::fmt;
use gantry_entity::EntityRef;

/// A register unit. Units are numbered consecutively across all register classes.
pub type RegUnit = u16;

/// A bit mask indexed by register units.
///
/// The target has at most 32 register units, so a single word suffices.
pub type RegUnitMask = u32;

/// The type of a physical register, as listed in the operation specification input.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegType {
    /// Clobbered by calls; the caller preserves it if needed.
    CallerSave,
    /// Preserved across calls by the callee.
    CalleeSave,
    /// Never allocated. The stack pointer and frame pointer are of this type.
    Ignore,
    /// A placeholder, not a real register. The no-reg and unknown pseudo registers.
    Synthetic,
}

/// A register class reference.
///
/// All register classes are statically defined in the target's register tables.
pub type RegClass = &'static RegClassData;

/// Data about a register class.
///
/// A register class is a named set of physical registers with a mode. The mode is the largest
/// value mode the class can hold, determined by the last-listed real register of the class.
pub struct RegClassData {
    /// The name of the register class.
    pub name: &'static str,

    /// The index of this class in the target's `RegInfo` description.
    pub index: u8,

    /// The first register unit in this class.
    pub first: RegUnit,

    /// Register names, one per unit starting at `first`. Synthetic units are listed after all
    /// real registers.
    pub names: &'static [&'static str],

    /// Register types, parallel to `names`.
    pub types: &'static [RegType],

    /// The largest mode the class can hold.
    pub mode: Mode,

    /// Mask of all register units in the class, synthetic units included.
    pub mask: RegUnitMask,

    /// Mask of the units the allocator may hand out: real registers that are not of the
    /// `Ignore` type.
    pub allocatable: RegUnitMask,
}

impl RegClassData {
    /// Does this register class contain `regunit`?
    pub fn contains(&self, regunit: RegUnit) -> bool {
        self.mask & (1 << regunit) != 0
    }

    /// May the allocator hand out `regunit`?
    pub fn is_allocatable(&self, regunit: RegUnit) -> bool {
        self.allocatable & (1 << regunit) != 0
    }

    /// The register budget `k` of this class: the number of allocatable registers.
    pub fn budget(&self) -> usize {
        self.allocatable.count_ones() as usize
    }

    /// Get a specific register unit in this class by its offset from the first.
    pub fn unit(&self, offset: usize) -> RegUnit {
        debug_assert!(offset < self.names.len());
        self.first + offset as RegUnit
    }

    /// The type of `regunit`, which must belong to this class.
    pub fn reg_type(&self, regunit: RegUnit) -> RegType {
        debug_assert!(self.contains(regunit));
        self.types[(regunit - self.first) as usize]
    }
}

impl fmt::Display for RegClassData {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name)
    }
}

impl fmt::Debug for RegClassData {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Within a target, register classes are uniquely identified by their index.
impl PartialEq for RegClassData {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}

impl Eq for RegClassData {}

/// A small reference to a register class.
///
/// Use this when storing register classes in compact data structures. The `RegInfo::rc()` method
/// can be used to get the real register class reference back.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RegClassIndex(u8);

impl EntityRef for RegClassIndex {
    fn new(idx: usize) -> Self {
        RegClassIndex(idx as u8)
    }

    fn index(self) -> usize {
        usize::from(self.0)
    }
}

impl From<RegClass> for RegClassIndex {
    fn from(rc: RegClass) -> Self {
        RegClassIndex(rc.index)
    }
}

impl fmt::Display for RegClassIndex {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "rci{}", self.0)
    }
}

/// A register requirement attached to one operand position.
///
/// The requirement names the class the operand's value must live in. Pinned operands additionally
/// carry a `limited` bitset enumerating the admissible registers. The flag fields express
/// relations to sibling operands of the same instruction.
#[derive(Clone, Debug, PartialEq)]
pub struct RegReq {
    /// Required register class, or `None` for token-mode operands that never occupy a register.
    pub class: Option<RegClassIndex>,

    /// When present, the operand must be assigned one of these register units.
    pub limited: Option<RegUnitMask>,

    /// This output operand should be assigned the same register as the given input operand.
    pub same_as: Option<u8>,

    /// This operand must not share a register with the given operand.
    pub differ_from: Option<u8>,

    /// The operand lives in an ignore-type register and does not participate in allocation.
    pub ignore: bool,

    /// The operand produces the stack pointer.
    pub produces_sp: bool,
}

impl RegReq {
    /// A requirement for any allocatable register of `rc`.
    pub fn in_class(rc: RegClass) -> Self {
        Self {
            class: Some(rc.into()),
            ..Default::default()
        }
    }

    /// A requirement pinned to the registers of `mask` within `rc`.
    pub fn limited(rc: RegClass, mask: RegUnitMask) -> Self {
        Self {
            class: Some(rc.into()),
            limited: Some(mask),
            ..Default::default()
        }
    }

    /// Does this requirement pin the operand to a proper subset of its class?
    pub fn is_limited(&self) -> bool {
        self.limited.is_some()
    }

    /// The registers admissible for this operand: the limited set when present, intersected with
    /// the allocatable registers of the class.
    pub fn admissible(&self, reginfo: &RegInfo) -> RegUnitMask {
        match self.class {
            None => 0,
            Some(rci) => {
                let rc = reginfo.rc(rci);
                match self.limited {
                    Some(m) => (m & rc.allocatable) | (m & ignore_bits(rc)),
                    None => rc.allocatable,
                }
            }
        }
    }

    /// Are the requirements `self` (on a def) and `other` (on the consuming use) compatible, i.e.
    /// same class and overlapping admissible sets?
    pub fn compatible(&self, other: &Self, reginfo: &RegInfo) -> bool {
        match (self.class, other.class) {
            (None, None) => true,
            (Some(a), Some(b)) => {
                a == b && (self.admissible(reginfo) & other.admissible(reginfo)) != 0
            }
            _ => false,
        }
    }
}

// Limited sets are allowed to name ignore-type units (the stack pointer idiom); those bits
// survive the admissible intersection.
fn ignore_bits(rc: RegClass) -> RegUnitMask {
    let mut bits = 0;
    for (i, t) in rc.types.iter().enumerate() {
        if *t == RegType::Ignore {
            bits |= 1 << (rc.first + i as RegUnit);
        }
    }
    bits
}

impl Default for RegReq {
    fn default() -> Self {
        Self {
            class: None,
            limited: None,
            same_as: None,
            differ_from: None,
            ignore: false,
            produces_sp: false,
        }
    }
}

/// Information about the registers of the target.
#[derive(Clone)]
pub struct RegInfo {
    /// All register classes, ordered by index.
    pub classes: &'static [RegClass],
}

impl RegInfo {
    /// Get the register class corresponding to `idx`.
    pub fn rc(&self, idx: RegClassIndex) -> RegClass {
        self.classes[idx.index()]
    }

    /// The register class values of mode `mode` live in, if any.
    pub fn class_for_mode(&self, mode: Mode) -> Option<RegClass> {
        if !mode.is_data() {
            return None;
        }
        self.classes
            .iter()
            .find(|rc| rc.mode.covers(mode))
            .cloned()
    }

    /// The register class containing `regunit`.
    pub fn class_containing(&self, regunit: RegUnit) -> Option<RegClass> {
        self.classes.iter().find(|rc| rc.contains(regunit)).cloned()
    }

    /// Make a temporary object that can display a register unit.
    pub fn display_regunit(&self, regunit: RegUnit) -> DisplayRegUnit {
        DisplayRegUnit {
            regunit,
            reginfo: self,
        }
    }
}

/// Temporary object that holds enough information to print a register unit.
pub struct DisplayRegUnit<'a> {
    regunit: RegUnit,
    reginfo: &'a RegInfo,
}

impl<'a> fmt::Display for DisplayRegUnit<'a> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.reginfo.class_containing(self.regunit) {
            Some(rc) => write!(f, "%{}", rc.names[(self.regunit - rc.first) as usize]),
            None => write!(f, "%INVALID{}", self.regunit),
        }
    }
}
