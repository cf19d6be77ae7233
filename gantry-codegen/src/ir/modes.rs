//! Value modes.
//!
//! Every node has a mode describing the kind of value it produces. Data modes occupy a register
//! of the class determined by the target; the token modes (`M`, `X`) only order the schedule, and
//! `T` marks tuple producers whose components are accessed through `Proj` nodes.

use core::fmt;

/// The mode (semantic type) of a value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Mode {
    /// 8-bit signed integer.
    I8,
    /// 16-bit signed integer.
    I16,
    /// 32-bit signed integer.
    I32,
    /// 8-bit unsigned integer.
    U8,
    /// 16-bit unsigned integer.
    U16,
    /// 32-bit unsigned integer.
    U32,
    /// 32-bit pointer.
    P32,
    /// 32-bit IEEE float.
    F32,
    /// 64-bit IEEE float.
    F64,
    /// Memory token. Orders loads and stores; never lives in a register.
    M,
    /// Control token produced by control flow operations.
    X,
    /// Tuple of values, decomposed by `Proj` nodes.
    T,
}

impl Mode {
    /// Is this a data mode, i.e. does a value of this mode occupy a register?
    pub fn is_data(self) -> bool {
        match self {
            Mode::M | Mode::X | Mode::T => false,
            _ => true,
        }
    }

    /// Is this an integer or pointer mode?
    pub fn is_int(self) -> bool {
        match self {
            Mode::I8 | Mode::I16 | Mode::I32 | Mode::U8 | Mode::U16 | Mode::U32 | Mode::P32 => {
                true
            }
            _ => false,
        }
    }

    /// Is this a floating point mode?
    pub fn is_float(self) -> bool {
        match self {
            Mode::F32 | Mode::F64 => true,
            _ => false,
        }
    }

    /// Signedness of an integer mode.
    ///
    /// Signed/unsigned selection is centralized here; emitters and min/max lowering must consult
    /// this single predicate instead of testing mode identities themselves.
    pub fn is_signed(self) -> bool {
        match self {
            Mode::I8 | Mode::I16 | Mode::I32 => true,
            _ => false,
        }
    }

    /// Size of a value of this mode in bytes. Token modes have no size.
    pub fn bytes(self) -> u32 {
        match self {
            Mode::I8 | Mode::U8 => 1,
            Mode::I16 | Mode::U16 => 2,
            Mode::I32 | Mode::U32 | Mode::P32 | Mode::F32 => 4,
            Mode::F64 => 8,
            Mode::M | Mode::X | Mode::T => 0,
        }
    }

    /// Can a value of mode `self` hold a value of mode `other`?
    ///
    /// Used to check that the last-listed register of a class covers the largest mode the class
    /// must carry.
    pub fn covers(self, other: Mode) -> bool {
        self.is_data() && other.is_data() && self.bytes() >= other.bytes()
            && self.is_float() == other.is_float()
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match *self {
            Mode::I8 => "i8",
            Mode::I16 => "i16",
            Mode::I32 => "i32",
            Mode::U8 => "u8",
            Mode::U16 => "u16",
            Mode::U32 => "u32",
            Mode::P32 => "p32",
            Mode::F32 => "f32",
            Mode::F64 => "f64",
            Mode::M => "m",
            Mode::X => "x",
            Mode::T => "t",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(Mode::I32.is_data());
        assert!(Mode::P32.is_int());
        assert!(!Mode::M.is_data());
        assert!(!Mode::T.is_data());
        assert!(Mode::F64.is_float());
        assert!(Mode::I16.is_signed());
        assert!(!Mode::U16.is_signed());
    }

    #[test]
    fn covering() {
        assert!(Mode::I32.covers(Mode::I8));
        assert!(Mode::P32.covers(Mode::U32));
        assert!(!Mode::I8.covers(Mode::I32));
        assert!(!Mode::I32.covers(Mode::F32));
        assert!(Mode::F64.covers(Mode::F32));
    }
}
