//! Array-based data structures using densely numbered entity references as mapping keys.
//!
//! This crate defines a number of data structures based on densely numbered entity references as
//! mapping keys. The entities in a compiler's intermediate representation need to reference each
//! other, and doing that with plain references or pointers fights the borrow checker and wastes
//! memory. Instead, an entity is identified by a small integer wrapped in a typed index struct,
//! and all information about the entity lives in maps keyed by that index:
//!
//! - [`PrimaryMap`](struct.PrimaryMap.html) is used to keep track of a vector of entities,
//!   assigning a unique entity reference to each. It is the only map that can allocate references.
//! - [`SecondaryMap`](struct.SecondaryMap.html) associates secondary information with entities
//!   allocated by some primary map. Untouched entries read as a default value.
//! - [`EntitySet`](struct.EntitySet.html) is a set of entities backed by a bit vector.
//!
//! The `entity_impl!` macro implements the `EntityRef` trait for a wrapper struct around `u32`.

#![deny(missing_docs, trivial_numeric_casts, unused_extern_crates)]
#![warn(unused_import_braces)]

/// A type wrapping a small integer index should implement `EntityRef` so it can be used as the key
/// of a map or set.
pub trait EntityRef: Copy + Eq {
    /// Create a new entity reference from a small integer.
    /// This should crash if the requested index is not representable.
    fn new(_: usize) -> Self;

    /// Get the index that was used to create this entity reference.
    fn index(self) -> usize;
}

/// Macro which provides the common implementation of a 32-bit entity reference.
#[macro_export]
macro_rules! entity_impl {
    // Basic traits.
    ($entity:ident) => {
        impl $crate::EntityRef for $entity {
            fn new(index: usize) -> Self {
                debug_assert!(index < (core::u32::MAX as usize));
                $entity(index as u32)
            }

            fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl $crate::packed_option::ReservedValue for $entity {
            fn reserved_value() -> $entity {
                $entity(core::u32::MAX)
            }
        }

        impl $entity {
            /// Create a new entity reference from its number.
            #[allow(dead_code)]
            pub fn from_u32(x: u32) -> Self {
                debug_assert!(x < core::u32::MAX);
                $entity(x)
            }

            /// Return the underlying index value as a `u32`.
            #[allow(dead_code)]
            pub fn as_u32(self) -> u32 {
                self.0
            }
        }
    };

    // Include basic `Display` impl using the given display prefix.
    // Display a `Node(5)` reference as "n5".
    ($entity:ident, $display_prefix:expr) => {
        entity_impl!($entity);

        impl core::fmt::Display for $entity {
            fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
                write!(f, concat!($display_prefix, "{}"), self.0)
            }
        }

        impl core::fmt::Debug for $entity {
            fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
                (self as &dyn core::fmt::Display).fmt(f)
            }
        }
    };
}

pub mod packed_option;

mod keys;
mod map;
mod primary;
mod set;

pub use crate::keys::Keys;
pub use crate::map::SecondaryMap;
pub use crate::primary::PrimaryMap;
pub use crate::set::EntitySet;
