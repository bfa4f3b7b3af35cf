//! # Internal Macros
//!
//! This module provides internal macros for reducing boilerplate in the
//! storage core.
//!
//! ## le_getters!
//!
//! Generates getter methods for zerocopy struct fields stored as
//! little-endian wrapper types (U32, U64). Snapshot headers are built
//! whole via their constructors and read back field by field, so only
//! the read side is generated; the width of each field is named
//! explicitly and dispatched to the matching wrapper type.
//!
//! ### Usage
//!
//! ```ignore
//! use zerocopy::little_endian::{U32, U64};
//!
//! #[repr(C)]
//! struct Header {
//!     entry_count: U64,
//!     version: U32,
//! }
//!
//! impl Header {
//!     le_getters! {
//!         entry_count: u64,
//!         version: u32,
//!     }
//! }
//!
//! // Generates:
//! // pub fn entry_count(&self) -> u64 { self.entry_count.get() }
//! // pub fn version(&self) -> u32 { self.version.get() }
//! ```

/// Generates getter methods for zerocopy little-endian header fields.
#[macro_export]
macro_rules! le_getters {
    (@impl $field:ident, u32) => {
        #[inline]
        pub fn $field(&self) -> u32 {
            let value: ::zerocopy::little_endian::U32 = self.$field;
            value.get()
        }
    };
    (@impl $field:ident, u64) => {
        #[inline]
        pub fn $field(&self) -> u64 {
            let value: ::zerocopy::little_endian::U64 = self.$field;
            value.get()
        }
    };
    ($($field:ident : $ty:tt),* $(,)?) => {
        $(
            $crate::le_getters!(@impl $field, $ty);
        )*
    };
}
