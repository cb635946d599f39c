// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::fmt;
use core::ops::{Add, Sub};

/// The size of a WebAssembly page, in bytes.
pub const WASM_PAGE_SIZE: usize = 1 << WASM_PAGE_SHIFT;
/// log2 of [`WASM_PAGE_SIZE`].
pub const WASM_PAGE_SHIFT: u32 = 16;

/// A number of WebAssembly pages.
///
/// Linear-memory sizes and capacities are counted in 64 KiB pages; this
/// wrapper keeps page counts from being confused with byte counts. Convert
/// explicitly with [`Pages::to_bytes`] and [`Pages::from_bytes`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct Pages(usize);

impl Pages {
    /// Sentinel page count for a linear memory without a declared maximum
    /// capacity. Only permitted for unshared memories.
    pub const UNLIMITED: Pages = Pages(usize::MAX);

    /// Sentinel returned by `Memory::grow` when a linear memory could not be
    /// grown.
    ///
    /// Numerically identical to [`Pages::UNLIMITED`]; the context
    /// disambiguates. Callers must never pass `UNLIMITED` where a grow delta
    /// is expected, nor treat a `grow` return value as a capacity.
    pub const GROW_FAILURE: Pages = Pages(usize::MAX);

    #[inline]
    pub const fn new(pages: usize) -> Pages {
        Pages(pages)
    }

    #[inline]
    pub const fn get(self) -> usize {
        self.0
    }

    /// Converts this page count to a byte count, returning `None` if the
    /// result does not fit in the host address type.
    #[inline]
    pub const fn to_bytes(self) -> Option<usize> {
        self.0.checked_mul(WASM_PAGE_SIZE)
    }

    /// Converts a byte count to a page count, truncating any partial page.
    #[inline]
    pub const fn from_bytes(bytes: usize) -> Pages {
        Pages(bytes >> WASM_PAGE_SHIFT)
    }

    #[inline]
    pub fn checked_add(self, rhs: Pages) -> Option<Pages> {
        self.0.checked_add(rhs.0).map(Pages)
    }
}

impl Add for Pages {
    type Output = Pages;

    fn add(self, rhs: Pages) -> Pages {
        Pages(self.0 + rhs.0)
    }
}

impl Sub for Pages {
    type Output = Pages;

    fn sub(self, rhs: Pages) -> Pages {
        Pages(self.0 - rhs.0)
    }
}

impl fmt::Display for Pages {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Pages::UNLIMITED {
            f.write_str("unlimited")
        } else {
            write!(f, "{}", self.0)
        }
    }
}
