// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::mem::size_of;
use core::ptr::{self, NonNull};
use core::sync::atomic::Ordering;
use std::alloc::{self, Layout};
use std::sync::Arc;

use crate::pages::Pages;
use crate::types::{MemoryType, WasmTy};
use crate::utils::vm_assert;
use crate::vm::{MemoryFlags, VMMemoryDefinition};

/// A 32-bit address into a linear memory.
pub type WasmPtr = u32;

/// A WebAssembly linear memory.
///
/// A linear memory is a bounded, growable byte buffer addressed by 32-bit
/// offsets. Its size only ever increases. Shared memories are allocated at
/// their maximum capacity up front so their backing never moves; unshared
/// memories with an unlimited maximum may relocate on growth, which
/// invalidates every pointer previously obtained from [`Memory::data`] or
/// [`Memory::ptr_to`].
///
/// For unshared memories, most operations are only sound while no
/// WebAssembly agent that could access the memory is executing (host calls
/// on such an agent excepted). Only shared memories are safe to access
/// while guest code runs.
///
/// The typed [`load`](Memory::load)/[`store`](Memory::store) accessors use
/// host byte order; the crate targets little-endian hosts, where host order
/// coincides with the WebAssembly-visible layout.
#[derive(Debug)]
pub struct Memory {
    def: VMMemoryDefinition,
    initial_pages: Pages,
}

// ===== impl Memory =====

impl Memory {
    /// Creates a new linear memory from its declared shape.
    ///
    /// Shared memories must declare a finite maximum and are allocated at
    /// that maximum so the backing never moves. Unshared memories with a
    /// finite maximum are also allocated eagerly; with an unlimited maximum
    /// only the initial pages are allocated and growth may relocate. All
    /// bytes start zeroed.
    pub fn new(ty: &MemoryType) -> Arc<Memory> {
        vm_assert!(
            !ty.shared || ty.maximum != Pages::UNLIMITED,
            "shared memories cannot have unlimited capacity"
        );
        vm_assert!(
            ty.initial <= ty.maximum,
            "initial size of {} pages exceeds max capacity of {} pages",
            ty.initial,
            ty.maximum
        );

        let mut memory = Memory {
            def: VMMemoryDefinition::new(MemoryFlags::empty(), ty.maximum),
            initial_pages: ty.initial,
        };

        // The shared flag is set only after the backing has been reserved;
        // `alloc_exactly` refuses to touch a memory that is already shared.
        let reserved = if ty.maximum != Pages::UNLIMITED {
            memory.alloc_exactly(ty.maximum)
        } else {
            memory.alloc_at_least(ty.initial)
        };
        if !reserved {
            // Allocation exhaustion during construction is fatal; only
            // growth failures are recoverable.
            let bytes = ty.maximum.to_bytes().unwrap_or(isize::MAX as usize);
            alloc::handle_alloc_error(Layout::array::<u8>(bytes.min(isize::MAX as usize)).unwrap());
        }

        let initial_bytes = ty.initial.to_bytes().unwrap();
        memory.def.current_length.store(initial_bytes, Ordering::Relaxed);
        if ty.shared {
            memory.def.flags |= MemoryFlags::SHARED;
        }

        let memory = Arc::new(memory);

        // Safety: the record's address is final now that the memory is
        // heap-allocated; the constructor is the only writer.
        unsafe {
            *memory.def.container.get() = Arc::as_ptr(&memory);
        }

        tracing::trace!(
            "created {} linear memory: initial {} pages, max {} pages",
            if ty.shared { "shared" } else { "unshared" },
            ty.initial,
            ty.maximum,
        );
        memory
    }

    /// Creates a new unshared linear memory.
    pub fn new_unshared(initial: Pages, maximum: Pages) -> Arc<Memory> {
        Memory::new(&MemoryType::unshared(initial, maximum))
    }

    /// Creates a new shared linear memory.
    pub fn new_shared(initial: Pages, maximum: Pages) -> Arc<Memory> {
        Memory::new(&MemoryType::shared(initial, maximum))
    }

    /// Returns a pointer to the JIT-visible record for this linear memory.
    pub fn vmmemory(&self) -> NonNull<VMMemoryDefinition> {
        NonNull::from(&self.def)
    }

    /// The current size of this linear memory, in bytes. Never decreases.
    #[inline]
    pub fn size(&self) -> usize {
        self.def.current_length.load(Ordering::Relaxed)
    }

    /// The current size of this linear memory, in pages. Never decreases.
    #[inline]
    pub fn size_pages(&self) -> Pages {
        Pages::from_bytes(self.size())
    }

    /// The initial size of this linear memory, in pages.
    #[inline]
    pub fn initial_size_pages(&self) -> Pages {
        self.initial_pages
    }

    /// The size, in pages, to which this linear memory can grow without a
    /// new allocation.
    #[inline]
    pub fn current_capacity_pages(&self) -> Pages {
        // Safety: mutated only by `alloc_exactly` under the crate's
        // single-threaded access contract.
        unsafe { *self.def.current_capacity_pages.get() }
    }

    /// The maximum capacity of this linear memory, in pages.
    #[inline]
    pub fn max_capacity_pages(&self) -> Pages {
        self.def.max_capacity_pages
    }

    /// Whether the backing region will never be reallocated again.
    #[inline]
    pub fn is_at_max_capacity(&self) -> bool {
        self.current_capacity_pages() == self.max_capacity_pages()
    }

    /// Whether this linear memory can be shared between agents.
    #[inline]
    pub fn is_shared(&self) -> bool {
        self.def.flags.contains(MemoryFlags::SHARED)
    }

    /// Grows this linear memory by `delta` pages.
    ///
    /// Returns the previous size in pages, or [`Pages::GROW_FAILURE`] if
    /// the new size would overflow, exceed the maximum capacity, or the
    /// allocation failed; the size is unchanged on failure. Growth that
    /// needs a larger backing region may relocate it, invalidating all
    /// pointers previously returned by [`Memory::data`] and
    /// [`Memory::ptr_to`]; this never happens once
    /// [`Memory::is_at_max_capacity`] holds.
    pub fn grow(&self, delta: Pages) -> Pages {
        let old_size = self.size_pages();
        if delta == Pages::new(0) {
            return old_size;
        }

        // Growing shared memory requires coordination with concurrently
        // executing agents and is not supported yet.
        vm_assert!(!self.is_shared(), "growing shared memory is not supported");

        let Some(new_size) = old_size.checked_add(delta) else {
            return Pages::GROW_FAILURE;
        };
        if new_size > self.max_capacity_pages() {
            return Pages::GROW_FAILURE;
        }
        if new_size > self.current_capacity_pages() && !self.alloc_at_least(new_size) {
            return Pages::GROW_FAILURE;
        }

        // `alloc_at_least` succeeded, so the byte size fits.
        let new_bytes = new_size.to_bytes().unwrap();
        self.def.current_length.store(new_bytes, Ordering::Relaxed);
        tracing::trace!("grew linear memory by {delta} pages to {new_size} pages");
        old_size
    }

    /// Whether a load or store of `len` bytes at `addr` is in bounds.
    ///
    /// Since a linear memory never shrinks, a true result stays true for
    /// the rest of the memory's life.
    #[inline]
    pub fn is_valid_address(&self, addr: WasmPtr, len: usize) -> bool {
        (addr as usize)
            .checked_add(len)
            .is_some_and(|end| end <= self.size())
    }

    /// Returns a pointer to `addr`, asserting that `len` bytes after it are
    /// accessible.
    ///
    /// The returned pointer is invalidated whenever a call to
    /// [`Memory::grow`] relocates the backing region.
    pub fn ptr_to(&self, addr: WasmPtr, len: usize) -> *mut u8 {
        vm_assert!(
            self.is_valid_address(addr, len),
            "out-of-bounds linear memory access: {len} bytes at address {addr:#x}"
        );
        // Safety: bounds checked above; the base is dangling only when the
        // capacity is zero, in which case only `addr == len == 0` passes
        // the check and the pointer is never dereferenced.
        unsafe { self.base().add(addr as usize) }
    }

    /// Returns a pointer to the start of the backing region.
    ///
    /// Invalidated whenever a call to [`Memory::grow`] relocates the
    /// backing region.
    pub fn data(&self) -> *mut u8 {
        self.base()
    }

    /// Copies `buf.len()` bytes out of this linear memory starting at
    /// `addr`. Returns false (and copies nothing) if the range is out of
    /// bounds.
    pub fn load_bytes(&self, buf: &mut [u8], addr: WasmPtr) -> bool {
        if !self.is_valid_address(addr, buf.len()) {
            return false;
        }
        if !buf.is_empty() {
            // Safety: source range bounds-checked above; the buffer cannot
            // overlap the backing region through a shared reference.
            unsafe {
                ptr::copy_nonoverlapping(
                    self.base().add(addr as usize),
                    buf.as_mut_ptr(),
                    buf.len(),
                );
            }
        }
        true
    }

    /// Copies `buf.len()` bytes into this linear memory starting at `addr`.
    /// Returns false (and writes nothing) if the range is out of bounds.
    pub fn store_bytes(&self, buf: &[u8], addr: WasmPtr) -> bool {
        if !self.is_valid_address(addr, buf.len()) {
            return false;
        }
        if !buf.is_empty() {
            // Safety: destination range bounds-checked above.
            unsafe {
                ptr::copy_nonoverlapping(buf.as_ptr(), self.base().add(addr as usize), buf.len());
            }
        }
        true
    }

    /// Reads a scalar from this linear memory in host byte order, or `None`
    /// if the access is out of bounds. Unaligned addresses are fine.
    ///
    /// Only scalars WebAssembly can move to or from linear memory in a
    /// single instruction (i32, i64, f32, f64) have a typed path; anything
    /// else goes through [`Memory::load_bytes`].
    pub fn load<T: WasmTy>(&self, addr: WasmPtr) -> Option<T> {
        if !self.is_valid_address(addr, size_of::<T>()) {
            return None;
        }
        // Safety: bounds checked above; `read_unaligned` has no alignment
        // requirement and `T` is a plain scalar.
        Some(unsafe { ptr::read_unaligned(self.base().add(addr as usize).cast::<T>()) })
    }

    /// Writes a scalar into this linear memory in host byte order. Returns
    /// false if the access is out of bounds. Unaligned addresses are fine.
    ///
    /// See [`Memory::load`] for the supported scalar types.
    pub fn store<T: WasmTy>(&self, addr: WasmPtr, val: T) -> bool {
        if !self.is_valid_address(addr, size_of::<T>()) {
            return false;
        }
        // Safety: see `load`.
        unsafe {
            ptr::write_unaligned(self.base().add(addr as usize).cast::<T>(), val);
        }
        true
    }

    #[inline]
    fn base(&self) -> *mut u8 {
        // Safety: mutated only by `alloc_exactly` under the crate's
        // single-threaded access contract.
        unsafe { *self.def.base.get() }
    }

    /// Grows the backing region to exactly `num_pages` pages, zeroing the
    /// new tail. Returns false if the byte size does not fit in the host
    /// address type or the allocator refuses.
    fn alloc_exactly(&self, num_pages: Pages) -> bool {
        vm_assert!(!self.is_shared(), "shared memory backing cannot move");
        vm_assert!(
            num_pages >= self.current_capacity_pages(),
            "linear memory cannot shrink"
        );
        vm_assert!(
            num_pages <= self.max_capacity_pages(),
            "linear memory cannot grow beyond its max capacity"
        );

        let old_capacity = self.current_capacity_pages();
        if num_pages == old_capacity || num_pages == Pages::new(0) {
            return true;
        }

        let Some(new_bytes) = num_pages.to_bytes() else {
            return false;
        };
        let Ok(new_layout) = Layout::array::<u8>(new_bytes) else {
            return false;
        };
        let old_bytes = old_capacity.to_bytes().unwrap();

        // Safety: layouts are non-zero-sized and match the allocation
        // being resized; the tail of a reallocated region is zeroed before
        // it becomes reachable.
        unsafe {
            let new_base = if old_bytes == 0 {
                alloc::alloc_zeroed(new_layout)
            } else {
                let old_layout = Layout::array::<u8>(old_bytes).unwrap();
                let new_base = alloc::realloc(self.base(), old_layout, new_bytes);
                if !new_base.is_null() {
                    ptr::write_bytes(new_base.add(old_bytes), 0, new_bytes - old_bytes);
                }
                new_base
            };

            if new_base.is_null() {
                return false;
            }

            *self.def.base.get() = new_base;
            *self.def.current_capacity_pages.get() = num_pages;
        }
        true
    }

    /// Ensures the backing region holds at least `num_pages` pages.
    fn alloc_at_least(&self, num_pages: Pages) -> bool {
        if num_pages <= self.current_capacity_pages() {
            return true;
        }
        if num_pages > self.max_capacity_pages() {
            return false;
        }

        // TODO: overallocate here so repeated small grows of an
        // unlimited-max memory don't reallocate every time.
        self.alloc_exactly(num_pages)
    }
}

impl Drop for Memory {
    fn drop(&mut self) {
        let capacity_bytes = self.current_capacity_pages().to_bytes().unwrap();
        if capacity_bytes != 0 {
            // Safety: the layout matches the live allocation made by
            // `alloc_exactly`; the base is only dangling while the capacity
            // is zero.
            unsafe {
                alloc::dealloc(self.base(), Layout::array::<u8>(capacity_bytes).unwrap());
            }
        }
    }
}
