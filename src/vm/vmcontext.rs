// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Data structures directly accessed by JIT-compiled code.
//!
//! As a naming convention all types that start with `VM` are read by
//! generated code. All of them are `#[repr(C)]` plain aggregates with a
//! fixed field order and no virtual dispatch; the field order is a contract
//! with the code generator and must not change without a coordinated change
//! there. The assertions at the bottom of this module pin that contract.
//!
//! Each record carries a back pointer to the host object that owns it so
//! generated code can transition into host code without separate
//! bookkeeping. The back pointer is written exactly once, by the owning
//! object's constructor; host code is the only reader.
//!
//! Accessing these structs from outside the runtime is highly unsafe:
//! pointers read from them must be checked before being dereferenced, and
//! none of them are safe to touch while another thread could be mutating
//! the same sandbox.

use core::cell::UnsafeCell;
use core::mem::offset_of;
use core::ptr::NonNull;
use core::sync::atomic::AtomicUsize;
use std::mem;

use static_assertions::const_assert_eq;

use crate::func::{LinkedFunc, UnlinkedFunc};
use crate::indices::VMSharedTypeIndex;
use crate::memory::Memory;
use crate::pages::Pages;
use crate::utils::vm_assert;

bitflags::bitflags! {
    /// The flag word of a [`VMMemoryDefinition`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    #[repr(transparent)]
    pub struct MemoryFlags: u32 {
        /// The linear memory may be shared between agents.
        const SHARED = 1 << 0;
    }
}

/// The signature of a JIT-compiled function entry point.
///
/// The entry takes a pointer to the [`VMFuncBinding`] being called and
/// returns a 32-bit status code.
pub type VMJitFunction = unsafe extern "C" fn(NonNull<VMFuncBinding>) -> u32;

/// The JIT-visible record of a linear memory.
#[derive(Debug)]
#[repr(C)]
pub struct VMMemoryDefinition {
    /// Flags describing this linear memory.
    pub flags: MemoryFlags,

    /// The start address of the backing region.
    ///
    /// Dangling (but non-null) while the current capacity is zero. For
    /// unshared memories with an unlimited maximum this pointer is
    /// invalidated whenever growth relocates the backing.
    pub base: UnsafeCell<*mut u8>,

    /// The current logical size of this linear memory, in bytes.
    ///
    /// Atomic so that shared memories can eventually grow their length
    /// without invalidating concurrent readers.
    pub current_length: AtomicUsize,

    /// The current capacity of the backing region, in pages.
    pub current_capacity_pages: UnsafeCell<Pages>,

    /// The maximum capacity of this linear memory, in pages.
    pub max_capacity_pages: Pages,

    /// The [`Memory`] that owns this record.
    pub container: UnsafeCell<*const Memory>,
}

/// The JIT-visible record of an [`UnlinkedFunc`]: one compilation artifact,
/// shared by every instance of the same module.
#[derive(Debug)]
#[repr(C)]
pub struct VMFuncRef {
    /// The JIT-compiled entry point for this function, if it has been
    /// compiled.
    pub jit_entry: UnsafeCell<Option<VMJitFunction>>,

    /// The canonical index of this function's signature.
    pub type_index: VMSharedTypeIndex,

    /// The [`UnlinkedFunc`] that owns this record.
    pub container: UnsafeCell<*const UnlinkedFunc>,
}

/// The JIT-visible record of a [`LinkedFunc`]: the binding of a compilation
/// artifact to one instance.
#[derive(Debug)]
#[repr(C)]
pub struct VMFuncBinding {
    /// The record of the underlying compilation artifact.
    pub code: *const VMFuncRef,

    /// The record of the instance this function is bound to. Null for mock
    /// functions that are not part of any instance.
    pub vmctx: *const VMContext,

    /// The [`LinkedFunc`] that owns this record.
    pub container: UnsafeCell<*const LinkedFunc>,
}

/// The JIT-visible record of a module instance.
///
/// The two tables are parallel to the instance's logical function and
/// memory tables and indexed identically.
#[derive(Debug)]
#[repr(C)]
pub struct VMContext {
    /// Pointer to an array of [`VMMemoryDefinition`] pointers, one per
    /// memory slot.
    pub memory_table: *const *const VMMemoryDefinition,

    /// Pointer to an array of [`VMFuncBinding`] pointers, one per function
    /// slot.
    pub func_table: *const *const VMFuncBinding,

    /// The instance that owns this record.
    pub container: UnsafeCell<*const ()>,
}

// ===== impl VMMemoryDefinition =====

impl VMMemoryDefinition {
    pub(crate) fn new(flags: MemoryFlags, max_capacity_pages: Pages) -> VMMemoryDefinition {
        VMMemoryDefinition {
            flags,
            base: UnsafeCell::new(NonNull::dangling().as_ptr()),
            current_length: AtomicUsize::new(0),
            current_capacity_pages: UnsafeCell::new(Pages::new(0)),
            max_capacity_pages,
            container: UnsafeCell::new(core::ptr::null()),
        }
    }
}

// ===== impl VMFuncRef =====

impl VMFuncRef {
    pub(crate) fn new(type_index: VMSharedTypeIndex) -> VMFuncRef {
        VMFuncRef {
            jit_entry: UnsafeCell::new(None),
            type_index,
            container: UnsafeCell::new(core::ptr::null()),
        }
    }
}

// ===== impl VMFuncBinding =====

impl VMFuncBinding {
    pub(crate) fn new(code: *const VMFuncRef, vmctx: *const VMContext) -> VMFuncBinding {
        VMFuncBinding {
            code,
            vmctx,
            container: UnsafeCell::new(core::ptr::null()),
        }
    }
}

/// The owning bundle for an instance's [`VMContext`] and its parallel
/// pointer tables.
///
/// The record itself is boxed so its address is stable for the lifetime of
/// the instance regardless of where this bundle is moved.
#[derive(Debug)]
pub(crate) struct OwnedVMContext {
    record: Box<VMContext>,
    memory_table: Box<[UnsafeCell<*const VMMemoryDefinition>]>,
    func_table: Box<[UnsafeCell<*const VMFuncBinding>]>,
}

// ===== impl OwnedVMContext =====

impl OwnedVMContext {
    pub(crate) fn new(num_memories: usize, num_funcs: usize) -> OwnedVMContext {
        let memory_table: Box<[UnsafeCell<*const VMMemoryDefinition>]> = (0..num_memories)
            .map(|_| UnsafeCell::new(core::ptr::null()))
            .collect();
        let func_table: Box<[UnsafeCell<*const VMFuncBinding>]> = (0..num_funcs)
            .map(|_| UnsafeCell::new(core::ptr::null()))
            .collect();

        // UnsafeCell<T> has the same layout as T, so the tables can be
        // exposed as plain pointer arrays.
        let record = Box::new(VMContext {
            memory_table: memory_table.as_ptr().cast(),
            func_table: func_table.as_ptr().cast(),
            container: UnsafeCell::new(core::ptr::null()),
        });

        OwnedVMContext {
            record,
            memory_table,
            func_table,
        }
    }

    pub(crate) fn record(&self) -> NonNull<VMContext> {
        NonNull::from(&*self.record)
    }

    pub(crate) fn set_memory(&self, index: usize, definition: NonNull<VMMemoryDefinition>) {
        vm_assert!(
            index < self.memory_table.len(),
            "memory table index {index} out of bounds"
        );
        // Safety: single-threaded construction; no aliasing reference to
        // this slot exists while the instance is being built.
        unsafe {
            *self.memory_table[index].get() = definition.as_ptr();
        }
    }

    pub(crate) fn set_func(&self, index: usize, binding: NonNull<VMFuncBinding>) {
        vm_assert!(
            index < self.func_table.len(),
            "function table index {index} out of bounds"
        );
        // Safety: see `set_memory`.
        unsafe {
            *self.func_table[index].get() = binding.as_ptr();
        }
    }

    /// Installs the back pointer to the owning instance.
    ///
    /// # Safety
    ///
    /// `container` must point at the instance that owns this bundle and
    /// must stay valid for the bundle's lifetime.
    pub(crate) unsafe fn set_container(&self, container: *const ()) {
        // Safety: written exactly once by the instance constructor, before
        // any reader can observe the record.
        unsafe {
            *self.record.container.get() = container;
        }
    }
}

// The JIT layout contract: field order and offsets are load-bearing for
// generated code.
const WORD: usize = mem::size_of::<usize>();

const_assert_eq!(offset_of!(VMMemoryDefinition, flags), 0);
const_assert_eq!(offset_of!(VMMemoryDefinition, base), WORD);
const_assert_eq!(offset_of!(VMMemoryDefinition, current_length), 2 * WORD);
const_assert_eq!(
    offset_of!(VMMemoryDefinition, current_capacity_pages),
    3 * WORD
);
const_assert_eq!(offset_of!(VMMemoryDefinition, max_capacity_pages), 4 * WORD);
const_assert_eq!(offset_of!(VMMemoryDefinition, container), 5 * WORD);
const_assert_eq!(mem::size_of::<VMMemoryDefinition>(), 6 * WORD);

const_assert_eq!(offset_of!(VMFuncRef, jit_entry), 0);
const_assert_eq!(offset_of!(VMFuncRef, type_index), WORD);
const_assert_eq!(offset_of!(VMFuncRef, container), 2 * WORD);
const_assert_eq!(mem::size_of::<VMFuncRef>(), 3 * WORD);

const_assert_eq!(offset_of!(VMFuncBinding, code), 0);
const_assert_eq!(offset_of!(VMFuncBinding, vmctx), WORD);
const_assert_eq!(offset_of!(VMFuncBinding, container), 2 * WORD);
const_assert_eq!(mem::size_of::<VMFuncBinding>(), 3 * WORD);

const_assert_eq!(offset_of!(VMContext, memory_table), 0);
const_assert_eq!(offset_of!(VMContext, func_table), WORD);
const_assert_eq!(offset_of!(VMContext, container), 2 * WORD);
const_assert_eq!(mem::size_of::<VMContext>(), 3 * WORD);
