// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::ptr::{self, NonNull};
use std::sync::Arc;

use crate::code::InstructionStream;
use crate::engine::Engine;
use crate::indices::VMSharedTypeIndex;
use crate::types::FuncType;
use crate::vm::{VMContext, VMFuncBinding, VMFuncRef, VMJitFunction};

/// A WebAssembly function bound to a sandbox but not yet to an instance.
///
/// An `UnlinkedFunc` is the per-module compilation artifact for a defined
/// function: its canonical signature, debug name, instruction stream, and
/// the JIT-visible [`VMFuncRef`] record a compiler installs its entry point
/// into. It is shared by every instance of the same module, so a function is
/// compiled once no matter how many times its module is instantiated.
#[derive(Debug)]
pub struct UnlinkedFunc {
    record: VMFuncRef,
    debug_name: String,
    body: Option<Arc<InstructionStream>>,
}

/// A WebAssembly function that is part of a fully instantiated module.
///
/// A `LinkedFunc` binds an [`UnlinkedFunc`] to one instance. Its JIT-visible
/// [`VMFuncBinding`] record is what function references point at: it carries
/// the pointers into the compilation artifact and the owning instance that
/// generated code needs for a call.
#[derive(Debug)]
pub struct LinkedFunc {
    record: VMFuncBinding,
    unlinked: Arc<UnlinkedFunc>,
}

// ===== impl UnlinkedFunc =====

impl UnlinkedFunc {
    /// Creates an unlinked function for a defined function, canonicalizing
    /// its signature in `engine`'s type registry.
    pub(crate) fn new(
        engine: &Engine,
        sig: FuncType,
        debug_name: String,
        body: Arc<InstructionStream>,
    ) -> Arc<UnlinkedFunc> {
        let type_index = engine.type_registry().intern(sig);
        tracing::trace!(
            "created unlinked function `{debug_name}` with signature {type_index:?}"
        );
        Self::from_parts(type_index, debug_name, Some(body))
    }

    /// Creates a bodiless unlinked function with the given canonical
    /// signature.
    ///
    /// Mock functions stand in for host functions in tests and embedder
    /// shims; they belong to no module and carry no instructions.
    pub fn mock(type_index: VMSharedTypeIndex) -> Arc<UnlinkedFunc> {
        Self::from_parts(type_index, String::new(), None)
    }

    fn from_parts(
        type_index: VMSharedTypeIndex,
        debug_name: String,
        body: Option<Arc<InstructionStream>>,
    ) -> Arc<UnlinkedFunc> {
        let func = Arc::new(UnlinkedFunc {
            record: VMFuncRef::new(type_index),
            debug_name,
            body,
        });
        // Safety: the record's address is final now that the function is
        // heap-allocated; the constructor is the only writer.
        unsafe {
            *func.record.container.get() = Arc::as_ptr(&func);
        }
        func
    }

    /// Returns a pointer to the JIT-visible record for this function.
    pub fn vmfuncref(&self) -> NonNull<VMFuncRef> {
        NonNull::from(&self.record)
    }

    /// The canonical index of this function's signature.
    #[inline]
    pub fn type_index(&self) -> VMSharedTypeIndex {
        self.record.type_index
    }

    /// The JIT-compiled entry point currently installed for this function,
    /// if any.
    pub fn jit_entry(&self) -> Option<VMJitFunction> {
        // Safety: reads and writes of the entry are serialized by the
        // crate's single-threaded access contract.
        unsafe { *self.record.jit_entry.get() }
    }

    /// Installs (or clears) the JIT-compiled entry point for this function.
    ///
    /// Compiling once here makes the entry visible to every instance of the
    /// owning module.
    pub fn set_jit_entry(&self, entry: Option<VMJitFunction>) {
        // Safety: see `jit_entry`.
        unsafe {
            *self.record.jit_entry.get() = entry;
        }
    }

    /// The debug name of this function, or the empty string if none was
    /// provided.
    #[inline]
    pub fn debug_name(&self) -> &str {
        &self.debug_name
    }

    /// The instruction stream of this function, absent for mock functions.
    #[inline]
    pub fn body(&self) -> Option<&Arc<InstructionStream>> {
        self.body.as_ref()
    }
}

// ===== impl LinkedFunc =====

impl LinkedFunc {
    /// Binds `unlinked` to the instance whose record is `vmctx`.
    pub(crate) fn new(unlinked: Arc<UnlinkedFunc>, vmctx: NonNull<VMContext>) -> Arc<LinkedFunc> {
        Self::from_parts(unlinked, vmctx.as_ptr())
    }

    /// Creates a linked mock function with the given canonical signature.
    ///
    /// The function belongs to no instance; its record's instance pointer
    /// is null.
    pub fn mock(type_index: VMSharedTypeIndex) -> Arc<LinkedFunc> {
        Self::from_parts(UnlinkedFunc::mock(type_index), ptr::null())
    }

    fn from_parts(unlinked: Arc<UnlinkedFunc>, vmctx: *const VMContext) -> Arc<LinkedFunc> {
        let func = Arc::new(LinkedFunc {
            record: VMFuncBinding::new(unlinked.vmfuncref().as_ptr(), vmctx),
            unlinked,
        });
        // Safety: the record's address is final now that the function is
        // heap-allocated; the constructor is the only writer.
        unsafe {
            *func.record.container.get() = Arc::as_ptr(&func);
        }
        func
    }

    /// Returns a pointer to the JIT-visible record for this function.
    pub fn vmfuncbinding(&self) -> NonNull<VMFuncBinding> {
        NonNull::from(&self.record)
    }

    /// The compilation artifact this function was created from.
    #[inline]
    pub fn unlinked(&self) -> &Arc<UnlinkedFunc> {
        &self.unlinked
    }

    /// The record of the instance this function is bound to, null for mock
    /// functions.
    ///
    /// This is a non-owning reference; the owning instance always outlives
    /// its defined functions.
    #[inline]
    pub fn vmctx(&self) -> *const VMContext {
        self.record.vmctx
    }
}
