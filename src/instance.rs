// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::ptr::NonNull;
use std::sync::Arc;

use cranelift_entity::{EntityRef, PrimaryMap};

use crate::engine::Engine;
use crate::errors::{LinkError, LinkErrorKind};
use crate::func::LinkedFunc;
use crate::indices::{EntityIndex, FuncIndex, MemoryIndex};
use crate::linker::{ImportEnvironment, ImportModule};
use crate::memory::Memory;
use crate::module::{Export, Import, MemoryDesc, Module};
use crate::types::EntityKind;
use crate::utils::{vm_assert, vm_unreachable};
use crate::vm::{OwnedVMContext, VMContext};

/// A fully instantiated WebAssembly module, ready for execution.
///
/// An instance owns the linked functions it defines and the unshared
/// memories it declares; imported functions and shared memories are jointly
/// owned with their suppliers, so a supplying instance cannot be torn down
/// out from under an importer. The instance's [`VMContext`] record and its
/// parallel pointer tables stay at fixed addresses for the instance's whole
/// life.
///
/// `Instance` is a cheaply clonable handle; clones refer to the same
/// instance.
#[derive(Debug, Clone)]
pub struct Instance(Arc<InstanceInner>);

#[derive(Debug)]
struct InstanceInner {
    engine: Engine,
    exports: Vec<Export>,
    funcs: PrimaryMap<FuncIndex, Arc<LinkedFunc>>,
    memories: PrimaryMap<MemoryIndex, Arc<Memory>>,
    vmctx: OwnedVMContext,
}

// ===== impl Instance =====

impl Instance {
    /// Fully instantiates a partially instantiated module, resolving its
    /// imports against `imports`.
    ///
    /// Imports are resolved in declaration order, then defined items are
    /// materialized in slot order, so the error reported is always for the
    /// first offending import. On error, nothing the instantiation
    /// allocated survives; the only lasting effect of a failed attempt is
    /// whatever signature interning module construction already performed.
    ///
    /// Every module named by `imports` must belong to the same engine as
    /// `module`.
    ///
    /// # Errors
    ///
    /// Returns a [`LinkError`] if an import cannot be satisfied: missing
    /// export, wrong export kind, mismatched function signature, or an
    /// incompatible memory.
    pub fn new(module: &Module, imports: &ImportEnvironment<'_>) -> crate::Result<Instance> {
        // Phase 1: the instance record and parallel tables, sized to the
        // module.
        let vmctx = OwnedVMContext::new(module.memories().len(), module.funcs().len());
        let mut funcs: Vec<Option<Arc<LinkedFunc>>> = vec![None; module.funcs().len()];
        let mut memories: Vec<Option<Arc<Memory>>> = vec![None; module.memories().len()];

        // Phase 2: resolve imports in declaration order.
        for import in module.imports() {
            match import.index {
                EntityIndex::Func(index) => {
                    let slot = index.index();
                    vm_assert!(
                        slot < funcs.len(),
                        "function import `{}.{}` targets out-of-bounds slot {index:?}",
                        import.module,
                        import.name
                    );
                    vm_assert!(
                        funcs[slot].is_none(),
                        "multiple imports fill function slot {index:?}"
                    );

                    let Some(func) = imports.find_func(import)? else {
                        return Err(LinkError::not_found(import.clone()).into());
                    };

                    let Some(expected) = module.import_func_type(index) else {
                        vm_unreachable!(
                            "function import slot {index:?} has no recorded signature"
                        );
                    };
                    if func.unlinked().type_index() != expected {
                        return Err(LinkError::new(
                            import.clone(),
                            LinkErrorKind::SignatureMismatch,
                        )
                        .into());
                    }

                    tracing::trace!(
                        "resolved function import `{}.{}` into slot {index:?}",
                        import.module,
                        import.name
                    );
                    vmctx.set_func(slot, func.vmfuncbinding());
                    funcs[slot] = Some(func);
                }
                EntityIndex::Memory(index) => {
                    let slot = index.index();
                    vm_assert!(
                        slot < memories.len(),
                        "memory import `{}.{}` targets out-of-bounds slot {index:?}",
                        import.module,
                        import.name
                    );
                    vm_assert!(
                        memories[slot].is_none(),
                        "multiple imports fill memory slot {index:?}"
                    );

                    let Some(memory) = imports.find_memory(import)? else {
                        return Err(LinkError::not_found(import.clone()).into());
                    };

                    let required = module.memories()[index].ty();
                    if memory.is_shared() != required.shared {
                        return Err(LinkError::new(
                            import.clone(),
                            LinkErrorKind::MemorySharingMismatch {
                                supplied_shared: memory.is_shared(),
                            },
                        )
                        .into());
                    }
                    if memory.initial_size_pages() < required.initial {
                        return Err(LinkError::new(
                            import.clone(),
                            LinkErrorKind::MemoryTooSmall {
                                supplied: memory.initial_size_pages(),
                                required: required.initial,
                            },
                        )
                        .into());
                    }
                    if memory.max_capacity_pages() > required.maximum {
                        return Err(LinkError::new(
                            import.clone(),
                            LinkErrorKind::MemoryMaxTooLarge {
                                supplied: memory.max_capacity_pages(),
                                required: required.maximum,
                            },
                        )
                        .into());
                    }

                    tracing::trace!(
                        "resolved memory import `{}.{}` into slot {index:?}",
                        import.module,
                        import.name
                    );
                    vmctx.set_memory(slot, memory.vmmemory());
                    memories[slot] = Some(memory);
                }
                EntityIndex::Table(_) | EntityIndex::Global(_) => vm_unreachable!(
                    "unsupported {} import `{}.{}`",
                    import.index.kind(),
                    import.module,
                    import.name
                ),
            }
        }

        // Phase 3: materialize defined items in slot order.
        for (index, slot) in module.funcs().iter() {
            match slot {
                Some(unlinked) => {
                    vm_assert!(
                        funcs[index.index()].is_none(),
                        "import overwrote defined function slot {index:?}"
                    );
                    let linked = LinkedFunc::new(unlinked.clone(), vmctx.record());
                    vmctx.set_func(index.index(), linked.vmfuncbinding());
                    funcs[index.index()] = Some(linked);
                }
                None => vm_assert!(
                    funcs[index.index()].is_some(),
                    "missing import for function slot {index:?}"
                ),
            }
        }

        for (index, desc) in module.memories().iter() {
            match desc {
                MemoryDesc::Defined(ty) => {
                    vm_assert!(
                        memories[index.index()].is_none(),
                        "import overwrote defined memory slot {index:?}"
                    );
                    let memory = if ty.shared {
                        let Some(shared) = module.shared_memory(index) else {
                            vm_unreachable!(
                                "shared memory slot {index:?} was not created at partial \
                                 instantiation"
                            );
                        };
                        shared.clone()
                    } else {
                        vm_assert!(
                            module.shared_memory(index).is_none(),
                            "unshared memory slot {index:?} was created at partial instantiation"
                        );
                        Memory::new(ty)
                    };
                    vmctx.set_memory(index.index(), memory.vmmemory());
                    memories[index.index()] = Some(memory);
                }
                MemoryDesc::Imported(_) => vm_assert!(
                    memories[index.index()].is_some(),
                    "missing import for memory slot {index:?}"
                ),
            }
        }

        // Phase 4: every slot must be populated.
        let mut func_table = PrimaryMap::with_capacity(funcs.len());
        for (i, func) in funcs.into_iter().enumerate() {
            let Some(func) = func else {
                vm_unreachable!("function slot {i} left unpopulated after instantiation");
            };
            func_table.push(func);
        }
        let mut memory_table = PrimaryMap::with_capacity(memories.len());
        for (i, memory) in memories.into_iter().enumerate() {
            let Some(memory) = memory else {
                vm_unreachable!("memory slot {i} left unpopulated after instantiation");
            };
            memory_table.push(memory);
        }

        let inner = Arc::new(InstanceInner {
            engine: module.engine().clone(),
            exports: module.exports().to_vec(),
            funcs: func_table,
            memories: memory_table,
            vmctx,
        });
        // Safety: the record's address is final now that the instance is
        // heap-allocated; the constructor is the only writer.
        unsafe {
            inner.vmctx.set_container(Arc::as_ptr(&inner).cast());
        }

        tracing::debug!(
            "instantiated module: {} functions, {} memories, {} exports",
            inner.funcs.len(),
            inner.memories.len(),
            inner.exports.len(),
        );
        Ok(Instance(inner))
    }

    /// The engine this instance lives in.
    pub fn engine(&self) -> &Engine {
        &self.0.engine
    }

    /// The exports provided by this instance.
    pub fn exports(&self) -> &[Export] {
        &self.0.exports
    }

    /// The functions of this instance, defined and imported.
    pub fn funcs(&self) -> &PrimaryMap<FuncIndex, Arc<LinkedFunc>> {
        &self.0.funcs
    }

    /// The linear memories of this instance, defined and imported.
    pub fn memories(&self) -> &PrimaryMap<MemoryIndex, Arc<Memory>> {
        &self.0.memories
    }

    /// Returns a pointer to the JIT-visible record for this instance.
    pub fn vmctx(&self) -> NonNull<VMContext> {
        self.0.vmctx.record()
    }

    /// Finds an export of this instance matching `import`.
    ///
    /// An export matches on the import's `name` alone; the `module` field
    /// of the query was already consumed selecting this instance.
    pub fn find_export(&self, import: &Import) -> Option<&Export> {
        self.0.exports.iter().find(|e| e.name == import.name)
    }
}

impl ImportModule for Instance {
    fn find_func(&self, import: &Import) -> Result<Option<Arc<LinkedFunc>>, LinkError> {
        let Some(export) = self.find_export(import) else {
            return Ok(None);
        };
        match export.index {
            EntityIndex::Func(index) => Ok(Some(self.0.funcs[index].clone())),
            _ => Err(LinkError::new(
                import.clone(),
                LinkErrorKind::WrongExportKind {
                    expected: EntityKind::Func,
                    found: export.index.kind(),
                },
            )),
        }
    }

    fn find_memory(&self, import: &Import) -> Result<Option<Arc<Memory>>, LinkError> {
        let Some(export) = self.find_export(import) else {
            return Ok(None);
        };
        match export.index {
            EntityIndex::Memory(index) => Ok(Some(self.0.memories[index].clone())),
            _ => Err(LinkError::new(
                import.clone(),
                LinkErrorKind::WrongExportKind {
                    expected: EntityKind::Memory,
                    found: export.index.kind(),
                },
            )),
        }
    }
}
