// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::sync::Arc;

use cranelift_entity::PrimaryMap;

use crate::code::InstructionStream;
use crate::engine::Engine;
use crate::func::UnlinkedFunc;
use crate::indices::{EntityIndex, FuncIndex, MemoryIndex, VMSharedTypeIndex};
use crate::memory::Memory;
use crate::types::{FuncType, MemoryType};

/// A WebAssembly import.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Import {
    /// The name of the module to import from.
    pub module: String,
    /// The name of the export that should be imported.
    pub name: String,
    /// The slot in this module's table of the matching kind that the
    /// imported entity fills.
    pub index: EntityIndex,
}

/// A WebAssembly export.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Export {
    /// The name of the export.
    pub name: String,
    /// The exported entity's slot in this module's table of the matching
    /// kind.
    pub index: EntityIndex,
}

/// A decoded function descriptor: either an import requirement or a defined
/// function body.
#[derive(Debug, Clone)]
pub enum FuncDesc {
    /// A function to be imported from another module. The eventual debug
    /// name is adopted from whatever satisfies the import.
    Imported {
        /// The signature the supplied function must have.
        sig: FuncType,
    },
    /// A function defined in this module.
    Defined {
        sig: FuncType,
        /// The function's debug name, or empty if none was provided.
        debug_name: String,
        body: Arc<InstructionStream>,
    },
}

/// A decoded linear-memory descriptor: either an import requirement or a
/// memory this module defines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryDesc {
    /// A memory to be imported from another module; the type states the
    /// requirements the supplied memory must satisfy.
    Imported(MemoryType),
    /// A memory defined (and allocated) by this module.
    Defined(MemoryType),
}

impl MemoryDesc {
    /// The declared shape of the memory, regardless of where it comes from.
    pub fn ty(&self) -> &MemoryType {
        match self {
            MemoryDesc::Imported(ty) | MemoryDesc::Defined(ty) => ty,
        }
    }
}

/// A module that has been decoded and type-checked but for which no runtime
/// resources have been allocated.
///
/// This is the handoff format between the binary decoder and
/// [`Module::new`]: a passive aggregate with no invariants of its own
/// beyond index fields lying within the corresponding tables. Instruction
/// streams are opaque here; their encoding is the compiler's business.
#[derive(Debug, Default)]
pub struct DecodedModule {
    pub imports: Vec<Import>,
    pub exports: Vec<Export>,
    pub memories: PrimaryMap<MemoryIndex, MemoryDesc>,
    pub funcs: PrimaryMap<FuncIndex, FuncDesc>,
}

/// A partially instantiated WebAssembly module.
///
/// Instances created from the same `Module` share the runtime structures
/// that are expensive to create: unlinked functions (one compilation
/// artifact per defined function) and the backing of defined shared
/// memories. Partial instantiation creates exactly those shared resources;
/// everything per-instance is deferred to [`Instance::new`].
///
/// [`Instance::new`]: crate::Instance::new
///
/// `Module` is a cheaply clonable handle; clones refer to the same
/// partially instantiated module.
#[derive(Debug, Clone)]
pub struct Module(Arc<ModuleInner>);

#[derive(Debug)]
struct ModuleInner {
    engine: Engine,
    imports: Vec<Import>,
    exports: Vec<Export>,
    memories: PrimaryMap<MemoryIndex, MemoryDesc>,
    /// Pre-allocated backing for defined shared memories, `None` for every
    /// other slot.
    shared_memories: PrimaryMap<MemoryIndex, Option<Arc<Memory>>>,
    /// Canonical signatures of imported functions, `None` for defined
    /// slots.
    import_func_types: PrimaryMap<FuncIndex, Option<VMSharedTypeIndex>>,
    /// Unlinked functions for defined slots, `None` for import slots.
    funcs: PrimaryMap<FuncIndex, Option<Arc<UnlinkedFunc>>>,
}

// ===== impl Module =====

impl Module {
    /// Partially instantiates a decoded module within `engine`.
    ///
    /// Every function signature is interned in the engine's type registry,
    /// defined functions become shared [`UnlinkedFunc`]s, and defined
    /// shared memories are allocated now so that every instance of this
    /// module will observe the same backing.
    pub fn new(engine: &Engine, decoded: DecodedModule) -> Module {
        let DecodedModule {
            imports,
            exports,
            memories,
            funcs,
        } = decoded;

        let mut import_func_types = PrimaryMap::with_capacity(funcs.len());
        let mut unlinked = PrimaryMap::with_capacity(funcs.len());
        for desc in funcs.values() {
            match desc {
                FuncDesc::Imported { sig } => {
                    import_func_types.push(Some(engine.type_registry().intern(sig.clone())));
                    unlinked.push(None);
                }
                FuncDesc::Defined {
                    sig,
                    debug_name,
                    body,
                } => {
                    import_func_types.push(None);
                    unlinked.push(Some(UnlinkedFunc::new(
                        engine,
                        sig.clone(),
                        debug_name.clone(),
                        body.clone(),
                    )));
                }
            }
        }

        let mut shared_memories = PrimaryMap::with_capacity(memories.len());
        for desc in memories.values() {
            shared_memories.push(match desc {
                MemoryDesc::Defined(ty) if ty.shared => Some(Memory::new(ty)),
                _ => None,
            });
        }

        tracing::debug!(
            "partially instantiated module: {} functions, {} memories, {} imports, {} exports",
            unlinked.len(),
            memories.len(),
            imports.len(),
            exports.len(),
        );

        Module(Arc::new(ModuleInner {
            engine: engine.clone(),
            imports,
            exports,
            memories,
            shared_memories,
            import_func_types,
            funcs: unlinked,
        }))
    }

    /// The engine this module was partially instantiated in.
    pub fn engine(&self) -> &Engine {
        &self.0.engine
    }

    /// The unresolved imports of this module, in declaration order.
    pub fn imports(&self) -> &[Import] {
        &self.0.imports
    }

    /// The exports of this module.
    pub fn exports(&self) -> &[Export] {
        &self.0.exports
    }

    /// The linear-memory descriptors of this module, defined and imported.
    pub fn memories(&self) -> &PrimaryMap<MemoryIndex, MemoryDesc> {
        &self.0.memories
    }

    /// The unlinked functions of this module; import slots are `None`.
    pub fn funcs(&self) -> &PrimaryMap<FuncIndex, Option<Arc<UnlinkedFunc>>> {
        &self.0.funcs
    }

    /// The canonical signature a function import must match, or `None` for
    /// a defined slot.
    pub fn import_func_type(&self, index: FuncIndex) -> Option<VMSharedTypeIndex> {
        self.0.import_func_types.get(index).copied().flatten()
    }

    /// The pre-allocated backing for a defined shared memory slot, or
    /// `None` for unshared and imported slots.
    pub fn shared_memory(&self, index: MemoryIndex) -> Option<&Arc<Memory>> {
        self.0.shared_memories.get(index).and_then(Option::as_ref)
    }
}

#[cfg(test)]
mod tests {
    use cranelift_entity::EntityRef;

    use super::*;
    use crate::pages::Pages;
    use crate::types::ValType;

    fn defined_func(name: &str) -> FuncDesc {
        FuncDesc::Defined {
            sig: FuncType::new([ValType::I32], []),
            debug_name: name.to_string(),
            body: Arc::new(InstructionStream::new(vec![0x0b])),
        }
    }

    #[test]
    fn import_slots_record_signatures_only() {
        let engine = Engine::new();
        let mut decoded = DecodedModule::default();
        decoded.imports.push(Import {
            module: "env".to_string(),
            name: "f".to_string(),
            index: EntityIndex::Func(FuncIndex::new(0)),
        });
        decoded.funcs.push(FuncDesc::Imported {
            sig: FuncType::new([ValType::I32], []),
        });
        decoded.funcs.push(defined_func("g"));

        let module = Module::new(&engine, decoded);

        let imported = FuncIndex::new(0);
        let defined = FuncIndex::new(1);
        assert!(module.funcs()[imported].is_none());
        assert!(module.funcs()[defined].is_some());
        assert_eq!(
            module.import_func_type(imported),
            Some(
                engine
                    .type_registry()
                    .intern(FuncType::new([ValType::I32], []))
            )
        );
        assert_eq!(module.import_func_type(defined), None);
    }

    #[test]
    fn defined_shared_memories_are_preallocated() {
        let engine = Engine::new();
        let mut decoded = DecodedModule::default();
        let shared = decoded.memories.push(MemoryDesc::Defined(MemoryType::shared(
            Pages::new(1),
            Pages::new(2),
        )));
        let unshared = decoded
            .memories
            .push(MemoryDesc::Defined(MemoryType::unshared(
                Pages::new(1),
                Pages::new(2),
            )));
        let imported = decoded
            .memories
            .push(MemoryDesc::Imported(MemoryType::shared(
                Pages::new(1),
                Pages::new(2),
            )));

        let module = Module::new(&engine, decoded);
        assert!(module.shared_memory(shared).is_some());
        assert!(module.shared_memory(unshared).is_none());
        assert!(module.shared_memory(imported).is_none());
        assert!(module.shared_memory(shared).unwrap().is_shared());
    }
}
