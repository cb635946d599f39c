// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::collections::HashMap;
use std::sync::Arc;

use wasmbox::{
    DecodedModule, Engine, EntityIndex, EntityKind, Export, FuncDesc, FuncIndex, FuncType, Import,
    ImportEnvironment, ImportModule, Instance, InstructionStream, LinkError, LinkErrorKind,
    LinkedFunc, Memory, MemoryDesc, MemoryIndex, MemoryType, Module, MultiModule, Pages,
    TableIndex, ValType,
};

/// An import module backed by plain name maps, standing in for a real
/// supplier of host functions and memories.
#[derive(Default)]
struct MockImportModule {
    funcs: HashMap<String, Arc<LinkedFunc>>,
    memories: HashMap<String, Arc<Memory>>,
}

impl MockImportModule {
    fn empty() -> MockImportModule {
        MockImportModule::default()
    }

    fn for_func(name: &str, func: Arc<LinkedFunc>) -> MockImportModule {
        let mut module = MockImportModule::default();
        module.funcs.insert(name.to_string(), func);
        module
    }

    fn for_memory(name: &str, memory: Arc<Memory>) -> MockImportModule {
        let mut module = MockImportModule::default();
        module.memories.insert(name.to_string(), memory);
        module
    }
}

impl ImportModule for MockImportModule {
    fn find_func(&self, import: &Import) -> Result<Option<Arc<LinkedFunc>>, LinkError> {
        Ok(self.funcs.get(&import.name).cloned())
    }

    fn find_memory(&self, import: &Import) -> Result<Option<Arc<Memory>>, LinkError> {
        Ok(self.memories.get(&import.name).cloned())
    }
}

fn func_import(module: &str, name: &str, slot: u32) -> Import {
    Import {
        module: module.to_string(),
        name: name.to_string(),
        index: EntityIndex::Func(FuncIndex::from_u32(slot)),
    }
}

fn memory_import(module: &str, name: &str, slot: u32) -> Import {
    Import {
        module: module.to_string(),
        name: name.to_string(),
        index: EntityIndex::Memory(MemoryIndex::from_u32(slot)),
    }
}

fn defined_func(name: &str, sig: FuncType) -> FuncDesc {
    FuncDesc::Defined {
        sig,
        debug_name: name.to_string(),
        body: Arc::new(InstructionStream::new(vec![0x0b])),
    }
}

fn link_error(err: anyhow::Error) -> LinkError {
    err.downcast_ref::<LinkError>()
        .expect("expected a LinkError")
        .clone()
}

#[test]
fn empty_module() {
    let engine = Engine::new();
    let module = Module::new(&engine, DecodedModule::default());

    assert!(module.imports().is_empty());
    assert!(module.exports().is_empty());
    assert!(module.funcs().is_empty());
    assert!(module.memories().is_empty());

    let instance = Instance::new(&module, &ImportEnvironment::new()).unwrap();

    assert!(instance.exports().is_empty());
    assert!(instance.funcs().is_empty());
    assert!(instance.memories().is_empty());
}

#[test]
fn import_function() {
    let engine = Engine::new();
    let mut decoded = DecodedModule::default();
    decoded.imports.push(func_import("mod", "func", 0));
    decoded.funcs.push(FuncDesc::Imported {
        sig: FuncType::default(),
    });
    let module = Module::new(&engine, decoded);

    assert_eq!(module.imports().len(), 1);
    assert_eq!(module.imports()[0].module, "mod");
    assert_eq!(module.imports()[0].name, "func");
    assert_eq!(
        module.imports()[0].index,
        EntityIndex::Func(FuncIndex::from_u32(0))
    );
    assert!(module.funcs()[FuncIndex::from_u32(0)].is_none());

    let supplied = LinkedFunc::mock(engine.type_registry().intern(FuncType::default()));
    let mock = MockImportModule::for_func("func", supplied.clone());
    let mut env = ImportEnvironment::new();
    env.define("mod", &mock);

    let instance = Instance::new(&module, &env).unwrap();

    assert!(Arc::ptr_eq(
        &instance.funcs()[FuncIndex::from_u32(0)],
        &supplied
    ));

    // The internal function table holds the supplied function's record.
    // Safety: the instance record and tables outlive this read.
    unsafe {
        let vmctx = instance.vmctx().as_ref();
        let entry = *vmctx.func_table;
        assert_eq!(entry, supplied.vmfuncbinding().as_ptr().cast_const());
        assert!(!(*vmctx.container.get()).is_null());
    }
}

#[test]
fn import_function_mismatches() {
    let engine = Engine::new();
    let sig = FuncType::new(
        [ValType::I32, ValType::I32],
        [ValType::I32, ValType::I32],
    );

    let mut decoded = DecodedModule::default();
    decoded.imports.push(func_import("mod", "func", 0));
    decoded.funcs.push(FuncDesc::Imported { sig: sig.clone() });
    let module = Module::new(&engine, decoded);

    let check = |mock: &MockImportModule, kind: LinkErrorKind| {
        let mut env = ImportEnvironment::new();
        env.define("mod", mock as &dyn ImportModule);
        let err = link_error(Instance::new(&module, &env).unwrap_err());
        assert_eq!(*err.kind(), kind);
        assert_eq!(err.import().module, "mod");
        assert_eq!(err.import().name, "func");
        assert_eq!(
            err.import().index,
            EntityIndex::Func(FuncIndex::from_u32(0))
        );
    };

    // Missing entirely.
    check(&MockImportModule::empty(), LinkErrorKind::NotFound);

    // Wrong result arity.
    let wrong = LinkedFunc::mock(engine.type_registry().intern(FuncType::new(
        [ValType::I32, ValType::I32],
        [ValType::I32],
    )));
    check(
        &MockImportModule::for_func("func", wrong),
        LinkErrorKind::SignatureMismatch,
    );

    // Wrong parameter arity.
    let wrong = LinkedFunc::mock(engine.type_registry().intern(FuncType::new(
        [ValType::I32],
        [ValType::I32, ValType::I32],
    )));
    check(
        &MockImportModule::for_func("func", wrong),
        LinkErrorKind::SignatureMismatch,
    );

    // Primitive type mismatch.
    let wrong = LinkedFunc::mock(engine.type_registry().intern(FuncType::new(
        [ValType::F32, ValType::I32],
        [ValType::I32, ValType::I32],
    )));
    check(
        &MockImportModule::for_func("func", wrong),
        LinkErrorKind::SignatureMismatch,
    );

    // An exact match still links.
    let right = LinkedFunc::mock(engine.type_registry().intern(sig));
    let mock = MockImportModule::for_func("func", right);
    let mut env = ImportEnvironment::new();
    env.define("mod", &mock);
    assert!(Instance::new(&module, &env).is_ok());
}

#[test]
fn export_function() {
    let engine = Engine::new();
    let mut decoded = DecodedModule::default();
    decoded.funcs.push(defined_func("func", FuncType::default()));
    decoded.exports.push(Export {
        name: "func".to_string(),
        index: EntityIndex::Func(FuncIndex::from_u32(0)),
    });
    let module = Module::new(&engine, decoded);

    let instance = Instance::new(&module, &ImportEnvironment::new()).unwrap();

    let found = instance
        .find_func(&func_import("mod", "func", 0))
        .unwrap()
        .expect("export should resolve");
    assert!(Arc::ptr_eq(&found, &instance.funcs()[FuncIndex::from_u32(0)]));
    assert!(Arc::ptr_eq(
        found.unlinked(),
        module.funcs()[FuncIndex::from_u32(0)].as_ref().unwrap()
    ));
    assert_eq!(found.unlinked().debug_name(), "func");
}

#[test]
fn import_function_from_another_instance() {
    let engine = Engine::new();

    let mut exporter = DecodedModule::default();
    exporter
        .funcs
        .push(defined_func("f", FuncType::new([ValType::I64], [])));
    exporter.exports.push(Export {
        name: "f".to_string(),
        index: EntityIndex::Func(FuncIndex::from_u32(0)),
    });
    let exporter = Module::new(&engine, exporter);
    let exporter = Instance::new(&exporter, &ImportEnvironment::new()).unwrap();

    let mut importer = DecodedModule::default();
    importer.imports.push(func_import("lib", "f", 0));
    importer.funcs.push(FuncDesc::Imported {
        sig: FuncType::new([ValType::I64], []),
    });
    let importer = Module::new(&engine, importer);

    let mut env = ImportEnvironment::new();
    env.define("lib", &exporter);
    let instance = Instance::new(&importer, &env).unwrap();

    assert!(Arc::ptr_eq(
        &instance.funcs()[FuncIndex::from_u32(0)],
        &exporter.funcs()[FuncIndex::from_u32(0)]
    ));
}

#[test]
fn unshared_memory_is_distinct_across_instances() {
    let engine = Engine::new();
    let mut decoded = DecodedModule::default();
    decoded
        .memories
        .push(MemoryDesc::Defined(MemoryType::unshared(
            Pages::new(1),
            Pages::new(2),
        )));
    let module = Module::new(&engine, decoded);

    let a = Instance::new(&module, &ImportEnvironment::new()).unwrap();
    let b = Instance::new(&module, &ImportEnvironment::new()).unwrap();

    let index = MemoryIndex::from_u32(0);
    assert!(!Arc::ptr_eq(&a.memories()[index], &b.memories()[index]));
    assert_ne!(a.memories()[index].data(), b.memories()[index].data());
}

#[test]
fn shared_memory_is_shared_across_instances() {
    let engine = Engine::new();
    let mut decoded = DecodedModule::default();
    decoded
        .memories
        .push(MemoryDesc::Defined(MemoryType::shared(
            Pages::new(1),
            Pages::new(2),
        )));
    let module = Module::new(&engine, decoded);

    let a = Instance::new(&module, &ImportEnvironment::new()).unwrap();
    let b = Instance::new(&module, &ImportEnvironment::new()).unwrap();

    let index = MemoryIndex::from_u32(0);
    assert!(Arc::ptr_eq(&a.memories()[index], &b.memories()[index]));

    // Writes through one instance are visible through the other.
    assert!(a.memories()[index].store(0, 0x42u32));
    assert_eq!(b.memories()[index].load::<u32>(0), Some(0x42));
}

#[test]
fn memory_import_compatibility() {
    let engine = Engine::new();
    let mut decoded = DecodedModule::default();
    decoded.imports.push(memory_import("mod", "mem", 0));
    decoded
        .memories
        .push(MemoryDesc::Imported(MemoryType::unshared(
            Pages::new(5),
            Pages::new(10),
        )));
    let module = Module::new(&engine, decoded);

    let check_err = |mock: &MockImportModule, kind: LinkErrorKind| {
        let mut env = ImportEnvironment::new();
        env.define("mod", mock as &dyn ImportModule);
        let err = link_error(Instance::new(&module, &env).unwrap_err());
        assert_eq!(*err.kind(), kind);
        assert_eq!(err.import().name, "mem");
    };

    // Absent.
    check_err(&MockImportModule::empty(), LinkErrorKind::NotFound);

    // Shared where unshared is required.
    check_err(
        &MockImportModule::for_memory("mem", Memory::new_shared(Pages::new(5), Pages::new(10))),
        LinkErrorKind::MemorySharingMismatch {
            supplied_shared: true,
        },
    );

    // Initial size below the required minimum.
    check_err(
        &MockImportModule::for_memory("mem", Memory::new_unshared(Pages::new(4), Pages::new(10))),
        LinkErrorKind::MemoryTooSmall {
            supplied: Pages::new(4),
            required: Pages::new(5),
        },
    );

    // Max capacity above the required maximum.
    check_err(
        &MockImportModule::for_memory("mem", Memory::new_unshared(Pages::new(5), Pages::new(11))),
        LinkErrorKind::MemoryMaxTooLarge {
            supplied: Pages::new(11),
            required: Pages::new(10),
        },
    );

    // An unlimited supplier never satisfies a finite bound.
    check_err(
        &MockImportModule::for_memory(
            "mem",
            Memory::new_unshared(Pages::new(5), Pages::UNLIMITED),
        ),
        LinkErrorKind::MemoryMaxTooLarge {
            supplied: Pages::UNLIMITED,
            required: Pages::new(10),
        },
    );

    // An exact fit links, and the instance installs the supplied memory.
    let supplied = Memory::new_unshared(Pages::new(5), Pages::new(10));
    let mock = MockImportModule::for_memory("mem", supplied.clone());
    let mut env = ImportEnvironment::new();
    env.define("mod", &mock);
    let instance = Instance::new(&module, &env).unwrap();

    let index = MemoryIndex::from_u32(0);
    assert!(Arc::ptr_eq(&instance.memories()[index], &supplied));

    // Safety: the instance record and tables outlive this read.
    unsafe {
        let vmctx = instance.vmctx().as_ref();
        let entry = *vmctx.memory_table;
        assert_eq!(entry, supplied.vmmemory().as_ptr().cast_const());
    }
}

#[test]
fn wrong_export_kind() {
    let engine = Engine::new();

    // An instance exporting a memory under the name "thing".
    let mut exporter = DecodedModule::default();
    exporter
        .memories
        .push(MemoryDesc::Defined(MemoryType::unshared(
            Pages::new(1),
            Pages::new(1),
        )));
    exporter.exports.push(Export {
        name: "thing".to_string(),
        index: EntityIndex::Memory(MemoryIndex::from_u32(0)),
    });
    let exporter = Module::new(&engine, exporter);
    let exporter = Instance::new(&exporter, &ImportEnvironment::new()).unwrap();

    // A module importing "thing" as a function.
    let mut importer = DecodedModule::default();
    importer.imports.push(func_import("lib", "thing", 0));
    importer.funcs.push(FuncDesc::Imported {
        sig: FuncType::default(),
    });
    let importer = Module::new(&engine, importer);

    let mut env = ImportEnvironment::new();
    env.define("lib", &exporter);
    let err = link_error(Instance::new(&importer, &env).unwrap_err());
    assert_eq!(
        *err.kind(),
        LinkErrorKind::WrongExportKind {
            expected: EntityKind::Func,
            found: EntityKind::Memory,
        }
    );
    assert_eq!(
        err.to_string(),
        "import `lib.thing` has wrong type: expected function, found memory"
    );
}

#[test]
fn multi_module_searches_in_order() {
    let engine = Engine::new();
    let ty = engine.type_registry().intern(FuncType::default());

    let first = LinkedFunc::mock(ty);
    let second = LinkedFunc::mock(ty);
    let first_mock = MockImportModule::for_func("func", first.clone());
    let second_mock = MockImportModule::for_func("func", second.clone());
    let memory_mock =
        MockImportModule::for_memory("mem", Memory::new_unshared(Pages::new(0), Pages::new(1)));

    let multi = MultiModule::new(vec![
        &memory_mock as &dyn ImportModule,
        &first_mock,
        &second_mock,
    ]);

    let found = multi.find_func(&func_import("mod", "func", 0)).unwrap();
    assert!(Arc::ptr_eq(&found.unwrap(), &first));

    let missing = multi.find_func(&func_import("mod", "other", 0)).unwrap();
    assert!(missing.is_none());
}

#[test]
fn environment_redefinition_replaces() {
    let engine = Engine::new();
    let ty = engine.type_registry().intern(FuncType::default());

    let old = MockImportModule::for_func("func", LinkedFunc::mock(ty));
    let replacement_func = LinkedFunc::mock(ty);
    let new = MockImportModule::for_func("func", replacement_func.clone());

    let mut env = ImportEnvironment::new();
    env.define("mod", &old);
    env.define("mod", &new);

    let found = env.find_func(&func_import("mod", "func", 0)).unwrap();
    assert!(Arc::ptr_eq(&found.unwrap(), &replacement_func));
}

#[test]
fn instance_lookup_ignores_module_field() {
    let engine = Engine::new();
    let mut decoded = DecodedModule::default();
    decoded.funcs.push(defined_func("f", FuncType::default()));
    decoded.exports.push(Export {
        name: "f".to_string(),
        index: EntityIndex::Func(FuncIndex::from_u32(0)),
    });
    let module = Module::new(&engine, decoded);
    let instance = Instance::new(&module, &ImportEnvironment::new()).unwrap();

    // The module half of the key is resolved by the environment's name
    // map, not by the instance.
    let found = instance
        .find_func(&func_import("some-other-module", "f", 0))
        .unwrap();
    assert!(found.is_some());
}

#[test]
#[should_panic(expected = "invariant violation")]
fn duplicate_imports_into_one_slot_are_fatal() {
    let engine = Engine::new();
    let mut decoded = DecodedModule::default();
    decoded.imports.push(func_import("mod", "a", 0));
    decoded.imports.push(func_import("mod", "b", 0));
    decoded.funcs.push(FuncDesc::Imported {
        sig: FuncType::default(),
    });
    let module = Module::new(&engine, decoded);

    let ty = engine.type_registry().intern(FuncType::default());
    let mut mock = MockImportModule::for_func("a", LinkedFunc::mock(ty));
    mock.funcs.insert("b".to_string(), LinkedFunc::mock(ty));
    let mut env = ImportEnvironment::new();
    env.define("mod", &mock);

    let _ = Instance::new(&module, &env);
}

#[test]
#[should_panic(expected = "invariant violation")]
fn out_of_bounds_import_slot_is_fatal() {
    let engine = Engine::new();
    let mut decoded = DecodedModule::default();
    decoded.imports.push(func_import("mod", "func", 5));
    decoded.funcs.push(FuncDesc::Imported {
        sig: FuncType::default(),
    });
    let module = Module::new(&engine, decoded);

    let _ = Instance::new(&module, &ImportEnvironment::new());
}

#[test]
#[should_panic(expected = "invariant violation")]
fn table_import_is_fatal() {
    let engine = Engine::new();
    let mut decoded = DecodedModule::default();
    decoded.imports.push(Import {
        module: "mod".to_string(),
        name: "table".to_string(),
        index: EntityIndex::Table(TableIndex::from_u32(0)),
    });
    let module = Module::new(&engine, decoded);

    let _ = Instance::new(&module, &ImportEnvironment::new());
}

#[test]
fn defined_function_records_are_wired_to_the_instance() {
    let engine = Engine::new();
    let mut decoded = DecodedModule::default();
    decoded.funcs.push(defined_func("f", FuncType::default()));
    decoded
        .memories
        .push(MemoryDesc::Defined(MemoryType::unshared(
            Pages::new(1),
            Pages::new(1),
        )));
    let module = Module::new(&engine, decoded);
    let instance = Instance::new(&module, &ImportEnvironment::new()).unwrap();

    let func = &instance.funcs()[FuncIndex::from_u32(0)];
    let memory = &instance.memories()[MemoryIndex::from_u32(0)];

    // Safety: all records outlive this read.
    unsafe {
        let binding = func.vmfuncbinding().as_ref();
        assert_eq!(binding.vmctx, instance.vmctx().as_ptr().cast_const());
        assert_eq!(binding.code, func.unlinked().vmfuncref().as_ptr().cast_const());

        let vmctx = instance.vmctx().as_ref();
        assert_eq!(*vmctx.func_table, func.vmfuncbinding().as_ptr().cast_const());
        assert_eq!(*vmctx.memory_table, memory.vmmemory().as_ptr().cast_const());
    }
}
