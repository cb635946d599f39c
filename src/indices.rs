// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use cranelift_entity::entity_impl;

use crate::types::EntityKind;

/// Index of a function within a module's function table, defined or imported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FuncIndex(u32);
entity_impl!(FuncIndex);

/// Index of a table within a module's table table, defined or imported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TableIndex(u32);
entity_impl!(TableIndex);

/// Index of a linear memory within a module's memory table, defined or
/// imported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MemoryIndex(u32);
entity_impl!(MemoryIndex);

/// Index of a global within a module's global table, defined or imported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GlobalIndex(u32);
entity_impl!(GlobalIndex);

/// Index of a canonicalized function signature within an engine's type
/// registry.
///
/// Within one engine, two signatures are equal if and only if their
/// `VMSharedTypeIndex`es are equal, so a signature comparison is one integer
/// comparison. This is the property indirect-call type checks rely on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VMSharedTypeIndex(u32);
entity_impl!(VMSharedTypeIndex);

/// An index of an entity in a module, tagged with the entity's kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityIndex {
    Func(FuncIndex),
    Table(TableIndex),
    Memory(MemoryIndex),
    Global(GlobalIndex),
}

impl EntityIndex {
    /// Returns the kind of entity this index refers to.
    pub fn kind(&self) -> EntityKind {
        match self {
            EntityIndex::Func(_) => EntityKind::Func,
            EntityIndex::Table(_) => EntityKind::Table,
            EntityIndex::Memory(_) => EntityKind::Memory,
            EntityIndex::Global(_) => EntityKind::Global,
        }
    }
}

impl From<FuncIndex> for EntityIndex {
    fn from(index: FuncIndex) -> Self {
        EntityIndex::Func(index)
    }
}

impl From<TableIndex> for EntityIndex {
    fn from(index: TableIndex) -> Self {
        EntityIndex::Table(index)
    }
}

impl From<MemoryIndex> for EntityIndex {
    fn from(index: MemoryIndex) -> Self {
        EntityIndex::Memory(index)
    }
}

impl From<GlobalIndex> for EntityIndex {
    fn from(index: GlobalIndex) -> Self {
        EntityIndex::Global(index)
    }
}
