// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::fmt;

use smallvec::SmallVec;

use crate::indices::VMSharedTypeIndex;
use crate::pages::Pages;

/// A WebAssembly value type.
///
/// The funcref variant optionally carries the canonicalized signature of a
/// typed function reference; `None` is the untyped `funcref` type. Because
/// signatures are canonicalized per engine, derived equality on `ValType` is
/// exact type equality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValType {
    /// The WebAssembly `i32` type.
    I32,
    /// The WebAssembly `i64` type.
    I64,
    /// The WebAssembly `f32` type.
    F32,
    /// The WebAssembly `f64` type.
    F64,
    /// A WebAssembly function reference, optionally typed with a
    /// canonicalized signature.
    FuncRef(Option<VMSharedTypeIndex>),
}

impl ValType {
    /// Whether a value of type `src` can be assigned to a slot of type
    /// `dest`.
    ///
    /// Primitive tags must match exactly. An untyped funcref destination
    /// accepts any funcref source; a typed funcref destination requires the
    /// identical canonical signature.
    pub fn matches(dest: ValType, src: ValType) -> bool {
        match dest {
            ValType::I32 => src == ValType::I32,
            ValType::I64 => src == ValType::I64,
            ValType::F32 => src == ValType::F32,
            ValType::F64 => src == ValType::F64,
            ValType::FuncRef(dest_sig) => match src {
                ValType::FuncRef(src_sig) => dest_sig.is_none() || src_sig == dest_sig,
                _ => false,
            },
        }
    }
}

impl fmt::Display for ValType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValType::I32 => f.write_str("i32"),
            ValType::I64 => f.write_str("i64"),
            ValType::F32 => f.write_str("f32"),
            ValType::F64 => f.write_str("f64"),
            ValType::FuncRef(_) => f.write_str("funcref"),
        }
    }
}

/// A Rust scalar corresponding to a primitive WebAssembly value type.
///
/// The typed linear-memory accessors are bounded by this trait: it covers
/// exactly the scalars WebAssembly can move to or from memory in a single
/// instruction (i32, i64, f32, f64), with the unsigned integer aliases
/// mapping to the same value types as their signed counterparts.
pub trait WasmTy: sealed::Sealed + Copy {
    /// The WebAssembly type this Rust type maps to.
    const VAL_TYPE: ValType;
}

mod sealed {
    pub trait Sealed {}
}

macro_rules! impl_wasm_ty {
    ($($ty:ty => $val_type:expr),* $(,)?) => {
        $(
            impl sealed::Sealed for $ty {}
            impl WasmTy for $ty {
                const VAL_TYPE: ValType = $val_type;
            }
        )*
    };
}
impl_wasm_ty! {
    i32 => ValType::I32,
    u32 => ValType::I32,
    i64 => ValType::I64,
    u64 => ValType::I64,
    f32 => ValType::F32,
    f64 => ValType::F64,
}

/// The signature of a WebAssembly function: parameter types and result
/// types, both in textual-format order.
///
/// A `FuncType` is a plain description. Interning it through an engine's
/// type registry yields a [`VMSharedTypeIndex`] under which equal signatures
/// compare identical by index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct FuncType {
    params: SmallVec<[ValType; 4]>,
    results: SmallVec<[ValType; 2]>,
}

impl FuncType {
    pub fn new(
        params: impl IntoIterator<Item = ValType>,
        results: impl IntoIterator<Item = ValType>,
    ) -> FuncType {
        FuncType {
            params: params.into_iter().collect(),
            results: results.into_iter().collect(),
        }
    }

    #[inline]
    pub fn params(&self) -> &[ValType] {
        &self.params
    }

    #[inline]
    pub fn results(&self) -> &[ValType] {
        &self.results
    }
}

impl fmt::Display for FuncType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (i, param) in self.params.iter().enumerate() {
            if i != 0 {
                f.write_str(", ")?;
            }
            write!(f, "{param}")?;
        }
        f.write_str(") -> (")?;
        for (i, result) in self.results.iter().enumerate() {
            if i != 0 {
                f.write_str(", ")?;
            }
            write!(f, "{result}")?;
        }
        f.write_str(")")
    }
}

/// The kind of entity an import or export refers to.
///
/// Only `Func` and `Memory` are resolved by this crate; `Table` and `Global`
/// imports are rejected as invariant violations during instantiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Func,
    Table,
    Memory,
    Global,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Func => f.write_str("function"),
            EntityKind::Table => f.write_str("table"),
            EntityKind::Memory => f.write_str("memory"),
            EntityKind::Global => f.write_str("global"),
        }
    }
}

/// The declared shape of a linear memory.
///
/// For a defined memory these are its construction parameters; for an
/// imported memory they are the requirements the supplied memory must
/// satisfy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemoryType {
    /// Whether this linear memory may be shared between agents.
    pub shared: bool,
    /// The initial size, in pages.
    pub initial: Pages,
    /// The maximum capacity, in pages. [`Pages::UNLIMITED`] is permitted
    /// only for unshared memories.
    pub maximum: Pages,
}

impl MemoryType {
    pub fn unshared(initial: Pages, maximum: Pages) -> MemoryType {
        MemoryType {
            shared: false,
            initial,
            maximum,
        }
    }

    pub fn shared(initial: Pages, maximum: Pages) -> MemoryType {
        MemoryType {
            shared: true,
            initial,
            maximum,
        }
    }
}
