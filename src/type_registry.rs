// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::sync::{Arc, Mutex};

use cranelift_entity::PrimaryMap;
use hashbrown::HashMap;

use crate::indices::VMSharedTypeIndex;
use crate::types::FuncType;
use crate::utils::vm_assert;

/// A registry of canonicalized function signatures.
///
/// Within one engine, [`intern`](TypeRegistry::intern) maps equal signatures
/// to the same [`VMSharedTypeIndex`] forever, so callers can compare
/// signatures by index instead of element-wise. The registry only grows;
/// entries live as long as the engine that owns it.
#[derive(Debug)]
pub struct TypeRegistry {
    inner: Mutex<TypeRegistryInner>,
}

#[derive(Debug, Default)]
struct TypeRegistryInner {
    types: PrimaryMap<VMSharedTypeIndex, Arc<FuncType>>,
    map: HashMap<Arc<FuncType>, VMSharedTypeIndex>,
}

// ===== impl TypeRegistry =====

impl TypeRegistry {
    pub fn new() -> TypeRegistry {
        TypeRegistry {
            inner: Mutex::new(TypeRegistryInner::default()),
        }
    }

    /// Canonicalizes a function signature, returning its shared index.
    ///
    /// A second call with an equal signature returns the same index.
    /// Interning never fails other than by allocation exhaustion.
    pub fn intern(&self, ty: FuncType) -> VMSharedTypeIndex {
        let mut inner = self.inner.lock().unwrap();
        if let Some(&index) = inner.map.get(&ty) {
            return index;
        }

        let ty = Arc::new(ty);
        let index = inner.types.push(ty.clone());
        inner.map.insert(ty, index);
        tracing::trace!("interned function signature {index:?}");
        index
    }

    /// Looks up the canonical signature for a previously interned index.
    pub fn lookup(&self, index: VMSharedTypeIndex) -> Arc<FuncType> {
        let inner = self.inner.lock().unwrap();
        let ty = inner.types.get(index);
        vm_assert!(ty.is_some(), "type index {index:?} is not registered");
        ty.unwrap().clone()
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}
