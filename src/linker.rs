// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::sync::Arc;

use hashbrown::HashMap;

use crate::errors::LinkError;
use crate::func::LinkedFunc;
use crate::memory::Memory;
use crate::module::Import;

/// An object whose exports can be imported by a WebAssembly module.
///
/// Both fully instantiated modules and host-provided shims implement this;
/// lookups match an import's `name` against the implementor's exports. A
/// miss is `Ok(None)`; a name that resolves to an export of the wrong kind
/// is a [`LinkError`].
pub trait ImportModule {
    /// Finds the function matching `import`, or `None`.
    fn find_func(&self, import: &Import) -> Result<Option<Arc<LinkedFunc>>, LinkError>;

    /// Finds the linear memory matching `import`, or `None`.
    fn find_memory(&self, import: &Import) -> Result<Option<Arc<Memory>>, LinkError>;
}

/// A module importable under one name but assembled from several others.
///
/// Lookups search the combined modules in order; the first that returns an
/// export wins.
pub struct MultiModule<'a> {
    modules: Vec<&'a dyn ImportModule>,
}

/// The set of modules presented to a module at link time.
///
/// Imports are resolved against this environment by
/// `(module name, export name, kind)`: the import's `module` field selects
/// an entry of the name map, which is then searched for the named export.
#[derive(Default)]
pub struct ImportEnvironment<'a> {
    modules: HashMap<String, &'a dyn ImportModule>,
}

// ===== impl MultiModule =====

impl<'a> MultiModule<'a> {
    pub fn new(modules: Vec<&'a dyn ImportModule>) -> MultiModule<'a> {
        MultiModule { modules }
    }
}

impl ImportModule for MultiModule<'_> {
    fn find_func(&self, import: &Import) -> Result<Option<Arc<LinkedFunc>>, LinkError> {
        for module in &self.modules {
            if let Some(func) = module.find_func(import)? {
                return Ok(Some(func));
            }
        }
        Ok(None)
    }

    fn find_memory(&self, import: &Import) -> Result<Option<Arc<Memory>>, LinkError> {
        for module in &self.modules {
            if let Some(memory) = module.find_memory(import)? {
                return Ok(Some(memory));
            }
        }
        Ok(None)
    }
}

// ===== impl ImportEnvironment =====

impl<'a> ImportEnvironment<'a> {
    pub fn new() -> ImportEnvironment<'a> {
        ImportEnvironment {
            modules: HashMap::new(),
        }
    }

    /// Makes `module` visible in this environment under `name`.
    ///
    /// An existing module of the same name is replaced. To combine several
    /// modules under one name, use [`MultiModule`].
    pub fn define(&mut self, name: impl Into<String>, module: &'a dyn ImportModule) -> &mut Self {
        self.modules.insert(name.into(), module);
        self
    }

    /// Finds the module matching an import's `module` field, or `None`.
    pub fn find_module(&self, import: &Import) -> Option<&'a dyn ImportModule> {
        self.modules.get(&import.module).copied()
    }

    /// Finds the function matching `import`, or `None`.
    pub fn find_func(&self, import: &Import) -> Result<Option<Arc<LinkedFunc>>, LinkError> {
        match self.find_module(import) {
            Some(module) => module.find_func(import),
            None => Ok(None),
        }
    }

    /// Finds the linear memory matching `import`, or `None`.
    pub fn find_memory(&self, import: &Import) -> Result<Option<Arc<Memory>>, LinkError> {
        match self.find_module(import) {
            Some(module) => module.find_memory(import),
            None => Ok(None),
        }
    }
}
