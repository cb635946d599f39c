// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::fmt;

use crate::module::Import;
use crate::pages::Pages;
use crate::types::EntityKind;

/// An error linking one import of a WebAssembly module.
///
/// Link errors are the recoverable failure mode of instantiation: they
/// report the first import, in declaration order, that could not be
/// satisfied by the import environment, and why. They travel inside the
/// crate's [`Result`](crate::Result) and can be recovered with
/// `anyhow::Error::downcast_ref::<LinkError>()`.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkError {
    import: Import,
    kind: LinkErrorKind,
}

/// The reason an import could not be satisfied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkErrorKind {
    /// The import environment has no matching export.
    NotFound,
    /// The name resolved to an export of a different kind.
    WrongExportKind {
        expected: EntityKind,
        found: EntityKind,
    },
    /// The supplied function's canonical signature differs from the
    /// declared import signature.
    SignatureMismatch,
    /// The supplied memory's shared flag disagrees with the declared
    /// import.
    MemorySharingMismatch { supplied_shared: bool },
    /// The supplied memory's initial size is below the declared minimum.
    MemoryTooSmall { supplied: Pages, required: Pages },
    /// The supplied memory's maximum capacity exceeds the declared maximum
    /// (an unlimited supplier never satisfies a finite bound).
    MemoryMaxTooLarge { supplied: Pages, required: Pages },
}

// ===== impl LinkError =====

impl LinkError {
    pub fn new(import: Import, kind: LinkErrorKind) -> LinkError {
        LinkError { import, kind }
    }

    pub fn not_found(import: Import) -> LinkError {
        LinkError::new(import, LinkErrorKind::NotFound)
    }

    /// The import descriptor that could not be satisfied.
    pub fn import(&self) -> &Import {
        &self.import
    }

    /// Why the import could not be satisfied.
    pub fn kind(&self) -> &LinkErrorKind {
        &self.kind
    }
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Import { module, name, .. } = &self.import;
        let kind = self.import.index.kind();
        match &self.kind {
            LinkErrorKind::NotFound => {
                write!(f, "imported {kind} `{module}.{name}` not found")
            }
            LinkErrorKind::WrongExportKind { expected, found } => {
                write!(
                    f,
                    "import `{module}.{name}` has wrong type: expected {expected}, found {found}"
                )
            }
            LinkErrorKind::SignatureMismatch => {
                write!(f, "imported function `{module}.{name}` has wrong signature")
            }
            LinkErrorKind::MemorySharingMismatch { supplied_shared } => {
                if *supplied_shared {
                    write!(
                        f,
                        "imported memory `{module}.{name}` is shared, but was imported as unshared"
                    )
                } else {
                    write!(
                        f,
                        "imported memory `{module}.{name}` is unshared, but was imported as shared"
                    )
                }
            }
            LinkErrorKind::MemoryTooSmall { supplied, required } => {
                write!(
                    f,
                    "imported memory `{module}.{name}` is smaller than the import's minimum size \
                     ({supplied} pages < {required} pages)"
                )
            }
            LinkErrorKind::MemoryMaxTooLarge { supplied, required } => {
                write!(
                    f,
                    "imported memory `{module}.{name}` has a larger max size than the import's \
                     maximum size ({supplied} pages > {required} pages)"
                )
            }
        }
    }
}

impl std::error::Error for LinkError {}
