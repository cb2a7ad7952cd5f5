//! # dexmerge Prelude
//!
//! This module provides a convenient prelude for the most commonly used
//! types and traits of the library. Import it to get quick access to the
//! essentials of parsing and merging dex containers.
//!
//! # Examples
//!
//! ```rust,no_run
//! use dexmerge::prelude::*;
//!
//! let dex = DexFile::from_file(std::path::Path::new("classes.dex"))?;
//! let mut merger = DexMerger::new(MergeOptions::default());
//! merger.add_file(&dex)?;
//! let out = merger.finish()?;
//! # Ok::<(), dexmerge::Error>(())
//! ```

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all dexmerge operations
pub use crate::Error;

/// The result type used throughout dexmerge
pub use crate::Result;

// ================================================================================================
// Main Entry Points
// ================================================================================================

/// Parsed, fully-buffered input container
pub use crate::file::DexFile;

/// The merge session and its options
pub use crate::merge::{DexMerger, MergeOptions};

/// Low-level binary cursor
pub use crate::file::Parser;

/// Container directory types
pub use crate::file::{DexVersion, Header, Section, Toc};

// ================================================================================================
// Constant Model
// ================================================================================================

/// The interned constant kinds and their supporting types
pub use crate::constant::{
    AccessFlags, CallSite, DexString, DexType, FieldRef, MemberRef, MethodHandle,
    MethodHandleKind, MethodRef, Proto,
};

/// The tagged encoded-value representation
pub use crate::value::{AnnotationItem, EncodedAnnotation, EncodedValue};

// ================================================================================================
// Pooling and Remapping
// ================================================================================================

/// Cross-file constant accumulation
pub use crate::pool::{GlobalPool, IndexMap, Resolver};

/// The merged output model
pub use crate::merge::{MergedClassDefinition, MethodDef};
