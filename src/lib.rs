// Copyright 2026 the dexmerge contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![allow(dead_code)]

//! # dexmerge
//!
//! A constant-pool merging and binary re-encoding engine for DEX class
//! containers. `dexmerge` parses independently-compiled dex files, deduplicates
//! their cross-referenced constants (strings, types, field/method/prototype
//! references, method handles, call sites), remaps every embedded reference
//! into a single global numbering, and re-serializes one consistent output
//! file, the final linking stage of a dex build pipeline.
//!
//! ## Features
//!
//! - **Full container parsing** - header, id tables, class data, code items,
//!   try/catch tables, debug info, annotations, encoded values
//! - **Cross-file deduplication** - structural interning of every constant
//!   kind across arbitrarily many inputs
//! - **Overflow detection with clean rollback** - the 16-bit field/method/type
//!   index ceilings are enforced per merged file; a rejected file leaves no
//!   residual pool state, so the caller can re-plan output splitting
//! - **Bit-exact re-encoding** - minimal-width encoded values, MUTF-8 string
//!   payloads preserved verbatim, SHA-1 signature and adler32 checksum
//!   recomputed on write
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use dexmerge::{DexFile, DexMerger, MergeOptions};
//! use std::path::Path;
//!
//! let a = DexFile::from_file(Path::new("classes.dex"))?;
//! let b = DexFile::from_file(Path::new("classes2.dex"))?;
//!
//! let mut merger = DexMerger::new(MergeOptions::default());
//! merger.add_file(&a)?;
//! merger.add_file(&b)?;
//!
//! let merged: Vec<u8> = merger.finish()?;
//! std::fs::write("classes-merged.dex", merged)?;
//! # Ok::<(), dexmerge::Error>(())
//! ```
//!
//! ## Error Handling
//!
//! Malformed inputs surface as [`Error::Malformed`]/[`Error::OutOfBounds`] and
//! are fatal to the offending file. Index-space exhaustion surfaces as one of
//! the overflow variants ([`Error::MethodIdOverflow`] and friends) and is
//! recoverable: the pool guarantees no partial state survives the rejected
//! file. Violations of engine-internal invariants panic; they indicate a bug
//! in this crate, not bad input.
//!
//! ## Scope
//!
//! This engine does not interpret bytecode semantics, does not optimize, and
//! does not decide how to split oversized inputs across multiple outputs; it
//! detects the overflow condition and reports it to the orchestrating
//! toolchain.

#[macro_use]
pub(crate) mod error;

/// Binary input layer: byte-level IO, the positioned [`Parser`] cursor, the
/// MUTF-8 codec, and the fully-buffered [`DexFile`] container with its table
/// of contents and composite record readers.
pub mod file;

/// The immutable constant model: strings, types, prototypes, member
/// references, method handles, call sites, and their structural ordering,
/// which doubles as the final index-assignment order.
pub mod constant;

/// The tagged encoded-value representation used by annotations, static
/// initializers, and call-site argument arrays, with its minimal-width
/// decoder and encoder.
pub mod value;

/// Constant accumulation: the per-file [`IndexMap`], the lazy resolver that
/// materializes constants from file tables, and the deduplicating
/// [`GlobalPool`] with overflow rollback.
pub mod pool;

/// The merge session: walks input classes, remaps every embedded reference
/// through the per-file index maps, and assembles the in-memory merged model.
pub mod merge;

/// Output serialization: final index assignment, section layout, map list,
/// and checksum/signature patching.
pub mod write;

/// `dexmerge` Result type
///
/// A type alias for [`std::result::Result<T, Error>`] where the error type is
/// always [`Error`]. This is used consistently throughout the crate for all
/// fallible operations.
pub type Result<T> = std::result::Result<T, Error>;

/// `dexmerge` Error type
///
/// The main error type for all operations in this crate. See [`error`] module
/// documentation for the recovery contract of each variant.
pub use error::Error;

/// Fully-buffered, parsed dex input container.
///
/// See [`file::DexFile`] for parsing and section access.
pub use file::{DexFile, DexVersion, Parser};

/// The merge session and its options.
///
/// See [`merge::DexMerger`] for the `add_file* -> finish` lifecycle.
pub use merge::{DexMerger, MergeOptions};

/// Constant pooling types.
pub use pool::{GlobalPool, IndexMap};

/// Convenient re-exports of the most commonly used types and traits.
pub mod prelude;
