//! The merge session.
//!
//! # Architecture
//!
//! [`DexMerger`] drives the whole pipeline: each `add_file` call ingests one
//! input's constant tables into the [`crate::pool::GlobalPool`] (eagerly,
//! with overflow rollback), then walks the file's classes in file order and
//! builds one [`MergedClassDefinition`] per class with every embedded
//! reference remapped. The single `finish` call consumes the merger,
//! assigns final constant orderings, serializes the output, and validates
//! the result.
//!
//! The two-phase lifecycle is enforced by the type system rather than a
//! runtime flag: `finish(self)` takes the merger by value, so adding a file
//! to a finished session is a compile error, not an assertion.

pub mod class;
pub mod code;

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, info};

pub use class::{ClassAnnotations, FieldDef, MergedClassDefinition, MethodDef};
pub use code::{CatchHandler, CodeItem, DebugEvent, DebugInfo, Instruction, TryBlock};

use crate::constant::DexType;
use crate::file::{DexFile, DexVersion};
use crate::pool::{GlobalPool, Resolver};
use crate::Result;

/// Options for one merge session.
#[derive(Debug, Clone)]
pub struct MergeOptions {
    /// Verify each input's adler32 checksum before ingesting it.
    pub verify_checksums: bool,
    /// Verify each input's SHA-1 signature before ingesting it.
    pub verify_signatures: bool,
    /// Force the output format version. `None` emits the maximum of the
    /// input versions. Forcing a version below what a merged feature
    /// requires (method handles or call sites need 038) is an error.
    pub output_version: Option<DexVersion>,
}

impl Default for MergeOptions {
    fn default() -> Self {
        MergeOptions {
            verify_checksums: true,
            verify_signatures: false,
            output_version: None,
        }
    }
}

/// Merges any number of input files into one output file.
///
/// # Lifecycle
///
/// `add_file` any number of times, then `finish` exactly once; the merger
/// is consumed by `finish`, so a finished session cannot be reused. A file
/// rejected for index-space overflow leaves the pool exactly as it was
/// before the call, so the caller can continue with the remaining inputs.
/// A file rejected as malformed poisons only itself when it fails during
/// table ingestion; a malformation discovered later, while its classes are
/// being merged, leaves the session half-updated and the session should be
/// abandoned.
///
/// # Examples
///
/// ```rust,no_run
/// use dexmerge::{DexFile, DexMerger, Error, MergeOptions};
///
/// let mut merger = DexMerger::new(MergeOptions::default());
/// for path in ["classes.dex", "classes2.dex"] {
///     let file = DexFile::from_file(std::path::Path::new(path))?;
///     match merger.add_file(&file) {
///         Ok(()) => {}
///         Err(Error::MethodIdOverflow(_)) => {
///             // route this input to the next output unit
///         }
///         Err(e) => return Err(e),
///     }
/// }
/// let merged = merger.finish()?;
/// # Ok::<(), dexmerge::Error>(())
/// ```
pub struct DexMerger {
    options: MergeOptions,
    pool: GlobalPool,
    classes: Vec<MergedClassDefinition>,
    defined_types: BTreeSet<Arc<DexType>>,
    input_version: DexVersion,
}

impl DexMerger {
    /// Create an empty merge session.
    #[must_use]
    pub fn new(options: MergeOptions) -> Self {
        DexMerger {
            options,
            pool: GlobalPool::new(),
            classes: Vec::new(),
            defined_types: BTreeSet::new(),
            input_version: DexVersion::V035,
        }
    }

    /// The session's constant pool.
    #[must_use]
    pub fn pool(&self) -> &GlobalPool {
        &self.pool
    }

    /// The classes merged so far, in arrival order.
    #[must_use]
    pub fn classes(&self) -> &[MergedClassDefinition] {
        &self.classes
    }

    /// Merge one input file into the session.
    ///
    /// Ingests the file's constant tables (see
    /// [`crate::pool::GlobalPool::add_file`]) and then merges its classes in
    /// file order.
    ///
    /// # Errors
    /// Returns format errors for malformed input and overflow errors when
    /// the file would exhaust a 16-bit index space; in the overflow case the
    /// pool is guaranteed to hold no residue of the rejected file.
    pub fn add_file(&mut self, file: &DexFile) -> Result<()> {
        if self.options.verify_checksums {
            file.verify_checksum()?;
        }
        if self.options.verify_signatures {
            file.verify_signature()?;
        }

        let mut map = self.pool.add_file(file)?;
        self.input_version = self.input_version.max(file.version());

        debug!(classes = file.class_defs_size(), "merging classes");
        let mut resolver = Resolver::new(file, &mut self.pool, &mut map);

        for class_index in 0..file.class_defs_size() {
            let def = file.class_def_at(class_index)?;
            let merged = MergedClassDefinition::from_file(&mut resolver, &def)?;

            if !self.defined_types.insert(merged.ty.clone()) {
                return Err(malformed_error!(
                    "Class {} is defined by more than one input file",
                    merged.ty
                ));
            }
            self.classes.push(merged);
        }

        Ok(())
    }

    /// Close the session: assign final constant orderings, serialize the
    /// merged model, and validate the output against the pool.
    ///
    /// Consumes the merger; a finished session cannot be mutated again.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] only for an impossible forced
    /// output version; serialization inconsistencies are engine bugs and
    /// panic via the post-merge validation.
    pub fn finish(self) -> Result<Vec<u8>> {
        let needs_invoke_custom =
            self.pool.method_handle_count() > 0 || self.pool.call_site_count() > 0;

        let version = match self.options.output_version {
            Some(forced) => {
                if needs_invoke_custom && !forced.supports_invoke_custom() {
                    return Err(malformed_error!(
                        "Forced output version {:?} cannot carry method handles or call sites",
                        forced
                    ));
                }
                forced
            }
            None if needs_invoke_custom => self.input_version.max(DexVersion::V038),
            None => self.input_version,
        };

        info!(
            classes = self.classes.len(),
            strings = self.pool.string_count(),
            types = self.pool.type_count(),
            fields = self.pool.field_count(),
            methods = self.pool.method_count(),
            ?version,
            "serializing merged output"
        );

        crate::write::serialize(&self.pool, &self.classes, version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options() {
        let options = MergeOptions::default();
        assert!(options.verify_checksums);
        assert!(!options.verify_signatures);
        assert!(options.output_version.is_none());
    }

    #[test]
    fn empty_merge_produces_parseable_output() {
        let merger = DexMerger::new(MergeOptions::default());
        let bytes = merger.finish().unwrap();

        let reparsed = crate::DexFile::parse(bytes).unwrap();
        assert_eq!(reparsed.class_defs_size(), 0);
        assert_eq!(reparsed.string_ids_size(), 0);
        reparsed.verify_checksum().unwrap();
        reparsed.verify_signature().unwrap();
    }
}
