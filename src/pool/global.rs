//! The merge session's deduplicated superset of constants.
//!
//! [`GlobalPool`] accumulates every constant contributed by the input files
//! into one ordered, deduplicating set per kind. Insertion order is
//! irrelevant: the sets are ordered by the structural `Ord` of the constant
//! types, which is exactly the output table sort order, so finalization is a
//! plain in-order walk.
//!
//! Ingestion of a file is journaled. If the file pushes the distinct field,
//! method or type count past the format's 16-bit index ceiling, every
//! constant that file newly contributed is removed again before the
//! overflow error returns; the caller can keep using the pool and route
//! the offending file elsewhere.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::debug;

use crate::constant::{CallSite, DexString, DexType, FieldRef, MethodHandle, MethodRef, Proto};
use crate::file::{DexFile, Header, Toc};
use crate::pool::{IndexMap, Resolver};
use crate::Result;

/// Hard ceiling on distinct field ids: the width of a 16-bit index.
pub const MAX_FIELD_IDS: usize = 0x10000;

/// Hard ceiling on distinct method ids: the width of a 16-bit index.
pub const MAX_METHOD_IDS: usize = 0x10000;

/// Hard ceiling on distinct type ids. Types are referenced through 16-bit
/// indices in field/method id records and instruction operands, so the
/// ceiling matches the member tables even though the type table itself
/// declares a u32 count.
pub const MAX_TYPE_IDS: usize = 0x10000;

/// Constants newly contributed by the file currently being ingested,
/// recorded for exact rollback.
#[derive(Debug, Default)]
struct Journal {
    strings: Vec<Arc<DexString>>,
    types: Vec<Arc<DexType>>,
    protos: Vec<Arc<Proto>>,
    fields: Vec<Arc<FieldRef>>,
    methods: Vec<Arc<MethodRef>>,
    method_handles: Vec<Arc<MethodHandle>>,
    call_sites: Vec<Arc<CallSite>>,
}

impl Journal {
    fn clear(&mut self) {
        self.strings.clear();
        self.types.clear();
        self.protos.clear();
        self.fields.clear();
        self.methods.clear();
        self.method_handles.clear();
        self.call_sites.clear();
    }
}

/// Accumulates, deduplicates and bounds-checks constants across all input
/// files of one merge session.
///
/// # Examples
///
/// ```rust,no_run
/// use dexmerge::{DexFile, GlobalPool};
///
/// let file = DexFile::from_file(std::path::Path::new("classes.dex"))?;
/// let mut pool = GlobalPool::new();
/// let map = pool.add_file(&file)?;
///
/// // Every declared entry is now represented
/// assert_eq!(map.used_strings().len() as u32, file.string_ids_size());
/// # Ok::<(), dexmerge::Error>(())
/// ```
#[derive(Debug, Default)]
pub struct GlobalPool {
    strings: BTreeSet<Arc<DexString>>,
    types: BTreeSet<Arc<DexType>>,
    protos: BTreeSet<Arc<Proto>>,
    fields: BTreeSet<Arc<FieldRef>>,
    methods: BTreeSet<Arc<MethodRef>>,
    method_handles: BTreeSet<Arc<MethodHandle>>,
    call_sites: BTreeSet<Arc<CallSite>>,
    journal: Journal,
}

macro_rules! intern_fn {
    ($name:ident, $set:ident, $ty:ty) => {
        pub(crate) fn $name(&mut self, value: $ty) -> Arc<$ty> {
            if let Some(existing) = self.$set.get(&value) {
                return existing.clone();
            }
            let value = Arc::new(value);
            self.$set.insert(value.clone());
            self.journal.$set.push(value.clone());
            value
        }
    };
}

impl GlobalPool {
    /// Create an empty pool.
    #[must_use]
    pub fn new() -> Self {
        GlobalPool::default()
    }

    intern_fn!(intern_string, strings, DexString);
    intern_fn!(intern_type, types, DexType);
    intern_fn!(intern_proto, protos, Proto);
    intern_fn!(intern_field, fields, FieldRef);
    intern_fn!(intern_method, methods, MethodRef);
    intern_fn!(intern_method_handle, method_handles, MethodHandle);
    intern_fn!(intern_call_site, call_sites, CallSite);

    /// Ingest one input file: every string, type, field and method id table
    /// entry is eagerly resolved and interned (prototypes arrive as method
    /// dependencies), and the returned [`IndexMap`] translates the file's
    /// local indices to the canonical constants.
    ///
    /// Eager enumeration is deliberate: every declared entry must be
    /// represented in the merge regardless of whether any class uses it.
    ///
    /// # Errors
    /// Returns a format error for malformed tables, or one of the overflow
    /// errors when the cumulative distinct count of fields, methods or types
    /// exceeds its 16-bit ceiling. In both cases every constant this file
    /// newly contributed has been removed again; no partial state survives.
    pub fn add_file(&mut self, file: &DexFile) -> Result<IndexMap> {
        debug!(
            strings = file.string_ids_size(),
            types = file.type_ids_size(),
            fields = file.field_ids_size(),
            methods = file.method_ids_size(),
            "ingesting file tables"
        );

        self.journal.clear();
        let mut map = IndexMap::new(file.toc());

        if let Err(error) = self.ingest(file, &mut map) {
            self.rollback();
            return Err(error);
        }

        if self.fields.len() > MAX_FIELD_IDS {
            let total = self.fields.len();
            self.rollback();
            return Err(crate::Error::FieldIdOverflow(total));
        }
        if self.methods.len() > MAX_METHOD_IDS {
            let total = self.methods.len();
            self.rollback();
            return Err(crate::Error::MethodIdOverflow(total));
        }
        if self.types.len() > MAX_TYPE_IDS {
            let total = self.types.len();
            self.rollback();
            return Err(crate::Error::TypeIdOverflow(total));
        }

        Ok(map)
    }

    fn ingest(&mut self, file: &DexFile, map: &mut IndexMap) -> Result<()> {
        let mut resolver = Resolver::new(file, self, map);

        for index in 0..file.string_ids_size() {
            resolver.string(index)?;
        }
        for index in 0..file.type_ids_size() {
            resolver.ty(index)?;
        }
        for index in 0..file.field_ids_size() {
            resolver.field(index)?;
        }
        for index in 0..file.method_ids_size() {
            resolver.method(index)?;
        }

        Ok(())
    }

    fn rollback(&mut self) {
        debug!(
            strings = self.journal.strings.len(),
            types = self.journal.types.len(),
            fields = self.journal.fields.len(),
            methods = self.journal.methods.len(),
            "rolling back file contribution"
        );

        for value in self.journal.strings.drain(..) {
            self.strings.remove(&value);
        }
        for value in self.journal.types.drain(..) {
            self.types.remove(&value);
        }
        for value in self.journal.protos.drain(..) {
            self.protos.remove(&value);
        }
        for value in self.journal.fields.drain(..) {
            self.fields.remove(&value);
        }
        for value in self.journal.methods.drain(..) {
            self.methods.remove(&value);
        }
        for value in self.journal.method_handles.drain(..) {
            self.method_handles.remove(&value);
        }
        for value in self.journal.call_sites.drain(..) {
            self.call_sites.remove(&value);
        }
    }

    /// Number of distinct strings.
    #[must_use]
    pub fn string_count(&self) -> usize {
        self.strings.len()
    }

    /// Number of distinct types.
    #[must_use]
    pub fn type_count(&self) -> usize {
        self.types.len()
    }

    /// Number of distinct prototypes.
    #[must_use]
    pub fn proto_count(&self) -> usize {
        self.protos.len()
    }

    /// Number of distinct field references.
    #[must_use]
    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    /// Number of distinct method references.
    #[must_use]
    pub fn method_count(&self) -> usize {
        self.methods.len()
    }

    /// Number of distinct method handles.
    #[must_use]
    pub fn method_handle_count(&self) -> usize {
        self.method_handles.len()
    }

    /// Number of distinct call sites.
    #[must_use]
    pub fn call_site_count(&self) -> usize {
        self.call_sites.len()
    }

    /// Strings in final table order.
    pub fn strings(&self) -> impl Iterator<Item = &Arc<DexString>> {
        self.strings.iter()
    }

    /// Types in final table order.
    pub fn types(&self) -> impl Iterator<Item = &Arc<DexType>> {
        self.types.iter()
    }

    /// Prototypes in final table order.
    pub fn protos(&self) -> impl Iterator<Item = &Arc<Proto>> {
        self.protos.iter()
    }

    /// Field references in final table order.
    pub fn fields(&self) -> impl Iterator<Item = &Arc<FieldRef>> {
        self.fields.iter()
    }

    /// Method references in final table order.
    pub fn methods(&self) -> impl Iterator<Item = &Arc<MethodRef>> {
        self.methods.iter()
    }

    /// Method handles in final table order.
    pub fn method_handles(&self) -> impl Iterator<Item = &Arc<MethodHandle>> {
        self.method_handles.iter()
    }

    /// Call sites in final table order.
    pub fn call_sites(&self) -> impl Iterator<Item = &Arc<CallSite>> {
        self.call_sites.iter()
    }

    /// Post-merge invariant: each pool's final size must equal the table
    /// size physically present in the serialized output.
    ///
    /// # Panics
    /// Panics on any mismatch: a constant was lost or duplicated during
    /// serialization, which is an engine bug.
    pub fn validate(&self, header: &Header, toc: &Toc) {
        assert_eq!(
            self.strings.len(),
            header.string_ids.size as usize,
            "string pool and output string table disagree"
        );
        assert_eq!(
            self.types.len(),
            header.type_ids.size as usize,
            "type pool and output type table disagree"
        );
        assert_eq!(
            self.protos.len(),
            header.proto_ids.size as usize,
            "proto pool and output proto table disagree"
        );
        assert_eq!(
            self.fields.len(),
            header.field_ids.size as usize,
            "field pool and output field table disagree"
        );
        assert_eq!(
            self.methods.len(),
            header.method_ids.size as usize,
            "method pool and output method table disagree"
        );
        assert_eq!(
            self.method_handles.len(),
            toc.method_handles_size() as usize,
            "method handle pool and output section disagree"
        );
        assert_eq!(
            self.call_sites.len(),
            toc.call_sites_size() as usize,
            "call site pool and output section disagree"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_deduplicates() {
        let mut pool = GlobalPool::new();
        let a = pool.intern_string(DexString::new("LA;"));
        let b = pool.intern_string(DexString::new("LA;"));

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(pool.string_count(), 1);
    }

    #[test]
    fn journal_rollback_removes_new_entries_only() {
        let mut pool = GlobalPool::new();
        let kept = pool.intern_string(DexString::new("kept"));

        pool.journal.clear();
        pool.intern_string(DexString::new("doomed"));
        // Re-interning an existing constant must not journal it
        pool.intern_string(DexString::new("kept"));
        pool.rollback();

        assert_eq!(pool.string_count(), 1);
        assert!(Arc::ptr_eq(pool.strings().next().unwrap(), &kept));
    }

    #[test]
    fn sets_iterate_in_sorted_order() {
        let mut pool = GlobalPool::new();
        pool.intern_string(DexString::new("b"));
        pool.intern_string(DexString::new("a"));
        pool.intern_string(DexString::new("c"));

        let order: Vec<String> = pool.strings().map(|s| s.to_string_lossy()).collect();
        assert_eq!(order, ["a", "b", "c"]);
    }
}
