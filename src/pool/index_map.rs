//! Per-file translation of local indices to canonical constants.
//!
//! Each input file gets one [`IndexMap`] with a slot array per constant
//! kind, sized from the file's own declared table sizes. The four id-table
//! kinds (strings, types, fields, methods) are populated exhaustively by
//! [`crate::pool::GlobalPool::add_file`]; prototypes arrive as method
//! dependencies during the same pass, and method handles / call sites are
//! materialized lazily on first use during class merging.
//!
//! Two getter families reflect the two population modes:
//!
//! - `get_*` asserts the slot is populated; a miss after eager ingestion is
//!   an engine bug, not an input error, and panics;
//! - slot access through [`crate::pool::Resolver`] materializes on demand
//!   and memoizes, tracking which indices were ever dereferenced.

use std::sync::Arc;

use crate::constant::{CallSite, DexString, DexType, FieldRef, MethodHandle, MethodRef, Proto};
use crate::file::Toc;
use crate::Result;

/// Slot array for one constant kind.
#[derive(Debug)]
pub(crate) struct KindMap<T> {
    slots: Vec<Option<Arc<T>>>,
    used: Vec<bool>,
}

impl<T: PartialEq + std::fmt::Debug> KindMap<T> {
    fn new(size: u32) -> Self {
        KindMap {
            slots: vec![None; size as usize],
            used: vec![false; size as usize],
        }
    }

    /// Declared table size this map was constructed with.
    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    /// Bounds-checked slot read. An out-of-range index is the input file's
    /// fault; an unpopulated slot is reported as `None`.
    pub(crate) fn lookup(&self, index: u32, what: &str) -> Result<Option<&Arc<T>>> {
        match self.slots.get(index as usize) {
            Some(slot) => Ok(slot.as_ref()),
            None => Err(malformed_error!(
                "{} index {} out of range (table holds {})",
                what,
                index,
                self.slots.len()
            )),
        }
    }

    /// Asserting read for eagerly-populated kinds.
    pub(crate) fn get(&self, index: u32, what: &str) -> &Arc<T> {
        self.slots[index as usize]
            .as_ref()
            .unwrap_or_else(|| panic!("{what} index {index} read before population"))
    }

    /// Record a resolved constant and mark the index as dereferenced.
    ///
    /// Re-populating an index must produce a structurally equal constant;
    /// anything else means the source tables are being read inconsistently.
    pub(crate) fn store(&mut self, index: u32, value: &Arc<T>) {
        let slot = &mut self.slots[index as usize];
        if let Some(existing) = slot {
            debug_assert_eq!(
                **existing, **value,
                "re-population of index {index} disagrees"
            );
        } else {
            *slot = Some(value.clone());
        }
        self.used[index as usize] = true;
    }

    pub(crate) fn mark_used(&mut self, index: u32) {
        self.used[index as usize] = true;
    }

    fn used_indices(&self) -> Vec<u32> {
        self.used
            .iter()
            .enumerate()
            .filter_map(|(i, &used)| used.then_some(i as u32))
            .collect()
    }
}

/// Per input file, translates a file-local numeric index of a given kind
/// into the canonical shared constant.
///
/// Bounds are fixed at construction from the source file's declared table
/// sizes. See the module docs for the eager/lazy population contract.
#[derive(Debug)]
pub struct IndexMap {
    pub(crate) strings: KindMap<DexString>,
    pub(crate) types: KindMap<DexType>,
    pub(crate) protos: KindMap<Proto>,
    pub(crate) fields: KindMap<FieldRef>,
    pub(crate) methods: KindMap<MethodRef>,
    pub(crate) method_handles: KindMap<MethodHandle>,
    pub(crate) call_sites: KindMap<CallSite>,
}

impl IndexMap {
    /// Create an empty map sized from a file's table of contents.
    #[must_use]
    pub fn new(toc: &Toc) -> Self {
        IndexMap {
            strings: KindMap::new(toc.string_ids.size),
            types: KindMap::new(toc.type_ids.size),
            protos: KindMap::new(toc.proto_ids.size),
            fields: KindMap::new(toc.field_ids.size),
            methods: KindMap::new(toc.method_ids.size),
            method_handles: KindMap::new(toc.method_handles_size()),
            call_sites: KindMap::new(toc.call_sites_size()),
        }
    }

    /// The canonical string for a local index.
    ///
    /// # Panics
    /// Panics if the slot was never populated; strings are ingested
    /// exhaustively, so that is an engine bug.
    #[must_use]
    pub fn get_string(&self, index: u32) -> &Arc<DexString> {
        self.strings.get(index, "String")
    }

    /// The canonical type for a local index.
    ///
    /// # Panics
    /// Panics if the slot was never populated.
    #[must_use]
    pub fn get_type(&self, index: u32) -> &Arc<DexType> {
        self.types.get(index, "Type")
    }

    /// The canonical field reference for a local index.
    ///
    /// # Panics
    /// Panics if the slot was never populated.
    #[must_use]
    pub fn get_field(&self, index: u32) -> &Arc<FieldRef> {
        self.fields.get(index, "Field")
    }

    /// The canonical method reference for a local index.
    ///
    /// # Panics
    /// Panics if the slot was never populated.
    #[must_use]
    pub fn get_method(&self, index: u32) -> &Arc<MethodRef> {
        self.methods.get(index, "Method")
    }

    /// The canonical prototype for a local index.
    ///
    /// # Panics
    /// Panics if the slot was never populated. Every declared proto row that
    /// any method row references is populated during eager ingestion.
    #[must_use]
    pub fn get_proto(&self, index: u32) -> &Arc<Proto> {
        self.protos.get(index, "Proto")
    }

    /// String indices that were ever dereferenced through resolution.
    #[must_use]
    pub fn used_strings(&self) -> Vec<u32> {
        self.strings.used_indices()
    }

    /// Type indices that were ever dereferenced through resolution.
    #[must_use]
    pub fn used_types(&self) -> Vec<u32> {
        self.types.used_indices()
    }

    /// Field indices that were ever dereferenced through resolution.
    #[must_use]
    pub fn used_fields(&self) -> Vec<u32> {
        self.fields.used_indices()
    }

    /// Method indices that were ever dereferenced through resolution.
    #[must_use]
    pub fn used_methods(&self) -> Vec<u32> {
        self.methods.used_indices()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_and_get() {
        let mut map: KindMap<DexString> = KindMap::new(2);
        let s = Arc::new(DexString::new("a"));

        assert!(map.lookup(0, "String").unwrap().is_none());
        map.store(0, &s);
        assert!(Arc::ptr_eq(map.get(0, "String"), &s));
        assert_eq!(map.used_indices(), vec![0]);
    }

    #[test]
    fn out_of_range_is_input_error() {
        let map: KindMap<DexString> = KindMap::new(1);
        assert!(map.lookup(1, "String").is_err());
    }

    #[test]
    #[should_panic(expected = "read before population")]
    fn get_before_populate_panics() {
        let map: KindMap<DexString> = KindMap::new(1);
        let _ = map.get(0, "String");
    }

    #[test]
    fn repopulation_with_equal_value_is_fine() {
        let mut map: KindMap<DexString> = KindMap::new(1);
        map.store(0, &Arc::new(DexString::new("x")));
        map.store(0, &Arc::new(DexString::new("x")));
    }
}
