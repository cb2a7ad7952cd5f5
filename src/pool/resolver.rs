//! Lazy resolution of file-local indices into canonical constants.
//!
//! [`Resolver`] ties one input file, the session's [`GlobalPool`] and the
//! file's [`IndexMap`] together. Resolution is memoized per slot: a
//! populated slot is returned as-is, otherwise the record is read from the
//! file's tables, its dependents are resolved recursively, and the interned
//! result is stored before it is handed out.
//!
//! The id-reference hierarchy of the format is strictly layered: a string
//! references nothing, a type references a string, a prototype references
//! strings and types, members reference all of the former, method handles
//! reference members, and call sites reference everything below them but
//! never another call site, so the recursion terminates and per-slot
//! memoization is sufficient to resolve shared sub-constants exactly once.

use std::sync::Arc;

use tracing::trace;

use crate::constant::{
    CallSite, DexString, DexType, FieldRef, MemberRef, MethodHandle, MethodHandleKind, MethodRef,
    Proto,
};
use crate::file::{DexFile, DexVersion, Parser};
use crate::pool::{GlobalPool, IndexMap};
use crate::value::{decode, EncodedValue};
use crate::Result;

/// Resolves file-local constant indices against one input file, interning
/// the results into the session pool and memoizing them in the file's
/// [`IndexMap`].
pub struct Resolver<'a> {
    file: &'a DexFile,
    pool: &'a mut GlobalPool,
    map: &'a mut IndexMap,
}

impl<'a> Resolver<'a> {
    /// Bind a resolver to a file, the session pool, and the file's map.
    pub fn new(file: &'a DexFile, pool: &'a mut GlobalPool, map: &'a mut IndexMap) -> Self {
        Resolver { file, pool, map }
    }

    /// The input file this resolver reads from.
    #[must_use]
    pub fn file(&self) -> &'a DexFile {
        self.file
    }

    /// The format version of the input file.
    #[must_use]
    pub fn version(&self) -> DexVersion {
        self.file.version()
    }

    /// Resolve a string index.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for an out-of-range index or
    /// invalid string data.
    pub fn string(&mut self, index: u32) -> Result<Arc<DexString>> {
        if let Some(existing) = self.map.strings.lookup(index, "String")? {
            let value = existing.clone();
            self.map.strings.mark_used(index);
            return Ok(value);
        }
        trace!(index, "resolving string");

        let file = self.file;
        let (utf16_size, payload) = file.string_data_at(index)?;
        let value = self.pool.intern_string(DexString::from_parts(utf16_size, payload)?);
        self.map.strings.store(index, &value);
        Ok(value)
    }

    /// Resolve a type index.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for an out-of-range index.
    pub fn ty(&mut self, index: u32) -> Result<Arc<DexType>> {
        if let Some(existing) = self.map.types.lookup(index, "Type")? {
            let value = existing.clone();
            self.map.types.mark_used(index);
            return Ok(value);
        }
        trace!(index, "resolving type");

        let descriptor_idx = self.file.type_id_at(index)?;
        let descriptor = self.string(descriptor_idx)?;
        let value = self.pool.intern_type(DexType::new(descriptor));
        self.map.types.store(index, &value);
        Ok(value)
    }

    /// Resolve a prototype index, including its parameter type list.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for an out-of-range index or a
    /// malformed parameter list.
    pub fn proto(&mut self, index: u32) -> Result<Arc<Proto>> {
        if let Some(existing) = self.map.protos.lookup(index, "Proto")? {
            let value = existing.clone();
            self.map.protos.mark_used(index);
            return Ok(value);
        }
        trace!(index, "resolving proto");

        let row = self.file.proto_id_at(index)?;
        let shorty = self.string(row.shorty_idx)?;
        let return_type = self.ty(row.return_type_idx)?;

        let parameters = if row.parameters_off == 0 {
            Vec::new()
        } else {
            let raw = self.file.type_list_at(row.parameters_off)?;
            let mut parameters = Vec::with_capacity(raw.len());
            for type_idx in raw {
                parameters.push(self.ty(u32::from(type_idx))?);
            }
            parameters
        };

        let value = self.pool.intern_proto(Proto {
            shorty,
            return_type,
            parameters,
        });
        self.map.protos.store(index, &value);
        Ok(value)
    }

    /// Resolve a field index.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for an out-of-range index.
    pub fn field(&mut self, index: u32) -> Result<Arc<FieldRef>> {
        if let Some(existing) = self.map.fields.lookup(index, "Field")? {
            let value = existing.clone();
            self.map.fields.mark_used(index);
            return Ok(value);
        }
        trace!(index, "resolving field");

        let row = self.file.field_id_at(index)?;
        let class = self.ty(u32::from(row.class_idx))?;
        let ty = self.ty(u32::from(row.type_idx))?;
        let name = self.string(row.name_idx)?;

        let value = self.pool.intern_field(FieldRef { class, ty, name });
        self.map.fields.store(index, &value);
        Ok(value)
    }

    /// Resolve a method index, including its prototype.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for an out-of-range index.
    pub fn method(&mut self, index: u32) -> Result<Arc<MethodRef>> {
        if let Some(existing) = self.map.methods.lookup(index, "Method")? {
            let value = existing.clone();
            self.map.methods.mark_used(index);
            return Ok(value);
        }
        trace!(index, "resolving method");

        let row = self.file.method_id_at(index)?;
        let class = self.ty(u32::from(row.class_idx))?;
        let proto = self.proto(u32::from(row.proto_idx))?;
        let name = self.string(row.name_idx)?;

        let value = self.pool.intern_method(MethodRef { class, proto, name });
        self.map.methods.store(index, &value);
        Ok(value)
    }

    /// Resolve a method handle index.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for an out-of-range index or an
    /// unknown handle kind.
    pub fn method_handle(&mut self, index: u32) -> Result<Arc<MethodHandle>> {
        if let Some(existing) = self.map.method_handles.lookup(index, "Method handle")? {
            let value = existing.clone();
            self.map.method_handles.mark_used(index);
            return Ok(value);
        }
        trace!(index, "resolving method handle");

        let row = self.file.method_handle_at(index)?;
        let Some(kind) = MethodHandleKind::from_repr(row.kind) else {
            return Err(malformed_error!(
                "Unknown method handle kind {:#06x} at index {}",
                row.kind,
                index
            ));
        };

        let member = if kind.is_field_kind() {
            MemberRef::Field(self.field(u32::from(row.field_or_method_idx))?)
        } else {
            MemberRef::Method(self.method(u32::from(row.field_or_method_idx))?)
        };

        let value = self.pool.intern_method_handle(MethodHandle { kind, member });
        self.map.method_handles.store(index, &value);
        Ok(value)
    }

    /// Resolve a call site index, decoding its bootstrap encoded array.
    ///
    /// The array must open with a method handle, the target name string and
    /// the target method type; anything after that travels as extra
    /// bootstrap arguments.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for an out-of-range index or an
    /// array that does not match the bootstrap shape.
    pub fn call_site(&mut self, index: u32) -> Result<Arc<CallSite>> {
        if let Some(existing) = self.map.call_sites.lookup(index, "Call site")? {
            let value = existing.clone();
            self.map.call_sites.mark_used(index);
            return Ok(value);
        }
        trace!(index, "resolving call site");

        let file = self.file;
        let offset = file.call_site_off_at(index)?;
        let mut parser = Parser::new(file.data());
        parser.seek(offset as usize)?;
        let mut values = decode::read_array(&mut parser, self)?.into_iter();

        let (Some(EncodedValue::MethodHandle(bootstrap)), Some(EncodedValue::String(method_name)), Some(EncodedValue::MethodType(method_type))) =
            (values.next(), values.next(), values.next())
        else {
            return Err(malformed_error!(
                "Call site {} bootstrap array does not start with (handle, name, type)",
                index
            ));
        };

        let value = self.pool.intern_call_site(CallSite {
            bootstrap,
            method_name,
            method_type,
            extra_args: values.collect(),
        });
        self.map.call_sites.store(index, &value);
        Ok(value)
    }
}
