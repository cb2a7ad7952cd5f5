//! Output serialization: final index assignment, section layout, and
//! bit-exact emission of the merged model.
//!
//! # Architecture
//!
//! Serialization runs in three stages:
//!
//! 1. **Index assignment**: [`ObjectIndexes`] walks every pool set in its
//!    structural order (which *is* the format's table sort order) and pins
//!    each canonical constant to its final table index.
//! 2. **Data section emission**: data items are written in dependency
//!    order (type lists, annotation items → sets → ref lists → directories,
//!    debug infos → code items → class data, encoded arrays, string data),
//!    each content-deduplicated, with the map list last. Offsets are
//!    absolute from the start because the head size is known up front.
//! 3. **Head emission and patching**: header and id tables are written in
//!    front of the data section, then the SHA-1 signature and adler32
//!    checksum are computed over the finished buffer and patched in.
//!
//! The produced header is re-parsed and handed to
//! [`crate::pool::GlobalPool::validate`]: any disagreement between pool and
//! output table sizes is an engine bug and panics.

pub mod writer;

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use sha1::{Digest, Sha1};
use tracing::debug;

pub use writer::Writer;

use crate::constant::{
    CallSite, DexString, DexType, FieldRef, MemberRef, MethodHandle, MethodRef, Proto,
};
use crate::file::{adler32, toc, DexVersion, Header, MapItemType, Toc};
use crate::merge::class::{FieldDef, MergedClassDefinition, MethodDef};
use crate::merge::code::{CodeItem, DebugEvent, DebugInfo, Instruction, RefTarget};
use crate::pool::GlobalPool;
use crate::value::{encode, AnnotationItem, EncodedValue};
use crate::Result;

/// Final table index of every canonical constant, assigned by walking the
/// pool sets in their structural (= output) order.
pub struct ObjectIndexes {
    strings: HashMap<Arc<DexString>, u32>,
    types: HashMap<Arc<DexType>, u32>,
    protos: HashMap<Arc<Proto>, u32>,
    fields: HashMap<Arc<FieldRef>, u32>,
    methods: HashMap<Arc<MethodRef>, u32>,
    method_handles: HashMap<Arc<MethodHandle>, u32>,
    call_sites: HashMap<Arc<CallSite>, u32>,
}

fn index_of<T: Eq + Hash>(map: &HashMap<Arc<T>, u32>, value: &Arc<T>, what: &str) -> u32 {
    match map.get(value) {
        Some(&index) => index,
        None => panic!("{what} was never interned into the pool"),
    }
}

impl ObjectIndexes {
    /// Assign final indices from a finished pool.
    #[must_use]
    pub fn build(pool: &GlobalPool) -> Self {
        fn enumerate<T: Eq + Hash>(values: impl Iterator<Item = Arc<T>>) -> HashMap<Arc<T>, u32> {
            values
                .enumerate()
                .map(|(index, value)| (value, index as u32))
                .collect()
        }

        ObjectIndexes {
            strings: enumerate(pool.strings().cloned()),
            types: enumerate(pool.types().cloned()),
            protos: enumerate(pool.protos().cloned()),
            fields: enumerate(pool.fields().cloned()),
            methods: enumerate(pool.methods().cloned()),
            method_handles: enumerate(pool.method_handles().cloned()),
            call_sites: enumerate(pool.call_sites().cloned()),
        }
    }

    /// Final call site table index.
    #[must_use]
    pub fn call_site_index(&self, value: &Arc<CallSite>) -> u32 {
        index_of(&self.call_sites, value, "Call site")
    }
}

impl encode::ConstantIndexes for ObjectIndexes {
    fn string_index(&self, value: &Arc<DexString>) -> u32 {
        index_of(&self.strings, value, "String")
    }

    fn type_index(&self, value: &Arc<DexType>) -> u32 {
        index_of(&self.types, value, "Type")
    }

    fn proto_index(&self, value: &Arc<Proto>) -> u32 {
        index_of(&self.protos, value, "Proto")
    }

    fn field_index(&self, value: &Arc<FieldRef>) -> u32 {
        index_of(&self.fields, value, "Field")
    }

    fn method_index(&self, value: &Arc<MethodRef>) -> u32 {
        index_of(&self.methods, value, "Method")
    }

    fn method_handle_index(&self, value: &Arc<MethodHandle>) -> u32 {
        index_of(&self.method_handles, value, "Method handle")
    }
}

use encode::ConstantIndexes as _;

/// Content-deduplicating item emitter for one data-section kind.
struct DedupSection {
    kind: MapItemType,
    alignment: usize,
    seen: HashMap<Vec<u8>, u32>,
    first_offset: u32,
    count: u32,
}

impl DedupSection {
    fn new(kind: MapItemType, alignment: usize) -> Self {
        DedupSection {
            kind,
            alignment,
            seen: HashMap::new(),
            first_offset: 0,
            count: 0,
        }
    }

    /// Emit `content` unless an identical item exists; returns its absolute
    /// offset either way.
    fn emit(&mut self, data: &mut DataWriter, content: &[u8]) -> u32 {
        if let Some(&offset) = self.seen.get(content) {
            return offset;
        }

        data.w.align_to(self.alignment);
        let offset = data.abs();
        data.w.write_bytes(content);

        if self.count == 0 {
            self.first_offset = offset;
        }
        self.count += 1;
        self.seen.insert(content.to_vec(), offset);
        offset
    }

    fn map_entry(&self) -> Option<(MapItemType, u32, u32)> {
        (self.count > 0).then_some((self.kind, self.count, self.first_offset))
    }
}

/// The data-section writer; offsets are absolute because the head size is
/// fixed before data emission starts.
struct DataWriter {
    w: Writer,
    base: u32,
}

impl DataWriter {
    fn abs(&self) -> u32 {
        self.base + self.w.len() as u32
    }
}

/// Per-class offsets resolved during data emission.
#[derive(Debug, Clone, Default)]
struct ClassLayout {
    interfaces_off: u32,
    annotations_off: u32,
    class_data_off: u32,
    static_values_off: u32,
    direct_debug: Vec<u32>,
    virtual_debug: Vec<u32>,
    direct_code: Vec<u32>,
    virtual_code: Vec<u32>,
}

/// The type default used for a static field whose initializer slot is
/// absent but which precedes an initialized field in the final sort order.
fn default_value_for(ty: &DexType) -> EncodedValue {
    match ty.descriptor().data().first() {
        Some(b'Z') => EncodedValue::Boolean(false),
        Some(b'B') => EncodedValue::Byte(0),
        Some(b'S') => EncodedValue::Short(0),
        Some(b'C') => EncodedValue::Char(0),
        Some(b'I') => EncodedValue::Int(0),
        Some(b'J') => EncodedValue::Long(0),
        Some(b'F') => EncodedValue::Float(0),
        Some(b'D') => EncodedValue::Double(0),
        _ => EncodedValue::Null,
    }
}

/// Serialize the merged model into one complete output file.
///
/// # Errors
/// This stage reports no input errors; every inconsistency it can detect is
/// an engine bug and panics (see [`GlobalPool::validate`]).
pub fn serialize(
    pool: &GlobalPool,
    classes: &[MergedClassDefinition],
    version: DexVersion,
) -> Result<Vec<u8>> {
    let indexes = ObjectIndexes::build(pool);

    let n_strings = pool.string_count() as u32;
    let n_types = pool.type_count() as u32;
    let n_protos = pool.proto_count() as u32;
    let n_fields = pool.field_count() as u32;
    let n_methods = pool.method_count() as u32;
    let n_classes = classes.len() as u32;
    let n_call_sites = pool.call_site_count() as u32;
    let n_method_handles = pool.method_handle_count() as u32;

    // Head layout: header, then the id tables in format order. All record
    // widths are multiples of four, so no inter-section padding is needed.
    let mut cursor = toc::HEADER_SIZE;
    let mut place = |count: u32, width: u32| -> u32 {
        if count == 0 {
            return 0;
        }
        let offset = cursor;
        cursor += count * width;
        offset
    };

    let string_ids_off = place(n_strings, 4);
    let type_ids_off = place(n_types, 4);
    let proto_ids_off = place(n_protos, 12);
    let field_ids_off = place(n_fields, 8);
    let method_ids_off = place(n_methods, 8);
    let class_defs_off = place(n_classes, 32);
    let call_site_ids_off = place(n_call_sites, 4);
    let method_handles_off = place(n_method_handles, 8);
    let data_off = cursor;

    let mut data = DataWriter {
        w: Writer::new(),
        base: data_off,
    };
    let mut layouts = vec![ClassLayout::default(); classes.len()];

    // -- type lists: proto parameter lists, then class interface lists
    let mut type_lists = DedupSection::new(MapItemType::TypeList, 4);
    let mut proto_params_off: HashMap<Arc<Proto>, u32> = HashMap::new();

    let type_list_content = |types: &[Arc<DexType>]| -> Vec<u8> {
        let mut content = Writer::new();
        content.write_le::<u32>(types.len() as u32);
        for ty in types {
            let index = indexes.type_index(ty);
            assert!(index <= 0xFFFF, "type index {index} exceeds 16 bits");
            content.write_le::<u16>(index as u16);
        }
        content.into_bytes()
    };

    for proto in pool.protos() {
        if !proto.parameters.is_empty() {
            let offset = type_lists.emit(&mut data, &type_list_content(&proto.parameters));
            proto_params_off.insert(proto.clone(), offset);
        }
    }
    for (class_index, class) in classes.iter().enumerate() {
        if !class.interfaces.is_empty() {
            layouts[class_index].interfaces_off =
                type_lists.emit(&mut data, &type_list_content(&class.interfaces));
        }
    }

    // -- annotation items, then sets, then ref lists, then directories;
    //    higher layers re-emit lower content and hit the dedup cache
    let mut annotation_items = DedupSection::new(MapItemType::AnnotationItem, 1);
    let mut annotation_sets = DedupSection::new(MapItemType::AnnotationSetItem, 4);
    let mut annotation_ref_lists = DedupSection::new(MapItemType::AnnotationSetRefList, 4);
    let mut annotation_dirs = DedupSection::new(MapItemType::AnnotationsDirectoryItem, 4);

    let item_content = |item: &AnnotationItem| -> Vec<u8> {
        let mut content = Writer::new();
        content.write_le::<u8>(item.visibility);
        encode::write_annotation(&mut content, &indexes, &item.annotation);
        content.into_bytes()
    };

    fn set_content(offsets: &[u32]) -> Vec<u8> {
        let mut content = Writer::new();
        content.write_le::<u32>(offsets.len() as u32);
        for &offset in offsets {
            content.write_le::<u32>(offset);
        }
        content.into_bytes()
    }

    for class in classes {
        let annotations = &class.annotations;
        for item in &annotations.class {
            annotation_items.emit(&mut data, &item_content(item));
        }
        for items in annotations.fields.values().chain(annotations.methods.values()) {
            for item in items {
                annotation_items.emit(&mut data, &item_content(item));
            }
        }
        for per_parameter in annotations.parameters.values() {
            for items in per_parameter.iter().flatten() {
                for item in items {
                    annotation_items.emit(&mut data, &item_content(item));
                }
            }
        }
    }

    let emit_set = |data: &mut DataWriter,
                        annotation_items: &mut DedupSection,
                        annotation_sets: &mut DedupSection,
                        items: &[AnnotationItem]|
     -> u32 {
        let offsets: Vec<u32> = items
            .iter()
            .map(|item| annotation_items.emit(data, &item_content(item)))
            .collect();
        annotation_sets.emit(data, &set_content(&offsets))
    };

    // Materialize all sets, then all ref lists, before the directories that
    // point at them: every emit below is idempotent through the dedup
    // cache, so each section stays contiguous.
    for class in classes {
        let annotations = &class.annotations;
        if !annotations.class.is_empty() {
            emit_set(
                &mut data,
                &mut annotation_items,
                &mut annotation_sets,
                &annotations.class,
            );
        }
        for items in annotations.fields.values().chain(annotations.methods.values()) {
            emit_set(&mut data, &mut annotation_items, &mut annotation_sets, items);
        }
        for per_parameter in annotations.parameters.values() {
            for items in per_parameter.iter().flatten() {
                emit_set(&mut data, &mut annotation_items, &mut annotation_sets, items);
            }
        }
    }
    for class in classes {
        for per_parameter in class.annotations.parameters.values() {
            let set_offsets: Vec<u32> = per_parameter
                .iter()
                .map(|slot| match slot {
                    Some(items) => {
                        emit_set(&mut data, &mut annotation_items, &mut annotation_sets, items)
                    }
                    None => 0,
                })
                .collect();
            annotation_ref_lists.emit(&mut data, &set_content(&set_offsets));
        }
    }

    for (class_index, class) in classes.iter().enumerate() {
        let annotations = &class.annotations;
        if annotations.is_empty() {
            continue;
        }

        let class_set_off = if annotations.class.is_empty() {
            0
        } else {
            emit_set(
                &mut data,
                &mut annotation_items,
                &mut annotation_sets,
                &annotations.class,
            )
        };

        let field_entries: Vec<(u32, u32)> = annotations
            .fields
            .iter()
            .map(|(field, items)| {
                let offset = emit_set(&mut data, &mut annotation_items, &mut annotation_sets, items);
                (indexes.field_index(field), offset)
            })
            .collect();

        let method_entries: Vec<(u32, u32)> = annotations
            .methods
            .iter()
            .map(|(method, items)| {
                let offset = emit_set(&mut data, &mut annotation_items, &mut annotation_sets, items);
                (indexes.method_index(method), offset)
            })
            .collect();

        let parameter_entries: Vec<(u32, u32)> = annotations
            .parameters
            .iter()
            .map(|(method, per_parameter)| {
                let set_offsets: Vec<u32> = per_parameter
                    .iter()
                    .map(|slot| match slot {
                        Some(items) => emit_set(
                            &mut data,
                            &mut annotation_items,
                            &mut annotation_sets,
                            items,
                        ),
                        None => 0,
                    })
                    .collect();
                let offset = annotation_ref_lists.emit(&mut data, &set_content(&set_offsets));
                (indexes.method_index(method), offset)
            })
            .collect();

        let mut content = Writer::new();
        content.write_le::<u32>(class_set_off);
        content.write_le::<u32>(field_entries.len() as u32);
        content.write_le::<u32>(method_entries.len() as u32);
        content.write_le::<u32>(parameter_entries.len() as u32);
        for &(index, offset) in field_entries
            .iter()
            .chain(method_entries.iter())
            .chain(parameter_entries.iter())
        {
            content.write_le::<u32>(index);
            content.write_le::<u32>(offset);
        }

        layouts[class_index].annotations_off = annotation_dirs.emit(&mut data, &content.into_bytes());
    }

    // -- debug info items
    let mut debug_infos = DedupSection::new(MapItemType::DebugInfoItem, 1);
    for (class_index, class) in classes.iter().enumerate() {
        let layout = &mut layouts[class_index];
        for (methods, offsets) in [
            (&class.direct_methods, &mut layout.direct_debug),
            (&class.virtual_methods, &mut layout.virtual_debug),
        ] {
            for method in methods.iter() {
                let offset = match method.code.as_ref().and_then(|c| c.debug_info.as_ref()) {
                    Some(info) => debug_infos.emit(&mut data, &debug_info_content(info, &indexes)),
                    None => 0,
                };
                offsets.push(offset);
            }
        }
    }

    // -- code items (4-aligned, no dedup: identity is per method)
    let mut code_count = 0u32;
    let mut code_first_off = 0u32;
    for (class_index, class) in classes.iter().enumerate() {
        let layout = &mut layouts[class_index];
        for (methods, debug_offs, code_offs) in [
            (
                &class.direct_methods,
                &layout.direct_debug,
                &mut layout.direct_code,
            ),
            (
                &class.virtual_methods,
                &layout.virtual_debug,
                &mut layout.virtual_code,
            ),
        ] {
            for (method_index, method) in methods.iter().enumerate() {
                let offset = match &method.code {
                    Some(code) => {
                        data.w.align_to(4);
                        let offset = data.abs();
                        write_code_item(&mut data.w, code, debug_offs[method_index], &indexes);
                        if code_count == 0 {
                            code_first_off = offset;
                        }
                        code_count += 1;
                        offset
                    }
                    None => 0,
                };
                code_offs.push(offset);
            }
        }
    }

    // -- class data items
    let mut class_data_count = 0u32;
    let mut class_data_first_off = 0u32;
    let mut static_arrays: Vec<(usize, Vec<EncodedValue>)> = Vec::new();

    for (class_index, class) in classes.iter().enumerate() {
        let member_count = class.static_fields.len()
            + class.instance_fields.len()
            + class.direct_methods.len()
            + class.virtual_methods.len();
        if member_count == 0 {
            continue;
        }

        // Member lists are delta-encoded over increasing final indices.
        let sorted_fields = |fields: &[FieldDef]| -> Vec<(u32, FieldDef)> {
            let mut rows: Vec<(u32, FieldDef)> = fields
                .iter()
                .map(|f| (indexes.field_index(&f.field), f.clone()))
                .collect();
            rows.sort_by_key(|&(index, _)| index);
            rows
        };
        let sorted_methods = |methods: &[MethodDef], code_offs: &[u32]| -> Vec<(u32, u32, u32)> {
            let mut rows: Vec<(u32, u32, u32)> = methods
                .iter()
                .zip(code_offs)
                .map(|(m, &code_off)| (indexes.method_index(&m.method), m.access_flags.bits(), code_off))
                .collect();
            rows.sort_by_key(|&(index, _, _)| index);
            rows
        };

        let statics = sorted_fields(&class.static_fields);
        let instances = sorted_fields(&class.instance_fields);
        let layout = &layouts[class_index];
        let directs = sorted_methods(&class.direct_methods, &layout.direct_code);
        let virtuals = sorted_methods(&class.virtual_methods, &layout.virtual_code);

        // The static-values array pairs positionally with the sorted static
        // field order; trailing absent initializers are dropped entirely.
        let mut values: Vec<EncodedValue> = Vec::new();
        let mut pending_defaults = 0usize;
        for (_, field) in &statics {
            match &field.static_value {
                Some(value) => {
                    for _ in 0..pending_defaults {
                        let position = values.len();
                        let (_, defaulted) = &statics[position];
                        values.push(default_value_for(&defaulted.field.ty));
                    }
                    pending_defaults = 0;
                    values.push(value.clone());
                }
                None => pending_defaults += 1,
            }
        }
        static_arrays.push((class_index, values));

        let mut content = Writer::new();
        content.write_uleb128(statics.len() as u32);
        content.write_uleb128(instances.len() as u32);
        content.write_uleb128(directs.len() as u32);
        content.write_uleb128(virtuals.len() as u32);

        let write_field_rows = |content: &mut Writer, rows: &[(u32, FieldDef)]| {
            let mut previous = 0u32;
            for (position, (index, field)) in rows.iter().enumerate() {
                let diff = if position == 0 { *index } else { index - previous };
                previous = *index;
                content.write_uleb128(diff);
                content.write_uleb128(field.access_flags.bits());
            }
        };
        write_field_rows(&mut content, &statics);
        write_field_rows(&mut content, &instances);

        let write_method_rows = |content: &mut Writer, rows: &[(u32, u32, u32)]| {
            let mut previous = 0u32;
            for (position, (index, flags, code_off)) in rows.iter().enumerate() {
                let diff = if position == 0 { *index } else { index - previous };
                previous = *index;
                content.write_uleb128(diff);
                content.write_uleb128(*flags);
                content.write_uleb128(*code_off);
            }
        };
        write_method_rows(&mut content, &directs);
        write_method_rows(&mut content, &virtuals);

        let offset = data.abs();
        data.w.write_bytes(&content.into_bytes());
        if class_data_count == 0 {
            class_data_first_off = offset;
        }
        class_data_count += 1;
        layouts[class_index].class_data_off = offset;
    }

    // -- encoded arrays: static values, then call site bootstrap arrays
    let mut encoded_arrays = DedupSection::new(MapItemType::EncodedArrayItem, 1);
    for (class_index, values) in static_arrays {
        if values.is_empty() {
            continue;
        }
        let mut content = Writer::new();
        encode::write_array(&mut content, &indexes, &values);
        layouts[class_index].static_values_off =
            encoded_arrays.emit(&mut data, &content.into_bytes());
    }

    let mut call_site_offsets = Vec::with_capacity(n_call_sites as usize);
    for call_site in pool.call_sites() {
        let mut bootstrap: Vec<EncodedValue> = Vec::with_capacity(3 + call_site.extra_args.len());
        bootstrap.push(EncodedValue::MethodHandle(call_site.bootstrap.clone()));
        bootstrap.push(EncodedValue::String(call_site.method_name.clone()));
        bootstrap.push(EncodedValue::MethodType(call_site.method_type.clone()));
        bootstrap.extend(call_site.extra_args.iter().cloned());

        let mut content = Writer::new();
        encode::write_array(&mut content, &indexes, &bootstrap);
        call_site_offsets.push(encoded_arrays.emit(&mut data, &content.into_bytes()));
    }

    // -- string data
    let mut string_offsets = Vec::with_capacity(n_strings as usize);
    let string_data_first_off = data.abs();
    for string in pool.strings() {
        string_offsets.push(data.abs());
        data.w.write_string_data(string.utf16_size(), string.data());
    }

    // -- map list
    data.w.align_to(4);
    let map_off = data.abs();

    let mut map_entries: Vec<(MapItemType, u32, u32)> = vec![(MapItemType::HeaderItem, 1, 0)];
    let mut head_entry = |kind: MapItemType, count: u32, offset: u32| {
        if count > 0 {
            map_entries.push((kind, count, offset));
        }
    };
    head_entry(MapItemType::StringIdItem, n_strings, string_ids_off);
    head_entry(MapItemType::TypeIdItem, n_types, type_ids_off);
    head_entry(MapItemType::ProtoIdItem, n_protos, proto_ids_off);
    head_entry(MapItemType::FieldIdItem, n_fields, field_ids_off);
    head_entry(MapItemType::MethodIdItem, n_methods, method_ids_off);
    head_entry(MapItemType::ClassDefItem, n_classes, class_defs_off);
    head_entry(MapItemType::CallSiteIdItem, n_call_sites, call_site_ids_off);
    head_entry(
        MapItemType::MethodHandleItem,
        n_method_handles,
        method_handles_off,
    );

    for section in [
        &type_lists,
        &annotation_items,
        &annotation_sets,
        &annotation_ref_lists,
        &annotation_dirs,
        &debug_infos,
    ] {
        if let Some(entry) = section.map_entry() {
            map_entries.push(entry);
        }
    }
    if code_count > 0 {
        map_entries.push((MapItemType::CodeItem, code_count, code_first_off));
    }
    if class_data_count > 0 {
        map_entries.push((
            MapItemType::ClassDataItem,
            class_data_count,
            class_data_first_off,
        ));
    }
    if let Some(entry) = encoded_arrays.map_entry() {
        map_entries.push(entry);
    }
    if n_strings > 0 {
        map_entries.push((
            MapItemType::StringDataItem,
            n_strings,
            string_data_first_off,
        ));
    }
    map_entries.push((MapItemType::MapList, 1, map_off));
    map_entries.sort_by_key(|&(_, _, offset)| offset);

    data.w.write_le::<u32>(map_entries.len() as u32);
    for (kind, count, offset) in &map_entries {
        data.w.write_le::<u16>(*kind as u16);
        data.w.write_le::<u16>(0);
        data.w.write_le::<u32>(*count);
        data.w.write_le::<u32>(*offset);
    }

    let data_bytes = data.w.into_bytes();
    let data_size = data_bytes.len() as u32;
    let file_size = data_off + data_size;

    // -- head: header and id tables
    let mut out = Writer::with_capacity(file_size as usize);
    out.write_bytes(b"dex\n");
    out.write_bytes(version.digits());
    out.write_le::<u8>(0);
    out.write_le::<u32>(0); // checksum, patched below
    out.write_bytes(&[0u8; 20]); // signature, patched below
    out.write_le::<u32>(file_size);
    out.write_le::<u32>(toc::HEADER_SIZE);
    out.write_le::<u32>(toc::ENDIAN_CONSTANT);
    out.write_le::<u32>(0); // link_size
    out.write_le::<u32>(0); // link_off
    out.write_le::<u32>(map_off);
    for (count, offset) in [
        (n_strings, string_ids_off),
        (n_types, type_ids_off),
        (n_protos, proto_ids_off),
        (n_fields, field_ids_off),
        (n_methods, method_ids_off),
        (n_classes, class_defs_off),
    ] {
        out.write_le::<u32>(count);
        out.write_le::<u32>(offset);
    }
    out.write_le::<u32>(data_size);
    out.write_le::<u32>(data_off);
    assert_eq!(out.len() as u32, toc::HEADER_SIZE, "header layout drifted");

    for &offset in &string_offsets {
        out.write_le::<u32>(offset);
    }

    for ty in pool.types() {
        out.write_le::<u32>(indexes.string_index(ty.descriptor()));
    }

    for proto in pool.protos() {
        out.write_le::<u32>(indexes.string_index(&proto.shorty));
        out.write_le::<u32>(indexes.type_index(&proto.return_type));
        out.write_le::<u32>(proto_params_off.get(proto).copied().unwrap_or(0));
    }

    for field in pool.fields() {
        out.write_le::<u16>(narrow(indexes.type_index(&field.class), "field class type"));
        out.write_le::<u16>(narrow(indexes.type_index(&field.ty), "field type"));
        out.write_le::<u32>(indexes.string_index(&field.name));
    }

    for method in pool.methods() {
        out.write_le::<u16>(narrow(
            indexes.type_index(&method.class),
            "method class type",
        ));
        out.write_le::<u16>(narrow(indexes.proto_index(&method.proto), "method proto"));
        out.write_le::<u32>(indexes.string_index(&method.name));
    }

    for (class, layout) in classes.iter().zip(&layouts) {
        out.write_le::<u32>(indexes.type_index(&class.ty));
        out.write_le::<u32>(class.access_flags.bits());
        out.write_le::<u32>(match &class.superclass {
            Some(superclass) => indexes.type_index(superclass),
            None => toc::NO_INDEX,
        });
        out.write_le::<u32>(layout.interfaces_off);
        out.write_le::<u32>(match &class.source_file {
            Some(source) => indexes.string_index(source),
            None => toc::NO_INDEX,
        });
        out.write_le::<u32>(layout.annotations_off);
        out.write_le::<u32>(layout.class_data_off);
        out.write_le::<u32>(layout.static_values_off);
    }

    for &offset in &call_site_offsets {
        out.write_le::<u32>(offset);
    }

    for handle in pool.method_handles() {
        out.write_le::<u16>(handle.kind as u16);
        out.write_le::<u16>(0);
        let member_index = match &handle.member {
            MemberRef::Field(field) => indexes.field_index(field),
            MemberRef::Method(method) => indexes.method_index(method),
        };
        out.write_le::<u16>(narrow(member_index, "method handle member"));
        out.write_le::<u16>(0);
    }

    assert_eq!(out.len() as u32, data_off, "id table layout drifted");
    out.write_bytes(&data_bytes);

    let mut bytes = out.into_bytes();

    let mut hasher = Sha1::new();
    hasher.update(&bytes[32..]);
    let signature: [u8; 20] = hasher.finalize().into();
    bytes[12..32].copy_from_slice(&signature);

    let checksum = adler32(&bytes[12..]);
    bytes[8..12].copy_from_slice(&checksum.to_le_bytes());

    debug!(file_size = bytes.len(), sections = map_entries.len(), "output assembled");

    // Post-merge invariant: the pool and the physical output must agree.
    let header = Header::parse(&bytes).unwrap_or_else(|e| {
        panic!("serializer produced an unparseable header: {e}");
    });
    let reparsed_toc = Toc::from_header(&header, &bytes).unwrap_or_else(|e| {
        panic!("serializer produced an unparseable map: {e}");
    });
    pool.validate(&header, &reparsed_toc);

    Ok(bytes)
}

fn narrow(index: u32, what: &str) -> u16 {
    assert!(index <= 0xFFFF, "{what} index {index} exceeds 16 bits");
    index as u16
}

/// Instruction units with final constant indices patched into their operand
/// slots.
fn patched_units(insn: &Instruction, indexes: &ObjectIndexes) -> Vec<u16> {
    let mut units = insn.units.clone();
    for reference in &insn.refs {
        let index = match &reference.target {
            RefTarget::String(string) => indexes.string_index(string),
            RefTarget::Type(ty) => indexes.type_index(ty),
            RefTarget::Field(field) => indexes.field_index(field),
            RefTarget::Method(method) => indexes.method_index(method),
            RefTarget::Proto(proto) => indexes.proto_index(proto),
            RefTarget::MethodHandle(handle) => indexes.method_handle_index(handle),
            RefTarget::CallSite(call_site) => indexes.call_site_index(call_site),
        };

        if reference.wide {
            units[reference.slot] = (index & 0xFFFF) as u16;
            units[reference.slot + 1] = (index >> 16) as u16;
        } else {
            // A string index that outgrew its 16-bit slot would need the
            // jumbo rewrite, which is bytecode transformation and out of
            // scope here.
            assert!(
                index <= 0xFFFF,
                "operand index {index} exceeds its 16-bit instruction slot"
            );
            units[reference.slot] = index as u16;
        }
    }
    units
}

fn write_code_item(out: &mut Writer, code: &CodeItem, debug_info_off: u32, indexes: &ObjectIndexes) {
    out.write_le::<u16>(code.registers_size);
    out.write_le::<u16>(code.ins_size);
    out.write_le::<u16>(code.outs_size);
    out.write_le::<u16>(code.tries.len() as u16);
    out.write_le::<u32>(debug_info_off);

    let insns_size = code.insns_unit_count();
    out.write_le::<u32>(insns_size);
    for insn in &code.instructions {
        for unit in patched_units(insn, indexes) {
            out.write_le::<u16>(unit);
        }
    }

    if code.tries.is_empty() {
        return;
    }
    if insns_size % 2 != 0 {
        out.write_le::<u16>(0);
    }

    // The handler list is laid out first (into a side buffer) so the try
    // records that physically precede it can name each handler by its byte
    // offset within the list.
    let mut handler_list = Writer::new();
    handler_list.write_uleb128(code.handlers.len() as u32);
    let mut handler_offsets = Vec::with_capacity(code.handlers.len());
    for handler in &code.handlers {
        handler_offsets.push(handler_list.len() as u16);

        let typed = handler.catches.len() as i32;
        handler_list.write_sleb128(if handler.catch_all.is_some() { -typed } else { typed });
        for (ty, addr) in &handler.catches {
            handler_list.write_uleb128(indexes.type_index(ty));
            handler_list.write_uleb128(*addr);
        }
        if let Some(addr) = handler.catch_all {
            handler_list.write_uleb128(addr);
        }
    }

    for try_block in &code.tries {
        out.write_le::<u32>(try_block.start_addr);
        out.write_le::<u16>(try_block.insn_count);
        out.write_le::<u16>(handler_offsets[try_block.handler_index]);
    }
    out.write_bytes(handler_list.bytes());
}

fn debug_info_content(info: &DebugInfo, indexes: &ObjectIndexes) -> Vec<u8> {
    let mut out = Writer::new();
    out.write_uleb128(info.line_start);
    out.write_uleb128(info.parameter_names.len() as u32);
    for name in &info.parameter_names {
        out.write_uleb128p1(name.as_ref().map(|n| indexes.string_index(n)));
    }

    for event in &info.events {
        match event {
            DebugEvent::AdvancePc(units) => {
                out.write_le::<u8>(0x01);
                out.write_uleb128(*units);
            }
            DebugEvent::AdvanceLine(lines) => {
                out.write_le::<u8>(0x02);
                out.write_sleb128(*lines);
            }
            DebugEvent::StartLocal { register, name, ty } => {
                out.write_le::<u8>(0x03);
                out.write_uleb128(*register);
                out.write_uleb128p1(name.as_ref().map(|n| indexes.string_index(n)));
                out.write_uleb128p1(ty.as_ref().map(|t| indexes.type_index(t)));
            }
            DebugEvent::StartLocalExtended {
                register,
                name,
                ty,
                signature,
            } => {
                out.write_le::<u8>(0x04);
                out.write_uleb128(*register);
                out.write_uleb128p1(name.as_ref().map(|n| indexes.string_index(n)));
                out.write_uleb128p1(ty.as_ref().map(|t| indexes.type_index(t)));
                out.write_uleb128p1(signature.as_ref().map(|s| indexes.string_index(s)));
            }
            DebugEvent::EndLocal(register) => {
                out.write_le::<u8>(0x05);
                out.write_uleb128(*register);
            }
            DebugEvent::RestartLocal(register) => {
                out.write_le::<u8>(0x06);
                out.write_uleb128(*register);
            }
            DebugEvent::SetPrologueEnd => out.write_le::<u8>(0x07),
            DebugEvent::SetEpilogueBegin => out.write_le::<u8>(0x08),
            DebugEvent::SetFile(name) => {
                out.write_le::<u8>(0x09);
                out.write_uleb128p1(name.as_ref().map(|n| indexes.string_index(n)));
            }
            DebugEvent::Special(opcode) => out.write_le::<u8>(*opcode),
        }
    }
    out.write_le::<u8>(0x00);
    out.into_bytes()
}
