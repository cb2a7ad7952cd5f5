#![allow(dead_code)]

//! Shared test support: crafts small dex inputs in memory.
//!
//! The builder emits just enough of the container for the engine under
//! test: header, id tables, class data, code items, annotations, optional
//! method handle / call site sections with a minimal map list, and a valid
//! adler32 checksum. Tables are emitted in insertion order; the engine does
//! not require input tables to be sorted.

use dexmerge::file::mutf8;
use dexmerge::write::Writer;

/// Absent-index sentinel for superclass and source file.
pub const NO_INDEX: u32 = 0xFFFF_FFFF;

pub const ACC_PUBLIC: u32 = 0x0001;
pub const ACC_PRIVATE: u32 = 0x0002;
pub const ACC_STATIC: u32 = 0x0008;
pub const ACC_FINAL: u32 = 0x0010;

const HEADER_SIZE: u32 = 0x70;

/// A method body specification.
#[derive(Default, Clone)]
pub struct CodeSpec {
    pub registers: u16,
    pub ins: u16,
    pub outs: u16,
    pub insns: Vec<u16>,
    /// `(start_addr, insn_count, handler_index)`
    pub tries: Vec<(u32, u16, usize)>,
    /// `(typed catches as (type_idx, addr), catch_all addr)`
    pub handlers: Vec<(Vec<(u32, u32)>, Option<u32>)>,
    /// Raw debug_info item bytes.
    pub debug: Option<Vec<u8>>,
}

/// A crafted annotation: visibility, type, raw-encoded element values.
#[derive(Clone)]
pub struct AnnotationSpec {
    pub visibility: u8,
    pub type_idx: u32,
    /// `(name string idx, raw encoded value bytes)`
    pub elements: Vec<(u32, Vec<u8>)>,
}

/// One class definition.
#[derive(Clone)]
pub struct ClassSpec {
    pub class_idx: u32,
    pub access_flags: u32,
    pub superclass_idx: u32,
    pub interfaces: Vec<u16>,
    pub source_file_idx: u32,
    /// `(field idx, access flags)`
    pub static_fields: Vec<(u32, u32)>,
    pub instance_fields: Vec<(u32, u32)>,
    /// `(method idx, access flags, code)`
    pub direct_methods: Vec<(u32, u32, Option<CodeSpec>)>,
    pub virtual_methods: Vec<(u32, u32, Option<CodeSpec>)>,
    /// Raw encoded_array bytes for the static values.
    pub static_values: Option<Vec<u8>>,
    pub class_annotations: Vec<AnnotationSpec>,
    /// `(field idx, annotations)`
    pub field_annotations: Vec<(u32, Vec<AnnotationSpec>)>,
}

impl ClassSpec {
    pub fn new(class_idx: u32) -> Self {
        ClassSpec {
            class_idx,
            access_flags: ACC_PUBLIC,
            superclass_idx: NO_INDEX,
            interfaces: Vec::new(),
            source_file_idx: NO_INDEX,
            static_fields: Vec::new(),
            instance_fields: Vec::new(),
            direct_methods: Vec::new(),
            virtual_methods: Vec::new(),
            static_values: None,
            class_annotations: Vec::new(),
            field_annotations: Vec::new(),
        }
    }
}

/// Builds one dex input file in memory.
///
/// The table vectors are public so bulk tests (e.g. index-space overflow)
/// can append rows directly with precomputed indices instead of going
/// through the interning helpers.
pub struct DexBuilder {
    version: [u8; 3],
    pub strings: Vec<String>,
    pub types: Vec<u32>,
    pub protos: Vec<(u32, u32, Vec<u16>)>,
    pub fields: Vec<(u16, u16, u32)>,
    pub methods: Vec<(u16, u16, u32)>,
    pub classes: Vec<ClassSpec>,
    pub method_handles: Vec<(u16, u16)>,
    pub call_sites: Vec<Vec<u8>>,
}

impl DexBuilder {
    pub fn new() -> Self {
        Self::with_version(b"035")
    }

    pub fn with_version(version: &[u8; 3]) -> Self {
        DexBuilder {
            version: *version,
            strings: Vec::new(),
            types: Vec::new(),
            protos: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            classes: Vec::new(),
            method_handles: Vec::new(),
            call_sites: Vec::new(),
        }
    }

    /// Intern a string; returns its table index.
    pub fn string(&mut self, value: &str) -> u32 {
        if let Some(index) = self.strings.iter().position(|s| s == value) {
            return index as u32;
        }
        self.strings.push(value.to_string());
        (self.strings.len() - 1) as u32
    }

    /// Intern a type by descriptor; returns its table index.
    pub fn type_desc(&mut self, descriptor: &str) -> u32 {
        let string_idx = self.string(descriptor);
        if let Some(index) = self.types.iter().position(|&s| s == string_idx) {
            return index as u32;
        }
        self.types.push(string_idx);
        (self.types.len() - 1) as u32
    }

    /// Intern a prototype; returns its table index.
    pub fn proto(&mut self, shorty: &str, return_desc: &str, params: &[&str]) -> u32 {
        let shorty_idx = self.string(shorty);
        let return_idx = self.type_desc(return_desc);
        let param_idxs: Vec<u16> = params
            .iter()
            .map(|desc| self.type_desc(desc) as u16)
            .collect();

        let row = (shorty_idx, return_idx, param_idxs);
        if let Some(index) = self.protos.iter().position(|existing| *existing == row) {
            return index as u32;
        }
        self.protos.push(row);
        (self.protos.len() - 1) as u32
    }

    /// Intern a field id; returns its table index.
    pub fn field(&mut self, class: &str, ty: &str, name: &str) -> u32 {
        let class_idx = self.type_desc(class) as u16;
        let type_idx = self.type_desc(ty) as u16;
        let name_idx = self.string(name);

        let row = (class_idx, type_idx, name_idx);
        if let Some(index) = self.fields.iter().position(|existing| *existing == row) {
            return index as u32;
        }
        self.fields.push(row);
        (self.fields.len() - 1) as u32
    }

    /// Intern a method id; returns its table index.
    pub fn method(
        &mut self,
        class: &str,
        name: &str,
        shorty: &str,
        return_desc: &str,
        params: &[&str],
    ) -> u32 {
        let class_idx = self.type_desc(class) as u16;
        let proto_idx = self.proto(shorty, return_desc, params) as u16;
        let name_idx = self.string(name);

        let row = (class_idx, proto_idx, name_idx);
        if let Some(index) = self.methods.iter().position(|existing| *existing == row) {
            return index as u32;
        }
        self.methods.push(row);
        (self.methods.len() - 1) as u32
    }

    /// Add a method handle row; returns its table index.
    pub fn method_handle(&mut self, kind: u16, member_idx: u16) -> u32 {
        self.method_handles.push((kind, member_idx));
        (self.method_handles.len() - 1) as u32
    }

    /// Add a call site with raw encoded_array bytes; returns its index.
    pub fn call_site(&mut self, raw_array: Vec<u8>) -> u32 {
        self.call_sites.push(raw_array);
        (self.call_sites.len() - 1) as u32
    }

    /// Add a class definition.
    pub fn class(&mut self, spec: ClassSpec) {
        self.classes.push(spec);
    }

    /// Assemble the file.
    pub fn build(&self) -> Vec<u8> {
        let n_strings = self.strings.len() as u32;
        let n_types = self.types.len() as u32;
        let n_protos = self.protos.len() as u32;
        let n_fields = self.fields.len() as u32;
        let n_methods = self.methods.len() as u32;
        let n_classes = self.classes.len() as u32;
        let n_call_sites = self.call_sites.len() as u32;
        let n_method_handles = self.method_handles.len() as u32;

        let mut cursor = HEADER_SIZE;
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

        let mut data = Writer::new();
        let abs = |data: &Writer| data_off + data.len() as u32;

        // proto parameter lists
        let mut proto_param_offs = vec![0u32; self.protos.len()];
        for (index, (_, _, params)) in self.protos.iter().enumerate() {
            if params.is_empty() {
                continue;
            }
            data.align_to(4);
            proto_param_offs[index] = abs(&data);
            data.write_le::<u32>(params.len() as u32);
            for &param in params {
                data.write_le::<u16>(param);
            }
        }

        #[derive(Default, Clone)]
        struct ClassOffsets {
            interfaces_off: u32,
            annotations_off: u32,
            class_data_off: u32,
            static_values_off: u32,
            direct_code: Vec<u32>,
            virtual_code: Vec<u32>,
        }
        let mut offsets = vec![ClassOffsets::default(); self.classes.len()];

        // interface lists
        for (class_index, class) in self.classes.iter().enumerate() {
            if class.interfaces.is_empty() {
                continue;
            }
            data.align_to(4);
            offsets[class_index].interfaces_off = abs(&data);
            data.write_le::<u32>(class.interfaces.len() as u32);
            for &interface in &class.interfaces {
                data.write_le::<u16>(interface);
            }
        }

        // debug blobs, then code items
        for (class_index, class) in self.classes.iter().enumerate() {
            let emit_methods = |data: &mut Writer, methods: &[(u32, u32, Option<CodeSpec>)]| {
                let mut code_offs = Vec::with_capacity(methods.len());
                for (_, _, code) in methods {
                    match code {
                        Some(spec) => {
                            let debug_off = match &spec.debug {
                                Some(raw) => {
                                    let off = data_off + data.len() as u32;
                                    data.write_bytes(raw);
                                    off
                                }
                                None => 0,
                            };
                            data.align_to(4);
                            code_offs.push(data_off + data.len() as u32);
                            write_code(data, spec, debug_off);
                        }
                        None => code_offs.push(0),
                    }
                }
                code_offs
            };

            offsets[class_index].direct_code = emit_methods(&mut data, &class.direct_methods);
            offsets[class_index].virtual_code = emit_methods(&mut data, &class.virtual_methods);
        }

        // class data
        for (class_index, class) in self.classes.iter().enumerate() {
            let members = class.static_fields.len()
                + class.instance_fields.len()
                + class.direct_methods.len()
                + class.virtual_methods.len();
            if members == 0 {
                continue;
            }

            offsets[class_index].class_data_off = abs(&data);
            data.write_uleb128(class.static_fields.len() as u32);
            data.write_uleb128(class.instance_fields.len() as u32);
            data.write_uleb128(class.direct_methods.len() as u32);
            data.write_uleb128(class.virtual_methods.len() as u32);

            let write_fields = |data: &mut Writer, rows: &[(u32, u32)]| {
                let mut previous = 0u32;
                for (position, &(index, flags)) in rows.iter().enumerate() {
                    let diff = if position == 0 { index } else { index - previous };
                    previous = index;
                    data.write_uleb128(diff);
                    data.write_uleb128(flags);
                }
            };
            write_fields(&mut data, &class.static_fields);
            write_fields(&mut data, &class.instance_fields);

            let write_methods =
                |data: &mut Writer, rows: &[(u32, u32, Option<CodeSpec>)], code_offs: &[u32]| {
                    let mut previous = 0u32;
                    for (position, (index, flags, _)) in rows.iter().enumerate() {
                        let diff = if position == 0 { *index } else { index - previous };
                        previous = *index;
                        data.write_uleb128(diff);
                        data.write_uleb128(*flags);
                        data.write_uleb128(code_offs[position]);
                    }
                };
            write_methods(
                &mut data,
                &class.direct_methods,
                &offsets[class_index].direct_code.clone(),
            );
            write_methods(
                &mut data,
                &class.virtual_methods,
                &offsets[class_index].virtual_code.clone(),
            );
        }

        // static value arrays
        for (class_index, class) in self.classes.iter().enumerate() {
            if let Some(raw) = &class.static_values {
                offsets[class_index].static_values_off = abs(&data);
                data.write_bytes(raw);
            }
        }

        // annotations: items, sets, directories
        for (class_index, class) in self.classes.iter().enumerate() {
            if class.class_annotations.is_empty() && class.field_annotations.is_empty() {
                continue;
            }

            let emit_set = |data: &mut Writer, specs: &[AnnotationSpec]| -> u32 {
                let item_offs: Vec<u32> = specs
                    .iter()
                    .map(|spec| {
                        let off = data_off + data.len() as u32;
                        data.write_le::<u8>(spec.visibility);
                        data.write_uleb128(spec.type_idx);
                        data.write_uleb128(spec.elements.len() as u32);
                        for (name_idx, raw_value) in &spec.elements {
                            data.write_uleb128(*name_idx);
                            data.write_bytes(raw_value);
                        }
                        off
                    })
                    .collect();

                data.align_to(4);
                let set_off = data_off + data.len() as u32;
                data.write_le::<u32>(item_offs.len() as u32);
                for off in item_offs {
                    data.write_le::<u32>(off);
                }
                set_off
            };

            let class_set_off = if class.class_annotations.is_empty() {
                0
            } else {
                emit_set(&mut data, &class.class_annotations)
            };
            let field_sets: Vec<(u32, u32)> = class
                .field_annotations
                .iter()
                .map(|(field_idx, specs)| (*field_idx, emit_set(&mut data, specs)))
                .collect();

            data.align_to(4);
            offsets[class_index].annotations_off = abs(&data);
            data.write_le::<u32>(class_set_off);
            data.write_le::<u32>(field_sets.len() as u32);
            data.write_le::<u32>(0); // annotated methods
            data.write_le::<u32>(0); // annotated parameters
            for (field_idx, set_off) in field_sets {
                data.write_le::<u32>(field_idx);
                data.write_le::<u32>(set_off);
            }
        }

        // call site arrays
        let mut call_site_offs = Vec::with_capacity(self.call_sites.len());
        for raw in &self.call_sites {
            call_site_offs.push(abs(&data));
            data.write_bytes(raw);
        }

        // string data
        let mut string_offs = Vec::with_capacity(self.strings.len());
        for value in &self.strings {
            string_offs.push(abs(&data));
            let (utf16_len, payload) = mutf8::encode_str(value);
            data.write_string_data(utf16_len, &payload);
        }

        // minimal map: only the sections the header cannot describe
        let mut map_off = 0u32;
        if n_method_handles > 0 || n_call_sites > 0 {
            data.align_to(4);
            map_off = abs(&data);

            let mut entries: Vec<(u16, u32, u32)> = Vec::new();
            if n_call_sites > 0 {
                entries.push((0x0007, n_call_sites, call_site_ids_off));
            }
            if n_method_handles > 0 {
                entries.push((0x0008, n_method_handles, method_handles_off));
            }
            data.write_le::<u32>(entries.len() as u32);
            for (kind, count, offset) in entries {
                data.write_le::<u16>(kind);
                data.write_le::<u16>(0);
                data.write_le::<u32>(count);
                data.write_le::<u32>(offset);
            }
        }

        let data_bytes = data.into_bytes();
        let file_size = data_off + data_bytes.len() as u32;

        let mut out = Writer::with_capacity(file_size as usize);
        out.write_bytes(b"dex\n");
        out.write_bytes(&self.version);
        out.write_le::<u8>(0);
        out.write_le::<u32>(0); // checksum, patched below
        out.write_bytes(&[0u8; 20]); // signature left blank
        out.write_le::<u32>(file_size);
        out.write_le::<u32>(HEADER_SIZE);
        out.write_le::<u32>(0x1234_5678);
        out.write_le::<u32>(0);
        out.write_le::<u32>(0);
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
        out.write_le::<u32>(data_bytes.len() as u32);
        out.write_le::<u32>(data_off);
        assert_eq!(out.len() as u32, HEADER_SIZE);

        for off in string_offs {
            out.write_le::<u32>(off);
        }
        for &string_idx in &self.types {
            out.write_le::<u32>(string_idx);
        }
        for (index, (shorty_idx, return_idx, _)) in self.protos.iter().enumerate() {
            out.write_le::<u32>(*shorty_idx);
            out.write_le::<u32>(*return_idx);
            out.write_le::<u32>(proto_param_offs[index]);
        }
        for &(class_idx, type_idx, name_idx) in &self.fields {
            out.write_le::<u16>(class_idx);
            out.write_le::<u16>(type_idx);
            out.write_le::<u32>(name_idx);
        }
        for &(class_idx, proto_idx, name_idx) in &self.methods {
            out.write_le::<u16>(class_idx);
            out.write_le::<u16>(proto_idx);
            out.write_le::<u32>(name_idx);
        }
        for (class, class_offs) in self.classes.iter().zip(&offsets) {
            out.write_le::<u32>(class.class_idx);
            out.write_le::<u32>(class.access_flags);
            out.write_le::<u32>(class.superclass_idx);
            out.write_le::<u32>(class_offs.interfaces_off);
            out.write_le::<u32>(class.source_file_idx);
            out.write_le::<u32>(class_offs.annotations_off);
            out.write_le::<u32>(class_offs.class_data_off);
            out.write_le::<u32>(class_offs.static_values_off);
        }
        for off in call_site_offs {
            out.write_le::<u32>(off);
        }
        for &(kind, member_idx) in &self.method_handles {
            out.write_le::<u16>(kind);
            out.write_le::<u16>(0);
            out.write_le::<u16>(member_idx);
            out.write_le::<u16>(0);
        }
        assert_eq!(out.len() as u32, data_off);
        out.write_bytes(&data_bytes);

        let mut bytes = out.into_bytes();
        let checksum = adler32(&bytes[12..]);
        bytes[8..12].copy_from_slice(&checksum.to_le_bytes());
        bytes
    }
}

fn write_code(data: &mut Writer, spec: &CodeSpec, debug_off: u32) {
    data.write_le::<u16>(spec.registers);
    data.write_le::<u16>(spec.ins);
    data.write_le::<u16>(spec.outs);
    data.write_le::<u16>(spec.tries.len() as u16);
    data.write_le::<u32>(debug_off);
    data.write_le::<u32>(spec.insns.len() as u32);
    for &unit in &spec.insns {
        data.write_le::<u16>(unit);
    }

    if spec.tries.is_empty() {
        return;
    }
    if spec.insns.len() % 2 != 0 {
        data.write_le::<u16>(0);
    }

    let mut handler_list = Writer::new();
    handler_list.write_uleb128(spec.handlers.len() as u32);
    let mut handler_offs = Vec::with_capacity(spec.handlers.len());
    for (catches, catch_all) in &spec.handlers {
        handler_offs.push(handler_list.len() as u16);
        let typed = catches.len() as i32;
        handler_list.write_sleb128(if catch_all.is_some() { -typed } else { typed });
        for &(type_idx, addr) in catches {
            handler_list.write_uleb128(type_idx);
            handler_list.write_uleb128(addr);
        }
        if let Some(addr) = catch_all {
            handler_list.write_uleb128(*addr);
        }
    }

    for &(start, count, handler_index) in &spec.tries {
        data.write_le::<u32>(start);
        data.write_le::<u16>(count);
        data.write_le::<u16>(handler_offs[handler_index]);
    }
    data.write_bytes(handler_list.bytes());
}

fn adler32(bytes: &[u8]) -> u32 {
    const MOD_ADLER: u32 = 65521;
    let mut a: u32 = 1;
    let mut b: u32 = 0;
    for chunk in bytes.chunks(5552) {
        for &byte in chunk {
            a += u32::from(byte);
            b += a;
        }
        a %= MOD_ADLER;
        b %= MOD_ADLER;
    }
    (b << 16) | a
}
