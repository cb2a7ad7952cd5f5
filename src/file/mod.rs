//! Fully-buffered dex input container and composite record readers.
//!
//! # Architecture
//!
//! [`DexFile`] owns the raw bytes of one input (memory-mapped or an owned
//! buffer; every input is fully buffered before random access begins) plus
//! the parsed [`Header`] and [`Toc`]. On top of that it exposes *raw* record
//! accessors: id-table rows, type lists, class definitions, class data,
//! code items and debug info, all still speaking file-local indices. Turning
//! those indices into shared constants is the job of
//! [`crate::pool::Resolver`]; this layer stays pure and read-only.
//!
//! # Key Components
//!
//! - [`DexFile`] - container with section access and composite readers
//! - [`Parser`] - positioned cursor used by every reader
//! - [`crate::file::mutf8`] - the MUTF-8 string codec
//! - [`Header`], [`Toc`], [`DexVersion`] - container directory
//!
//! Try/catch regions are parsed in two passes over the same byte range with
//! cursor save/restore: the catch-handler list is decoded first into a table
//! indexed by its internal byte offsets, then the try records are resolved
//! against that table, since each try names its handler by offset.

pub mod io;
pub mod mutf8;
pub mod parser;
pub mod toc;

use std::collections::HashMap;
use std::path::Path;

use memmap2::Mmap;
use sha1::{Digest, Sha1};

pub use parser::Parser;
pub use toc::{DexVersion, Header, MapItemType, Section, Toc, NO_INDEX};

use crate::Result;

/// Compute the adler32 checksum the dex header stores over bytes 12..end.
#[must_use]
pub(crate) fn adler32(bytes: &[u8]) -> u32 {
    const MOD_ADLER: u32 = 65521;
    let mut a: u32 = 1;
    let mut b: u32 = 0;

    // Process in runs short enough that the sums cannot overflow before the
    // modulo is applied (5552 is the largest n with 255*n*(n+1)/2 + (n+1)*(65520) < 2^32)
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

enum Backing {
    Mapped(Mmap),
    Owned(Vec<u8>),
}

impl Backing {
    fn bytes(&self) -> &[u8] {
        match self {
            Backing::Mapped(map) => map,
            Backing::Owned(vec) => vec,
        }
    }
}

/// Raw proto_id row: three u32 fields.
#[derive(Debug, Clone, Copy)]
pub struct ProtoId {
    /// Index of the shorty descriptor string.
    pub shorty_idx: u32,
    /// Index of the return type.
    pub return_type_idx: u32,
    /// Offset of the parameter type list, 0 when the proto takes none.
    pub parameters_off: u32,
}

/// Raw field_id row: u16 class, u16 type, u32 name.
#[derive(Debug, Clone, Copy)]
pub struct FieldId {
    /// Index of the defining class type.
    pub class_idx: u16,
    /// Index of the field type.
    pub type_idx: u16,
    /// Index of the field name string.
    pub name_idx: u32,
}

/// Raw method_id row: u16 class, u16 proto, u32 name.
#[derive(Debug, Clone, Copy)]
pub struct MethodId {
    /// Index of the defining class type.
    pub class_idx: u16,
    /// Index of the method prototype.
    pub proto_idx: u16,
    /// Index of the method name string.
    pub name_idx: u32,
}

/// Raw method_handle row: kind plus a field-or-method index, with two
/// reserved u16 slots in between.
#[derive(Debug, Clone, Copy)]
pub struct MethodHandleId {
    /// Handle kind discriminator (see [`crate::constant::MethodHandleKind`]).
    pub kind: u16,
    /// Field id index for accessor kinds, method id index for invoke kinds.
    pub field_or_method_idx: u16,
}

/// Raw class_def row: eight u32 fields.
#[derive(Debug, Clone, Copy)]
pub struct ClassDefItem {
    /// Index of the type this row defines.
    pub class_idx: u32,
    /// Access flags of the class.
    pub access_flags: u32,
    /// Superclass type index, [`NO_INDEX`] for `java.lang.Object`.
    pub superclass_idx: u32,
    /// Offset of the implemented-interface type list, 0 when empty.
    pub interfaces_off: u32,
    /// Source file name string index, [`NO_INDEX`] when absent.
    pub source_file_idx: u32,
    /// Offset of the annotations directory, 0 when absent.
    pub annotations_off: u32,
    /// Offset of the class_data item, 0 for marker classes without members.
    pub class_data_off: u32,
    /// Offset of the static-values encoded array, 0 when absent.
    pub static_values_off: u32,
}

/// One field row of a class_data item with the delta encoding resolved.
#[derive(Debug, Clone, Copy)]
pub struct RawFieldMember {
    /// Absolute field id index.
    pub field_idx: u32,
    /// Access flags.
    pub access_flags: u32,
}

/// One method row of a class_data item with the delta encoding resolved.
#[derive(Debug, Clone, Copy)]
pub struct RawMethodMember {
    /// Absolute method id index.
    pub method_idx: u32,
    /// Access flags.
    pub access_flags: u32,
    /// Offset of the code item, 0 for abstract/native methods.
    pub code_off: u32,
}

/// A decoded class_data item: member tables with deltas resolved to
/// absolute indices.
#[derive(Debug, Clone, Default)]
pub struct RawClassData {
    /// Static fields in declaration order.
    pub static_fields: Vec<RawFieldMember>,
    /// Instance fields in declaration order.
    pub instance_fields: Vec<RawFieldMember>,
    /// Direct methods (private, static, constructors).
    pub direct_methods: Vec<RawMethodMember>,
    /// Virtual methods.
    pub virtual_methods: Vec<RawMethodMember>,
}

/// One try record with its handler resolved to an index into the code
/// item's handler table.
#[derive(Debug, Clone, Copy)]
pub struct RawTry {
    /// First covered instruction address, in 16-bit units from the start of
    /// the instruction stream.
    pub start_addr: u32,
    /// Number of covered 16-bit units.
    pub insn_count: u16,
    /// Index into [`RawCode::handlers`].
    pub handler_index: usize,
}

/// One catch handler: typed catches in order, plus an optional catch-all
/// address.
#[derive(Debug, Clone, Default)]
pub struct RawCatchHandler {
    /// `(type index, handler address)` pairs in declaration order.
    pub catches: Vec<(u32, u32)>,
    /// Catch-all handler address, if present.
    pub catch_all: Option<u32>,
}

/// A decoded code item with raw instruction units and resolved try/handler
/// tables. Instruction operands still carry file-local constant indices.
#[derive(Debug, Clone)]
pub struct RawCode {
    /// Number of registers the method uses.
    pub registers_size: u16,
    /// Number of words of incoming arguments.
    pub ins_size: u16,
    /// Number of words of outgoing argument space.
    pub outs_size: u16,
    /// Offset of the debug info item, 0 when absent.
    pub debug_info_off: u32,
    /// The instruction stream as raw 16-bit units.
    pub insns: Vec<u16>,
    /// Try records, in file order.
    pub tries: Vec<RawTry>,
    /// Catch handlers, in file order; referenced by [`RawTry::handler_index`].
    pub handlers: Vec<RawCatchHandler>,
}

/// A decoded annotations directory with raw offsets.
#[derive(Debug, Clone, Default)]
pub struct RawAnnotationsDirectory {
    /// Offset of the class annotation set, 0 when absent.
    pub class_annotations_off: u32,
    /// `(field id index, annotation set offset)` pairs.
    pub field_annotations: Vec<(u32, u32)>,
    /// `(method id index, annotation set offset)` pairs.
    pub method_annotations: Vec<(u32, u32)>,
    /// `(method id index, annotation set ref list offset)` pairs.
    pub parameter_annotations: Vec<(u32, u32)>,
}

/// Debug info bytecode event, with string/type references still file-local.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawDebugEvent {
    /// Advance the address register.
    AdvancePc(u32),
    /// Advance the line register.
    AdvanceLine(i32),
    /// Introduce a local variable: register, name index, type index.
    StartLocal {
        /// Register holding the local.
        register: u32,
        /// Name string index, absent for synthetic locals.
        name_idx: Option<u32>,
        /// Type index, absent for untyped slots.
        type_idx: Option<u32>,
    },
    /// Introduce a local with a generic signature.
    StartLocalExtended {
        /// Register holding the local.
        register: u32,
        /// Name string index.
        name_idx: Option<u32>,
        /// Type index.
        type_idx: Option<u32>,
        /// Generic signature string index.
        sig_idx: Option<u32>,
    },
    /// A local goes out of scope.
    EndLocal(u32),
    /// A local comes back into scope in the same register.
    RestartLocal(u32),
    /// Prologue end marker.
    SetPrologueEnd,
    /// Epilogue begin marker.
    SetEpilogueBegin,
    /// Switch the current source file.
    SetFile(Option<u32>),
    /// A special opcode (≥ 0x0a) advancing both line and address.
    Special(u8),
}

/// A decoded debug_info item with file-local indices.
#[derive(Debug, Clone, Default)]
pub struct RawDebugInfo {
    /// Initial value of the line register.
    pub line_start: u32,
    /// Parameter name string indices, absent entries included.
    pub parameter_names: Vec<Option<u32>>,
    /// The event sequence, end marker excluded.
    pub events: Vec<RawDebugEvent>,
}

/// A parsed, fully-buffered dex input file.
///
/// `DexFile` performs the structural header/map parse up front and then
/// serves random-access reads of individual records. All readers are pure:
/// they never mutate the buffer and report malformations as errors.
///
/// # Examples
///
/// ```rust,no_run
/// use dexmerge::DexFile;
///
/// let dex = DexFile::from_file(std::path::Path::new("classes.dex"))?;
/// println!(
///     "{} strings, {} types, {} classes",
///     dex.string_ids_size(),
///     dex.type_ids_size(),
///     dex.class_defs_size()
/// );
/// # Ok::<(), dexmerge::Error>(())
/// ```
pub struct DexFile {
    backing: Backing,
    header: Header,
    toc: Toc,
}

impl DexFile {
    /// Memory-map a dex file from disk and parse its directory.
    ///
    /// # Errors
    /// Returns [`crate::Error::FileError`] for I/O failures and the parse
    /// errors of [`DexFile::parse`] for structural problems.
    pub fn from_file(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        let mapped = unsafe { Mmap::map(&file)? };

        if mapped.is_empty() {
            return Err(crate::Error::Empty);
        }

        let header = Header::parse(&mapped)?;
        let toc = Toc::from_header(&header, &mapped)?;
        Ok(DexFile {
            backing: Backing::Mapped(mapped),
            header,
            toc,
        })
    }

    /// Parse a dex file from an owned byte buffer.
    ///
    /// # Errors
    /// Returns [`crate::Error::Empty`] for an empty buffer,
    /// [`crate::Error::NotSupported`] for an unknown magic, and
    /// [`crate::Error::Malformed`] for structural inconsistencies.
    pub fn parse(bytes: Vec<u8>) -> Result<Self> {
        if bytes.is_empty() {
            return Err(crate::Error::Empty);
        }

        let header = Header::parse(&bytes)?;
        let toc = Toc::from_header(&header, &bytes)?;
        Ok(DexFile {
            backing: Backing::Owned(bytes),
            header,
            toc,
        })
    }

    /// The complete file contents.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        self.backing.bytes()
    }

    /// The parsed header.
    #[must_use]
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// The unified table of contents.
    #[must_use]
    pub fn toc(&self) -> &Toc {
        &self.toc
    }

    /// The format version of this file.
    #[must_use]
    pub fn version(&self) -> DexVersion {
        self.header.version
    }

    /// Verify the stored adler32 checksum against the file contents.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] on a mismatch.
    pub fn verify_checksum(&self) -> Result<()> {
        let computed = adler32(&self.data()[12..]);
        if computed != self.header.checksum {
            return Err(malformed_error!(
                "Checksum mismatch: header {:#010x}, computed {:#010x}",
                self.header.checksum,
                computed
            ));
        }
        Ok(())
    }

    /// Verify the stored SHA-1 signature against the file contents.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] on a mismatch.
    pub fn verify_signature(&self) -> Result<()> {
        let mut hasher = Sha1::new();
        hasher.update(&self.data()[32..]);
        let computed: [u8; 20] = hasher.finalize().into();

        if computed != self.header.signature {
            return Err(malformed_error!(
                "SHA-1 signature mismatch against header at bytes 12..32"
            ));
        }
        Ok(())
    }

    /// Number of declared strings.
    #[must_use]
    pub fn string_ids_size(&self) -> u32 {
        self.toc.string_ids.size
    }

    /// Number of declared types.
    #[must_use]
    pub fn type_ids_size(&self) -> u32 {
        self.toc.type_ids.size
    }

    /// Number of declared prototypes.
    #[must_use]
    pub fn proto_ids_size(&self) -> u32 {
        self.toc.proto_ids.size
    }

    /// Number of declared fields.
    #[must_use]
    pub fn field_ids_size(&self) -> u32 {
        self.toc.field_ids.size
    }

    /// Number of declared methods.
    #[must_use]
    pub fn method_ids_size(&self) -> u32 {
        self.toc.method_ids.size
    }

    /// Number of class definitions.
    #[must_use]
    pub fn class_defs_size(&self) -> u32 {
        self.toc.class_defs.size
    }

    fn table_entry(&self, section: Section, index: u32, width: u32, what: &str) -> Result<Parser> {
        if index >= section.size {
            return Err(malformed_error!(
                "{} index {} out of range (table holds {})",
                what,
                index,
                section.size
            ));
        }

        let mut parser = Parser::new(self.data());
        parser.seek((section.offset + index * width) as usize)?;
        Ok(parser)
    }

    /// Read the string_data item for string id `index`: declared UTF-16 unit
    /// count plus the raw MUTF-8 payload.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for an out-of-range index or a
    /// payload failing MUTF-8/length validation.
    pub fn string_data_at(&self, index: u32) -> Result<(u32, &[u8])> {
        let mut parser = self.table_entry(self.toc.string_ids, index, 4, "String")?;
        let data_off = parser.read_le::<u32>()?;
        parser.seek(data_off as usize)?;
        parser.read_mutf8()
    }

    /// Read the descriptor string index of type id `index`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for an out-of-range index.
    pub fn type_id_at(&self, index: u32) -> Result<u32> {
        let mut parser = self.table_entry(self.toc.type_ids, index, 4, "Type")?;
        parser.read_le::<u32>()
    }

    /// Read the proto_id row at `index`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for an out-of-range index.
    pub fn proto_id_at(&self, index: u32) -> Result<ProtoId> {
        let mut parser = self.table_entry(self.toc.proto_ids, index, 12, "Proto")?;
        Ok(ProtoId {
            shorty_idx: parser.read_le::<u32>()?,
            return_type_idx: parser.read_le::<u32>()?,
            parameters_off: parser.read_le::<u32>()?,
        })
    }

    /// Read the field_id row at `index`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for an out-of-range index.
    pub fn field_id_at(&self, index: u32) -> Result<FieldId> {
        let mut parser = self.table_entry(self.toc.field_ids, index, 8, "Field")?;
        Ok(FieldId {
            class_idx: parser.read_le::<u16>()?,
            type_idx: parser.read_le::<u16>()?,
            name_idx: parser.read_le::<u32>()?,
        })
    }

    /// Read the method_id row at `index`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for an out-of-range index.
    pub fn method_id_at(&self, index: u32) -> Result<MethodId> {
        let mut parser = self.table_entry(self.toc.method_ids, index, 8, "Method")?;
        Ok(MethodId {
            class_idx: parser.read_le::<u16>()?,
            proto_idx: parser.read_le::<u16>()?,
            name_idx: parser.read_le::<u32>()?,
        })
    }

    /// Read the method_handle row at `index`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for an out-of-range index or when
    /// the file carries no method handle section.
    pub fn method_handle_at(&self, index: u32) -> Result<MethodHandleId> {
        let Some(section) = self.toc.method_handles else {
            return Err(malformed_error!(
                "Method handle index {} in a file without a method handle section",
                index
            ));
        };

        let mut parser = self.table_entry(section, index, 8, "Method handle")?;
        let kind = parser.read_le::<u16>()?;
        let _reserved = parser.read_le::<u16>()?;
        let field_or_method_idx = parser.read_le::<u16>()?;
        let _reserved = parser.read_le::<u16>()?;

        Ok(MethodHandleId {
            kind,
            field_or_method_idx,
        })
    }

    /// Read the encoded-array offset of call site id `index`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for an out-of-range index or when
    /// the file carries no call site section.
    pub fn call_site_off_at(&self, index: u32) -> Result<u32> {
        let Some(section) = self.toc.call_sites else {
            return Err(malformed_error!(
                "Call site index {} in a file without a call site section",
                index
            ));
        };

        let mut parser = self.table_entry(section, index, 4, "Call site")?;
        parser.read_le::<u32>()
    }

    /// Read the class_def row at `index`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for an out-of-range index.
    pub fn class_def_at(&self, index: u32) -> Result<ClassDefItem> {
        let mut parser = self.table_entry(self.toc.class_defs, index, 32, "Class def")?;
        Ok(ClassDefItem {
            class_idx: parser.read_le::<u32>()?,
            access_flags: parser.read_le::<u32>()?,
            superclass_idx: parser.read_le::<u32>()?,
            interfaces_off: parser.read_le::<u32>()?,
            source_file_idx: parser.read_le::<u32>()?,
            annotations_off: parser.read_le::<u32>()?,
            class_data_off: parser.read_le::<u32>()?,
            static_values_off: parser.read_le::<u32>()?,
        })
    }

    /// Read the 4-byte aligned type list at `offset`: a u32 count followed by
    /// u16 type indices.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for a misaligned offset and
    /// [`crate::Error::OutOfBounds`] for a truncated list.
    pub fn type_list_at(&self, offset: u32) -> Result<Vec<u16>> {
        if offset % 4 != 0 {
            return Err(malformed_error!("Type list at unaligned offset {}", offset));
        }

        let mut parser = Parser::new(self.data());
        parser.seek(offset as usize)?;

        let count = parser.read_le::<u32>()?;
        let mut entries = Vec::with_capacity(count as usize);
        for _ in 0..count {
            entries.push(parser.read_le::<u16>()?);
        }
        Ok(entries)
    }

    /// Read the class_data item at `offset`, resolving the delta-encoded
    /// member indices to absolute ids.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] / [`crate::Error::OutOfBounds`]
    /// for truncated or inconsistent member tables.
    pub fn class_data_at(&self, offset: u32) -> Result<RawClassData> {
        let mut parser = Parser::new(self.data());
        parser.seek(offset as usize)?;

        let static_fields_size = parser.read_uleb128()?;
        let instance_fields_size = parser.read_uleb128()?;
        let direct_methods_size = parser.read_uleb128()?;
        let virtual_methods_size = parser.read_uleb128()?;

        let read_fields = |parser: &mut Parser, count: u32| -> Result<Vec<RawFieldMember>> {
            let mut members = Vec::with_capacity(count as usize);
            let mut field_idx = 0u32;
            for i in 0..count {
                let diff = parser.read_uleb128()?;
                field_idx = if i == 0 { diff } else { field_idx + diff };
                members.push(RawFieldMember {
                    field_idx,
                    access_flags: parser.read_uleb128()?,
                });
            }
            Ok(members)
        };

        let read_methods = |parser: &mut Parser, count: u32| -> Result<Vec<RawMethodMember>> {
            let mut members = Vec::with_capacity(count as usize);
            let mut method_idx = 0u32;
            for i in 0..count {
                let diff = parser.read_uleb128()?;
                method_idx = if i == 0 { diff } else { method_idx + diff };
                members.push(RawMethodMember {
                    method_idx,
                    access_flags: parser.read_uleb128()?,
                    code_off: parser.read_uleb128()?,
                });
            }
            Ok(members)
        };

        Ok(RawClassData {
            static_fields: read_fields(&mut parser, static_fields_size)?,
            instance_fields: read_fields(&mut parser, instance_fields_size)?,
            direct_methods: read_methods(&mut parser, direct_methods_size)?,
            virtual_methods: read_methods(&mut parser, virtual_methods_size)?,
        })
    }

    /// Read the code item at `offset`.
    ///
    /// The try table names each catch handler by a byte offset into the
    /// handler list that physically follows it, so the region is parsed in
    /// two passes: the cursor skips ahead to decode the complete handler
    /// list into an offset-indexed table, then returns to resolve the try
    /// records against it.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for a dangling handler offset and
    /// [`crate::Error::OutOfBounds`] for a truncated item.
    pub fn code_at(&self, offset: u32) -> Result<RawCode> {
        let mut parser = Parser::new(self.data());
        parser.seek(offset as usize)?;

        let registers_size = parser.read_le::<u16>()?;
        let ins_size = parser.read_le::<u16>()?;
        let outs_size = parser.read_le::<u16>()?;
        let tries_size = parser.read_le::<u16>()?;
        let debug_info_off = parser.read_le::<u32>()?;
        let insns_size = parser.read_le::<u32>()?;

        let mut insns = Vec::with_capacity(insns_size as usize);
        for _ in 0..insns_size {
            insns.push(parser.read_le::<u16>()?);
        }

        let mut tries = Vec::new();
        let mut handlers = Vec::new();

        if tries_size > 0 {
            if insns_size % 2 != 0 {
                let _padding = parser.read_le::<u16>()?;
            }

            // Pass one: skip the try records and decode the handler list
            // into a byte-offset-indexed table.
            let tries_start = parser.pos();
            parser.seek(tries_start + usize::from(tries_size) * 8)?;

            let handlers_start = parser.pos();
            let handlers_count = parser.read_uleb128()?;
            let mut handler_offsets: HashMap<usize, usize> = HashMap::new();

            for _ in 0..handlers_count {
                let rel = parser.pos() - handlers_start;

                let size = parser.read_sleb128()?;
                let mut handler = RawCatchHandler::default();
                for _ in 0..size.unsigned_abs() {
                    let type_idx = parser.read_uleb128()?;
                    let addr = parser.read_uleb128()?;
                    handler.catches.push((type_idx, addr));
                }
                if size <= 0 {
                    handler.catch_all = Some(parser.read_uleb128()?);
                }

                handler_offsets.insert(rel, handlers.len());
                handlers.push(handler);
            }
            let handlers_end = parser.pos();

            // Pass two: restore the cursor and resolve the try records.
            parser.seek(tries_start)?;
            for _ in 0..tries_size {
                let start_addr = parser.read_le::<u32>()?;
                let insn_count = parser.read_le::<u16>()?;
                let handler_off = parser.read_le::<u16>()?;

                let Some(&handler_index) = handler_offsets.get(&usize::from(handler_off)) else {
                    return Err(malformed_error!(
                        "Try record references handler offset {} which is not the start of a handler",
                        handler_off
                    ));
                };

                tries.push(RawTry {
                    start_addr,
                    insn_count,
                    handler_index,
                });
            }
            parser.seek(handlers_end)?;
        }

        Ok(RawCode {
            registers_size,
            ins_size,
            outs_size,
            debug_info_off,
            insns,
            tries,
            handlers,
        })
    }

    /// Read the annotations directory at `offset`.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] for a truncated directory.
    pub fn annotations_directory_at(&self, offset: u32) -> Result<RawAnnotationsDirectory> {
        let mut parser = Parser::new(self.data());
        parser.seek(offset as usize)?;

        let class_annotations_off = parser.read_le::<u32>()?;
        let fields_size = parser.read_le::<u32>()?;
        let methods_size = parser.read_le::<u32>()?;
        let parameters_size = parser.read_le::<u32>()?;

        let read_pairs = |parser: &mut Parser, count: u32| -> Result<Vec<(u32, u32)>> {
            let mut pairs = Vec::with_capacity(count as usize);
            for _ in 0..count {
                let idx = parser.read_le::<u32>()?;
                let off = parser.read_le::<u32>()?;
                pairs.push((idx, off));
            }
            Ok(pairs)
        };

        Ok(RawAnnotationsDirectory {
            class_annotations_off,
            field_annotations: read_pairs(&mut parser, fields_size)?,
            method_annotations: read_pairs(&mut parser, methods_size)?,
            parameter_annotations: read_pairs(&mut parser, parameters_size)?,
        })
    }

    /// Read the annotation set at `offset`: a list of annotation item offsets.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] for a truncated set.
    pub fn annotation_set_at(&self, offset: u32) -> Result<Vec<u32>> {
        let mut parser = Parser::new(self.data());
        parser.seek(offset as usize)?;

        let count = parser.read_le::<u32>()?;
        let mut offsets = Vec::with_capacity(count as usize);
        for _ in 0..count {
            offsets.push(parser.read_le::<u32>()?);
        }
        Ok(offsets)
    }

    /// Read the annotation set ref list at `offset`: per-parameter annotation
    /// set offsets, 0 marking a parameter without annotations.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] for a truncated list.
    pub fn annotation_set_ref_list_at(&self, offset: u32) -> Result<Vec<u32>> {
        // Same shape as an annotation set, different referent
        self.annotation_set_at(offset)
    }

    /// Read the debug_info item at `offset`.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] for a truncated item.
    pub fn debug_info_at(&self, offset: u32) -> Result<RawDebugInfo> {
        let mut parser = Parser::new(self.data());
        parser.seek(offset as usize)?;

        let line_start = parser.read_uleb128()?;
        let parameters_size = parser.read_uleb128()?;
        let mut parameter_names = Vec::with_capacity(parameters_size as usize);
        for _ in 0..parameters_size {
            parameter_names.push(parser.read_uleb128p1()?);
        }

        let mut events = Vec::new();
        loop {
            let opcode = parser.read_le::<u8>()?;
            let event = match opcode {
                0x00 => break,
                0x01 => RawDebugEvent::AdvancePc(parser.read_uleb128()?),
                0x02 => RawDebugEvent::AdvanceLine(parser.read_sleb128()?),
                0x03 => RawDebugEvent::StartLocal {
                    register: parser.read_uleb128()?,
                    name_idx: parser.read_uleb128p1()?,
                    type_idx: parser.read_uleb128p1()?,
                },
                0x04 => RawDebugEvent::StartLocalExtended {
                    register: parser.read_uleb128()?,
                    name_idx: parser.read_uleb128p1()?,
                    type_idx: parser.read_uleb128p1()?,
                    sig_idx: parser.read_uleb128p1()?,
                },
                0x05 => RawDebugEvent::EndLocal(parser.read_uleb128()?),
                0x06 => RawDebugEvent::RestartLocal(parser.read_uleb128()?),
                0x07 => RawDebugEvent::SetPrologueEnd,
                0x08 => RawDebugEvent::SetEpilogueBegin,
                0x09 => RawDebugEvent::SetFile(parser.read_uleb128p1()?),
                special => RawDebugEvent::Special(special),
            };
            events.push(event);
        }

        Ok(RawDebugInfo {
            line_start,
            parameter_names,
            events,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adler32_vectors() {
        // Reference values from the zlib sample implementation
        assert_eq!(adler32(b""), 1);
        assert_eq!(adler32(b"Wikipedia"), 0x11E6_0398);
    }

    #[test]
    fn class_data_delta_decoding() {
        // 1 static field (idx 3, flags 0x0a), 2 instance fields
        // (idx 5 then 5+2=7), no methods
        #[rustfmt::skip]
        let class_data: [u8; 11] = [
            0x01, 0x02, 0x00, 0x00,
            0x03, 0x0A,
            0x05, 0x01,
            0x02, 0x01,
            0x00,
        ];

        let mut bytes = vec![0u8; 16];
        bytes.extend_from_slice(&class_data);
        let file = fake_file(bytes);

        let data = file.class_data_at(16).unwrap();
        assert_eq!(data.static_fields.len(), 1);
        assert_eq!(data.static_fields[0].field_idx, 3);
        assert_eq!(data.static_fields[0].access_flags, 0x0A);
        assert_eq!(data.instance_fields[0].field_idx, 5);
        assert_eq!(data.instance_fields[1].field_idx, 7);
    }

    #[test]
    fn code_item_two_pass_try_catch() {
        // 4 insns (nop), one try covering [0,4) with one typed catch
        // (type 2 -> addr 3) plus catch-all at 2
        #[rustfmt::skip]
        let code: &[u8] = &[
            0x01, 0x00,             // registers_size
            0x00, 0x00,             // ins_size
            0x00, 0x00,             // outs_size
            0x01, 0x00,             // tries_size
            0x00, 0x00, 0x00, 0x00, // debug_info_off
            0x04, 0x00, 0x00, 0x00, // insns_size
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // 4 nops
            0x00, 0x00, 0x00, 0x00, // try.start_addr
            0x04, 0x00,             // try.insn_count
            0x01, 0x00,             // try.handler_off -> first handler
            0x01,                   // handler list size
            0x7F,                   // handler size -1 (one catch + catch-all)
            0x02, 0x03,             // type 2 -> addr 3
            0x02,                   // catch_all addr 2
        ];

        let file = fake_file(code.to_vec());
        let parsed = file.code_at(0).unwrap();

        assert_eq!(parsed.insns.len(), 4);
        assert_eq!(parsed.tries.len(), 1);
        assert_eq!(parsed.tries[0].handler_index, 0);
        assert_eq!(parsed.handlers[0].catches, vec![(2, 3)]);
        assert_eq!(parsed.handlers[0].catch_all, Some(2));
    }

    #[test]
    fn code_item_dangling_handler_offset() {
        #[rustfmt::skip]
        let code: &[u8] = &[
            0x01, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x01, 0x00,
            0x00, 0x00, 0x00, 0x00,
            0x02, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
            0x02, 0x00,
            0x09, 0x00,             // handler_off 9: no handler starts there
            0x01,
            0x01,
            0x02, 0x03,
        ];

        let file = fake_file(code.to_vec());
        assert!(file.code_at(0).is_err());
    }

    #[test]
    fn debug_info_events() {
        #[rustfmt::skip]
        let info: &[u8] = &[
            0x05,       // line_start
            0x01,       // one parameter
            0x03,       // name idx 2
            0x07,       // prologue end
            0x03, 0x00, 0x03, 0x00, // start local: r0, name 2, type absent
            0x0A,       // special
            0x00,       // end sequence
        ];

        let file = fake_file(info.to_vec());
        let parsed = file.debug_info_at(0).unwrap();
        assert_eq!(parsed.line_start, 5);
        assert_eq!(parsed.parameter_names, vec![Some(2)]);
        assert_eq!(parsed.events.len(), 3);
        assert_eq!(
            parsed.events[1],
            RawDebugEvent::StartLocal {
                register: 0,
                name_idx: Some(2),
                type_idx: None,
            }
        );
        assert_eq!(parsed.events[2], RawDebugEvent::Special(0x0A));
    }

    /// Wrap raw bytes in a `DexFile` without header parsing, for
    /// record-reader tests that address offsets directly.
    fn fake_file(bytes: Vec<u8>) -> DexFile {
        DexFile {
            backing: Backing::Owned(bytes),
            header: Header {
                version: DexVersion::V035,
                checksum: 0,
                signature: [0; 20],
                file_size: 0,
                header_size: toc::HEADER_SIZE,
                endian_tag: toc::ENDIAN_CONSTANT,
                link: Section::default(),
                map_off: 0,
                string_ids: Section::default(),
                type_ids: Section::default(),
                proto_ids: Section::default(),
                field_ids: Section::default(),
                method_ids: Section::default(),
                class_defs: Section::default(),
                data: Section::default(),
            },
            toc: Toc {
                string_ids: Section::default(),
                type_ids: Section::default(),
                proto_ids: Section::default(),
                field_ids: Section::default(),
                method_ids: Section::default(),
                class_defs: Section::default(),
                method_handles: None,
                call_sites: None,
            },
        }
    }
}
