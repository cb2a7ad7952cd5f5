//! Container header and table of contents for dex files.
//!
//! The dex header carries fixed `(size, offset)` pairs for each id section;
//! the two optional sections introduced with format version 038 (method
//! handle ids and call site ids) have no header slot and are discovered by
//! scanning the map list. [`Toc`] unifies both into one section directory,
//! gated by [`DexVersion`].

use strum::FromRepr;

use crate::{file::parser::Parser, Result};

/// Size in bytes of the fixed dex header.
pub const HEADER_SIZE: u32 = 0x70;

/// Little-endian constant in the `endian_tag` header field.
pub const ENDIAN_CONSTANT: u32 = 0x1234_5678;

/// Byte-swapped endian constant; such files are not supported.
pub const REVERSE_ENDIAN_CONSTANT: u32 = 0x7856_3412;

/// Sentinel for an absent index (no superclass, no source file).
pub const NO_INDEX: u32 = 0xFFFF_FFFF;

/// Dex format version, taken from the three digits in the file magic
/// `dex\n0NN\0`.
///
/// Version 036 never shipped and is rejected along with unknown versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DexVersion {
    /// The original format version.
    V035,
    /// Adds support for default interface methods.
    V037,
    /// Adds method handles, call sites and `invoke-custom`/`invoke-polymorphic`.
    V038,
    /// Adds `const-method-handle`/`const-method-type`.
    V039,
    /// Relaxed identifier rules.
    V040,
    /// Container format revision.
    V041,
}

impl DexVersion {
    /// Decode the version from the 8-byte file magic.
    ///
    /// # Errors
    /// Returns [`crate::Error::NotSupported`] when the magic prefix or the
    /// version digits are not recognized.
    pub fn from_magic(magic: &[u8]) -> Result<Self> {
        if magic.len() < 8 || &magic[0..4] != b"dex\n" || magic[7] != 0 {
            return Err(crate::Error::NotSupported);
        }

        match &magic[4..7] {
            b"035" => Ok(DexVersion::V035),
            b"037" => Ok(DexVersion::V037),
            b"038" => Ok(DexVersion::V038),
            b"039" => Ok(DexVersion::V039),
            b"040" => Ok(DexVersion::V040),
            b"041" => Ok(DexVersion::V041),
            _ => Err(crate::Error::NotSupported),
        }
    }

    /// The three version digits as they appear in the magic.
    #[must_use]
    pub fn digits(self) -> &'static [u8; 3] {
        match self {
            DexVersion::V035 => b"035",
            DexVersion::V037 => b"037",
            DexVersion::V038 => b"038",
            DexVersion::V039 => b"039",
            DexVersion::V040 => b"040",
            DexVersion::V041 => b"041",
        }
    }

    /// Whether this version carries the optional method handle and call site
    /// sections (and the `invoke-custom` instruction family referencing them).
    #[must_use]
    pub fn supports_invoke_custom(self) -> bool {
        self >= DexVersion::V038
    }

    /// Whether this version carries the `const-method-handle` and
    /// `const-method-type` instructions.
    #[must_use]
    pub fn supports_const_method_types(self) -> bool {
        self >= DexVersion::V039
    }
}

/// Section type codes as they appear in map list entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromRepr)]
#[repr(u16)]
#[allow(missing_docs)]
pub enum MapItemType {
    HeaderItem = 0x0000,
    StringIdItem = 0x0001,
    TypeIdItem = 0x0002,
    ProtoIdItem = 0x0003,
    FieldIdItem = 0x0004,
    MethodIdItem = 0x0005,
    ClassDefItem = 0x0006,
    CallSiteIdItem = 0x0007,
    MethodHandleItem = 0x0008,
    MapList = 0x1000,
    TypeList = 0x1001,
    AnnotationSetRefList = 0x1002,
    AnnotationSetItem = 0x1003,
    ClassDataItem = 0x2000,
    CodeItem = 0x2001,
    StringDataItem = 0x2002,
    DebugInfoItem = 0x2003,
    AnnotationItem = 0x2004,
    EncodedArrayItem = 0x2005,
    AnnotationsDirectoryItem = 0x2006,
    HiddenapiClassDataItem = 0xF000,
}

/// One `(count, offset)` section descriptor.
///
/// For id sections `size` counts records; for the data section it counts
/// bytes, mirroring the header fields verbatim.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Section {
    /// Number of records (or bytes, for the data section).
    pub size: u32,
    /// Absolute file offset of the first record; 0 when the section is empty.
    pub offset: u32,
}

impl Section {
    /// Whether any records are present.
    #[must_use]
    pub fn is_present(&self) -> bool {
        self.size != 0
    }
}

/// The parsed fixed header of a dex file.
#[derive(Debug, Clone)]
pub struct Header {
    /// Format version decoded from the magic.
    pub version: DexVersion,
    /// adler32 over bytes 12..end.
    pub checksum: u32,
    /// SHA-1 over bytes 32..end.
    pub signature: [u8; 20],
    /// Total file size in bytes.
    pub file_size: u32,
    /// Header size; always 0x70.
    pub header_size: u32,
    /// Endianness constant; always [`ENDIAN_CONSTANT`] for supported files.
    pub endian_tag: u32,
    /// Link section (unused by this engine, preserved for completeness).
    pub link: Section,
    /// Offset of the map list inside the data section.
    pub map_off: u32,
    /// String id table.
    pub string_ids: Section,
    /// Type id table.
    pub type_ids: Section,
    /// Prototype id table.
    pub proto_ids: Section,
    /// Field id table.
    pub field_ids: Section,
    /// Method id table.
    pub method_ids: Section,
    /// Class definition table.
    pub class_defs: Section,
    /// Data section (size in bytes).
    pub data: Section,
}

impl Header {
    /// Parse the 112-byte header from the start of `data`.
    ///
    /// # Errors
    /// Returns [`crate::Error::NotSupported`] for an unknown magic or the
    /// byte-swapped endian constant, [`crate::Error::Malformed`] for
    /// inconsistent size fields, and [`crate::Error::OutOfBounds`] for a
    /// buffer shorter than the header.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_SIZE as usize {
            return Err(out_of_bounds_error!());
        }

        let version = DexVersion::from_magic(&data[0..8])?;

        let mut parser = Parser::new(data);
        parser.seek(8)?;

        let checksum = parser.read_le::<u32>()?;
        let mut signature = [0u8; 20];
        signature.copy_from_slice(&data[12..32]);
        parser.seek(32)?;

        let file_size = parser.read_le::<u32>()?;
        let header_size = parser.read_le::<u32>()?;
        let endian_tag = parser.read_le::<u32>()?;

        if endian_tag != ENDIAN_CONSTANT {
            // REVERSE_ENDIAN_CONSTANT included: big-endian files are nominally
            // legal but nothing produces them
            return Err(crate::Error::NotSupported);
        }
        if header_size != HEADER_SIZE {
            return Err(malformed_error!(
                "Header declares size {:#x}, expected {:#x}",
                header_size,
                HEADER_SIZE
            ));
        }
        if file_size as usize != data.len() {
            return Err(malformed_error!(
                "Header declares file size {} but buffer holds {} bytes",
                file_size,
                data.len()
            ));
        }

        let link_size = parser.read_le::<u32>()?;
        let link_off = parser.read_le::<u32>()?;
        let map_off = parser.read_le::<u32>()?;

        let read_section = |parser: &mut Parser| -> Result<Section> {
            let size = parser.read_le::<u32>()?;
            let offset = parser.read_le::<u32>()?;
            Ok(Section { size, offset })
        };

        let string_ids = read_section(&mut parser)?;
        let type_ids = read_section(&mut parser)?;
        let proto_ids = read_section(&mut parser)?;
        let field_ids = read_section(&mut parser)?;
        let method_ids = read_section(&mut parser)?;
        let class_defs = read_section(&mut parser)?;
        let data_section = read_section(&mut parser)?;

        Ok(Header {
            version,
            checksum,
            signature,
            file_size,
            header_size,
            endian_tag,
            link: Section {
                size: link_size,
                offset: link_off,
            },
            map_off,
            string_ids,
            type_ids,
            proto_ids,
            field_ids,
            method_ids,
            class_defs,
            data: data_section,
        })
    }
}

/// Unified table of contents: the header's fixed sections plus the optional
/// sections discovered from the map list.
#[derive(Debug, Clone)]
pub struct Toc {
    /// String id table.
    pub string_ids: Section,
    /// Type id table.
    pub type_ids: Section,
    /// Prototype id table.
    pub proto_ids: Section,
    /// Field id table.
    pub field_ids: Section,
    /// Method id table.
    pub method_ids: Section,
    /// Class definition table.
    pub class_defs: Section,
    /// Method handle table (version ≥ 038 only).
    pub method_handles: Option<Section>,
    /// Call site id table (version ≥ 038 only).
    pub call_sites: Option<Section>,
}

impl Toc {
    /// Build the table of contents from a parsed header and the map list it
    /// points at.
    ///
    /// The map is scanned only for the two optional sections; everything else
    /// is taken from the header. A method handle or call site map entry in a
    /// pre-038 file is a format error.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for a truncated or
    /// version-inconsistent map list.
    pub fn from_header(header: &Header, data: &[u8]) -> Result<Self> {
        let mut method_handles = None;
        let mut call_sites = None;

        if header.map_off != 0 {
            let mut parser = Parser::new(data);
            parser.seek(header.map_off as usize)?;

            let count = parser.read_le::<u32>()?;
            for _ in 0..count {
                let raw_type = parser.read_le::<u16>()?;
                let _unused = parser.read_le::<u16>()?;
                let size = parser.read_le::<u32>()?;
                let offset = parser.read_le::<u32>()?;

                match MapItemType::from_repr(raw_type) {
                    Some(MapItemType::MethodHandleItem) => {
                        if !header.version.supports_invoke_custom() {
                            return Err(malformed_error!(
                                "Method handle section in version {:?} file",
                                header.version
                            ));
                        }
                        method_handles = Some(Section { size, offset });
                    }
                    Some(MapItemType::CallSiteIdItem) => {
                        if !header.version.supports_invoke_custom() {
                            return Err(malformed_error!(
                                "Call site section in version {:?} file",
                                header.version
                            ));
                        }
                        call_sites = Some(Section { size, offset });
                    }
                    Some(_) => {}
                    None => {
                        return Err(malformed_error!(
                            "Unknown map item type {:#06x} at offset {}",
                            raw_type,
                            parser.pos() - 12
                        ));
                    }
                }
            }
        }

        Ok(Toc {
            string_ids: header.string_ids,
            type_ids: header.type_ids,
            proto_ids: header.proto_ids,
            field_ids: header.field_ids,
            method_ids: header.method_ids,
            class_defs: header.class_defs,
            method_handles,
            call_sites,
        })
    }

    /// Number of declared method handles (0 when the section is absent).
    #[must_use]
    pub fn method_handles_size(&self) -> u32 {
        self.method_handles.map_or(0, |s| s.size)
    }

    /// Number of declared call sites (0 when the section is absent).
    #[must_use]
    pub fn call_sites_size(&self) -> u32 {
        self.call_sites.map_or(0, |s| s.size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_from_magic() {
        assert_eq!(
            DexVersion::from_magic(b"dex\n035\0").unwrap(),
            DexVersion::V035
        );
        assert_eq!(
            DexVersion::from_magic(b"dex\n039\0").unwrap(),
            DexVersion::V039
        );
        assert!(DexVersion::from_magic(b"dex\n036\0").is_err());
        assert!(DexVersion::from_magic(b"dey\n035\0").is_err());
        assert!(DexVersion::from_magic(b"dex\n035 ").is_err());
    }

    #[test]
    fn version_gating() {
        assert!(!DexVersion::V035.supports_invoke_custom());
        assert!(!DexVersion::V037.supports_invoke_custom());
        assert!(DexVersion::V038.supports_invoke_custom());
        assert!(DexVersion::V041.supports_invoke_custom());
        assert!(!DexVersion::V038.supports_const_method_types());
        assert!(DexVersion::V039.supports_const_method_types());
    }

    #[test]
    fn map_item_types_round_trip() {
        assert_eq!(
            MapItemType::from_repr(0x2001),
            Some(MapItemType::CodeItem)
        );
        assert_eq!(MapItemType::from_repr(0x0042), None);
    }
}
