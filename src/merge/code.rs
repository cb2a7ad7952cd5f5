//! Code item import: instruction streams with remapped constant operands.
//!
//! The engine does not interpret bytecode semantics, but it must know every
//! instruction's width (to walk the stream) and which operand slot, if any,
//! carries a constant-pool index (to remap it). Both come from a per-opcode
//! format table. Imported instructions keep their raw 16-bit units plus the
//! resolved constants; the serializer patches final indices back into the
//! recorded slots.
//!
//! Try/catch tables and debug info are imported alongside, with their type
//! and string references resolved the same way.

use std::sync::Arc;

use crate::constant::{CallSite, DexString, DexType, FieldRef, MethodHandle, MethodRef, Proto};
use crate::file::{RawCode, RawDebugEvent, RawDebugInfo};
use crate::pool::Resolver;
use crate::Result;

/// A constant reference embedded in an instruction, with the unit slot it
/// occupies.
#[derive(Debug, Clone)]
pub struct InsnReference {
    /// Index of the first operand unit holding the constant index.
    pub slot: usize,
    /// Whether the index occupies two units (32 bits) instead of one.
    pub wide: bool,
    /// The resolved constant.
    pub target: RefTarget,
}

/// The kinds of constant an instruction operand can reference.
#[derive(Debug, Clone)]
pub enum RefTarget {
    /// String constant (`const-string`, `const-string/jumbo`).
    String(Arc<DexString>),
    /// Type constant (`const-class`, `check-cast`, `new-instance`, ...).
    Type(Arc<DexType>),
    /// Field reference (`iget`/`iput`/`sget`/`sput` families).
    Field(Arc<FieldRef>),
    /// Method reference (`invoke-*` families).
    Method(Arc<MethodRef>),
    /// Prototype (`invoke-polymorphic` second index, `const-method-type`).
    Proto(Arc<Proto>),
    /// Method handle (`const-method-handle`).
    MethodHandle(Arc<MethodHandle>),
    /// Call site (`invoke-custom` family).
    CallSite(Arc<CallSite>),
}

/// One imported instruction: verbatim units plus any embedded references.
#[derive(Debug, Clone)]
pub struct Instruction {
    /// The instruction's 16-bit units as read, index operands included.
    pub units: Vec<u16>,
    /// Embedded constant references, at most two (`invoke-polymorphic`).
    pub refs: Vec<InsnReference>,
}

/// A try region with its handler resolved by table index.
#[derive(Debug, Clone)]
pub struct TryBlock {
    /// First covered address in 16-bit units.
    pub start_addr: u32,
    /// Number of covered units.
    pub insn_count: u16,
    /// Index into [`CodeItem::handlers`].
    pub handler_index: usize,
}

/// A catch handler with resolved exception types.
#[derive(Debug, Clone)]
pub struct CatchHandler {
    /// `(exception type, handler address)` pairs in declaration order.
    pub catches: Vec<(Arc<DexType>, u32)>,
    /// Catch-all handler address, if present.
    pub catch_all: Option<u32>,
}

/// Debug info event with resolved references.
#[derive(Debug, Clone)]
pub enum DebugEvent {
    /// Advance the address register.
    AdvancePc(u32),
    /// Advance the line register.
    AdvanceLine(i32),
    /// Introduce a local variable.
    StartLocal {
        /// Register holding the local.
        register: u32,
        /// Local name.
        name: Option<Arc<DexString>>,
        /// Local type.
        ty: Option<Arc<DexType>>,
    },
    /// Introduce a local with a generic signature.
    StartLocalExtended {
        /// Register holding the local.
        register: u32,
        /// Local name.
        name: Option<Arc<DexString>>,
        /// Local type.
        ty: Option<Arc<DexType>>,
        /// Generic signature string.
        signature: Option<Arc<DexString>>,
    },
    /// A local goes out of scope.
    EndLocal(u32),
    /// A local comes back into scope.
    RestartLocal(u32),
    /// Prologue end marker.
    SetPrologueEnd,
    /// Epilogue begin marker.
    SetEpilogueBegin,
    /// Switch the current source file.
    SetFile(Option<Arc<DexString>>),
    /// Special opcode advancing both registers.
    Special(u8),
}

/// Imported debug info with resolved references.
#[derive(Debug, Clone)]
pub struct DebugInfo {
    /// Initial line register value.
    pub line_start: u32,
    /// Parameter names, absent entries preserved.
    pub parameter_names: Vec<Option<Arc<DexString>>>,
    /// Event sequence, end marker excluded.
    pub events: Vec<DebugEvent>,
}

/// An imported code item with every embedded constant reference remapped to
/// canonical constants.
#[derive(Debug, Clone)]
pub struct CodeItem {
    /// Number of registers.
    pub registers_size: u16,
    /// Incoming argument words.
    pub ins_size: u16,
    /// Outgoing argument words.
    pub outs_size: u16,
    /// Imported debug info, if the method carried any.
    pub debug_info: Option<DebugInfo>,
    /// Decoded instruction stream.
    pub instructions: Vec<Instruction>,
    /// Try regions.
    pub tries: Vec<TryBlock>,
    /// Catch handlers referenced by the try regions.
    pub handlers: Vec<CatchHandler>,
}

impl CodeItem {
    /// Total instruction stream length in 16-bit units.
    #[must_use]
    pub fn insns_unit_count(&self) -> u32 {
        self.instructions
            .iter()
            .map(|insn| insn.units.len() as u32)
            .sum()
    }
}

/// Which operand slot of an opcode carries a constant index, and of what
/// kind.
enum RefInfo {
    None,
    String,
    StringWide,
    Type,
    Field,
    Method,
    MethodAndProto,
    CallSite,
    MethodHandle,
    Proto,
}

/// Instruction width in 16-bit units, by opcode.
fn insn_width(opcode: u8) -> Result<usize> {
    let width = match opcode {
        0x00 | 0x01 | 0x04 | 0x07 => 1,
        0x02 | 0x05 | 0x08 => 2,
        0x03 | 0x06 | 0x09 => 3,
        0x0A..=0x12 => 1,
        0x13 | 0x15 | 0x16 | 0x19..=0x1A | 0x1C => 2,
        0x14 | 0x17 | 0x1B => 3,
        0x18 => 5,
        0x1D | 0x1E | 0x21 | 0x27 | 0x28 => 1,
        0x1F | 0x20 | 0x22 | 0x23 | 0x29 => 2,
        0x24 | 0x25 | 0x26 | 0x2A | 0x2B | 0x2C => 3,
        0x2D..=0x3D => 2,
        0x44..=0x6D => 2,
        0x6E..=0x72 | 0x74..=0x78 => 3,
        0x7B..=0x8F => 1,
        0x90..=0xAF => 2,
        0xB0..=0xCF => 1,
        0xD0..=0xE2 => 2,
        0xFA | 0xFB => 4,
        0xFC | 0xFD => 3,
        0xFE | 0xFF => 2,
        _ => {
            return Err(malformed_error!(
                "Unassigned opcode {:#04x} in instruction stream",
                opcode
            ));
        }
    };
    Ok(width)
}

fn ref_info(opcode: u8) -> RefInfo {
    match opcode {
        0x1A => RefInfo::String,
        0x1B => RefInfo::StringWide,
        0x1C | 0x1F | 0x20 | 0x22 | 0x23 | 0x24 | 0x25 => RefInfo::Type,
        0x52..=0x6D => RefInfo::Field,
        0x6E..=0x72 | 0x74..=0x78 => RefInfo::Method,
        0xFA | 0xFB => RefInfo::MethodAndProto,
        0xFC | 0xFD => RefInfo::CallSite,
        0xFE => RefInfo::MethodHandle,
        0xFF => RefInfo::Proto,
        _ => RefInfo::None,
    }
}

/// Width of a `nop`-family payload pseudo-instruction, or `None` for a
/// plain instruction word.
fn payload_width(insns: &[u16], pos: usize) -> Result<Option<usize>> {
    let ident = insns[pos];
    let width = match ident {
        // packed-switch-payload: ident, size, first_key(2), targets(2*size)
        0x0100 => {
            let size = read_payload_unit(insns, pos + 1)? as usize;
            4 + size * 2
        }
        // sparse-switch-payload: ident, size, keys(2*size), targets(2*size)
        0x0200 => {
            let size = read_payload_unit(insns, pos + 1)? as usize;
            2 + size * 4
        }
        // fill-array-data-payload: ident, element_width, size(2), data
        0x0300 => {
            let element_width = read_payload_unit(insns, pos + 1)? as usize;
            let size = u32::from(read_payload_unit(insns, pos + 2)?)
                | (u32::from(read_payload_unit(insns, pos + 3)?) << 16);
            4 + (size as usize * element_width).div_ceil(2)
        }
        _ => return Ok(None),
    };
    Ok(Some(width))
}

fn read_payload_unit(insns: &[u16], pos: usize) -> Result<u16> {
    insns
        .get(pos)
        .copied()
        .ok_or_else(|| malformed_error!("Truncated payload header at unit {}", pos))
}

fn unit_index(units: &[u16], slot: usize) -> u32 {
    u32::from(units[slot])
}

fn wide_index(units: &[u16], slot: usize) -> u32 {
    u32::from(units[slot]) | (u32::from(units[slot + 1]) << 16)
}

/// Import a raw code item, resolving every embedded constant reference.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] for truncated or unassigned
/// instructions, instructions above the file's format version, or dangling
/// constant indices.
pub fn import_code(resolver: &mut Resolver, raw: &RawCode) -> Result<CodeItem> {
    let mut instructions = Vec::new();
    let mut pos = 0usize;
    let insns = &raw.insns;

    while pos < insns.len() {
        let first = insns[pos];
        let opcode = (first & 0xFF) as u8;

        let width = if opcode == 0x00 {
            match payload_width(insns, pos)? {
                Some(width) => width,
                None => 1,
            }
        } else {
            insn_width(opcode)?
        };

        if pos + width > insns.len() {
            return Err(malformed_error!(
                "Instruction at unit {} overruns the stream ({} of {} units)",
                pos,
                width,
                insns.len() - pos
            ));
        }

        let units = insns[pos..pos + width].to_vec();
        let refs = resolve_refs(resolver, opcode, &units)?;
        instructions.push(Instruction { units, refs });
        pos += width;
    }

    let mut handlers = Vec::with_capacity(raw.handlers.len());
    for raw_handler in &raw.handlers {
        let mut catches = Vec::with_capacity(raw_handler.catches.len());
        for &(type_idx, addr) in &raw_handler.catches {
            catches.push((resolver.ty(type_idx)?, addr));
        }
        handlers.push(CatchHandler {
            catches,
            catch_all: raw_handler.catch_all,
        });
    }

    let tries = raw
        .tries
        .iter()
        .map(|t| TryBlock {
            start_addr: t.start_addr,
            insn_count: t.insn_count,
            handler_index: t.handler_index,
        })
        .collect();

    let debug_info = if raw.debug_info_off == 0 {
        None
    } else {
        let raw_info = resolver.file().debug_info_at(raw.debug_info_off)?;
        Some(import_debug_info(resolver, &raw_info)?)
    };

    Ok(CodeItem {
        registers_size: raw.registers_size,
        ins_size: raw.ins_size,
        outs_size: raw.outs_size,
        debug_info,
        instructions,
        tries,
        handlers,
    })
}

fn resolve_refs(resolver: &mut Resolver, opcode: u8, units: &[u16]) -> Result<Vec<InsnReference>> {
    let version = resolver.version();
    if matches!(opcode, 0xFA..=0xFD) && !version.supports_invoke_custom() {
        return Err(malformed_error!(
            "Opcode {:#04x} requires format version 038, file is {:?}",
            opcode,
            version
        ));
    }
    if matches!(opcode, 0xFE | 0xFF) && !version.supports_const_method_types() {
        return Err(malformed_error!(
            "Opcode {:#04x} requires format version 039, file is {:?}",
            opcode,
            version
        ));
    }

    let refs = match ref_info(opcode) {
        RefInfo::None => Vec::new(),
        RefInfo::String => vec![InsnReference {
            slot: 1,
            wide: false,
            target: RefTarget::String(resolver.string(unit_index(units, 1))?),
        }],
        RefInfo::StringWide => vec![InsnReference {
            slot: 1,
            wide: true,
            target: RefTarget::String(resolver.string(wide_index(units, 1))?),
        }],
        RefInfo::Type => vec![InsnReference {
            slot: 1,
            wide: false,
            target: RefTarget::Type(resolver.ty(unit_index(units, 1))?),
        }],
        RefInfo::Field => vec![InsnReference {
            slot: 1,
            wide: false,
            target: RefTarget::Field(resolver.field(unit_index(units, 1))?),
        }],
        RefInfo::Method => vec![InsnReference {
            slot: 1,
            wide: false,
            target: RefTarget::Method(resolver.method(unit_index(units, 1))?),
        }],
        RefInfo::MethodAndProto => vec![
            InsnReference {
                slot: 1,
                wide: false,
                target: RefTarget::Method(resolver.method(unit_index(units, 1))?),
            },
            InsnReference {
                slot: 3,
                wide: false,
                target: RefTarget::Proto(resolver.proto(unit_index(units, 3))?),
            },
        ],
        RefInfo::CallSite => vec![InsnReference {
            slot: 1,
            wide: false,
            target: RefTarget::CallSite(resolver.call_site(unit_index(units, 1))?),
        }],
        RefInfo::MethodHandle => vec![InsnReference {
            slot: 1,
            wide: false,
            target: RefTarget::MethodHandle(resolver.method_handle(unit_index(units, 1))?),
        }],
        RefInfo::Proto => vec![InsnReference {
            slot: 1,
            wide: false,
            target: RefTarget::Proto(resolver.proto(unit_index(units, 1))?),
        }],
    };

    Ok(refs)
}

fn import_debug_info(resolver: &mut Resolver, raw: &RawDebugInfo) -> Result<DebugInfo> {
    let mut parameter_names = Vec::with_capacity(raw.parameter_names.len());
    for &name_idx in &raw.parameter_names {
        parameter_names.push(resolve_opt_string(resolver, name_idx)?);
    }

    let mut events = Vec::with_capacity(raw.events.len());
    for &event in &raw.events {
        let imported = match event {
            RawDebugEvent::AdvancePc(units) => DebugEvent::AdvancePc(units),
            RawDebugEvent::AdvanceLine(lines) => DebugEvent::AdvanceLine(lines),
            RawDebugEvent::StartLocal {
                register,
                name_idx,
                type_idx,
            } => DebugEvent::StartLocal {
                register,
                name: resolve_opt_string(resolver, name_idx)?,
                ty: resolve_opt_type(resolver, type_idx)?,
            },
            RawDebugEvent::StartLocalExtended {
                register,
                name_idx,
                type_idx,
                sig_idx,
            } => DebugEvent::StartLocalExtended {
                register,
                name: resolve_opt_string(resolver, name_idx)?,
                ty: resolve_opt_type(resolver, type_idx)?,
                signature: resolve_opt_string(resolver, sig_idx)?,
            },
            RawDebugEvent::EndLocal(register) => DebugEvent::EndLocal(register),
            RawDebugEvent::RestartLocal(register) => DebugEvent::RestartLocal(register),
            RawDebugEvent::SetPrologueEnd => DebugEvent::SetPrologueEnd,
            RawDebugEvent::SetEpilogueBegin => DebugEvent::SetEpilogueBegin,
            RawDebugEvent::SetFile(name_idx) => {
                DebugEvent::SetFile(resolve_opt_string(resolver, name_idx)?)
            }
            RawDebugEvent::Special(opcode) => DebugEvent::Special(opcode),
        };
        events.push(imported);
    }

    Ok(DebugInfo {
        line_start: raw.line_start,
        parameter_names,
        events,
    })
}

fn resolve_opt_string(
    resolver: &mut Resolver,
    index: Option<u32>,
) -> Result<Option<Arc<DexString>>> {
    index.map(|idx| resolver.string(idx)).transpose()
}

fn resolve_opt_type(resolver: &mut Resolver, index: Option<u32>) -> Result<Option<Arc<DexType>>> {
    index.map(|idx| resolver.ty(idx)).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn widths_cover_reference_formats() {
        assert_eq!(insn_width(0x1A).unwrap(), 2); // const-string
        assert_eq!(insn_width(0x1B).unwrap(), 3); // const-string/jumbo
        assert_eq!(insn_width(0x6E).unwrap(), 3); // invoke-virtual
        assert_eq!(insn_width(0x18).unwrap(), 5); // const-wide
        assert_eq!(insn_width(0xFA).unwrap(), 4); // invoke-polymorphic
        assert!(insn_width(0x73).is_err());
        assert!(insn_width(0xE3).is_err());
    }

    #[test]
    fn payload_widths() {
        // packed-switch with 2 targets
        let insns = [0x0100, 2, 0, 0, 1, 0, 2, 0];
        assert_eq!(payload_width(&insns, 0).unwrap(), Some(8));

        // sparse-switch with 1 entry
        let insns = [0x0200, 1, 5, 0, 9, 0];
        assert_eq!(payload_width(&insns, 0).unwrap(), Some(6));

        // fill-array-data: 3 elements of width 2 -> 3 data units
        let insns = [0x0300, 2, 3, 0, 0, 0, 0];
        assert_eq!(payload_width(&insns, 0).unwrap(), Some(7));

        // plain nop
        let insns = [0x0000];
        assert_eq!(payload_width(&insns, 0).unwrap(), None);
    }

    #[test]
    fn wide_index_assembly() {
        let units = [0x001B, 0x5678, 0x1234];
        assert_eq!(wide_index(&units, 1), 0x1234_5678);
    }
}
