//! Minimal-width encoder for the tagged value representation.
//!
//! Each scalar is written with the fewest payload bytes that reconstruct it
//! exactly under the decoder's extension rule for its kind: sign extension
//! for the signed integrals, zero extension for the unsigned ones (char and
//! every index kind), and *right*-zero extension for floats, whose trailing
//! zero bytes are dropped and restored by shifting. Booleans ride entirely
//! in the header's size subfield, null is a bare header, arrays and
//! annotations recurse with their own ULEB128 counts.

use std::sync::Arc;

use crate::{
    constant::{DexString, DexType, FieldRef, MethodHandle, MethodRef, Proto},
    value::{AnnotationElement, EncodedAnnotation, EncodedValue, ValueTag},
    write::Writer,
};

/// Lookup of the final output index for each canonical constant.
///
/// Implemented by the serializer's index tables. Every lookup of a constant
/// that was never interned is an engine bug and panics.
pub trait ConstantIndexes {
    /// Final string table index.
    fn string_index(&self, value: &Arc<DexString>) -> u32;
    /// Final type table index.
    fn type_index(&self, value: &Arc<DexType>) -> u32;
    /// Final proto table index.
    fn proto_index(&self, value: &Arc<Proto>) -> u32;
    /// Final field table index.
    fn field_index(&self, value: &Arc<FieldRef>) -> u32;
    /// Final method table index.
    fn method_index(&self, value: &Arc<MethodRef>) -> u32;
    /// Final method handle table index.
    fn method_handle_index(&self, value: &Arc<MethodHandle>) -> u32;
}

fn write_header(writer: &mut Writer, tag: ValueTag, arg: u8) {
    debug_assert!(arg < 8, "value_arg {arg} exceeds 3 bits");
    writer.write_le::<u8>((tag as u8) | (arg << 5));
}

/// Payload width for a sign-extended integral: enough bytes for the value's
/// significant bits plus the sign bit.
fn signed_width(value: i64) -> u32 {
    let masked = value ^ (value >> 63);
    let bits = 65 - masked.leading_zeros();
    bits.div_ceil(8)
}

/// Payload width for a zero-extended integral, minimum one byte.
fn unsigned_width(value: u64) -> u32 {
    let bits = 64 - value.leading_zeros();
    bits.div_ceil(8).max(1)
}

fn write_signed(writer: &mut Writer, tag: ValueTag, value: i64) {
    let width = signed_width(value);
    write_header(writer, tag, (width - 1) as u8);
    let bytes = value.to_le_bytes();
    writer.write_bytes(&bytes[..width as usize]);
}

fn write_unsigned(writer: &mut Writer, tag: ValueTag, value: u64) {
    let width = unsigned_width(value);
    write_header(writer, tag, (width - 1) as u8);
    let bytes = value.to_le_bytes();
    writer.write_bytes(&bytes[..width as usize]);
}

fn write_float_bits(writer: &mut Writer, tag: ValueTag, bits: u64, total_bytes: u32) {
    let mut width = total_bytes;
    let mut payload = bits;
    while width > 1 && (payload & 0xFF) == 0 {
        payload >>= 8;
        width -= 1;
    }

    write_header(writer, tag, (width - 1) as u8);
    let bytes = payload.to_le_bytes();
    writer.write_bytes(&bytes[..width as usize]);
}

fn write_index(writer: &mut Writer, tag: ValueTag, index: u32) {
    write_unsigned(writer, tag, u64::from(index));
}

/// Serialize one value with all references mapped to final indices.
pub fn write_value<I: ConstantIndexes>(writer: &mut Writer, indexes: &I, value: &EncodedValue) {
    match value {
        EncodedValue::Byte(v) => write_signed(writer, ValueTag::Byte, i64::from(*v)),
        EncodedValue::Short(v) => write_signed(writer, ValueTag::Short, i64::from(*v)),
        EncodedValue::Char(v) => write_unsigned(writer, ValueTag::Char, u64::from(*v)),
        EncodedValue::Int(v) => write_signed(writer, ValueTag::Int, i64::from(*v)),
        EncodedValue::Long(v) => write_signed(writer, ValueTag::Long, *v),
        EncodedValue::Float(bits) => {
            write_float_bits(writer, ValueTag::Float, u64::from(*bits), 4);
        }
        EncodedValue::Double(bits) => write_float_bits(writer, ValueTag::Double, *bits, 8),
        EncodedValue::MethodType(proto) => {
            write_index(writer, ValueTag::MethodType, indexes.proto_index(proto));
        }
        EncodedValue::MethodHandle(handle) => write_index(
            writer,
            ValueTag::MethodHandle,
            indexes.method_handle_index(handle),
        ),
        EncodedValue::String(string) => {
            write_index(writer, ValueTag::String, indexes.string_index(string));
        }
        EncodedValue::Type(ty) => write_index(writer, ValueTag::Type, indexes.type_index(ty)),
        EncodedValue::Field(field) => {
            write_index(writer, ValueTag::Field, indexes.field_index(field));
        }
        EncodedValue::Method(method) => {
            write_index(writer, ValueTag::Method, indexes.method_index(method));
        }
        EncodedValue::Enum(field) => {
            write_index(writer, ValueTag::Enum, indexes.field_index(field));
        }
        EncodedValue::Array(values) => {
            write_header(writer, ValueTag::Array, 0);
            write_array(writer, indexes, values);
        }
        EncodedValue::Annotation(annotation) => {
            write_header(writer, ValueTag::Annotation, 0);
            write_annotation(writer, indexes, annotation);
        }
        EncodedValue::Null => write_header(writer, ValueTag::Null, 0),
        EncodedValue::Boolean(v) => write_header(writer, ValueTag::Boolean, u8::from(*v)),
    }
}

/// Serialize an encoded_array body: ULEB128 count plus each value.
pub fn write_array<I: ConstantIndexes>(
    writer: &mut Writer,
    indexes: &I,
    values: &[EncodedValue],
) {
    writer.write_uleb128(values.len() as u32);
    for value in values {
        write_value(writer, indexes, value);
    }
}

/// Serialize an encoded_annotation body: type index, element count, and the
/// name/value pairs in stored order.
pub fn write_annotation<I: ConstantIndexes>(
    writer: &mut Writer,
    indexes: &I,
    annotation: &EncodedAnnotation,
) {
    writer.write_uleb128(indexes.type_index(&annotation.ty));
    writer.write_uleb128(annotation.elements.len() as u32);
    for AnnotationElement { name, value } in &annotation.elements {
        writer.write_uleb128(indexes.string_index(name));
        write_value(writer, indexes, value);
    }
}
