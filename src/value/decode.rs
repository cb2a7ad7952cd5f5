//! Recursive-descent decoder for the tagged value representation.
//!
//! One routine dispatches on the 5-bit header tag and produces the explicit
//! [`EncodedValue`] union; every consumer (annotation merging, call-site
//! bootstrap arrays, static-initializer arrays) consumes that enum rather
//! than hooking into the decode itself. Index payloads are resolved to
//! canonical constants through the current file's [`Resolver`] as they are
//! read.
//!
//! Scalar payloads are extended back to full width according to their
//! kind's rule: sign extension for the signed integrals, zero extension for
//! char and the index kinds, and left-shifting for floats, whose dropped
//! trailing zero bytes must be restored to reconstruct the exact IEEE bit
//! pattern.

use crate::{
    file::Parser,
    pool::Resolver,
    value::{AnnotationElement, EncodedAnnotation, EncodedValue, ValueTag},
    Result,
};

fn read_unsigned(parser: &mut Parser, size: u32) -> Result<u64> {
    let mut value = 0u64;
    for i in 0..size {
        value |= u64::from(parser.read_le::<u8>()?) << (i * 8);
    }
    Ok(value)
}

fn read_signed(parser: &mut Parser, size: u32) -> Result<i64> {
    let raw = read_unsigned(parser, size)?;
    let shift = 64 - size * 8;
    #[allow(clippy::cast_possible_wrap)]
    Ok(((raw << shift) as i64) >> shift)
}

fn read_float_bits(parser: &mut Parser, size: u32, total_bytes: u32) -> Result<u64> {
    let raw = read_unsigned(parser, size)?;
    Ok(raw << ((total_bytes - size) * 8))
}

fn read_index(parser: &mut Parser, size: u32) -> Result<u32> {
    if size > 4 {
        return Err(malformed_error!("Index payload of {} bytes", size));
    }
    Ok(read_unsigned(parser, size)? as u32)
}

fn check_size(tag: ValueTag, size: u32, max: u32) -> Result<()> {
    if size > max {
        return Err(malformed_error!(
            "Value tag {:?} with payload of {} bytes (max {})",
            tag,
            size,
            max
        ));
    }
    Ok(())
}

/// Decode one value at the parser's position.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] for an unknown tag, an oversized
/// payload, an out-of-range embedded index, or a method-type/method-handle
/// tag in a file whose version predates them.
pub fn read_value(parser: &mut Parser, resolver: &mut Resolver) -> Result<EncodedValue> {
    let header = parser.read_le::<u8>()?;
    let arg = u32::from(header >> 5);
    let Some(tag) = ValueTag::from_repr(header & 0x1F) else {
        return Err(malformed_error!(
            "Unknown value tag {:#04x} at offset {}",
            header & 0x1F,
            parser.pos() - 1
        ));
    };
    let size = arg + 1;

    let value = match tag {
        ValueTag::Byte => {
            check_size(tag, size, 1)?;
            EncodedValue::Byte(read_signed(parser, size)? as i8)
        }
        ValueTag::Short => {
            check_size(tag, size, 2)?;
            EncodedValue::Short(read_signed(parser, size)? as i16)
        }
        ValueTag::Char => {
            check_size(tag, size, 2)?;
            EncodedValue::Char(read_unsigned(parser, size)? as u16)
        }
        ValueTag::Int => {
            check_size(tag, size, 4)?;
            EncodedValue::Int(read_signed(parser, size)? as i32)
        }
        ValueTag::Long => {
            check_size(tag, size, 8)?;
            EncodedValue::Long(read_signed(parser, size)?)
        }
        ValueTag::Float => {
            check_size(tag, size, 4)?;
            EncodedValue::Float(read_float_bits(parser, size, 4)? as u32)
        }
        ValueTag::Double => {
            check_size(tag, size, 8)?;
            EncodedValue::Double(read_float_bits(parser, size, 8)?)
        }
        ValueTag::MethodType => {
            require_invoke_custom(resolver, tag)?;
            let index = read_index(parser, size)?;
            EncodedValue::MethodType(resolver.proto(index)?)
        }
        ValueTag::MethodHandle => {
            require_invoke_custom(resolver, tag)?;
            let index = read_index(parser, size)?;
            EncodedValue::MethodHandle(resolver.method_handle(index)?)
        }
        ValueTag::String => {
            let index = read_index(parser, size)?;
            EncodedValue::String(resolver.string(index)?)
        }
        ValueTag::Type => {
            let index = read_index(parser, size)?;
            EncodedValue::Type(resolver.ty(index)?)
        }
        ValueTag::Field => {
            let index = read_index(parser, size)?;
            EncodedValue::Field(resolver.field(index)?)
        }
        ValueTag::Method => {
            let index = read_index(parser, size)?;
            EncodedValue::Method(resolver.method(index)?)
        }
        ValueTag::Enum => {
            let index = read_index(parser, size)?;
            EncodedValue::Enum(resolver.field(index)?)
        }
        ValueTag::Array => {
            if arg != 0 {
                return Err(malformed_error!("Array value with value_arg {}", arg));
            }
            EncodedValue::Array(read_array(parser, resolver)?)
        }
        ValueTag::Annotation => {
            if arg != 0 {
                return Err(malformed_error!("Annotation value with value_arg {}", arg));
            }
            EncodedValue::Annotation(read_annotation(parser, resolver)?)
        }
        ValueTag::Null => {
            if arg != 0 {
                return Err(malformed_error!("Null value with value_arg {}", arg));
            }
            EncodedValue::Null
        }
        ValueTag::Boolean => {
            check_size(tag, size, 2)?;
            EncodedValue::Boolean(arg == 1)
        }
    };

    Ok(value)
}

/// Decode an encoded_array body: ULEB128 count plus that many values.
///
/// # Errors
/// Propagates the errors of [`read_value`].
pub fn read_array(parser: &mut Parser, resolver: &mut Resolver) -> Result<Vec<EncodedValue>> {
    let count = parser.read_uleb128()?;
    let mut values = Vec::with_capacity(count as usize);
    for _ in 0..count {
        values.push(read_value(parser, resolver)?);
    }
    Ok(values)
}

/// Decode an encoded_annotation body: type index, element count, and the
/// name/value pairs.
///
/// # Errors
/// Propagates the errors of [`read_value`].
pub fn read_annotation(parser: &mut Parser, resolver: &mut Resolver) -> Result<EncodedAnnotation> {
    let type_idx = parser.read_uleb128()?;
    let ty = resolver.ty(type_idx)?;

    let count = parser.read_uleb128()?;
    let mut elements = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let name_idx = parser.read_uleb128()?;
        elements.push(AnnotationElement {
            name: resolver.string(name_idx)?,
            value: read_value(parser, resolver)?,
        });
    }

    Ok(EncodedAnnotation { ty, elements })
}

fn require_invoke_custom(resolver: &Resolver, tag: ValueTag) -> Result<()> {
    if !resolver.version().supports_invoke_custom() {
        return Err(malformed_error!(
            "Value tag {:?} requires format version 038, file is {:?}",
            tag,
            resolver.version()
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signed(bytes: &[u8], size: u32) -> i64 {
        read_signed(&mut Parser::new(bytes), size).unwrap()
    }

    #[test]
    fn signed_extension() {
        assert_eq!(signed(&[0xFF], 1), -1);
        assert_eq!(signed(&[0x7F], 1), 127);
        assert_eq!(signed(&[0x80], 1), -128);
        assert_eq!(signed(&[0x00, 0x80], 2), -32768);
    }

    #[test]
    fn unsigned_extension() {
        let mut parser = Parser::new(&[0xFF]);
        assert_eq!(read_unsigned(&mut parser, 1).unwrap(), 0xFF);
    }

    #[test]
    fn float_restores_trailing_zeros() {
        // Single byte 0x40 left-shifts back to 2.0f64's full pattern
        let mut parser = Parser::new(&[0x40]);
        let bits = read_float_bits(&mut parser, 1, 8).unwrap();
        assert_eq!(bits, 0x4000_0000_0000_0000);
        assert_eq!(f64::from_bits(bits), 2.0);

        let mut parser = Parser::new(&[0xC0, 0x3F]);
        let bits = read_float_bits(&mut parser, 2, 4).unwrap();
        assert_eq!(f32::from_bits(bits as u32), 1.5);
    }
}
