//! Modified UTF-8 (MUTF-8) codec for dex string data.
//!
//! Dex stores identifier and literal strings as MUTF-8: each UTF-16 code unit
//! is encoded independently as a 1, 2 or 3 byte sequence, `U+0000` uses the
//! two-byte overlong form `C0 80` so that the payload itself never contains a
//! raw NUL, and supplementary characters appear as an encoded surrogate pair
//! (two 3-byte sequences). The declared string length is counted in UTF-16
//! code units, not bytes and not code points.
//!
//! Decoding produces the UTF-16 code-unit sequence rather than a Rust
//! [`String`] because valid dex files may contain unpaired surrogates; the
//! byte payload is preserved verbatim by [`crate::constant::DexString`] for
//! bit-exact re-serialization.

use crate::Result;

/// Decode a NUL-terminated MUTF-8 payload into UTF-16 code units.
///
/// `bytes` is the raw string data *without* the trailing NUL byte.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] on a raw NUL byte, a dangling or
/// invalid continuation byte, or a 4-byte UTF-8 form (not legal in MUTF-8).
pub fn decode(bytes: &[u8]) -> Result<Vec<u16>> {
    let mut units = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        let b0 = bytes[i];
        match b0 {
            0x00 => {
                return Err(malformed_error!("Raw NUL byte at {} in MUTF-8 data", i));
            }
            0x01..=0x7F => {
                units.push(u16::from(b0));
                i += 1;
            }
            0xC0..=0xDF => {
                let b1 = continuation(bytes, i + 1)?;
                units.push((u16::from(b0 & 0x1F) << 6) | u16::from(b1));
                i += 2;
            }
            0xE0..=0xEF => {
                let b1 = continuation(bytes, i + 1)?;
                let b2 = continuation(bytes, i + 2)?;
                units.push((u16::from(b0 & 0x0F) << 12) | (u16::from(b1) << 6) | u16::from(b2));
                i += 3;
            }
            _ => {
                return Err(malformed_error!(
                    "Invalid MUTF-8 lead byte {:#04x} at {}",
                    b0,
                    i
                ));
            }
        }
    }

    Ok(units)
}

/// Encode UTF-16 code units as MUTF-8 bytes (without the trailing NUL).
#[must_use]
pub fn encode(units: &[u16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(units.len());

    for &unit in units {
        match unit {
            0x0000 => {
                // NUL uses the overlong two-byte form so the payload stays NUL-free
                out.push(0xC0);
                out.push(0x80);
            }
            0x0001..=0x007F => out.push(unit as u8),
            0x0080..=0x07FF => {
                out.push(0xC0 | (unit >> 6) as u8);
                out.push(0x80 | (unit & 0x3F) as u8);
            }
            _ => {
                out.push(0xE0 | (unit >> 12) as u8);
                out.push(0x80 | ((unit >> 6) & 0x3F) as u8);
                out.push(0x80 | (unit & 0x3F) as u8);
            }
        }
    }

    out
}

/// Encode a Rust string as (UTF-16 unit count, MUTF-8 payload).
#[must_use]
pub fn encode_str(s: &str) -> (u32, Vec<u8>) {
    let units: Vec<u16> = s.encode_utf16().collect();
    let len = units.len() as u32;
    (len, encode(&units))
}

fn continuation(bytes: &[u8], at: usize) -> Result<u8> {
    match bytes.get(at) {
        Some(&b) if (b & 0xC0) == 0x80 => Ok(b & 0x3F),
        Some(&b) => Err(malformed_error!(
            "Invalid MUTF-8 continuation byte {:#04x} at {}",
            b,
            at
        )),
        None => Err(malformed_error!("Truncated MUTF-8 sequence at {}", at)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_round_trip() {
        let (len, bytes) = encode_str("Ljava/lang/Object;");
        assert_eq!(len, 18);
        assert_eq!(bytes, b"Ljava/lang/Object;");
        assert_eq!(decode(&bytes).unwrap().len(), 18);
    }

    #[test]
    fn embedded_nul_uses_overlong_form() {
        let (len, bytes) = encode_str("a\0b");
        assert_eq!(len, 3);
        assert_eq!(bytes, [b'a', 0xC0, 0x80, b'b']);

        let units = decode(&bytes).unwrap();
        assert_eq!(units, [0x61, 0x00, 0x62]);
    }

    #[test]
    fn raw_nul_rejected() {
        assert!(decode(&[b'a', 0x00]).is_err());
    }

    #[test]
    fn two_and_three_byte_forms() {
        // U+00E9 'é' and U+4E2D '中'
        let (len, bytes) = encode_str("é中");
        assert_eq!(len, 2);
        assert_eq!(bytes, [0xC3, 0xA9, 0xE4, 0xB8, 0xAD]);
        assert_eq!(decode(&bytes).unwrap(), [0x00E9, 0x4E2D]);
    }

    #[test]
    fn supplementary_char_is_surrogate_pair() {
        // U+1F600 -> D83D DE00, each surrogate its own 3-byte sequence
        let (len, bytes) = encode_str("\u{1F600}");
        assert_eq!(len, 2);
        assert_eq!(bytes.len(), 6);

        let units = decode(&bytes).unwrap();
        assert_eq!(units, [0xD83D, 0xDE00]);
        assert_eq!(String::from_utf16(&units).unwrap(), "\u{1F600}");
    }

    #[test]
    fn dangling_continuation_rejected() {
        assert!(decode(&[0xC3]).is_err());
        assert!(decode(&[0xE4, 0xB8]).is_err());
        assert!(decode(&[0x80]).is_err());
        assert!(decode(&[0xF0, 0x9F, 0x98, 0x80]).is_err());
    }
}
