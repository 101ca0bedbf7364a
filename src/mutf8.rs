//! Modified UTF-8 (MUTF-8) codec compatible with HotSpot symbols.
//!
//! HPROF "UTF8" records are emitted from the HotSpot symbol table and use
//! modified UTF-8 (the `DataInput` UTF-8 serialization without the 2-byte
//! length prefix): NUL takes the overlong 2-byte form and supplementary
//! characters appear as surrogate pairs of 3-byte sequences. 4-byte
//! sequences never occur.

use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutf8Error {
    #[error("truncated modified UTF-8 sequence")]
    Truncated,
    #[error("invalid modified UTF-8 continuation byte")]
    InvalidContinuation,
    #[error("unsupported modified UTF-8 leading byte: {0:#04x}")]
    UnsupportedLeadingByte(u8),
}

pub fn decode(bytes: &[u8]) -> Result<String, Mutf8Error> {
    // Fast path: ASCII (and no NUL)
    if bytes.iter().all(|&b| b != 0 && b < 0x80) {
        return Ok(bytes.iter().map(|&b| b as char).collect());
    }

    let mut units: Vec<u16> = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if b == 0 {
            // not valid MUTF-8, but tolerate a stray NUL
            units.push(0);
            i += 1;
            continue;
        }
        if b < 0x80 {
            units.push(u16::from(b));
            i += 1;
            continue;
        }
        if b & 0xE0 == 0xC0 {
            if i + 1 >= bytes.len() {
                return Err(Mutf8Error::Truncated);
            }
            let b2 = bytes[i + 1];
            if b2 & 0xC0 != 0x80 {
                return Err(Mutf8Error::InvalidContinuation);
            }
            units.push((u16::from(b) & 0x1F) << 6 | (u16::from(b2) & 0x3F));
            i += 2;
            continue;
        }
        if b & 0xF0 == 0xE0 {
            if i + 2 >= bytes.len() {
                return Err(Mutf8Error::Truncated);
            }
            let b2 = bytes[i + 1];
            let b3 = bytes[i + 2];
            if b2 & 0xC0 != 0x80 || b3 & 0xC0 != 0x80 {
                return Err(Mutf8Error::InvalidContinuation);
            }
            units.push(
                (u16::from(b) & 0x0F) << 12 | (u16::from(b2) & 0x3F) << 6 | (u16::from(b3) & 0x3F),
            );
            i += 3;
            continue;
        }
        return Err(Mutf8Error::UnsupportedLeadingByte(b));
    }

    // surrogate pairs combine here; a lone half decodes to U+FFFD so the
    // symbol still reaches the transformer
    Ok(char::decode_utf16(units)
        .map(|unit| unit.unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect())
}

pub fn encode(value: &str) -> Vec<u8> {
    // Most symbols are ASCII.
    if value.bytes().all(|b| b != 0 && b < 0x80) {
        return value.as_bytes().to_vec();
    }

    let mut out = Vec::with_capacity(value.len());
    for unit in value.encode_utf16() {
        match unit {
            0x0001..=0x007F => out.push(unit as u8),
            0x0000 | 0x0080..=0x07FF => {
                out.push(0xC0 | ((unit >> 6) as u8 & 0x1F));
                out.push(0x80 | (unit as u8 & 0x3F));
            }
            _ => {
                out.push(0xE0 | ((unit >> 12) as u8 & 0x0F));
                out.push(0x80 | ((unit >> 6) as u8 & 0x3F));
                out.push(0x80 | (unit as u8 & 0x3F));
            }
        }
    }
    out
}

/// Byte length of `value` in MUTF-8, without encoding it.
pub fn encoded_len(value: &str) -> usize {
    value
        .encode_utf16()
        .map(|unit| match unit {
            0x0001..=0x007F => 1,
            0x0000 | 0x0080..=0x07FF => 2,
            _ => 3,
        })
        .sum()
}
