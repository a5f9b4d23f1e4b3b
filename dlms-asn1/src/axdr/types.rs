//! A-XDR type tags and length prefixes

use crate::error::{DlmsError, DlmsResult};

/// A-XDR tag values of the `Data` CHOICE
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AxdrTag {
    Null = 0x00,
    Array = 0x01,
    Structure = 0x02,
    Boolean = 0x03,
    BitString = 0x04,
    Integer32 = 0x05,
    Unsigned32 = 0x06,
    OctetString = 0x09,
    VisibleString = 0x0A,
    Utf8String = 0x0C,
    Bcd = 0x0D,
    Integer8 = 0x0F,
    Integer16 = 0x10,
    Unsigned8 = 0x11,
    Unsigned16 = 0x12,
    Integer64 = 0x14,
    Unsigned64 = 0x15,
    Enumerate = 0x16,
    Float32 = 0x17,
    Float64 = 0x18,
    DateTime = 0x19,
    Date = 0x1A,
    Time = 0x1B,
}

impl AxdrTag {
    /// Map a wire byte to a tag. Unknown and unsupported tags (compact-array
    /// included) return `None` so the caller can report where they occurred.
    pub fn from_u8(value: u8) -> Option<Self> {
        let tag = match value {
            0x00 => AxdrTag::Null,
            0x01 => AxdrTag::Array,
            0x02 => AxdrTag::Structure,
            0x03 => AxdrTag::Boolean,
            0x04 => AxdrTag::BitString,
            0x05 => AxdrTag::Integer32,
            0x06 => AxdrTag::Unsigned32,
            0x09 => AxdrTag::OctetString,
            0x0A => AxdrTag::VisibleString,
            0x0C => AxdrTag::Utf8String,
            0x0D => AxdrTag::Bcd,
            0x0F => AxdrTag::Integer8,
            0x10 => AxdrTag::Integer16,
            0x11 => AxdrTag::Unsigned8,
            0x12 => AxdrTag::Unsigned16,
            0x14 => AxdrTag::Integer64,
            0x15 => AxdrTag::Unsigned64,
            0x16 => AxdrTag::Enumerate,
            0x17 => AxdrTag::Float32,
            0x18 => AxdrTag::Float64,
            0x19 => AxdrTag::DateTime,
            0x1A => AxdrTag::Date,
            0x1B => AxdrTag::Time,
            _ => return None,
        };
        Some(tag)
    }

    pub fn to_u8(self) -> u8 {
        self as u8
    }
}

/// Encode a length prefix: one byte below 128, otherwise `0x80 | n`
/// followed by `n` big-endian bytes.
pub fn encode_length(len: usize, out: &mut Vec<u8>) {
    if len < 0x80 {
        out.push(len as u8);
        return;
    }
    let bytes = (len as u64).to_be_bytes();
    let skip = bytes.iter().take_while(|b| **b == 0).count();
    out.push(0x80 | (bytes.len() - skip) as u8);
    out.extend_from_slice(&bytes[skip..]);
}

/// Decode a length prefix, returning the length and the bytes consumed
pub fn decode_length(bytes: &[u8]) -> DlmsResult<(usize, usize)> {
    let first = *bytes
        .first()
        .ok_or_else(|| DlmsError::InvalidData("Not enough bytes for length".to_string()))?;
    if first & 0x80 == 0 {
        return Ok((first as usize, 1));
    }
    let count = (first & 0x7F) as usize;
    if count == 0 || count > 4 {
        return Err(DlmsError::InvalidData(format!(
            "Invalid length-of-length: {}",
            count
        )));
    }
    if bytes.len() < 1 + count {
        return Err(DlmsError::InvalidData(
            "Not enough bytes for long length".to_string(),
        ));
    }
    let len = bytes[1..=count]
        .iter()
        .fold(0usize, |acc, b| (acc << 8) | *b as usize);
    Ok((len, 1 + count))
}
