//! BER tag and length encodings

use crate::error::{DlmsError, DlmsResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BerTagClass {
    Universal = 0,
    Application = 1,
    ContextSpecific = 2,
    Private = 3,
}

impl BerTagClass {
    fn from_bits(byte: u8) -> Self {
        match byte >> 6 {
            0 => BerTagClass::Universal,
            1 => BerTagClass::Application,
            2 => BerTagClass::ContextSpecific,
            _ => BerTagClass::Private,
        }
    }
}

/// Identifier octets of a BER value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BerTag {
    class: BerTagClass,
    constructed: bool,
    number: u32,
}

impl BerTag {
    pub const INTEGER: BerTag = BerTag::universal(false, 2);
    pub const BIT_STRING: BerTag = BerTag::universal(false, 3);
    pub const OCTET_STRING: BerTag = BerTag::universal(false, 4);
    pub const OBJECT_IDENTIFIER: BerTag = BerTag::universal(false, 6);
    pub const GRAPHIC_STRING: BerTag = BerTag::universal(false, 25);

    pub const fn new(class: BerTagClass, constructed: bool, number: u32) -> Self {
        Self {
            class,
            constructed,
            number,
        }
    }

    pub const fn universal(constructed: bool, number: u32) -> Self {
        Self::new(BerTagClass::Universal, constructed, number)
    }

    pub const fn application(constructed: bool, number: u32) -> Self {
        Self::new(BerTagClass::Application, constructed, number)
    }

    pub const fn context_specific(constructed: bool, number: u32) -> Self {
        Self::new(BerTagClass::ContextSpecific, constructed, number)
    }

    pub fn class(&self) -> BerTagClass {
        self.class
    }

    pub fn is_constructed(&self) -> bool {
        self.constructed
    }

    pub fn number(&self) -> u32 {
        self.number
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        let lead = ((self.class as u8) << 6) | if self.constructed { 0x20 } else { 0 };
        if self.number < 31 {
            out.push(lead | self.number as u8);
            return;
        }
        out.push(lead | 0x1F);
        push_base128(self.number, out);
    }

    /// Decode identifier octets, returning the tag and bytes consumed
    pub fn decode(data: &[u8]) -> DlmsResult<(Self, usize)> {
        let first = *data
            .first()
            .ok_or_else(|| DlmsError::Asn1Decoding("Empty buffer for tag".to_string()))?;
        let class = BerTagClass::from_bits(first);
        let constructed = first & 0x20 != 0;
        if first & 0x1F != 0x1F {
            return Ok((Self::new(class, constructed, (first & 0x1F) as u32), 1));
        }
        let (number, used) = read_base128(&data[1..])?;
        Ok((Self::new(class, constructed, number), 1 + used))
    }
}

/// Append `value` as base-128 digits, high bit set on all but the last
pub fn push_base128(value: u32, out: &mut Vec<u8>) {
    let mut digits = vec![(value & 0x7F) as u8];
    let mut rest = value >> 7;
    while rest > 0 {
        digits.push(0x80 | (rest & 0x7F) as u8);
        rest >>= 7;
    }
    out.extend(digits.iter().rev());
}

/// Read base-128 digits, returning the value and bytes consumed
pub fn read_base128(data: &[u8]) -> DlmsResult<(u32, usize)> {
    let mut value: u32 = 0;
    for (i, byte) in data.iter().enumerate() {
        if i >= 5 {
            break;
        }
        value = (value << 7) | (byte & 0x7F) as u32;
        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
    }
    Err(DlmsError::Asn1Decoding(
        "Unterminated or oversized base-128 value".to_string(),
    ))
}

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

/// Decode a definite length, returning it and the bytes consumed
pub fn decode_length(data: &[u8]) -> DlmsResult<(usize, usize)> {
    let first = *data
        .first()
        .ok_or_else(|| DlmsError::Asn1Decoding("Empty buffer for length".to_string()))?;
    if first & 0x80 == 0 {
        return Ok((first as usize, 1));
    }
    let count = (first & 0x7F) as usize;
    if count == 0 {
        return Err(DlmsError::Asn1Decoding(
            "Indefinite length is not supported".to_string(),
        ));
    }
    if count > 4 || data.len() < 1 + count {
        return Err(DlmsError::Asn1Decoding(format!(
            "Bad long-form length with {} octets",
            count
        )));
    }
    let len = data[1..=count]
        .iter()
        .fold(0usize, |acc, b| (acc << 8) | *b as usize);
    Ok((len, 1 + count))
}
