//! BER decoder

use crate::ber::types::{decode_length, read_base128, BerTag};
use crate::error::{DlmsError, DlmsResult};

/// Cursor over a sequence of BER TLV triplets
pub struct BerDecoder<'a> {
    buffer: &'a [u8],
    position: usize,
}

impl<'a> BerDecoder<'a> {
    pub fn new(buffer: &'a [u8]) -> Self {
        Self {
            buffer,
            position: 0,
        }
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn has_remaining(&self) -> bool {
        self.position < self.buffer.len()
    }

    /// Read the next TLV, returning its tag and content octets
    pub fn decode_tlv(&mut self) -> DlmsResult<(BerTag, &'a [u8])> {
        let rest = &self.buffer[self.position..];
        let (tag, tag_len) = BerTag::decode(rest)?;
        let (len, len_len) = decode_length(&rest[tag_len..])?;
        let start = tag_len + len_len;
        if rest.len() < start + len {
            return Err(DlmsError::Asn1Decoding(format!(
                "Value of tag {:?} needs {} bytes, {} left",
                tag,
                len,
                rest.len() - start
            )));
        }
        self.position += start + len;
        Ok((tag, &rest[start..start + len]))
    }

    /// Read the next TLV and check its tag
    pub fn expect(&mut self, expected: BerTag) -> DlmsResult<&'a [u8]> {
        let (tag, content) = self.decode_tlv()?;
        if tag != expected {
            return Err(DlmsError::Asn1Decoding(format!(
                "Expected tag {:?}, found {:?}",
                expected, tag
            )));
        }
        Ok(content)
    }
}

pub fn decode_object_identifier(content: &[u8]) -> DlmsResult<Vec<u32>> {
    if content.is_empty() {
        return Err(DlmsError::Asn1Decoding("Empty object identifier".to_string()));
    }
    let mut arcs = Vec::new();
    let mut pos = 0;
    while pos < content.len() {
        let (value, used) = read_base128(&content[pos..])?;
        if arcs.is_empty() {
            let first = (value / 40).min(2);
            arcs.push(first);
            arcs.push(value - first * 40);
        } else {
            arcs.push(value);
        }
        pos += used;
    }
    Ok(arcs)
}

/// Decode a non-negative INTEGER content
pub fn decode_unsigned(content: &[u8]) -> DlmsResult<u32> {
    if content.is_empty() || content.len() > 5 || (content.len() == 5 && content[0] != 0) {
        return Err(DlmsError::Asn1Decoding(format!(
            "Unsupported INTEGER of {} octets",
            content.len()
        )));
    }
    if content[0] & 0x80 != 0 {
        return Err(DlmsError::Asn1Decoding("Negative INTEGER".to_string()));
    }
    Ok(content.iter().fold(0u32, |acc, b| (acc << 8) | *b as u32))
}
