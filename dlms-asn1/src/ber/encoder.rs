//! BER encoder

use crate::ber::types::{encode_length, push_base128, BerTag};
use crate::error::{DlmsError, DlmsResult};

/// Accumulates BER TLV triplets
#[derive(Debug, Default)]
pub struct BerEncoder {
    buffer: Vec<u8>,
}

impl BerEncoder {
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    pub fn encode_tlv(&mut self, tag: BerTag, value: &[u8]) {
        tag.encode(&mut self.buffer);
        encode_length(value.len(), &mut self.buffer);
        self.buffer.extend_from_slice(value);
    }

    /// Encode a constructed value whose content is built by `build`
    pub fn encode_constructed<F>(&mut self, tag: BerTag, build: F) -> DlmsResult<()>
    where
        F: FnOnce(&mut BerEncoder) -> DlmsResult<()>,
    {
        let mut inner = BerEncoder::new();
        build(&mut inner)?;
        self.encode_tlv(tag, &inner.buffer);
        Ok(())
    }

    /// Encode a small non-negative INTEGER
    pub fn encode_integer(&mut self, tag: BerTag, value: u32) {
        let bytes = value.to_be_bytes();
        let skip = bytes.iter().take_while(|b| **b == 0).count().min(3);
        let mut content = Vec::with_capacity(5);
        // a set high bit would read as negative
        if bytes[skip] & 0x80 != 0 {
            content.push(0);
        }
        content.extend_from_slice(&bytes[skip..]);
        self.encode_tlv(tag, &content);
    }

    /// Encode the content octets of an OBJECT IDENTIFIER under `tag`
    pub fn encode_object_identifier(&mut self, tag: BerTag, arcs: &[u32]) -> DlmsResult<()> {
        let content = object_identifier_content(arcs)?;
        self.encode_tlv(tag, &content);
        Ok(())
    }

    /// BIT STRING whose first content octet is the unused-bit count
    pub fn encode_bit_string(&mut self, tag: BerTag, bytes: &[u8], unused_bits: u8) {
        let mut content = Vec::with_capacity(bytes.len() + 1);
        content.push(unused_bits);
        content.extend_from_slice(bytes);
        self.encode_tlv(tag, &content);
    }
}

pub fn object_identifier_content(arcs: &[u32]) -> DlmsResult<Vec<u8>> {
    if arcs.len() < 2 || arcs[0] > 2 || (arcs[0] < 2 && arcs[1] > 39) {
        return Err(DlmsError::Asn1Encoding(format!(
            "Invalid object identifier {:?}",
            arcs
        )));
    }
    let mut out = Vec::new();
    push_base128(arcs[0] * 40 + arcs[1], &mut out);
    for arc in &arcs[2..] {
        push_base128(*arc, &mut out);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dlms_context_oid() {
        // 2.16.756.5.8.1.1, LN referencing without ciphering
        let content = object_identifier_content(&[2, 16, 756, 5, 8, 1, 1]).unwrap();
        assert_eq!(content, vec![0x60, 0x85, 0x74, 0x05, 0x08, 0x01, 0x01]);
    }

    #[test]
    fn test_integer_minimal() {
        let mut enc = BerEncoder::new();
        enc.encode_integer(BerTag::INTEGER, 0);
        enc.encode_integer(BerTag::INTEGER, 0x80);
        enc.encode_integer(BerTag::INTEGER, 0x0102);
        assert_eq!(
            enc.into_bytes(),
            vec![0x02, 0x01, 0x00, 0x02, 0x02, 0x00, 0x80, 0x02, 0x02, 0x01, 0x02]
        );
    }

    #[test]
    fn test_constructed_nesting() {
        let mut enc = BerEncoder::new();
        enc.encode_constructed(BerTag::context_specific(true, 1), |inner| {
            inner.encode_object_identifier(BerTag::OBJECT_IDENTIFIER, &[2, 16, 756, 5, 8, 1, 1])
        })
        .unwrap();
        assert_eq!(
            enc.into_bytes(),
            vec![0xA1, 0x09, 0x06, 0x07, 0x60, 0x85, 0x74, 0x05, 0x08, 0x01, 0x01]
        );
    }

    #[test]
    fn test_bad_oid() {
        assert!(object_identifier_content(&[1]).is_err());
        assert!(object_identifier_content(&[1, 40]).is_err());
    }
}
